//! UDP wake-word arbitration
//!
//! Every satellite that hears the same wake word broadcasts a claim
//! `device_id|timestamp_ms|wake_word_id` and listens for competing claims
//! for a short window. The earliest timestamp wins, ties broken by the
//! lexicographically smallest device id. Any failure answers "respond" so a
//! lone device never goes deaf.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::config::ArbiterConfig;
use crate::{Error, Result};

/// Largest claim datagram read
pub const PACKET_SIZE: usize = 128;

/// Outcome of one arbitration round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterResult {
    pub should_respond: bool,
    /// `no_competitors`, `won`, `lost_to_<id>` or `error_fallback`
    pub reason: String,
    pub competitor_count: usize,
}

impl ArbiterResult {
    fn fallback() -> Self {
        Self {
            should_respond: true,
            reason: "error_fallback".to_string(),
            competitor_count: 0,
        }
    }
}

/// A wake claim from one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub device_id: String,
    pub timestamp_ms: i64,
    pub wake_word: String,
}

impl Claim {
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.device_id, self.timestamp_ms, self.wake_word)
    }

    /// Parse a claim; anything that is not three `|`-separated fields with a
    /// numeric timestamp is rejected
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.trim().split('|');
        let device_id = parts.next()?;
        let timestamp_ms = parts.next()?.parse().ok()?;
        let wake_word = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            device_id: device_id.to_string(),
            timestamp_ms,
            wake_word: wake_word.to_string(),
        })
    }
}

/// Pick the winning device id: earliest timestamp, then smallest id
#[must_use]
pub fn select_winner<'a>(own: (&'a str, i64), competitors: &'a [Claim]) -> &'a str {
    competitors
        .iter()
        .map(|c| (c.device_id.as_str(), c.timestamp_ms))
        .chain(std::iter::once(own))
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map_or(own.0, |(id, _)| id)
}

/// Bind a broadcast socket other satellites on this host can bind as well
fn bind_shared(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())
        .map_err(|e| Error::Arbiter(format!("bind port {port}: {e}")))?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Coordinates wake responses between satellites on the same LAN
#[derive(Debug, Clone)]
pub struct WakeArbiter {
    device_id: String,
    port: u16,
    window: Duration,
    max_skew_ms: i64,
}

impl WakeArbiter {
    /// Create an arbiter with a fresh random device id
    #[must_use]
    pub fn new(config: &ArbiterConfig) -> Self {
        let device_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self::with_device_id(config, device_id)
    }

    #[must_use]
    pub fn with_device_id(config: &ArbiterConfig, device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            port: config.port,
            window: config.window,
            max_skew_ms: config.max_skew_ms,
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Run one arbitration round for `wake_word`, claiming the current time
    pub async fn arbitrate(&self, wake_word: &str) -> ArbiterResult {
        self.arbitrate_at(wake_word, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Run one arbitration round with an explicit claim timestamp
    pub async fn arbitrate_at(&self, wake_word: &str, timestamp_ms: i64) -> ArbiterResult {
        match self.try_arbitrate(wake_word, timestamp_ms).await {
            Ok(result) => {
                tracing::debug!(
                    should_respond = result.should_respond,
                    reason = %result.reason,
                    competitors = result.competitor_count,
                    "wake arbitration finished"
                );
                result
            }
            Err(e) => {
                tracing::warn!(error = %e, "wake arbitration failed, responding anyway");
                ArbiterResult::fallback()
            }
        }
    }

    async fn try_arbitrate(&self, wake_word: &str, timestamp_ms: i64) -> Result<ArbiterResult> {
        let socket = bind_shared(self.port)?;

        let claim = Claim {
            device_id: self.device_id.clone(),
            timestamp_ms,
            wake_word: wake_word.to_string(),
        };
        let target = SocketAddr::from((Ipv4Addr::BROADCAST, self.port));
        socket.send_to(claim.encode().as_bytes(), target).await?;
        tracing::debug!(device_id = %self.device_id, timestamp_ms, wake_word, "wake claim sent");

        let competitors = self.collect(&socket, &claim).await?;
        if competitors.is_empty() {
            return Ok(ArbiterResult {
                should_respond: true,
                reason: "no_competitors".to_string(),
                competitor_count: 0,
            });
        }

        let winner = select_winner((self.device_id.as_str(), timestamp_ms), &competitors);
        let should_respond = winner == self.device_id;
        Ok(ArbiterResult {
            should_respond,
            reason: if should_respond {
                "won".to_string()
            } else {
                format!("lost_to_{winner}")
            },
            competitor_count: competitors.len(),
        })
    }

    async fn collect(&self, socket: &UdpSocket, own: &Claim) -> Result<Vec<Claim>> {
        let deadline = Instant::now() + self.window;
        let mut competitors = Vec::new();
        let mut buf = [0u8; PACKET_SIZE];

        loop {
            let received = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };
            let (len, from) = received;

            let Some(claim) = std::str::from_utf8(&buf[..len]).ok().and_then(Claim::parse) else {
                tracing::trace!(%from, "ignoring malformed wake claim");
                continue;
            };
            if claim.device_id == own.device_id
                || claim.wake_word != own.wake_word
                || (claim.timestamp_ms - own.timestamp_ms).abs() > self.max_skew_ms
            {
                continue;
            }

            tracing::debug!(device_id = %claim.device_id, timestamp_ms = claim.timestamp_ms, "competing wake claim");
            competitors.push(claim);
        }

        Ok(competitors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(id: &str, ts: i64) -> Claim {
        Claim {
            device_id: id.to_string(),
            timestamp_ms: ts,
            wake_word: "okay_nabu".to_string(),
        }
    }

    #[test]
    fn test_claim_format() {
        let c = claim("ab12cd34", 1_700_000_000_123);
        assert_eq!(c.encode(), "ab12cd34|1700000000123|okay_nabu");
        assert_eq!(Claim::parse(&c.encode()), Some(c));
    }

    #[test]
    fn test_malformed_claims_rejected() {
        assert_eq!(Claim::parse("just-garbage"), None);
        assert_eq!(Claim::parse("id|notanumber|okay_nabu"), None);
        assert_eq!(Claim::parse("id|1|okay_nabu|extra"), None);
    }

    #[test]
    fn test_earliest_timestamp_wins() {
        let competitors = [claim("zzzz", 100), claim("bbbb", 120)];
        assert_eq!(select_winner(("aaaa", 110), &competitors), "zzzz");
    }

    #[test]
    fn test_tie_broken_by_smallest_id() {
        let competitors = [claim("bbbb", 100)];
        assert_eq!(select_winner(("aaaa", 100), &competitors), "aaaa");
        assert_eq!(select_winner(("cccc", 100), &competitors), "bbbb");
    }

    fn permutations(items: &[(&'static str, i64)]) -> Vec<Vec<(&'static str, i64)>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut all = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let first = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, first);
                all.push(tail);
            }
        }
        all
    }

    #[test]
    fn test_winner_independent_of_order_and_viewpoint() {
        let devices = [("cccc", 100), ("aaaa", 105), ("bbbb", 100), ("dddd", 130)];

        for order in permutations(&devices) {
            let (own, others) = order.split_first().unwrap();
            let competitors: Vec<Claim> = others.iter().map(|(id, ts)| claim(id, *ts)).collect();
            assert_eq!(select_winner(*own, &competitors), "bbbb", "order {order:?}");
        }
    }

    #[test]
    fn test_device_id_is_short() {
        let arbiter = WakeArbiter::new(&ArbiterConfig::default());
        assert_eq!(arbiter.device_id().len(), 8);
    }

    #[tokio::test]
    async fn test_port_shared_between_satellites() {
        let first = bind_shared(0).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_shared(port).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_bind_failure_fails_open() {
        let held = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let config = ArbiterConfig {
            port: held.local_addr().unwrap().port(),
            ..ArbiterConfig::default()
        };

        let result = WakeArbiter::new(&config).arbitrate("okay_nabu").await;
        assert!(result.should_respond);
        assert_eq!(result.reason, "error_fallback");
        assert_eq!(result.competitor_count, 0);
    }
}
