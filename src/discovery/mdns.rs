//! mDNS service advertisement
//!
//! Advertises the satellite the way hub integrations expect to find native
//! API devices.
//!
//! Service type: `_esphomelib._tcp.local.`
//! Instance name: the node name
//!
//! TXT records:
//! - `version`: satellite version
//! - `mac`: MAC address without separators, lower case
//! - `board`, `platform`, `network`: fixed host values

use std::collections::HashMap;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tokio::sync::RwLock;

use crate::{Error, Result};

/// mDNS service type for native API devices
pub const SERVICE_TYPE: &str = "_esphomelib._tcp.local.";

/// mDNS advertiser for the satellite
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,

    /// Full name of the registered service, if any
    registered_service: Arc<RwLock<Option<String>>>,
}

/// TXT record properties for a node
#[must_use]
pub fn txt_properties(mac_address: &str) -> HashMap<String, String> {
    let mac: String = mac_address
        .chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<String>()
        .to_lowercase();

    HashMap::from([
        ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
        ("mac".to_string(), mac),
        ("board".to_string(), "host".to_string()),
        ("platform".to_string(), "HOST".to_string()),
        ("network".to_string(), "wifi".to_string()),
    ])
}

impl MdnsAdvertiser {
    /// Create a new mDNS advertiser
    ///
    /// # Errors
    ///
    /// Returns error if mDNS daemon cannot be created
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Discovery(format!("failed to create mDNS daemon: {e}")))?;

        Ok(Self {
            daemon,
            registered_service: Arc::new(RwLock::new(None)),
        })
    }

    /// Start advertising `name` on `port`
    ///
    /// # Errors
    ///
    /// Returns error if service cannot be registered
    pub async fn start(&self, name: &str, mac_address: &str, port: u16) -> Result<()> {
        let hostname = hostname::get()
            .map_or_else(|_| name.to_string(), |h| h.to_string_lossy().to_string());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            name,
            &format!("{hostname}.local."),
            "",
            port,
            txt_properties(mac_address),
        )
        .map_err(|e| Error::Discovery(format!("failed to create service info: {e}")))?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();

        self.daemon
            .register(service)
            .map_err(|e| Error::Discovery(format!("failed to register mDNS service: {e}")))?;

        *self.registered_service.write().await = Some(fullname);

        tracing::info!(
            service_type = SERVICE_TYPE,
            instance = name,
            port,
            "mDNS service registered"
        );

        Ok(())
    }

    /// Stop advertising
    pub async fn stop(&self) {
        let fullname = self.registered_service.write().await.take();

        if let Some(name) = fullname {
            if let Err(e) = self.daemon.unregister(&name) {
                tracing::warn!(error = %e, "failed to unregister mDNS service");
            } else {
                tracing::info!("mDNS service unregistered");
            }
        }
    }

    /// Check if currently advertising
    pub async fn is_advertising(&self) -> bool {
        self.registered_service.read().await.is_some()
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        if let Ok(guard) = self.registered_service.try_read() {
            if let Some(name) = guard.as_ref() {
                let _ = self.daemon.unregister(name);
            }
        }
        if let Err(e) = self.daemon.shutdown() {
            tracing::trace!(error = %e, "mDNS daemon shutdown error (expected on normal exit)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_format() {
        assert!(SERVICE_TYPE.ends_with(".local."));
        assert!(SERVICE_TYPE.starts_with("_esphomelib"));
        assert!(SERVICE_TYPE.contains("._tcp."));
    }

    #[test]
    fn test_txt_properties() {
        let props = txt_properties("AA:BB:CC:00:11:22");
        assert_eq!(props["mac"], "aabbcc001122");
        assert_eq!(props["platform"], "HOST");
        assert_eq!(props["board"], "host");
        assert_eq!(props["network"], "wifi");
        assert!(props.contains_key("version"));
    }

    #[tokio::test]
    async fn test_advertiser_creation() {
        // mDNS may be unavailable in CI
        if let Ok(advertiser) = MdnsAdvertiser::new() {
            assert!(!advertiser.is_advertising().await);
        }
    }
}
