//! Periodic diagnostic sensors

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::entities::SensorEntity;

/// Publish process uptime to `sensor` every `interval` until cancelled
pub async fn run_uptime_poller(
    sensor: Arc<SensorEntity>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                #[allow(clippy::cast_precision_loss)]
                let uptime = started.elapsed().as_secs() as f32;
                sensor.update_state(uptime);
            }
        }
    }
    tracing::debug!("diagnostics poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityInfo;

    #[tokio::test(start_paused = true)]
    async fn test_uptime_advances_until_cancelled() {
        let sensor = Arc::new(SensorEntity::new(EntityInfo::new(8, "Uptime", "uptime"), 0.0));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_uptime_poller(
            Arc::clone(&sensor),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!((sensor.value() - 20.0).abs() < f32::EPSILON);

        cancel.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!((sensor.value() - 20.0).abs() < f32::EPSILON);
    }
}
