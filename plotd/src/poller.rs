//! Background position poller.
//!
//! While no job is active, query the controller position on a fixed
//! cadence so clients keep seeing `position:update` events. During a
//! job the response stream drives updates and the poller stays quiet.

use crate::jobs::JobManager;
use crate::transport::ControllerTransport;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn spawn(
    transport: ControllerTransport,
    jobs: JobManager,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !transport.is_ready() {
                continue;
            }
            if jobs.active_job_id().await.is_some() {
                continue;
            }
            if let Err(e) = transport.get_position().await {
                debug!("position poll failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::jobs::JobManagerConfig;
    use crate::transport::TransportEvent;
    use std::sync::Arc;

    #[tokio::test]
    async fn idle_poller_emits_position_events() {
        let transport = ControllerTransport::simulated_with_delay(Duration::ZERO);
        let jobs = JobManager::new(
            Arc::new(transport.clone()),
            EventBus::new(),
            JobManagerConfig::default(),
        );
        let mut events = transport.subscribe();

        let handle = spawn(transport, jobs, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        let mut saw_position = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TransportEvent::Position(_)) {
                saw_position = true;
            }
        }
        assert!(saw_position);
    }
}
