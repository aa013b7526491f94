//! Background flushing and idle eviction.

use crate::engine::PipelineCore;
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Starts the maintenance loop on the current runtime. The loop holds only a
/// weak reference and ends once the pipeline is dropped or shut down.
pub(crate) fn spawn(
    core: Weak<PipelineCore>,
    interval: Duration,
    evict_idle: bool,
) -> Option<JoinHandle<()>> {
    let Ok(runtime) = Handle::try_current() else {
        warn!("No tokio runtime available, background flushing disabled");
        return None;
    };

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(core) = core.upgrade() else {
                break;
            };
            if !core.is_running() {
                break;
            }

            match core.save_resident(false).await {
                Ok(count) => debug!("Flushed {count} object(s)"),
                Err(e) => warn!("Background flush failed: {e}"),
            }
            if evict_idle {
                match core.evict_idle().await {
                    Ok(0) => {}
                    Ok(count) => debug!("Evicted {count} idle object(s)"),
                    Err(e) => warn!("Idle eviction failed: {e}"),
                }
            }
        }
        debug!("Maintenance task stopped");
    }))
}
