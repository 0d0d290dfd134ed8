use ephemera_core::Runtime;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Remove everything past its retention deadline once. Returns the number of
/// root entities purged, or 0 if the sweep failed.
pub fn sweep_once(runtime: &Runtime) -> usize {
    match runtime.purge_expired() {
        Ok(0) => 0,
        Ok(purged) => {
            info!("Purged {} expired entities", purged);
            purged
        }
        Err(e) => {
            error!("Expiry sweep failed: {}", e);
            0
        }
    }
}

/// Start the periodic expiry sweep.
pub fn spawn_expiry_sweep(runtime: Runtime, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            sweep_once(&runtime);
        }
    })
}
