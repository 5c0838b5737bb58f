//! Ctrl-C observation for the blocking poll loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set `stop` when Ctrl-C arrives.
///
/// The signal is awaited on a dedicated thread with its own current-thread
/// runtime, so callers keep a plain synchronous loop that checks the flag.
pub fn watch_ctrl_c(stop: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("sphaira-signal".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!("Ctrl-C handling unavailable: {e}");
                    return;
                }
            };
            match runtime.block_on(tokio::signal::ctrl_c()) {
                Ok(()) => {
                    tracing::info!("Ctrl-C received, shutting down");
                    stop.store(true, Ordering::Relaxed);
                }
                Err(e) => tracing::warn!("Ctrl-C handling failed: {e}"),
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to spawn signal thread: {e}");
    }
}
