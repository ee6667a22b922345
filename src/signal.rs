//! Cooperative shutdown on Ctrl+C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// Shutdown flag shared between a signal handler and a processing loop.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Create a handle in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install a Ctrl+C handler that trips the returned handle.
///
/// # Example
/// ```ignore
/// let stop = install_ctrlc_handler()?;
/// while !stop.is_stopped() {
///     // ... do work ...
/// }
/// ```
pub fn install_ctrlc_handler() -> Result<StopHandle, ctrlc::Error> {
    let stop = StopHandle::new();
    let handle = stop.clone();
    ctrlc::set_handler(move || {
        info!("received Ctrl+C, shutting down");
        handle.stop();
    })?;
    Ok(stop)
}
