//! Cooperative interrupt handling
//!
//! A [`ShutdownSignal`] is a shared flag polled by the checker between items
//! and by the comparator between chunks. [`ShutdownSignal::install`] wires it
//! to SIGINT and SIGTERM: the first signal sets the flag so the walk can stop
//! and persist its pending work, a second one exits immediately with status
//! 130.
//!
//! Signals are awaited on a dedicated thread running a current-thread tokio
//! runtime, so the checking loop itself stays synchronous.

use crate::error::{CheckError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit status used when a second signal forces the process down
pub const FORCED_EXIT_CODE: i32 = 130;

/// Shared "stop as soon as possible" flag
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create an untriggered flag not connected to any signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flag and start listening for SIGINT / SIGTERM
    pub fn install() -> Result<Self> {
        let signal = Self::new();
        let flag = signal.clone();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("backup-chk-signals".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    if let Err(e) = listen(flag).await {
                        warn!("Signal handling unavailable: {}", e);
                    }
                })
            })?;

        Ok(signal)
    }

    /// Request a stop
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once a stop was requested
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(CheckError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn escalate(&self, name: &str) {
        if self.is_triggered() {
            warn!("Received second {}, exiting without saving progress", name);
            std::process::exit(FORCED_EXIT_CODE);
        }
        info!("Received {}, stopping after the current item", name);
        self.trigger();
    }
}

#[cfg(unix)]
async fn listen(flag: ShutdownSignal) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => flag.escalate("SIGTERM"),
            _ = sigint.recv() => flag.escalate("SIGINT"),
        }
    }
}

#[cfg(not(unix))]
async fn listen(flag: ShutdownSignal) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        flag.escalate("Ctrl-C");
    }
}
