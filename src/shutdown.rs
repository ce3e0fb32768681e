//! Process-wide shutdown signal.
//!
//! A single [`Shutdown`] is created in `main`; every background loop gets a
//! child of its token. Triggering is idempotent. Once triggered, the caller
//! arms a hard-kill timer so a hung component cannot keep the process alive.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Time allowed for graceful shutdown before the process exits.
pub const HARD_KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit code used when the hard-kill timer fires.
const HARD_KILL_EXIT_CODE: i32 = 1;

/// Single-fire shutdown signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for components that stop with the process.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Fire the signal. Later calls are no-ops.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown requested");
        }
        self.token.cancel();
    }

    /// Resolve once the signal has fired.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Trigger on Ctrl+C or SIGTERM.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = os_signal() => this.trigger(),
                _ = this.wait() => {}
            }
        })
    }
}

/// Wait for Ctrl+C or, on unix, SIGTERM.
async fn os_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl+C signal"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::info!("Received terminate signal");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Exit the process if graceful shutdown has not finished within `timeout`.
///
/// Runs on a plain thread so a stalled runtime cannot delay it.
pub fn arm_hard_kill(timeout: Duration) {
    let spawned = std::thread::Builder::new()
        .name("hard-kill".to_string())
        .spawn(move || {
            std::thread::sleep(timeout);
            eprintln!("graceful shutdown timed out after {timeout:?}, exiting");
            std::process::exit(HARD_KILL_EXIT_CODE);
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Failed to arm hard-kill timer");
    }
}
