//! Shutdown signal handling (spec.md §5): SIGINT/SIGTERM (Ctrl+C on Windows)
//! must trigger an orderly close — broker channel, then broker connection,
//! then database pool, in that order — without acknowledging any delivery
//! still in flight. Grounded in `casparian`'s own signal-hook/ctrlc split
//! (`examples/sl224-casparianflow/crates/casparian/src/main.rs`), bridged
//! here into a single `Notify` permit the async event loop races against.

use std::sync::Arc;

use tokio::sync::Notify;

/// Installs the platform signal handler and returns a handle that resolves
/// once a shutdown signal arrives. A single permit is stored even if the
/// signal fires before the event loop starts waiting on it.
pub fn install() -> Arc<Notify> {
    let notify = Arc::new(Notify::new());

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let notify = notify.clone();
        match Signals::new([SIGINT, SIGTERM]) {
            Ok(mut signals) => {
                std::thread::spawn(move || {
                    if let Some(sig) = signals.forever().next() {
                        tracing::info!(signal = sig, "received shutdown signal");
                        notify.notify_one();
                    }
                });
            }
            Err(err) => {
                tracing::warn!(%err, "failed to install signal handler, shutdown will only happen on connection loss");
            }
        }
    }

    #[cfg(windows)]
    {
        let notify = notify.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            tracing::info!("received Ctrl+C");
            notify.notify_one();
        }) {
            tracing::warn!(%err, "failed to install Ctrl+C handler, shutdown will only happen on connection loss");
        }
    }

    notify
}
