pub mod cli;
pub mod client;
pub mod config;
pub mod csrf;
pub mod dom;
pub mod error;
pub mod refresher;
pub mod viewport;

pub use client::{MonitorClient, StatusSnapshot, ToggleRequest};
pub use config::{RefreshMode, RefresherConfig, ReplyAck};
pub use error::{RefreshError, Result};
pub use refresher::{
    ChatMessage, Handled, LiveView, LiveViewRefresher, LiveViewRefresherBuilder, PollOutcome,
    RefreshEvent, UserEvent,
};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `info`, or at
/// `debug` with `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "live_view_refresher=debug"
    } else {
        "live_view_refresher=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed (tests, embedding apps).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
