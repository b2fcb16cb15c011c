//! The edgechain runtime: server loop, configuration, cancellation and the
//! process-wide request registry.

mod cancel;
mod config;
mod server;
mod tracker;

pub use cancel::Cancellation;
pub use config::{Environment, RuntimeConfig};
pub use server::EdgeServer;
pub use tracker::{ChainHandle, RequestTracker, TrackerGuard};
