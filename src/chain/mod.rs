//! Chain orchestration: the per-request execution state machine, the
//! function context handed to user code, the bypass response builder and
//! the metrics accumulator.

pub mod bypass;
mod context;
mod executor;
mod metrics;

pub use context::FunctionContext;
pub use executor::{Chain, ChainOptions};
pub use metrics::{MetricsAccumulator, OpCounter, DEFAULT_OP_LIMIT};
