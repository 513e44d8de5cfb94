//! Fan-out dispatcher: a bounded worker pool draining a severity-ordered
//! incident queue, in one-shot or continuous-arrival mode.

mod dispatcher;
mod lifecycle;
mod pool;
pub mod record;
pub mod state;
mod worker;

pub use dispatcher::Dispatcher;
pub use record::{DispatchReport, DispatchSummary, RunRecord, RunStatus};
pub use state::{ActiveIncident, DispatcherSnapshot, DispatcherState};
