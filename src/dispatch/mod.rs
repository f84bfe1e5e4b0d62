//! Queue processing engine.
//!
//! - [`Dispatcher`]: one processing round (select, claim, decode, send, record)
//! - [`Purger`]: bulk removal of resolved items
//! - [`StatsReporter`]: read-only diagnostic pass
//!
//! Per-item failures are classified into the round report and never abort a
//! round; only configuration problems and a failed selection escape.

mod dispatcher;
mod errors;
mod purger;
mod stats;

pub use dispatcher::{Dispatcher, DispatcherConfig, RoundReport};
pub use errors::ErrorMessages;
pub use purger::Purger;
pub use stats::{StatsReport, StatsReporter};
