//! Test fixtures.
//!
//! - [`Recorder`]: a [`SessionObserver`](msrp_core::SessionObserver) that logs
//!   every notification and answers with configurable verdicts
//! - [`Pair`]: two connections wired back to back through in-memory transports

mod pair;
mod recorder;

pub use pair::{Pair, frames_of, requests_of};
pub use recorder::{Recorded, Recorder};
