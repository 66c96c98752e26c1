//! Task driver that runs orchestrator tasks as Firecracker microVMs.
//!
//! [`LitegixDriver`] accepts tasks, boots one microVM per task through the
//! executor crate, tracks each VM with a background monitor and answers the
//! orchestrator's wait, stop, destroy, inspect and signal requests.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod driver;
pub mod error;
pub mod eventer;
pub mod handle;
pub mod registry;

pub use driver::{LitegixDriver, FINGERPRINT_INTERVAL, WAIT_POLL_INTERVAL};
pub use error::DriverError;
pub use eventer::Eventer;
pub use handle::{RunState, TaskHandle, MONITOR_INTERVAL, PROBE_TIMEOUT};
pub use registry::{Reservation, TaskStore};
