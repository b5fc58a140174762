//! Event driver, timer wheel, CID dispatcher and worker event loop.

pub mod dispatcher;
pub mod driver;
pub mod timer;
pub mod worker;

pub use dispatcher::{DispatchEvent, Dispatcher, Route};
pub use driver::{DriverEvent, EventDriver, MioDriver};
pub use timer::{TimerKind, TimerWheel};
pub use worker::Worker;
