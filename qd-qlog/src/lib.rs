//! qlog tracer: an optional event sink called at well-defined points in
//! the transport, covering the connectivity/transport/recovery event
//! taxonomy with an async JSON-SEQ writer. No global state: an endpoint
//! builds one [`writer::Writer`] from its [`config::QlogConfig`] and hands
//! a
//! [`trace::Trace`] to each connection it creates.

pub mod config;
pub mod event;
pub mod trace;
pub mod writer;

pub use config::{CommonFields, QlogConfig, VantagePoint};
pub use event::{Event, EventData};
pub use trace::Trace;
pub use writer::{Writer, WriterStats};
