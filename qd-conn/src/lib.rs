//! Stream engine, TLS adapter, connection ID management, path validation
//! and the connection state machine.

pub mod cidmgr;
pub mod connection;
pub mod path;
pub mod rustls_engine;
pub mod session_cache;
pub mod stream;
pub mod tls;

pub use connection::{Connection, ConnectionState, Role};
pub use rustls_engine::RustlsEngine;
