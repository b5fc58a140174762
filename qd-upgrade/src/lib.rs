//! HTTP upgrade/ALPN front-end: TCP accept, HTTP/1.1 vs HTTP/2 detection,
//! and `Alt-Svc`/`101 Switching Protocols` advertisement of HTTP/3.
//! Interface-level only — full HTTP/1.1 and HTTP/2 request handling live
//! outside this crate.

pub mod detect;
pub mod http1;
pub mod http2;
pub mod server;

pub use detect::{detect_protocol, Protocol};
pub use server::{ListenerKind, Sniffer, UpgradeListener};
