//! Loss detection, RTT estimation, congestion control and pacing (RFC 9002),
//! kept independent of the packet codec and stream engine so alternative
//! congestion algorithms can be swapped in without touching connection
//! logic.

pub mod congestion;
pub mod loss;
pub mod pacing;
pub mod sent;

pub use congestion::{CongestionController, NewReno};
pub use loss::{LossRecovery, RttEstimator};
pub use pacing::Pacer;
