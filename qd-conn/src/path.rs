//! Path validation and connection migration (RFC 9000 §8-§9).

use rand::RngCore;
use std::net::SocketAddr;

const ANTI_AMPLIFICATION_FACTOR: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    Active,
    Validating,
    Validated,
}

#[derive(Debug)]
pub struct Path {
    pub remote: SocketAddr,
    state: PathState,
    challenge: Option<[u8; 8]>,
    challenge_sent_micros: Option<u64>,
    bytes_received: u64,
    bytes_sent: u64,
}

impl Path {
    pub fn new_active(remote: SocketAddr) -> Self {
        Path {
            remote,
            state: PathState::Active,
            challenge: None,
            challenge_sent_micros: None,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    pub fn new_migrating(remote: SocketAddr) -> Self {
        Path {
            remote,
            state: PathState::Validating,
            challenge: None,
            challenge_sent_micros: None,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    pub fn state(&self) -> PathState {
        self.state
    }

    pub fn on_datagram_received(&mut self, bytes: u64) {
        self.bytes_received += bytes;
    }

    /// Anti-amplification: on an unvalidated path, at most
    /// `3 * bytes_received` may be sent (RFC 9000 §8.1).
    pub fn amplification_budget(&self) -> u64 {
        if self.state == PathState::Validated || self.state == PathState::Active {
            u64::MAX
        } else {
            (ANTI_AMPLIFICATION_FACTOR * self.bytes_received).saturating_sub(self.bytes_sent)
        }
    }

    pub fn on_datagram_sent(&mut self, bytes: u64) {
        self.bytes_sent += bytes;
    }

    pub fn issue_challenge(&mut self, now_micros: u64, rng: &mut dyn RngCore) -> [u8; 8] {
        let mut data = [0u8; 8];
        rng.fill_bytes(&mut data);
        self.challenge = Some(data);
        self.challenge_sent_micros = Some(now_micros);
        self.state = PathState::Validating;
        data
    }

    /// Returns `true` if `data` matches the outstanding challenge, marking
    /// the path validated.
    pub fn on_path_response(&mut self, data: [u8; 8]) -> bool {
        if self.challenge == Some(data) {
            self.state = PathState::Validated;
            self.challenge = None;
            true
        } else {
            false
        }
    }

    /// 3*PTO after the challenge was sent with no response, the path is
    /// abandoned (RFC 9000 §8.2.4).
    pub fn is_validation_timed_out(&self, now_micros: u64, pto_micros: u64) -> bool {
        matches!(
            self.challenge_sent_micros,
            Some(sent) if now_micros.saturating_sub(sent) >= 3 * pto_micros
        ) && self.state == PathState::Validating
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn addr() -> SocketAddr {
        "127.0.0.1:443".parse().unwrap()
    }

    #[test]
    fn unvalidated_path_limits_send_to_three_times_received() {
        let mut path = Path::new_migrating(addr());
        path.on_datagram_received(100);
        assert_eq!(path.amplification_budget(), 300);
        path.on_datagram_sent(300);
        assert_eq!(path.amplification_budget(), 0);
    }

    #[test]
    fn matching_path_response_validates() {
        let mut rng = StepRng::new(0, 1);
        let mut path = Path::new_migrating(addr());
        let challenge = path.issue_challenge(0, &mut rng);
        assert!(!path.on_path_response([0xff; 8]));
        assert_eq!(path.state(), PathState::Validating);
        assert!(path.on_path_response(challenge));
        assert_eq!(path.state(), PathState::Validated);
        assert_eq!(path.amplification_budget(), u64::MAX);
    }

    #[test]
    fn validation_times_out_after_three_pto() {
        let mut rng = StepRng::new(0, 1);
        let mut path = Path::new_migrating(addr());
        path.issue_challenge(0, &mut rng);
        assert!(!path.is_validation_timed_out(2_999, 1_000));
        assert!(path.is_validation_timed_out(3_000, 1_000));
    }
}
