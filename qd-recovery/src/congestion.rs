//! Pluggable congestion control (RFC 9002). The New Reno controller is the
//! default; alternative algorithms implement the same `CongestionController`
//! trait rather than subclassing it.

pub const MAX_DATAGRAM_SIZE: u64 = 1200;
const MIN_WINDOW: u64 = 2 * MAX_DATAGRAM_SIZE;
const INITIAL_WINDOW: u64 = 10 * MAX_DATAGRAM_SIZE;

pub trait CongestionController: std::fmt::Debug + Send {
    fn on_sent(&mut self, bytes: u64);
    fn on_ack(&mut self, bytes: u64, time_sent_micros: u64, now_micros: u64);
    fn on_lost(&mut self, bytes: u64, largest_lost_time_sent_micros: u64, now_micros: u64);
    fn on_persistent_congestion(&mut self);
    fn can_send(&self, extra_bytes: u64) -> bool;
    fn bytes_in_flight(&self) -> u64;
    fn congestion_window(&self) -> u64;
    fn in_slow_start(&self) -> bool {
        self.congestion_window() > self.ssthresh()
    }
    fn ssthresh(&self) -> u64;
}

/// New Reno: additive increase, multiplicative decrease (RFC 9002 §7).
#[derive(Debug, Clone)]
pub struct NewReno {
    cwnd: u64,
    bytes_in_flight: u64,
    ssthresh: u64,
    congestion_recovery_start_time: Option<u64>,
}

impl Default for NewReno {
    fn default() -> Self {
        NewReno {
            cwnd: INITIAL_WINDOW,
            bytes_in_flight: 0,
            ssthresh: u64::MAX,
            congestion_recovery_start_time: None,
        }
    }
}

impl NewReno {
    fn in_recovery(&self, time_sent_micros: u64) -> bool {
        matches!(self.congestion_recovery_start_time, Some(t) if time_sent_micros <= t)
    }
}

impl CongestionController for NewReno {
    fn on_sent(&mut self, bytes: u64) {
        self.bytes_in_flight += bytes;
    }

    fn on_ack(&mut self, bytes: u64, time_sent_micros: u64, _now_micros: u64) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes);
        if self.in_recovery(time_sent_micros) {
            return;
        }
        if self.cwnd < self.ssthresh {
            self.cwnd += bytes;
        } else {
            self.cwnd += MAX_DATAGRAM_SIZE * bytes / self.cwnd.max(1);
        }
    }

    fn on_lost(&mut self, bytes: u64, largest_lost_time_sent_micros: u64, now_micros: u64) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes);
        let already_in_recovery = matches!(
            self.congestion_recovery_start_time,
            Some(t) if largest_lost_time_sent_micros <= t
        );
        if already_in_recovery {
            return;
        }
        self.ssthresh = (self.cwnd / 2).max(MIN_WINDOW);
        self.cwnd = self.ssthresh;
        self.congestion_recovery_start_time = Some(now_micros);
        tracing::debug!(cwnd = self.cwnd, ssthresh = self.ssthresh, "entering congestion recovery");
    }

    fn on_persistent_congestion(&mut self) {
        tracing::warn!(previous_cwnd = self.cwnd, "persistent congestion, resetting to minimum window");
        self.cwnd = MIN_WINDOW;
        self.congestion_recovery_start_time = None;
    }

    fn can_send(&self, extra_bytes: u64) -> bool {
        self.bytes_in_flight + extra_bytes < self.cwnd
    }

    fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    fn congestion_window(&self) -> u64 {
        self.cwnd
    }

    fn ssthresh(&self) -> u64 {
        self.ssthresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_grows_by_full_acked_bytes() {
        let mut cc = NewReno::default();
        cc.on_sent(1000);
        let before = cc.congestion_window();
        cc.on_ack(1000, 0, 1000);
        assert_eq!(cc.congestion_window(), before + 1000);
    }

    #[test]
    fn loss_halves_window_and_enters_recovery() {
        let mut cc = NewReno::default();
        cc.on_sent(5000);
        let before = cc.congestion_window();
        cc.on_lost(1000, 100, 200);
        assert_eq!(cc.congestion_window(), (before / 2).max(MIN_WINDOW));
        assert_eq!(cc.ssthresh(), cc.congestion_window());
    }

    #[test]
    fn acks_during_recovery_for_earlier_packets_are_ignored() {
        let mut cc = NewReno::default();
        cc.on_sent(3000);
        cc.on_lost(1000, 500, 600);
        let cwnd_after_loss = cc.congestion_window();
        // an ack for a packet sent before recovery began must not grow cwnd
        cc.on_ack(1000, 400, 650);
        assert_eq!(cc.congestion_window(), cwnd_after_loss);
    }

    #[test]
    fn cwnd_never_drops_below_minimum_window() {
        let mut cc = NewReno::default();
        cc.on_sent(MIN_WINDOW);
        cc.on_lost(MIN_WINDOW, 0, 1);
        assert_eq!(cc.congestion_window(), MIN_WINDOW);
        cc.on_lost(0, 2, 3);
        assert_eq!(cc.congestion_window(), MIN_WINDOW);
    }

    #[test]
    fn persistent_congestion_resets_to_minimum() {
        let mut cc = NewReno::default();
        cc.on_sent(10_000);
        cc.on_persistent_congestion();
        assert_eq!(cc.congestion_window(), MIN_WINDOW);
    }
}
