//! Send pacing: gates transmission between congestion-bounded sends to
//! smooth bursts out over roughly a congestion window per RTT.

use crate::congestion::{CongestionController, MAX_DATAGRAM_SIZE};

const SLOW_START_GAIN_NUM: u64 = 5;
const SLOW_START_GAIN_DEN: u64 = 4; // 1.25
const STEADY_GAIN_NUM: u64 = 1;
const STEADY_GAIN_DEN: u64 = 1;

#[derive(Debug, Default)]
pub struct Pacer {
    next_send_time_micros: Option<u64>,
}

impl Pacer {
    /// Interval between packets of `MAX_DATAGRAM_SIZE`, in microseconds, given
    /// the current smoothed RTT and congestion window.
    pub fn interval_micros(
        &self,
        smoothed_rtt_micros: u64,
        cc: &dyn CongestionController,
    ) -> u64 {
        let cwnd = cc.congestion_window().max(MAX_DATAGRAM_SIZE);
        let packets_per_rtt = (cwnd / MAX_DATAGRAM_SIZE).max(1);
        let (gain_num, gain_den) = if cc.in_slow_start() {
            (SLOW_START_GAIN_NUM, SLOW_START_GAIN_DEN)
        } else {
            (STEADY_GAIN_NUM, STEADY_GAIN_DEN)
        };
        (smoothed_rtt_micros / packets_per_rtt) * gain_num / gain_den
    }

    /// Call after sending `bytes` at `now_micros`; returns the time at which
    /// the next send is permitted.
    pub fn on_sent(
        &mut self,
        bytes: u64,
        now_micros: u64,
        smoothed_rtt_micros: u64,
        cc: &dyn CongestionController,
    ) -> u64 {
        let interval = self.interval_micros(smoothed_rtt_micros, cc);
        let scaled = interval * bytes.max(1) / MAX_DATAGRAM_SIZE.max(1);
        let next = now_micros + scaled;
        self.next_send_time_micros = Some(next);
        next
    }

    /// `None` means sending is permitted now.
    pub fn next_send_time(&self, now_micros: u64) -> Option<u64> {
        self.next_send_time_micros
            .filter(|&t| t > now_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::NewReno;

    #[test]
    fn slow_start_interval_applies_higher_gain() {
        let pacer = Pacer::default();
        let mut cc = NewReno::default();
        cc.on_sent(0);
        let slow_start_interval = pacer.interval_micros(100_000, &cc);
        // force out of slow start by pushing ssthresh below cwnd
        let mut cc2 = NewReno::default();
        cc2.on_lost(1, 0, 1);
        let steady_interval = pacer.interval_micros(100_000, &cc2);
        assert!(slow_start_interval >= steady_interval);
    }

    #[test]
    fn on_sent_schedules_future_next_send_time() {
        let mut pacer = Pacer::default();
        let cc = NewReno::default();
        let next = pacer.on_sent(1200, 1_000_000, 100_000, &cc);
        assert!(next > 1_000_000);
        assert_eq!(pacer.next_send_time(1_000_000), Some(next));
        assert_eq!(pacer.next_send_time(next + 1), None);
    }
}
