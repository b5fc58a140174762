//! RTT estimation, loss detection and PTO scheduling (RFC 9002 §5-§6).

use crate::congestion::CongestionController;
use crate::sent::{SentPacketSpaces, SentPacketTable};
use qd_base::space::PnSpace;

const PACKET_THRESHOLD: u64 = 3;
const TIME_THRESHOLD_NUM: u64 = 9;
const TIME_THRESHOLD_DEN: u64 = 8;
/// Timer granularity floor, matching quinn's 1ms default.
const GRANULARITY_MICROS: u64 = 1_000;
const PTO_BACKOFF_MAX: u32 = 1 << 16;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    pub latest_rtt_micros: u64,
    pub smoothed_rtt_micros: u64,
    pub rttvar_micros: u64,
    pub min_rtt_micros: u64,
    first_sample_taken: bool,
}

impl Default for RttEstimator {
    fn default() -> Self {
        RttEstimator {
            latest_rtt_micros: 0,
            smoothed_rtt_micros: 333_000,
            rttvar_micros: 166_500,
            min_rtt_micros: u64::MAX,
            first_sample_taken: false,
        }
    }
}

impl RttEstimator {
    /// `ack_delay_micros` is the peer-reported delay, already scaled by the
    /// negotiated ack_delay_exponent and capped at max_ack_delay.
    pub fn update(&mut self, rtt_sample_micros: u64, ack_delay_micros: u64, is_handshake: bool) {
        self.latest_rtt_micros = rtt_sample_micros;
        self.min_rtt_micros = self.min_rtt_micros.min(rtt_sample_micros);

        let adjusted = if rtt_sample_micros.saturating_sub(self.min_rtt_micros) >= ack_delay_micros
        {
            rtt_sample_micros.saturating_sub(ack_delay_micros)
        } else {
            rtt_sample_micros
        };

        if !self.first_sample_taken {
            self.first_sample_taken = true;
            self.smoothed_rtt_micros = adjusted;
            self.rttvar_micros = adjusted / 2;
            return;
        }
        let _ = is_handshake;
        let var_sample = self.smoothed_rtt_micros.abs_diff(adjusted);
        self.rttvar_micros = (3 * self.rttvar_micros + var_sample) / 4;
        self.smoothed_rtt_micros = (7 * self.smoothed_rtt_micros + adjusted) / 8;
    }

    pub fn pto_micros(&self, max_ack_delay_micros: u64) -> u64 {
        self.smoothed_rtt_micros
            + (4 * self.rttvar_micros).max(GRANULARITY_MICROS)
            + max_ack_delay_micros
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledged packet carried frames that must be handed back to
    /// their sources as acknowledged (stream bytes released, etc).
    Acked { bytes: u64 },
}

#[derive(Debug)]
pub struct LossRecovery {
    pub rtt: RttEstimator,
    pub sent: SentPacketSpaces,
    pub pto_count: u32,
    largest_acked: [Option<u64>; 3],
    loss_time: [Option<u64>; 3],
    time_of_last_ack_eliciting: [Option<u64>; 3],
}

impl Default for LossRecovery {
    fn default() -> Self {
        LossRecovery {
            rtt: RttEstimator::default(),
            sent: SentPacketSpaces::default(),
            pto_count: 0,
            largest_acked: [None; 3],
            loss_time: [None; 3],
            time_of_last_ack_eliciting: [None; 3],
        }
    }
}

fn space_index(space: PnSpace) -> usize {
    match space {
        PnSpace::Initial => 0,
        PnSpace::Handshake => 1,
        PnSpace::Application => 2,
    }
}

pub struct LossDetectionResult {
    pub acked_bytes: u64,
    pub lost_bytes: u64,
    pub lost_packet_numbers: Vec<u64>,
    pub largest_lost_time_sent_micros: Option<u64>,
}

impl LossRecovery {
    pub fn on_packet_sent(
        &mut self,
        space: PnSpace,
        pn: u64,
        size: u64,
        ack_eliciting: bool,
        now_micros: u64,
        cc: &mut dyn CongestionController,
    ) {
        use crate::sent::SentPacket;
        self.sent.table_mut(space).insert(
            pn,
            SentPacket {
                time_sent_micros: now_micros,
                size,
                ack_eliciting,
                in_flight: ack_eliciting,
                retransmittable: ack_eliciting,
            },
        );
        if ack_eliciting {
            self.time_of_last_ack_eliciting[space_index(space)] = Some(now_micros);
            cc.on_sent(size);
        }
    }

    /// Processes one acknowledged range `[smallest, largest]` within
    /// `space`. Returns the total bytes newly acknowledged and updates RTT
    /// when `largest` corresponds to an acknowledged ack-eliciting packet.
    pub fn on_ack_range(
        &mut self,
        space: PnSpace,
        smallest: u64,
        largest: u64,
        ack_delay_micros: u64,
        now_micros: u64,
        cc: &mut dyn CongestionController,
    ) -> u64 {
        let idx = space_index(space);
        let was_new_largest = self.largest_acked[idx].map_or(true, |l| largest > l);
        self.largest_acked[idx] = Some(self.largest_acked[idx].map_or(largest, |l| l.max(largest)));

        if was_new_largest {
            if let Some(pkt) = self.sent.table(space).get(largest) {
                if pkt.ack_eliciting {
                    let rtt_sample = now_micros.saturating_sub(pkt.time_sent_micros);
                    self.rtt
                        .update(rtt_sample, ack_delay_micros, space != PnSpace::Application);
                }
            }
        }

        let mut acked_bytes = 0;
        let pns: Vec<u64> = self
            .sent
            .table(space)
            .iter()
            .filter(|(pn, _)| *pn >= smallest && *pn <= largest)
            .map(|(pn, _)| pn)
            .collect();
        for pn in pns {
            if let Some(pkt) = self.sent.table_mut(space).remove(pn) {
                if pkt.ack_eliciting {
                    acked_bytes += pkt.size;
                    cc.on_ack(pkt.size, pkt.time_sent_micros, now_micros);
                }
            }
        }
        self.pto_count = 0;
        acked_bytes
    }

    /// Packet- and time-threshold loss detection (RFC 9002 §6) against the
    /// current largest acked packet number in `space`.
    pub fn detect_lost(
        &mut self,
        space: PnSpace,
        now_micros: u64,
        cc: &mut dyn CongestionController,
    ) -> LossDetectionResult {
        let idx = space_index(space);
        self.loss_time[idx] = None;
        let Some(largest_acked) = self.largest_acked[idx] else {
            return LossDetectionResult {
                acked_bytes: 0,
                lost_bytes: 0,
                lost_packet_numbers: Vec::new(),
                largest_lost_time_sent_micros: None,
            };
        };

        let loss_delay = (TIME_THRESHOLD_NUM
            * self.rtt.smoothed_rtt_micros.max(self.rtt.latest_rtt_micros))
            / TIME_THRESHOLD_DEN;
        let loss_delay = loss_delay.max(GRANULARITY_MICROS);

        let mut lost_bytes = 0;
        let mut lost_pns = Vec::new();
        let mut largest_lost_time_sent = None;
        let mut earliest_still_outstanding_loss_time = None;

        let candidates: Vec<(u64, u64, u64)> = self
            .sent
            .table(space)
            .below(largest_acked + 1)
            .map(|(pn, p)| (pn, p.time_sent_micros, p.size))
            .collect();

        for (pn, time_sent, size) in candidates {
            let packet_gap_lost = largest_acked >= pn + PACKET_THRESHOLD;
            let time_lost = time_sent + loss_delay <= now_micros;
            if packet_gap_lost || time_lost {
                if let Some(removed) = self.sent.table_mut(space).remove(pn) {
                    if removed.in_flight {
                        lost_bytes += size;
                        lost_pns.push(pn);
                        largest_lost_time_sent =
                            Some(largest_lost_time_sent.unwrap_or(0).max(time_sent));
                    }
                }
            } else {
                let candidate_loss_time = time_sent + loss_delay;
                earliest_still_outstanding_loss_time = Some(
                    earliest_still_outstanding_loss_time
                        .map_or(candidate_loss_time, |t: u64| t.min(candidate_loss_time)),
                );
            }
        }

        self.loss_time[idx] = earliest_still_outstanding_loss_time;

        if let Some(largest_time) = largest_lost_time_sent {
            cc.on_lost(lost_bytes, largest_time, now_micros);
        }

        LossDetectionResult {
            acked_bytes: 0,
            lost_bytes,
            lost_packet_numbers: lost_pns,
            largest_lost_time_sent_micros: largest_lost_time_sent,
        }
    }

    pub fn loss_detection_timeout(&self, space: PnSpace) -> Option<u64> {
        self.loss_time[space_index(space)]
    }

    /// `pto = smoothed_rtt + max(4*rttvar, granularity) + max_ack_delay`,
    /// doubled per `pto_count` backoff (RFC 9002 §6.2).
    pub fn pto_deadline(&self, space: PnSpace, max_ack_delay_micros: u64) -> Option<u64> {
        let last_sent = self.time_of_last_ack_eliciting[space_index(space)]?;
        let base_pto = self.rtt.pto_micros(max_ack_delay_micros);
        let backoff = 1u64 << self.pto_count.min(16);
        let backoff = backoff.min(PTO_BACKOFF_MAX as u64);
        Some(last_sent + base_pto * backoff)
    }

    pub fn on_pto_expired(&mut self) {
        self.pto_count += 1;
    }

    pub fn discard_space(&mut self, space: PnSpace) {
        self.sent.discard(space);
        self.loss_time[space_index(space)] = None;
        self.time_of_last_ack_eliciting[space_index(space)] = None;
    }

    pub fn table(&self, space: PnSpace) -> &SentPacketTable {
        self.sent.table(space)
    }
}
