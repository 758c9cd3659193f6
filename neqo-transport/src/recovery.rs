// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tracking of sent packets and detecting their loss: the retransmission
//! and recovery state machine at the heart of this crate. Three packet
//! number spaces are tracked in parallel, each with its own outstanding
//! set, and a single loss-detection alarm multiplexes between
//! handshake-RTO, time-threshold loss, and PTO behavior.

use std::time::Instant;

use enum_map::EnumMap;
use neqo_common::{qdebug, qerror, qinfo, qtrace};

use crate::{
    ack::AckFrame,
    config::RecoveryConfig,
    error::{Error, Res},
    events::LossRecoveryEvents,
    packet_number::PacketNumber,
    rtt::RttEstimator,
    space::{LossRecoverySpace, PacketNumberSpace, SentPacket},
    time::Alarm,
};

#[derive(Debug)]
pub struct LossRecovery<T, E> {
    config: RecoveryConfig,
    rtt: RttEstimator,
    alarm: Alarm,
    spaces: EnumMap<PacketNumberSpace, LossRecoverySpace<T>>,

    crypto_count: u32,
    pto_count: u32,
    time_of_last_sent_ack_eliciting: Option<Instant>,
    time_of_last_sent_crypto: Option<Instant>,
    ack_eliciting_outstanding: u32,
    crypto_outstanding: u32,

    events: E,
}

impl<T, E: LossRecoveryEvents<T>> LossRecovery<T, E> {
    #[must_use]
    pub fn new(config: RecoveryConfig, events: E) -> Self {
        Self {
            rtt: RttEstimator::new(config.max_ack_delay),
            config,
            alarm: Alarm::new(),
            spaces: EnumMap::default(),
            crypto_count: 0,
            pto_count: 0,
            time_of_last_sent_ack_eliciting: None,
            time_of_last_sent_crypto: None,
            ack_eliciting_outstanding: 0,
            crypto_outstanding: 0,
            events,
        }
    }

    #[must_use]
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    #[must_use]
    pub fn events(&self) -> &E {
        &self.events
    }

    #[must_use]
    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    #[must_use]
    pub fn space(&self, space: PacketNumberSpace) -> &LossRecoverySpace<T> {
        &self.spaces[space as usize]
    }

    fn space_mut(&mut self, space: PacketNumberSpace) -> &mut LossRecoverySpace<T> {
        &mut self.spaces[space as usize]
    }

    #[must_use]
    pub fn ack_eliciting_outstanding(&self) -> u32 {
        self.ack_eliciting_outstanding
    }

    #[must_use]
    pub fn crypto_outstanding(&self) -> u32 {
        self.crypto_outstanding
    }

    /// The alarm's current deadline, for callers that drive their own
    /// event loop around this state machine.
    #[must_use]
    pub fn next_timeout(&self) -> Option<Instant> {
        self.alarm.deadline()
    }

    #[must_use]
    pub fn crypto_count(&self) -> u32 {
        self.crypto_count
    }

    #[must_use]
    pub fn pto_count(&self) -> u32 {
        self.pto_count
    }

    /// Records a freshly-sent packet, updates the relevant "last sent"
    /// timestamps and outstanding counters, and re-arms the alarm.
    ///
    /// # Errors
    /// `Error::Internal` if `packet`'s number is already tracked in this
    /// space: that is a caller bug (a packet number was reused), never a
    /// wire condition.
    pub fn on_packet_sent(
        &mut self,
        space: PacketNumberSpace,
        packet: SentPacket<T>,
        now: Instant,
    ) -> Res<()> {
        qdebug!("packet {} sent in {space}", packet.packet_number);
        let is_crypto = packet.is_crypto;
        let is_ack_eliciting = packet.is_ack_eliciting;

        if self.space(space).sent_packets().contains_key(&packet.packet_number) {
            qerror!("packet {} already tracked as sent in {space}", packet.packet_number);
            return Err(Error::Internal("packet number already tracked as sent"));
        }
        self.space_mut(space).insert(packet);

        if is_crypto {
            self.crypto_outstanding += 1;
            self.time_of_last_sent_crypto = Some(now);
        }
        if is_ack_eliciting {
            self.ack_eliciting_outstanding += 1;
            self.time_of_last_sent_ack_eliciting = Some(now);
        }

        self.set_loss_detection_alarm();
        Ok(())
    }

    /// Processes an ACK frame: updates the RTT estimate (only from a
    /// still-outstanding, ack-eliciting packet at the largest
    /// acknowledged PN), removes every newly-acked packet still being
    /// tracked, runs time/packet-threshold loss detection, and re-arms
    /// the alarm.
    pub fn on_ack_received(&mut self, ack: &AckFrame, now: Instant) {
        qdebug!("ack received - largest_acked={}", ack.largest_acknowledged());
        let space_id = ack.space();

        self.space_mut(space_id).update_largest_acked(ack.largest_acknowledged());

        if let Some(sent) = self.space(space_id).sent_packets().get(&ack.largest_acknowledged()) {
            if sent.is_ack_eliciting {
                let latest_rtt = now.saturating_duration_since(sent.sent_at);
                self.rtt.update(latest_rtt, ack.ack_delay());
            }
        }

        let mut newly_acked_ack_eliciting = false;
        for pn in ack.acked_packet_numbers() {
            if let Some(acked) = self.remove_from_space(space_id, pn) {
                if acked.is_ack_eliciting {
                    newly_acked_ack_eliciting = true;
                    self.events.packet_acked(&acked);
                }
            }
        }

        self.detect_lost_packets(space_id, now);

        // This core only resets the PTO/crypto backoff on ack-eliciting
        // progress, not on every ACK (see DESIGN.md).
        if newly_acked_ack_eliciting {
            self.crypto_count = 0;
            self.pto_count = 0;
        }

        self.set_loss_detection_alarm();
    }

    /// Removes `pn` from `space_id`'s outstanding set, if present, and
    /// keeps the ack-eliciting/crypto counters in sync.
    fn remove_from_space(
        &mut self,
        space_id: PacketNumberSpace,
        pn: PacketNumber,
    ) -> Option<SentPacket<T>> {
        let removed = self.space_mut(space_id).remove(pn)?;
        if removed.is_ack_eliciting {
            self.ack_eliciting_outstanding -= 1;
        }
        if removed.is_crypto {
            self.crypto_outstanding -= 1;
        }
        Some(removed)
    }

    /// Scans `space`'s outstanding packets for time- and
    /// packet-threshold loss, removing and reporting any that qualify,
    /// and recomputes the space's `loss_time` from the survivors.
    fn detect_lost_packets(&mut self, space_id: PacketNumberSpace, now: Instant) {
        self.space_mut(space_id).set_loss_time(None);

        let loss_delay = self.config.loss_delay(self.rtt.loss_detection_rtt());
        let Some(largest_acked) = self.space(space_id).largest_acked() else {
            return;
        };

        let mut lost_pns = Vec::new();
        let mut loss_time = None;
        for (pn, packet) in self.space(space_id).sent_packets() {
            if *pn > largest_acked {
                continue;
            }
            let time_threshold_hit = now.saturating_duration_since(packet.sent_at) >= loss_delay;
            let packet_threshold_hit = *pn + self.config.packet_threshold <= largest_acked;
            if time_threshold_hit || packet_threshold_hit {
                lost_pns.push(*pn);
            } else {
                let candidate = packet.sent_at + loss_delay;
                loss_time = Some(loss_time.map_or(candidate, |t: Instant| t.min(candidate)));
            }
        }
        self.space_mut(space_id).set_loss_time(loss_time);

        if lost_pns.is_empty() {
            return;
        }

        let mut lost = Vec::with_capacity(lost_pns.len());
        for pn in lost_pns {
            if let Some(packet) = self.remove_from_space(space_id, pn) {
                qdebug!("lost={pn}");
                lost.push(packet);
            }
        }
        self.events.packets_lost(&lost);
    }

    /// Selects the alarm mode (none / handshake-RTO / time-threshold /
    /// PTO) and arms the alarm accordingly. Re-arming always replaces
    /// the previous deadline outright.
    fn set_loss_detection_alarm(&mut self) {
        if self.ack_eliciting_outstanding == 0 {
            qtrace!("no ack-eliciting packets outstanding, cancelling alarm");
            self.alarm.reset();
            return;
        }

        if self.crypto_outstanding > 0 {
            let Some(base) = self.time_of_last_sent_crypto else {
                self.alarm.reset();
                return;
            };
            let timeout = self.rtt.crypto_retransmission_timeout(self.config.granularity)
                * 2u32.pow(self.crypto_count);
            self.alarm.start(base + timeout);
            return;
        }

        if let Some((loss_time, _)) = self.earliest_loss_time() {
            self.alarm.start(loss_time);
            return;
        }

        let Some(base) = self.time_of_last_sent_ack_eliciting else {
            self.alarm.reset();
            return;
        };
        let timeout = self.rtt.pto() * 2u32.pow(self.pto_count);
        self.alarm.start(base + timeout);
    }

    /// The space with the earliest pending `loss_time`, if any.
    #[must_use]
    fn earliest_loss_time(&self) -> Option<(Instant, PacketNumberSpace)> {
        PacketNumberSpace::ALL
            .into_iter()
            .filter_map(|space| self.space(space).loss_time().map(|t| (t, space)))
            .min_by_key(|(t, _)| *t)
    }

    /// Whether the alarm is due to fire at `now`. Callers should invoke
    /// [`Self::on_loss_detection_alarm`] exactly when this returns `true`.
    #[must_use]
    pub fn alarm_due(&self, now: Instant) -> bool {
        self.alarm.timeout(now)
    }

    /// Fires the loss-detection alarm. Dispatches to crypto
    /// retransmission, time-threshold loss detection, or a PTO probe,
    /// depending on what is outstanding, and always re-arms the alarm
    /// afterwards.
    pub fn on_loss_detection_alarm(&mut self, now: Instant) {
        if !self.alarm.timeout(now) {
            return;
        }

        if self.crypto_outstanding > 0 {
            self.retransmit_unacked_crypto();
            self.crypto_count += 1;
        } else if let Some((_, space)) = self.earliest_loss_time() {
            self.detect_lost_packets(space, now);
        } else {
            self.send_pto_probes();
            self.pto_count += 1;
        }

        self.set_loss_detection_alarm();
    }

    /// Retransmits (without removing: the original stays outstanding
    /// until it is acked or later found lost) every unacked crypto
    /// packet across all three spaces.
    fn retransmit_unacked_crypto(&mut self) {
        for space in PacketNumberSpace::ALL {
            let crypto_pns: Vec<PacketNumber> = self
                .space(space)
                .sent_packets()
                .values()
                .filter(|p| p.is_crypto)
                .map(|p| p.packet_number)
                .collect();
            for pn in crypto_pns {
                if let Some(packet) = self.space(space).sent_packets().get(&pn) {
                    qinfo!("retransmitting crypto packet {pn} in {space}");
                    self.events.retransmit_packet(packet);
                }
            }
        }
    }

    /// Emits up to two ack-eliciting retransmit candidates, preferring
    /// Initial, then Handshake, then ApplicationData, and a single
    /// `pto-probe` notification.
    fn send_pto_probes(&mut self) {
        const MAX_PROBES: usize = 2;
        let mut sent = 0;
        for space in PacketNumberSpace::ALL {
            for packet in self.space(space).sent_packets().values() {
                if sent >= MAX_PROBES {
                    break;
                }
                if packet.is_ack_eliciting {
                    self.events.retransmit_packet(packet);
                    sent += 1;
                }
            }
            if sent >= MAX_PROBES {
                break;
            }
        }
        qinfo!("PTO fired, sent {sent} probe candidate(s)");
        self.events.pto_probe();
    }

    /// Connection teardown: cancels the alarm and clears all tracked
    /// state back to its initial, empty values.
    pub fn reset(&mut self) {
        self.alarm.reset();
        self.spaces = [
            LossRecoverySpace::default(),
            LossRecoverySpace::default(),
            LossRecoverySpace::default(),
        ];
        self.crypto_count = 0;
        self.pto_count = 0;
        self.time_of_last_sent_ack_eliciting = None;
        self.time_of_last_sent_crypto = None;
        self.ack_eliciting_outstanding = 0;
        self.crypto_outstanding = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{ack::AckRange, events::RecordingEvents};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn lr() -> LossRecovery<u64, RecordingEvents<u64>> {
        LossRecovery::new(RecoveryConfig::default(), RecordingEvents::default())
    }

    fn sent(pn: PacketNumber, at: Instant, ack_eliciting: bool, crypto: bool) -> SentPacket<u64> {
        SentPacket::new(pn, at, 1200, ack_eliciting, crypto, true, pn)
    }

    /// Send three ack-eliciting packets, ack them all at once.
    #[test]
    fn simple_ack_acks_everything_and_cancels_alarm() {
        let mut lr = lr();
        let t0 = Instant::now();
        for pn in 0..3 {
            lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(pn, t0, true, false), t0)
                .unwrap();
        }
        assert_eq!(lr.ack_eliciting_outstanding(), 3);

        let ack = AckFrame::new(
            PacketNumberSpace::ApplicationData,
            2,
            ms(10),
            vec![AckRange::new(0, 2)],
        );
        lr.on_ack_received(&ack, t0 + ms(50));

        assert_eq!(lr.events().acked.len(), 3);
        assert!(lr.space(PacketNumberSpace::ApplicationData).is_empty());
        assert_eq!(lr.ack_eliciting_outstanding(), 0);
        assert!(lr.next_timeout().is_none());
        assert!(lr.rtt().smoothed_rtt().is_some());
    }

    /// Packet-threshold loss: acking PN 4 only marks PNs 0 and 1 lost,
    /// since `pn + packet_threshold(3) <= largest_acked(4)` holds for
    /// both (0+3<=4 and 1+3<=4), while 2,3 remain pending.
    #[test]
    fn packet_threshold_loss() {
        let mut lr = lr();
        let t0 = Instant::now();
        for pn in 0..=5 {
            lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(pn, t0, true, false), t0)
                .unwrap();
        }

        let ack =
            AckFrame::new(PacketNumberSpace::ApplicationData, 4, ms(0), vec![AckRange::new(4, 4)]);
        lr.on_ack_received(&ack, t0);

        assert_eq!(lr.events().acked.len(), 1);
        assert_eq!(lr.events().acked[0].packet_number, 4);
        assert_eq!(lr.events().lost.len(), 2);
        let lost_pns: Vec<_> = lr.events().lost.iter().map(|p| p.packet_number).collect();
        assert_eq!(lost_pns, vec![0, 1]);

        let space = lr.space(PacketNumberSpace::ApplicationData);
        assert!(!space.sent_packets().contains_key(&0));
        assert!(!space.sent_packets().contains_key(&1));
        assert!(space.sent_packets().contains_key(&2));
        assert!(space.sent_packets().contains_key(&3));
        assert!(space.loss_time().is_some());
    }

    /// Time-threshold loss: PN0 outstanding long enough relative to the
    /// loss delay derived from the RTT sample on PN1's ack.
    #[test]
    fn time_threshold_loss() {
        let mut lr = lr();
        let t0 = Instant::now();
        lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, true, false), t0)
            .unwrap();
        lr.on_packet_sent(
            PacketNumberSpace::ApplicationData,
            sent(1, t0 + ms(200), true, false),
            t0 + ms(200),
        )
        .unwrap();

        // Seed smoothed_rtt = 100ms via an earlier, independent sample so
        // the loss-delay computation for PN1's ack is deterministic.
        lr.rtt.update(ms(100), ms(0));

        let ack =
            AckFrame::new(PacketNumberSpace::ApplicationData, 1, ms(0), vec![AckRange::new(1, 1)]);
        lr.on_ack_received(&ack, t0 + ms(250));

        assert_eq!(lr.events().lost.len(), 1);
        assert_eq!(lr.events().lost[0].packet_number, 0);
    }

    /// A lone Initial crypto packet arms the handshake-RTO timer at
    /// `2 * INITIAL_RTT + max_ack_delay`; firing it retransmits the
    /// crypto data and doubles the backoff.
    #[test]
    fn crypto_retransmission_alarm_and_backoff() {
        let mut lr = lr();
        let t0 = Instant::now();
        lr.on_packet_sent(PacketNumberSpace::Initial, sent(0, t0, true, true), t0).unwrap();

        let expected = t0 + (crate::rtt::INITIAL_RTT * 2 + lr.rtt().max_ack_delay());
        assert_eq!(lr.next_timeout(), Some(expected));

        lr.on_loss_detection_alarm(expected);
        assert_eq!(lr.crypto_count(), 1);
        assert_eq!(lr.events().retransmitted.len(), 1);
        // The original packet is still tracked: it was retransmitted, not lost.
        assert!(lr.space(PacketNumberSpace::Initial).sent_packets().contains_key(&0));

        let next = lr.next_timeout().unwrap();
        assert_eq!(
            next,
            expected + (crate::rtt::INITIAL_RTT * 2 + lr.rtt().max_ack_delay()) * 2
        );
    }

    /// A single outstanding ApplicationData packet with a seeded RTT
    /// arms a PTO at `smoothed_rtt + 4*rttvar + max_ack_delay`; firing
    /// retransmits it as a probe.
    #[test]
    fn pto_probe_fires_with_single_candidate() {
        let mut lr = lr();
        let t0 = Instant::now();

        // Two identical 100ms samples converge smoothed_rtt toward 100ms
        // without pinning rttvar to a specific value; the assertion below
        // derives its expectation from `pto()` itself rather than a
        // hand-computed duration.
        lr.rtt.update(ms(100), ms(0));
        lr.rtt.update(ms(100), ms(0));
        lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, true, false), t0)
            .unwrap();

        let expected = t0 + lr.rtt().pto();
        assert_eq!(lr.next_timeout(), Some(expected));

        lr.on_loss_detection_alarm(expected);
        assert_eq!(lr.pto_count(), 1);
        assert_eq!(lr.events().retransmitted.len(), 1);
        assert_eq!(lr.events().pto_probes, 1);
        // Still outstanding: PTO retransmits without declaring loss.
        assert!(lr.space(PacketNumberSpace::ApplicationData).sent_packets().contains_key(&0));
    }

    #[test]
    fn duplicate_packet_number_is_an_internal_error() {
        let mut lr = lr();
        let t0 = Instant::now();
        lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, true, false), t0)
            .unwrap();
        let err = lr
            .on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, true, false), t0)
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn ack_of_already_removed_packet_does_not_corrupt_rtt() {
        let mut lr = lr();
        let t0 = Instant::now();
        lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, true, false), t0)
            .unwrap();
        let ack =
            AckFrame::new(PacketNumberSpace::ApplicationData, 0, ms(10), vec![AckRange::new(0, 0)]);
        lr.on_ack_received(&ack, t0 + ms(40));
        let rtt_after_first = lr.rtt().smoothed_rtt();

        // A duplicate/late second ACK covering the same (already-removed)
        // packet number must not perturb the RTT estimate.
        lr.on_ack_received(&ack, t0 + ms(999));
        assert_eq!(lr.rtt().smoothed_rtt(), rtt_after_first);
    }

    #[test]
    fn pto_count_not_reset_without_ack_eliciting_progress() {
        let mut lr = lr();
        let t0 = Instant::now();
        // A non-ack-eliciting packet (e.g. pure ACK) sent and acked should
        // not reset pto_count.
        lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, false, false), t0)
            .unwrap();
        lr.pto_count = 3;
        let ack =
            AckFrame::new(PacketNumberSpace::ApplicationData, 0, ms(0), vec![AckRange::new(0, 0)]);
        lr.on_ack_received(&ack, t0);
        assert_eq!(lr.pto_count(), 3);
    }

    #[test]
    fn reset_clears_everything() {
        let mut lr = lr();
        let t0 = Instant::now();
        lr.on_packet_sent(PacketNumberSpace::Initial, sent(0, t0, true, true), t0).unwrap();
        lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, true, false), t0)
            .unwrap();
        lr.reset();

        for space in PacketNumberSpace::ALL {
            assert!(lr.space(space).is_empty());
        }
        assert_eq!(lr.ack_eliciting_outstanding(), 0);
        assert_eq!(lr.crypto_outstanding(), 0);
        assert_eq!(lr.crypto_count(), 0);
        assert_eq!(lr.pto_count(), 0);
        assert!(lr.next_timeout().is_none());
    }

    #[test]
    fn alarm_armed_iff_ack_eliciting_outstanding() {
        let mut lr = lr();
        let t0 = Instant::now();
        assert!(lr.next_timeout().is_none());
        lr.on_packet_sent(PacketNumberSpace::ApplicationData, sent(0, t0, true, false), t0)
            .unwrap();
        assert!(lr.next_timeout().is_some());
        let ack =
            AckFrame::new(PacketNumberSpace::ApplicationData, 0, ms(0), vec![AckRange::new(0, 0)]);
        lr.on_ack_received(&ack, t0);
        assert!(lr.next_timeout().is_none());
    }
}
