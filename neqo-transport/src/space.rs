// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The three packet-number spaces and the per-space bookkeeping the loss
//! detector needs: the set of currently-outstanding sent packets, the
//! highest packet number received, the largest one acknowledged, and the
//! earliest time-threshold loss deadline.

use std::{collections::BTreeMap, time::Instant};

use enum_map::Enum;
use static_assertions::const_assert_eq;

use crate::packet_number::PacketNumber;

/// The independent numbering domains tied to each encryption level. 0-RTT
/// and 1-RTT both map to `ApplicationData`; Retry and Version Negotiation
/// packets never enter a space at all (see `DESIGN.md`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Enum)]
#[repr(usize)]
pub enum PacketNumberSpace {
    Initial = 0,
    Handshake = 1,
    ApplicationData = 2,
}

const_assert_eq!(PacketNumberSpace::ALL.len(), 3);

impl PacketNumberSpace {
    pub const ALL: [Self; 3] = [Self::Initial, Self::Handshake, Self::ApplicationData];

    #[must_use]
    pub fn is_application_data(self) -> bool {
        matches!(self, Self::ApplicationData)
    }
}

impl std::fmt::Display for PacketNumberSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Initial => "Initial",
            Self::Handshake => "Handshake",
            Self::ApplicationData => "ApplicationData",
        })
    }
}

/// A packet this endpoint sent, tracked until it is acked or declared
/// lost. `frames` is intentionally opaque to this crate: retransmission
/// is something the caller does once it is told a packet was lost, using
/// whatever it stashed here.
#[derive(Debug)]
pub struct SentPacket<T> {
    pub packet_number: PacketNumber,
    pub sent_at: Instant,
    pub size_bytes: usize,
    pub is_ack_eliciting: bool,
    pub is_crypto: bool,
    pub in_flight: bool,
    pub frames: T,
}

impl<T> SentPacket<T> {
    #[must_use]
    pub fn new(
        packet_number: PacketNumber,
        sent_at: Instant,
        size_bytes: usize,
        is_ack_eliciting: bool,
        is_crypto: bool,
        in_flight: bool,
        frames: T,
    ) -> Self {
        Self {
            packet_number,
            sent_at,
            size_bytes,
            is_ack_eliciting,
            is_crypto,
            in_flight,
            frames,
        }
    }
}

/// Per-space state for the loss detector: the packets it's still waiting
/// to hear about, and the receive-side bookkeeping needed to classify and
/// reconstruct inbound packet numbers.
#[derive(Debug)]
pub struct LossRecoverySpace<T> {
    /// Keyed by packet number so both point lookups (ack processing) and
    /// ordered range scans (packet-threshold loss) are efficient, unlike
    /// a hash map keyed by a stringified PN.
    sent_packets: BTreeMap<PacketNumber, SentPacket<T>>,
    highest_received: Option<PacketNumber>,
    largest_acked: Option<PacketNumber>,
    loss_time: Option<Instant>,
}

impl<T> Default for LossRecoverySpace<T> {
    fn default() -> Self {
        Self {
            sent_packets: BTreeMap::new(),
            highest_received: None,
            largest_acked: None,
            loss_time: None,
        }
    }
}

impl<T> LossRecoverySpace<T> {
    #[must_use]
    pub fn highest_received(&self) -> Option<PacketNumber> {
        self.highest_received
    }

    #[must_use]
    pub fn largest_acked(&self) -> Option<PacketNumber> {
        self.largest_acked
    }

    #[must_use]
    pub fn loss_time(&self) -> Option<Instant> {
        self.loss_time
    }

    pub fn set_loss_time(&mut self, loss_time: Option<Instant>) {
        self.loss_time = loss_time;
    }

    #[must_use]
    pub fn sent_packets(&self) -> &BTreeMap<PacketNumber, SentPacket<T>> {
        &self.sent_packets
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sent_packets.is_empty()
    }

    /// Records an inbound packet number, raising `highest_received` if it
    /// is new. Returns `true` if this packet is (newly) the high-water
    /// mark for the space -- the signal the header handler needs to
    /// decide whether to touch the spin bit.
    pub fn on_packet_received(&mut self, pn: PacketNumber) -> bool {
        match self.highest_received {
            Some(highest) if pn <= highest => false,
            _ => {
                self.highest_received = Some(pn);
                true
            }
        }
    }

    /// Inserts a freshly-sent packet. Re-inserting an already-present
    /// packet number is a caller bug; see `LossRecovery::on_packet_sent`.
    pub fn insert(&mut self, packet: SentPacket<T>) -> Option<SentPacket<T>> {
        self.sent_packets.insert(packet.packet_number, packet)
    }

    pub fn remove(&mut self, pn: PacketNumber) -> Option<SentPacket<T>> {
        self.sent_packets.remove(&pn)
    }

    /// Raises `largest_acked` and returns the previous value, so the
    /// caller can tell whether this ACK advanced the high-water mark.
    pub fn update_largest_acked(&mut self, newly_acked: PacketNumber) {
        self.largest_acked = Some(self.largest_acked.map_or(newly_acked, |cur| cur.max(newly_acked)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_received_is_monotonic() {
        let mut space: LossRecoverySpace<()> = LossRecoverySpace::default();
        assert!(space.on_packet_received(5));
        assert_eq!(space.highest_received(), Some(5));
        assert!(!space.on_packet_received(3));
        assert_eq!(space.highest_received(), Some(5));
        assert!(space.on_packet_received(7));
        assert_eq!(space.highest_received(), Some(7));
    }

    #[test]
    fn largest_acked_only_increases() {
        let mut space: LossRecoverySpace<()> = LossRecoverySpace::default();
        space.update_largest_acked(4);
        space.update_largest_acked(2);
        assert_eq!(space.largest_acked(), Some(4));
        space.update_largest_acked(9);
        assert_eq!(space.largest_acked(), Some(9));
    }
}
