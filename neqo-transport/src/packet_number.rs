// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Packet-number truncation and reconstruction, per the draft-19 rules:
//! a 62-bit packet number is carried on the wire truncated to its
//! low-order 1, 2, 3, or 4 bytes, and the receiver reconstructs the full
//! value from the truncated bits plus the space's largest received PN.

use crate::error::{Error, Res};

/// A full, reconstructed packet number. 62 bits of range; stored in a
/// `u64` with the top two bits always zero.
pub type PacketNumber = u64;

/// The number of bytes the truncated packet number occupies on the wire,
/// as decoded from the two low bits of the first header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketNumberLength {
    One,
    Two,
    Three,
    Four,
}

impl PacketNumberLength {
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }

    #[must_use]
    const fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    /// Decodes the length from the low 2 bits of the (already unmasked)
    /// first header byte, as the draft specifies: the on-wire value is
    /// `length - 1`.
    #[must_use]
    pub const fn from_first_byte(first_byte: u8) -> Self {
        match first_byte & 0x03 {
            0 => Self::One,
            1 => Self::Two,
            2 => Self::Three,
            _ => Self::Four,
        }
    }

    /// The bits to OR into the first header byte when encoding, mirrored
    /// here because it shares the same table as decoding.
    #[must_use]
    pub const fn tag_bits(self) -> u8 {
        match self {
            Self::One => 0,
            Self::Two => 1,
            Self::Three => 2,
            Self::Four => 3,
        }
    }
}

/// Decodes a truncated packet number of the given length from its
/// big-endian wire bytes.
///
/// # Errors
/// Returns `Error::Internal` if `bytes` is shorter than `len` requires;
/// this is a programmer error in the caller, not a malformed-packet
/// condition (malformed-length packets are rejected before this is
/// reached, since the length comes from bits we just unmasked).
pub fn decode_truncated(bytes: &[u8], len: PacketNumberLength) -> Res<u64> {
    let n = len.bytes();
    if bytes.len() < n {
        return Err(Error::Internal("packet number buffer shorter than its length"));
    }
    let mut v: u64 = 0;
    for &b in &bytes[..n] {
        v = (v << 8) | u64::from(b);
    }
    Ok(v)
}

/// Reconstructs the full packet number nearest to `expected` that is
/// congruent to `truncated` modulo `2^len.bits()`, per draft-19 section
/// "Sample Packet Number Decoding Algorithm". Ties are broken in favor of
/// the higher candidate, which falls out of the `<=` / `<` asymmetry
/// below.
#[must_use]
pub fn reconstruct(expected: PacketNumber, truncated: u64, len: PacketNumberLength) -> PacketNumber {
    let pn_bits = len.bits();
    let pn_win: u64 = 1 << pn_bits;
    let pn_hwin = pn_win / 2;
    let pn_mask = pn_win - 1;

    let candidate = (expected & !pn_mask) | truncated;

    if candidate + pn_hwin <= expected {
        candidate + pn_win
    } else if candidate > expected + pn_hwin && candidate > pn_win {
        candidate - pn_win
    } else {
        candidate
    }
}

/// The truncated, wire-format representation of `pn` at length `len`:
/// its low `len.bits()` bits.
#[must_use]
pub fn truncate(pn: PacketNumber, len: PacketNumberLength) -> u64 {
    pn & ((1u64 << len.bits()) - 1)
}

/// The minimum encoding length needed so that `pn` reconstructs
/// unambiguously given `largest_acked` (the highest packet number known
/// to have been received by the peer). Used when sending, not receiving;
/// included because the two operations are exact inverses of each other
/// and belong together.
#[must_use]
pub fn shortest_length(pn: PacketNumber, largest_acked: Option<PacketNumber>) -> PacketNumberLength {
    let unacked_range = pn.saturating_sub(largest_acked.unwrap_or(0));
    // Need 2 * unacked_range - 1 bits of headroom either side of `pn` so
    // that the ambiguity window never crosses into a packet the peer has
    // already acknowledged.
    if unacked_range < (1 << 7) {
        PacketNumberLength::One
    } else if unacked_range < (1 << 14) {
        PacketNumberLength::Two
    } else if unacked_range < (1 << 21) {
        PacketNumberLength::Three
    } else {
        PacketNumberLength::Four
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_for_all_widths_within_half_window() {
        for len in [
            PacketNumberLength::One,
            PacketNumberLength::Two,
            PacketNumberLength::Three,
            PacketNumberLength::Four,
        ] {
            let half = 1u64 << (len.bits() - 1);
            for x in [0, 1, 1000, 1 << 20, 1 << 40] {
                let expected = x;
                // Any truncated PN within half the window of `expected`
                // must reconstruct back to the original full value.
                for delta in [0i64, 1, -1, (half as i64) - 1, -((half as i64) - 1)] {
                    let full = (x as i64 + delta).max(0) as u64;
                    if full.abs_diff(expected) >= half {
                        continue;
                    }
                    let truncated = truncate(full, len);
                    assert_eq!(
                        reconstruct(expected, truncated, len),
                        full,
                        "len={len:?} expected={expected} full={full}"
                    );
                }
            }
        }
    }

    #[test]
    fn decode_first_byte_length_bits() {
        assert_eq!(PacketNumberLength::from_first_byte(0b1100_0000), PacketNumberLength::One);
        assert_eq!(PacketNumberLength::from_first_byte(0b1100_0001), PacketNumberLength::Two);
        assert_eq!(PacketNumberLength::from_first_byte(0b1100_0010), PacketNumberLength::Three);
        assert_eq!(PacketNumberLength::from_first_byte(0b1100_0011), PacketNumberLength::Four);
    }

    #[test]
    fn decode_truncated_big_endian() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(decode_truncated(&bytes, PacketNumberLength::One).unwrap(), 0x01);
        assert_eq!(decode_truncated(&bytes, PacketNumberLength::Two).unwrap(), 0x0102);
        assert_eq!(decode_truncated(&bytes, PacketNumberLength::Four).unwrap(), 0x0102_0304);
    }

    #[test]
    fn big_gap_does_not_wrap_below_zero() {
        // expected == 0 is the very first packet; any truncated value
        // should reconstruct to something close to zero, not wrap high.
        assert_eq!(reconstruct(0, 0, PacketNumberLength::Two), 0);
    }
}
