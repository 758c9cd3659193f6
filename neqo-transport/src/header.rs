// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Header parsing's final stage: packet-number unmasking, decoding, and
//! reconstruction, plus the header-type-specific tail work (payload
//! length adjustment on long headers, spin-bit toggling on short
//! headers) that can only happen once the true packet number is known.

use neqo_common::{hex, hex_snip_middle, qdebug, qtrace, Role};

use crate::{
    aead::{take_sample, HeaderProtectionKeys},
    error::{Error, QuicTransportError, Res},
    packet_number::{self, PacketNumber, PacketNumberLength},
    space::{LossRecoverySpace, PacketNumberSpace},
};

/// The long-header packet types that carry their own packet-number
/// space; Retry carries no packet number and is handled separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LongHeaderType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
}

/// A connection ID as carried on the wire: variable length, opaque.
pub type ConnectionId = Vec<u8>;

/// A header with its packet number still in protected (masked,
/// truncated) form. Everything else about the header is already known
/// from the cleartext-prefix parse that produced this value.
#[derive(Clone, Debug)]
pub enum Header {
    Long {
        version: u32,
        packet_type: LongHeaderType,
        dcid: ConnectionId,
        scid: ConnectionId,
        token: Option<Vec<u8>>,
        payload_length: usize,
    },
    Short {
        dcid: ConnectionId,
        spin_bit: bool,
        key_phase: bool,
    },
    VersionNegotiation {
        dcid: ConnectionId,
        scid: ConnectionId,
    },
}

impl Header {
    #[must_use]
    pub fn space(&self) -> Option<PacketNumberSpace> {
        match self {
            Self::Long { packet_type: LongHeaderType::Initial, .. } => Some(PacketNumberSpace::Initial),
            Self::Long { packet_type: LongHeaderType::Handshake, .. } => Some(PacketNumberSpace::Handshake),
            Self::Long { packet_type: LongHeaderType::ZeroRtt, .. } => Some(PacketNumberSpace::ApplicationData),
            Self::Short { .. } => Some(PacketNumberSpace::ApplicationData),
            Self::Long { packet_type: LongHeaderType::Retry, .. } | Self::VersionNegotiation { .. } => None,
        }
    }
}

/// The result of successfully processing a header: the original header
/// (with its PN-space-affecting tail work applied), the reconstructed
/// packet number, and the payload offset advanced past the decoded PN.
#[derive(Clone, Debug)]
pub struct ProcessedHeader {
    pub header: Header,
    pub packet_number: PacketNumber,
    pub payload_offset: usize,
}

/// The caller's negotiated-version gate, consulted only for long-header
/// packets arriving at a server. A client never runs the version gate.
pub trait VersionGate {
    /// Whether `version` is one this endpoint can speak.
    fn can_negotiate(&self, version: u32) -> bool;

    /// Whether the server is still in its initial, pre-handshake
    /// "allow-all" TLS state (0-RTT may arrive before the handshake
    /// keys are confirmed).
    fn server_allows_all(&self) -> bool;
}

/// Unmasks, decodes, and reconstructs the packet number for `header`,
/// using `keys` to remove header protection and `space` to supply the
/// expected packet number (`highest_received + 1`). `first_byte` is the
/// still-protected first byte of the header as it appears in
/// `datagram`; `pn_offset` is the datagram offset of the first
/// (still-protected) packet-number byte.
///
/// On success, `space.highest_received` has been advanced if this
/// packet raised the high-water mark, and for a `Header::Short` packet
/// that does so, the spin bit is returned for the caller to fold into
/// connection state via [`update_spin_bit`].
///
/// # Errors
/// `Error::Internal` if the datagram is too short for the header
/// protection sample or the decoded packet-number length.
pub fn process_header<T>(
    mut header: Header,
    datagram: &[u8],
    pn_offset: usize,
    first_byte: u8,
    role: Role,
    gate: &dyn VersionGate,
    keys: &dyn HeaderProtectionKeys,
    space: &mut LossRecoverySpace<T>,
) -> Res<ProcessedHeader> {
    qtrace!("processing header as {role}: datagram={}", hex_snip_middle(datagram));

    if let Header::VersionNegotiation { .. } = &header {
        qtrace!("version negotiation packet bypasses header protection");
        return Ok(ProcessedHeader { header, packet_number: 0, payload_offset: pn_offset });
    }

    if role.is_server() {
        version_gate(&header, gate)?;
    }

    let sample = take_sample(datagram, pn_offset)?;
    let (first_byte, dcid) = unmask_first_byte(&header, first_byte, &sample, keys)?;
    let pn_len = PacketNumberLength::from_first_byte(first_byte);

    let mut pn_bytes = datagram
        .get(pn_offset..pn_offset + pn_len.bytes())
        .ok_or(Error::Internal("datagram too short for packet number field"))?
        .to_vec();
    qtrace!("HP masked pn bytes={}", hex(&pn_bytes));
    decrypt_pn_bytes(&header, dcid.as_deref(), &sample, keys, &mut pn_bytes)?;
    qtrace!("HP unmasked pn bytes={}", hex(&pn_bytes));

    let truncated = packet_number::decode_truncated(&pn_bytes, pn_len)?;
    let expected = space.highest_received().map_or(0, |h| h + 1);
    let full_pn = packet_number::reconstruct(expected, truncated, pn_len);

    let is_new_high = space.on_packet_received(full_pn);
    qdebug!("packet number {full_pn} (was {truncated:x}, len={})", pn_len.bytes());

    let payload_offset = pn_offset + pn_len.bytes();
    match &mut header {
        Header::Long { payload_length, .. } => {
            *payload_length = payload_length.saturating_sub(pn_len.bytes());
        }
        Header::Short { spin_bit, .. } => {
            if is_new_high {
                *spin_bit = update_spin_bit(role, *spin_bit);
            }
        }
        Header::VersionNegotiation { .. } => unreachable!("handled above"),
    }

    Ok(ProcessedHeader { header, packet_number: full_pn, payload_offset })
}

/// The server-side version-negotiation gate (step 1 of the header
/// handling algorithm). A client never calls this.
fn version_gate(header: &Header, gate: &dyn VersionGate) -> Res<()> {
    let Header::Long { version, packet_type, .. } = header else {
        return Ok(());
    };
    if gate.can_negotiate(*version) {
        return Ok(());
    }
    match packet_type {
        LongHeaderType::Initial => Err(Error::Quic(QuicTransportError::VersionNegotiation)),
        LongHeaderType::ZeroRtt => Err(Error::IgnorePacket),
        _ if gate.server_allows_all() => Err(Error::IgnorePacket),
        _ => Err(Error::Quic(QuicTransportError::ProtocolViolation)),
    }
}

/// Dispatches to the right AEAD collaborator method by header form and
/// unmasks the low 2 bits of the first header byte, returning the
/// unmasked byte and (for long headers) the destination connection ID
/// that Initial keys are derived from.
fn unmask_first_byte(
    header: &Header,
    first_byte: u8,
    sample: &[u8; crate::aead::SAMPLE_LEN],
    keys: &dyn HeaderProtectionKeys,
) -> Res<(u8, Option<ConnectionId>)> {
    // A single dummy byte carries the first-byte low bits through the
    // same masking call as the packet-number bytes; only its low 2 bits
    // are meaningful once unmasked (the draft's header-protection mask
    // covers exactly the PN-length-disambiguating bits).
    let mut tag = [first_byte];
    match header {
        Header::Long { packet_type: LongHeaderType::Initial | LongHeaderType::Retry, dcid, .. } => {
            keys.initial_pn_decrypt(dcid, sample, &mut tag)?;
            Ok((tag[0], Some(dcid.clone())))
        }
        Header::Long { packet_type: LongHeaderType::Handshake, .. } => {
            keys.handshake_pn_decrypt(sample, &mut tag)?;
            Ok((tag[0], None))
        }
        Header::Long { packet_type: LongHeaderType::ZeroRtt, .. } => {
            keys.zero_rtt_pn_decrypt(sample, &mut tag)?;
            Ok((tag[0], None))
        }
        Header::Short { .. } => {
            keys.one_rtt_pn_decrypt(sample, &mut tag)?;
            Ok((tag[0], None))
        }
        Header::VersionNegotiation { .. } => unreachable!("handled by caller"),
    }
}

fn decrypt_pn_bytes(
    header: &Header,
    dcid: Option<&[u8]>,
    sample: &[u8; crate::aead::SAMPLE_LEN],
    keys: &dyn HeaderProtectionKeys,
    pn_bytes: &mut [u8],
) -> Res<()> {
    match header {
        Header::Long { packet_type: LongHeaderType::Initial | LongHeaderType::Retry, .. } => {
            keys.initial_pn_decrypt(dcid.unwrap_or(&[]), sample, pn_bytes)
        }
        Header::Long { packet_type: LongHeaderType::Handshake, .. } => {
            keys.handshake_pn_decrypt(sample, pn_bytes)
        }
        Header::Long { packet_type: LongHeaderType::ZeroRtt, .. } => keys.zero_rtt_pn_decrypt(sample, pn_bytes),
        Header::Short { .. } => keys.one_rtt_pn_decrypt(sample, pn_bytes),
        Header::VersionNegotiation { .. } => unreachable!("handled by caller"),
    }
}

/// The connection's new observed spin bit after receiving a
/// high-water-mark short-header packet with spin bit `received`: the
/// client inverts it, the server mirrors it.
#[must_use]
pub fn update_spin_bit(role: Role, received: bool) -> bool {
    if role.is_client() {
        !received
    } else {
        received
    }
}
