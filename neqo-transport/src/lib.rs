// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! QUIC loss detection and recovery, and the packet-header processing
//! pipeline that feeds it: packet-number unmasking, decoding, and
//! space classification.
//!
//! This crate does not do socket I/O, TLS, or frame parsing. It
//! consumes ACK frames and sent-packet records through narrow
//! interfaces ([`ack::AckFrame`], [`space::SentPacket`]) and reaches
//! the AEAD/TLS layer only through [`aead::HeaderProtectionKeys`].

pub mod ack;
pub mod aead;
pub mod config;
pub mod error;
pub mod events;
pub mod header;
pub mod packet_number;
pub mod recovery;
pub mod rtt;
pub mod space;
pub mod time;

pub use ack::{AckFrame, AckRange};
pub use config::RecoveryConfig;
pub use error::{Error, QuicTransportError, Res};
pub use events::{EcnAck, LossRecoveryEvents, NullEvents, RecordingEvents};
pub use header::{process_header, update_spin_bit, Header, LongHeaderType, ProcessedHeader, VersionGate};
pub use packet_number::{PacketNumber, PacketNumberLength};
pub use recovery::LossRecovery;
pub use rtt::RttEstimator;
pub use space::{LossRecoverySpace, PacketNumberSpace, SentPacket};
pub use time::{Alarm, Clock, SystemClock};
