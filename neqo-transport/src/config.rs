// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The handful of constants the loss-recovery algorithm is tuned with,
//! gathered into one overridable struct rather than hardcoded, mirroring
//! how `ConnectionParameters` exposes tunables elsewhere in this family
//! of crates.

use std::time::Duration;

use crate::rtt::{DEFAULT_MAX_ACK_DELAY, GRANULARITY, INITIAL_RTT};

#[derive(Clone, Copy, Debug)]
pub struct RecoveryConfig {
    /// `kPacketThreshold`: packets older than `largest_acked` by this many
    /// are deemed lost outright.
    pub packet_threshold: u64,
    /// `kTimeThreshold`, expressed as a ratio to keep it exact.
    pub time_threshold_num: u32,
    pub time_threshold_den: u32,
    /// `kGranularity`: the timer-resolution floor applied to every delay
    /// this module computes.
    pub granularity: Duration,
    /// The RTT assumed before the first real sample arrives.
    pub initial_rtt: Duration,
    /// The peer's acknowledgment-delay exponent, until transport
    /// parameters say otherwise.
    pub max_ack_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            packet_threshold: 3,
            time_threshold_num: 9,
            time_threshold_den: 8,
            granularity: GRANULARITY,
            initial_rtt: INITIAL_RTT,
            max_ack_delay: DEFAULT_MAX_ACK_DELAY,
        }
    }
}

impl RecoveryConfig {
    /// `loss_delay` for a given RTT estimate: `TIME_THRESHOLD * rtt`,
    /// floored by `GRANULARITY`.
    #[must_use]
    pub fn loss_delay(&self, rtt: Duration) -> Duration {
        std::cmp::max(
            rtt * self.time_threshold_num / self.time_threshold_den,
            self.granularity,
        )
    }
}
