//! Data channel reliability descriptor.

use std::ffi::c_int;
use std::time::Duration;

use rtc_abi::{ReliabilityFlags, Result, RtcError, RELIABILITY_UNSET};
use serde::{Deserialize, Serialize};

/// Delivery guarantees requested for a data channel.
///
/// With neither limit set the channel is fully reliable, and ordered unless
/// `unordered` is set. Setting a limit makes it partially reliable. The two
/// limits are mutually exclusive, which construction enforces. Deserialization
/// goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawReliability")]
pub struct Reliability {
    unordered: bool,
    max_packet_life_time: Option<Duration>,
    max_retransmits: Option<u32>,
}

/// Unchecked serde shape of [`Reliability`].
#[derive(Deserialize)]
struct RawReliability {
    #[serde(default)]
    unordered: bool,
    #[serde(default)]
    max_packet_life_time: Option<Duration>,
    #[serde(default)]
    max_retransmits: Option<u32>,
}

impl TryFrom<RawReliability> for Reliability {
    type Error = RtcError;

    fn try_from(raw: RawReliability) -> Result<Self> {
        Self::new(raw.unordered, raw.max_packet_life_time, raw.max_retransmits)
    }
}

impl Reliability {
    /// Builds a descriptor, rejecting one with both limits set.
    pub fn new(
        unordered: bool,
        max_packet_life_time: Option<Duration>,
        max_retransmits: Option<u32>,
    ) -> Result<Self> {
        if max_packet_life_time.is_some() && max_retransmits.is_some() {
            return Err(RtcError::ConflictingReliability);
        }
        Ok(Self {
            unordered,
            max_packet_life_time,
            max_retransmits,
        })
    }

    /// Reliable, ordered delivery.
    pub fn reliable() -> Self {
        Self::default()
    }

    /// Reliable delivery without ordering.
    pub fn unordered() -> Self {
        Self {
            unordered: true,
            ..Self::default()
        }
    }

    /// Stop retransmitting a message once it is older than `lifetime`.
    pub fn with_max_packet_life_time(self, lifetime: Duration) -> Result<Self> {
        Self::new(self.unordered, Some(lifetime), self.max_retransmits)
    }

    /// Stop retransmitting a message after `retransmits` attempts.
    pub fn with_max_retransmits(self, retransmits: u32) -> Result<Self> {
        Self::new(self.unordered, self.max_packet_life_time, Some(retransmits))
    }

    /// Whether out-of-order delivery is allowed.
    pub fn is_unordered(&self) -> bool {
        self.unordered
    }

    /// Whether neither limit is set.
    pub fn is_reliable(&self) -> bool {
        self.max_packet_life_time.is_none() && self.max_retransmits.is_none()
    }

    /// The lifetime limit, if set.
    pub fn max_packet_life_time(&self) -> Option<Duration> {
        self.max_packet_life_time
    }

    /// The retransmission limit, if set.
    pub fn max_retransmits(&self) -> Option<u32> {
        self.max_retransmits
    }

    /// The scalar form passed to the engine. Limits saturate at `c_int::MAX`.
    pub fn to_flags(&self) -> ReliabilityFlags {
        ReliabilityFlags {
            unordered: c_int::from(self.unordered),
            max_packet_life_time: self
                .max_packet_life_time
                .map(|d| c_int::try_from(d.as_millis()).unwrap_or(c_int::MAX))
                .unwrap_or(RELIABILITY_UNSET),
            max_retransmits: self
                .max_retransmits
                .map(|n| c_int::try_from(n).unwrap_or(c_int::MAX))
                .unwrap_or(RELIABILITY_UNSET),
        }
    }
}
