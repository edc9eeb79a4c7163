// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Virtual Time
//!
//! Exact simulation time shared by every device. A [`VirtualTime`] is a pair
//! of whole seconds and sub-second ticks at a resolution of 10^18 ticks per
//! second (attoseconds). All arithmetic is integer arithmetic through `u128`
//! intermediates; nothing in the scheduling core touches floating point.
//!
//! # Cycle conversions
//!
//! Not every clock rate divides 10^18, so exactness of cycle conversions
//! comes from a rounding pair instead of divisibility:
//!
//! - [`VirtualTime::from_cycles`] rounds **up** to the next tick
//! - [`VirtualTime::as_cycles`] rounds **down** to a whole cycle
//!
//! For every rate in `1..=MAX_CLOCK_HZ` the error introduced by the first is
//! below one cycle, so `as_cycles(from_cycles(n, hz), hz) == n` for all `n`,
//! and a device whose local time is derived from its cycle count can never
//! be placed past a horizon it was budgeted against.
//!
//! # Example
//!
//! ```
//! use machina::core::time::VirtualTime;
//!
//! let cycle = VirtualTime::from_hertz_period(3_579_545).unwrap();
//! let frame = VirtualTime::from_cycles(59_659, 3_579_545).unwrap();
//! assert!(cycle < frame);
//! assert_eq!(frame.as_cycles(3_579_545), 59_659);
//! ```

use super::error::{EmulatorError, Result};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// Sub-second resolution (ticks per second)
pub const TICKS_PER_SECOND: u64 = 1_000_000_000_000_000_000;

/// Seconds value of [`VirtualTime::NEVER`]; every finite time is below it
pub const MAX_SECONDS: i64 = 1_000_000_000;

/// Highest clock rate accepted by cycle conversions (1 THz)
pub const MAX_CLOCK_HZ: u64 = 1_000_000_000_000;

const TPS: u128 = TICKS_PER_SECOND as u128;

/// Exact virtual time value
///
/// Ordering is lexicographic on (seconds, ticks), which is chronological
/// because ticks are always normalised into `[0, TICKS_PER_SECOND)`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Encode,
    Decode,
)]
pub struct VirtualTime {
    seconds: i64,
    ticks: u64,
}

impl VirtualTime {
    /// The start of every session
    pub const ZERO: VirtualTime = VirtualTime {
        seconds: 0,
        ticks: 0,
    };

    /// Unreachable maximum, used as the expiration of disabled timers
    pub const NEVER: VirtualTime = VirtualTime {
        seconds: MAX_SECONDS,
        ticks: 0,
    };

    /// Build a time from seconds and ticks, carrying excess ticks into seconds
    ///
    /// # Errors
    ///
    /// `InvalidTimeRange` if the result is negative or not below `NEVER`.
    pub fn new(seconds: i64, ticks: u64) -> Result<Self> {
        let carry = (ticks / TICKS_PER_SECOND) as i64;
        let seconds = seconds
            .checked_add(carry)
            .ok_or_else(|| EmulatorError::InvalidTimeRange("seconds overflow".into()))?;
        if !(0..MAX_SECONDS).contains(&seconds) {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "{} seconds is outside [0, {})",
                seconds, MAX_SECONDS
            )));
        }
        Ok(Self {
            seconds,
            ticks: ticks % TICKS_PER_SECOND,
        })
    }

    /// Whole seconds
    #[inline]
    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Sub-second ticks, always below [`TICKS_PER_SECOND`]
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub fn is_never(&self) -> bool {
        self.seconds >= MAX_SECONDS
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.ticks == 0
    }

    /// Whole seconds, saturating to `NEVER`
    pub fn from_seconds(seconds: u64) -> Self {
        if seconds >= MAX_SECONDS as u64 {
            return Self::NEVER;
        }
        Self {
            seconds: seconds as i64,
            ticks: 0,
        }
    }

    /// Milliseconds, saturating to `NEVER`
    pub fn from_millis(ms: u64) -> Self {
        Self::from_fraction(ms, 1_000)
    }

    /// Microseconds, saturating to `NEVER`
    pub fn from_micros(us: u64) -> Self {
        Self::from_fraction(us, 1_000_000)
    }

    /// Nanoseconds, saturating to `NEVER`
    pub fn from_nanos(ns: u64) -> Self {
        Self::from_fraction(ns, 1_000_000_000)
    }

    fn from_fraction(units: u64, per_second: u64) -> Self {
        let seconds = units / per_second;
        let ticks = (units % per_second) * (TICKS_PER_SECOND / per_second);
        if seconds >= MAX_SECONDS as u64 {
            return Self::NEVER;
        }
        Self {
            seconds: seconds as i64,
            ticks,
        }
    }

    /// Duration of one period of a clock running at `hz`
    ///
    /// # Errors
    ///
    /// `InvalidClock` if `hz` is zero or above [`MAX_CLOCK_HZ`].
    pub fn from_hertz_period(hz: u64) -> Result<Self> {
        Self::from_cycles(1, hz)
    }

    /// Duration of `cycles` cycles at `hz`, rounded up to the next tick
    ///
    /// # Errors
    ///
    /// `InvalidClock` for an unsupported rate, `InvalidTimeRange` if the
    /// duration does not fit below `NEVER`.
    pub fn from_cycles(cycles: u64, hz: u64) -> Result<Self> {
        check_clock(hz)?;
        let seconds = cycles / hz;
        let rem = (cycles % hz) as u128;
        let ticks = (rem * TPS).div_ceil(hz as u128) as u64;
        if seconds >= MAX_SECONDS as u64 {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "{} cycles at {} Hz exceeds the time range",
                cycles, hz
            )));
        }
        Ok(Self {
            seconds: seconds as i64,
            ticks,
        })
    }

    /// Number of whole cycles of a `hz` clock that fit in this time
    ///
    /// `NEVER` and results beyond `u64` saturate to `u64::MAX`. An
    /// unsupported rate yields 0; callers validate rates up front.
    pub fn as_cycles(&self, hz: u64) -> u64 {
        if self.is_never() {
            return u64::MAX;
        }
        if check_clock(hz).is_err() {
            return 0;
        }
        let whole = self.seconds as u128 * hz as u128;
        let frac = self.ticks as u128 * hz as u128 / TPS;
        u64::try_from(whole + frac).unwrap_or(u64::MAX)
    }

    /// Total ticks since zero (finite times only)
    pub(crate) fn as_ticks_u128(&self) -> u128 {
        self.seconds as u128 * TPS + self.ticks as u128
    }

    pub(crate) fn from_ticks_u128(total: u128) -> Result<Self> {
        let seconds = total / TPS;
        if seconds >= MAX_SECONDS as u128 {
            return Err(EmulatorError::InvalidTimeRange(
                "result exceeds the time range".into(),
            ));
        }
        Ok(Self {
            seconds: seconds as i64,
            ticks: (total % TPS) as u64,
        })
    }

    /// Add two times, saturating to `NEVER`
    ///
    /// `NEVER` is absorbing: adding anything to it yields `NEVER`, which is
    /// how disabled timers stay disabled through re-arming arithmetic.
    pub fn saturating_add(self, other: VirtualTime) -> VirtualTime {
        self.checked_add(other).unwrap_or(Self::NEVER)
    }

    /// Add two times
    ///
    /// # Errors
    ///
    /// `InvalidTimeRange` if two finite times sum to `NEVER` or beyond.
    pub fn checked_add(self, other: VirtualTime) -> Result<VirtualTime> {
        if self.is_never() || other.is_never() {
            return Ok(Self::NEVER);
        }
        let mut seconds = self.seconds + other.seconds;
        let mut ticks = self.ticks + other.ticks;
        if ticks >= TICKS_PER_SECOND {
            ticks -= TICKS_PER_SECOND;
            seconds += 1;
        }
        if seconds >= MAX_SECONDS {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "{} + {} overflows",
                self, other
            )));
        }
        Ok(Self { seconds, ticks })
    }

    /// Subtract `other` from this time
    ///
    /// `NEVER - finite` is `NEVER`.
    ///
    /// # Errors
    ///
    /// `InvalidTimeRange` if the result would be negative, or when
    /// subtracting `NEVER`. Both indicate a driver bug.
    pub fn checked_sub(self, other: VirtualTime) -> Result<VirtualTime> {
        if other.is_never() {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "cannot subtract never from {}",
                self
            )));
        }
        if self.is_never() {
            return Ok(Self::NEVER);
        }
        if self < other {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "{} - {} is negative",
                self, other
            )));
        }
        let mut seconds = self.seconds - other.seconds;
        let ticks = if self.ticks >= other.ticks {
            self.ticks - other.ticks
        } else {
            seconds -= 1;
            self.ticks + TICKS_PER_SECOND - other.ticks
        };
        Ok(Self { seconds, ticks })
    }

    /// Subtract, clamping negative results to zero
    pub fn saturating_sub(self, other: VirtualTime) -> VirtualTime {
        self.checked_sub(other).unwrap_or(Self::ZERO)
    }

    /// Multiply by `num / den`, rounding down to a whole tick
    ///
    /// This is the conversion primitive between clock domains: scaling a
    /// one-second time by `(n, hz)` yields the duration of `n` cycles.
    ///
    /// # Errors
    ///
    /// `InvalidTimeRange` if `den` is zero or the product leaves the
    /// representable range.
    pub fn scale_by_ratio(self, num: u64, den: u64) -> Result<VirtualTime> {
        if den == 0 {
            return Err(EmulatorError::InvalidTimeRange(
                "scale by a zero denominator".into(),
            ));
        }
        if self.is_never() {
            return Ok(if num == 0 { Self::ZERO } else { Self::NEVER });
        }
        let scaled = self
            .as_ticks_u128()
            .checked_mul(num as u128)
            .ok_or_else(|| {
                EmulatorError::InvalidTimeRange(format!("{} * {} overflows", self, num))
            })?
            / den as u128;
        Self::from_ticks_u128(scaled)
    }
}

/// Validate a clock rate for cycle conversions
pub fn check_clock(hz: u64) -> Result<()> {
    if hz == 0 || hz > MAX_CLOCK_HZ {
        return Err(EmulatorError::InvalidClock {
            hz,
            max: MAX_CLOCK_HZ,
        });
    }
    Ok(())
}

impl Add for VirtualTime {
    type Output = VirtualTime;

    fn add(self, rhs: VirtualTime) -> VirtualTime {
        self.saturating_add(rhs)
    }
}

impl AddAssign for VirtualTime {
    fn add_assign(&mut self, rhs: VirtualTime) {
        *self = self.saturating_add(rhs);
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{}.{:018}", self.seconds, self.ticks)
        }
    }
}
