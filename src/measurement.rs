//! Throughput quantities and their human-readable rendering.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::params;

/// Unit of a [`BandwidthMeasurement`], ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Unit {
    /// bits per second
    #[serde(rename = "bps")]
    BitsPerSecond,
    /// kilobits per second
    #[serde(rename = "Kbps")]
    KilobitsPerSecond,
    /// megabits per second
    #[serde(rename = "Mbps")]
    MegabitsPerSecond,
    /// gigabits per second
    #[serde(rename = "Gbps")]
    GigabitsPerSecond,
}

impl Unit {
    /// Multiplier that converts a value in this unit into bits per second.
    pub fn scale_factor(self) -> f64 {
        match self {
            Unit::BitsPerSecond => 1.0,
            Unit::KilobitsPerSecond => 1e3,
            Unit::MegabitsPerSecond => 1e6,
            Unit::GigabitsPerSecond => 1e9,
        }
    }

    /// Short symbol used when rendering.
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::BitsPerSecond => "bps",
            Unit::KilobitsPerSecond => "Kbps",
            Unit::MegabitsPerSecond => "Mbps",
            Unit::GigabitsPerSecond => "Gbps",
        }
    }

    /// The next larger unit, or `None` for the largest one.
    pub fn next(self) -> Option<Unit> {
        match self {
            Unit::BitsPerSecond => Some(Unit::KilobitsPerSecond),
            Unit::KilobitsPerSecond => Some(Unit::MegabitsPerSecond),
            Unit::MegabitsPerSecond => Some(Unit::GigabitsPerSecond),
            Unit::GigabitsPerSecond => None,
        }
    }
}

/// An immutable throughput value.
///
/// Equality is tolerant: two measurements are equal when their Mbit/s
/// values differ by less than 0.001, whatever units they are expressed in.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BandwidthMeasurement {
    /// Magnitude in `unit`.
    pub value: f64,
    /// Unit of `value`.
    pub unit: Unit,
}

impl BandwidthMeasurement {
    const EQUALITY_TOLERANCE_MBPS: f64 = 0.001;

    /// Create a measurement from a value and its unit.
    pub fn new(value: f64, unit: Unit) -> Self {
        BandwidthMeasurement { value, unit }
    }

    /// Rate of `bytes` transferred over `elapsed`, in bits per second.
    ///
    /// A zero `elapsed` yields a zero rate rather than infinity.
    pub fn from_bytes(bytes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let bits = if secs > 0.0 {
            bytes as f64 * 8.0 / secs
        } else {
            0.0
        };
        BandwidthMeasurement::new(bits, Unit::BitsPerSecond)
    }

    /// Canonical value in bits per second.
    pub fn bits_per_second(&self) -> f64 {
        self.value * self.unit.scale_factor()
    }

    /// Value in megabits per second.
    pub fn megabits_per_second(&self) -> f64 {
        self.bits_per_second() / Unit::MegabitsPerSecond.scale_factor()
    }

    /// The same quantity expressed in `unit`.
    pub fn converted(&self, unit: Unit) -> Self {
        BandwidthMeasurement::new(self.bits_per_second() / unit.scale_factor(), unit)
    }

    /// Rescale upward while the magnitude is at least 1000, stopping at the
    /// largest unit.
    pub fn formatted(&self) -> Self {
        let mut value = self.value;
        let mut unit = self.unit;
        while value.abs() >= 1000.0 {
            match unit.next() {
                Some(next) => {
                    value /= 1000.0;
                    unit = next;
                }
                None => break,
            }
        }
        BandwidthMeasurement { value, unit }
    }
}

impl PartialEq for BandwidthMeasurement {
    fn eq(&self, other: &Self) -> bool {
        (self.megabits_per_second() - other.megabits_per_second()).abs()
            < Self::EQUALITY_TOLERANCE_MBPS
    }
}

impl fmt::Display for BandwidthMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.formatted();
        write!(f, "{:.1} {}", shown.value, shown.unit.symbol())
    }
}

/// Rejects implausible throughput values before they are shown to a caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanityFilter {
    /// Largest rate, in Mbit/s, that is still considered real.
    pub ceiling_mbps: f64,
}

impl SanityFilter {
    /// Create a filter with the given ceiling.
    pub fn new(ceiling_mbps: f64) -> Self {
        SanityFilter { ceiling_mbps }
    }

    /// Whether `m` is plausible enough to be displayed.
    pub fn accepts(&self, m: &BandwidthMeasurement) -> bool {
        let mbps = m.megabits_per_second();
        mbps.is_finite() && mbps <= self.ceiling_mbps
    }
}

impl Default for SanityFilter {
    fn default() -> Self {
        SanityFilter::new(params::SANITY_CEILING_MBPS)
    }
}
