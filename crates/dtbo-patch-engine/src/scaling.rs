//! Frequency scaling of timing scalars.
//!
//! Clock rate grows with frame rate and transfer time shrinks with it:
//!
//! ```text
//! new_clock         = base_clock * target_fps / base_fps
//! new_transfer_time = base_transfer_time * base_fps / target_fps
//! ```
//!
//! Both are computed in `u64`, multiplying before dividing.

use serde::{Deserialize, Serialize};

use crate::profile::TimingProperties;
use crate::property::get_numeric;
use crate::{Error, Result};

/// Clock, frame rate and transfer time read from one timing block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimingScalars {
    pub clock: Option<u64>,
    pub framerate: Option<u64>,
    pub transfer_time: Option<u64>,
}

impl TimingScalars {
    /// Reads the scalars of a block.
    pub fn read(content: &str, props: &TimingProperties) -> Self {
        Self {
            clock: get_numeric(content, &props.clock),
            framerate: get_numeric(content, &props.framerate),
            transfer_time: get_numeric(content, &props.transfer_time),
        }
    }
}

/// Bounds applied to a base frame rate read from a block.
///
/// A reading outside `min..=max`, or no reading at all, is replaced by
/// `fallback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsGuard {
    pub min: u64,
    pub max: u64,
    pub fallback: u64,
}

impl FpsGuard {
    /// Returns the frame rate to scale from.
    pub fn sanitize(&self, fps: Option<u64>) -> u64 {
        match fps {
            Some(fps) if (self.min..=self.max).contains(&fps) => fps,
            _ => self.fallback,
        }
    }
}

/// Scaled values for one target frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scaled {
    pub clock: u64,
    /// `None` when the base block had no transfer time.
    pub transfer_time: Option<u64>,
}

fn mul_div(value: u64, mul: u64, div: u64) -> Result<u64> {
    if div == 0 {
        return Err(Error::ZeroFramerate);
    }
    value
        .checked_mul(mul)
        .map(|product| product / div)
        .ok_or(Error::Overflow { value, factor: mul })
}

/// `floor(base_clock * target_fps / base_fps)`
pub fn scale_clock(base_clock: u64, base_fps: u64, target_fps: u64) -> Result<u64> {
    mul_div(base_clock, target_fps, base_fps)
}

/// `floor(base_transfer_time * base_fps / target_fps)`, or `None` when the
/// base transfer time is zero.
pub fn scale_transfer_time(
    base_transfer_time: u64,
    base_fps: u64,
    target_fps: u64,
) -> Result<Option<u64>> {
    if base_transfer_time == 0 {
        return Ok(None);
    }
    mul_div(base_transfer_time, base_fps, target_fps).map(Some)
}

/// Scales a block's clock and transfer time to `target_fps`.
pub fn scale(base: &TimingScalars, guard: Option<&FpsGuard>, target_fps: u64) -> Result<Scaled> {
    let base_fps = match guard {
        Some(guard) => guard.sanitize(base.framerate),
        None => base.framerate.ok_or(Error::MissingBase("framerate"))?,
    };
    if base_fps == 0 || target_fps == 0 {
        return Err(Error::ZeroFramerate);
    }
    let base_clock = base.clock.ok_or(Error::MissingBase("clock"))?;

    Ok(Scaled {
        clock: scale_clock(base_clock, base_fps, target_fps)?,
        transfer_time: scale_transfer_time(base.transfer_time.unwrap_or(0), base_fps, target_fps)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(clock: u64, fps: u64, transfer: u64) -> TimingScalars {
        TimingScalars {
            clock: Some(clock),
            framerate: Some(fps),
            transfer_time: Some(transfer),
        }
    }

    #[test]
    fn test_clock_law() {
        let expected = 0x568bc300u64 * 150 / 144;
        assert_eq!(scale_clock(0x568bc300, 144, 150).unwrap(), expected);
        assert_eq!(expected, 0x5a26eb20);
    }

    #[test]
    fn test_transfer_time_inverse_law() {
        assert_eq!(scale_transfer_time(0x1a90, 144, 60).unwrap(), Some(0x3fc0));
        assert_eq!(scale_transfer_time(0, 144, 60).unwrap(), None);
    }

    #[test]
    fn test_scale_series_values() {
        let template = base(0x568bc300, 144, 0x1a90);
        let scaled = scale(&template, None, 180).unwrap();
        assert_eq!(scaled.clock, 0x6c2eb3c0);
        assert_eq!(scaled.transfer_time, Some(0x1540));
    }

    #[test]
    fn test_multiply_before_divide() {
        // 7 * 3 / 2 = 10, while 7 / 2 * 3 would give 9.
        assert_eq!(scale_clock(7, 2, 3).unwrap(), 10);
    }

    #[test]
    fn test_guard_replaces_anomalous_fps() {
        let guard = FpsGuard {
            min: 110,
            max: 130,
            fallback: 120,
        };
        assert_eq!(guard.sanitize(Some(120)), 120);
        assert_eq!(guard.sanitize(Some(0)), 120);
        assert_eq!(guard.sanitize(Some(1200)), 120);
        assert_eq!(guard.sanitize(None), 120);

        let anomalous = base(0x568bc300, 0, 0);
        let scaled = scale(&anomalous, Some(&guard), 123).unwrap();
        assert_eq!(scaled.clock, 0x568bc300 * 123 / 120);
        assert_eq!(scaled.transfer_time, None);
    }

    #[test]
    fn test_zero_or_missing_base_is_refused() {
        assert_eq!(
            scale(&base(1, 0, 1), None, 60),
            Err(Error::ZeroFramerate)
        );
        assert_eq!(scale(&base(1, 60, 1), None, 0), Err(Error::ZeroFramerate));
        let no_clock = TimingScalars {
            clock: None,
            framerate: Some(60),
            transfer_time: None,
        };
        assert_eq!(
            scale(&no_clock, None, 90),
            Err(Error::MissingBase("clock"))
        );
        assert_eq!(
            scale(&TimingScalars::default(), None, 90),
            Err(Error::MissingBase("framerate"))
        );
    }

    #[test]
    fn test_overflow_is_reported() {
        assert!(matches!(
            scale_clock(u64::MAX, 60, 120),
            Err(Error::Overflow { .. })
        ));
    }
}
