//! Snapshots of FFmpeg's `-progress pipe:2` key/value stream.

use serde::{Deserialize, Serialize};

/// Encoder position reported at each `progress=` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Output timestamp written so far, in microseconds
    pub out_time_us: i64,
    /// Realtime multiple; 0 until FFmpeg reports one
    pub speed: f64,
    /// Set on the final `progress=end` line
    pub is_complete: bool,
}

impl FfmpegProgress {
    pub fn out_seconds(&self) -> f64 {
        self.out_time_us.max(0) as f64 / 1_000_000.0
    }

    /// Share of `total_seconds` written, in [0, 1].
    pub fn fraction_of(&self, total_seconds: f64) -> f64 {
        match (self.is_complete, total_seconds > 0.0) {
            (true, _) => 1.0,
            (false, false) => 0.0,
            (false, true) => (self.out_seconds() / total_seconds).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_of_clip() {
        let halfway = FfmpegProgress {
            out_time_us: 10_000_000,
            ..Default::default()
        };
        assert!((halfway.fraction_of(20.0) - 0.5).abs() < 1e-9);
        assert_eq!(halfway.fraction_of(4.0), 1.0);
        assert_eq!(halfway.fraction_of(0.0), 0.0);

        let done = FfmpegProgress {
            is_complete: true,
            ..Default::default()
        };
        assert_eq!(done.fraction_of(0.0), 1.0);
    }
}
