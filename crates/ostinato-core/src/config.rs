//! Engine configuration.

use crate::{Error, Result};

/// Audio geometry and ring sizing shared by the engine, the host controller,
/// and the shared-memory layout.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub block_size: u32,
    pub sample_rate: f64,
    pub num_channels_in: u32,
    pub num_channels_out: u32,
    /// Depth of the audio slot ring; pipeline latency is `num_blocks - 1`.
    pub num_blocks: u32,
    pub ring_std_capacity: u32,
    pub ring_ctrl_capacity: u32,
    pub ring_ui_capacity: u32,
    pub ring_ui_out_capacity: u32,
    /// Per-track gain applied when mixing into the device output.
    pub mix_gain: f32,
    /// Consecutive late blocks before the watchdog restarts a host.
    pub hard_timeout_blocks: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            sample_rate: 48_000.0,
            num_channels_in: 0,
            num_channels_out: 2,
            num_blocks: 3,
            ring_std_capacity: 1024,
            ring_ctrl_capacity: 128,
            ring_ui_capacity: 128,
            ring_ui_out_capacity: 256,
            mix_gain: 0.5,
            hard_timeout_blocks: 500,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be nonzero".into()));
        }
        if !(8_000.0..=384_000.0).contains(&self.sample_rate) {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.num_blocks < 2 {
            return Err(Error::InvalidConfig(
                "num_blocks must be at least 2 (write + play)".into(),
            ));
        }
        for (name, cap) in [
            ("ring_std_capacity", self.ring_std_capacity),
            ("ring_ctrl_capacity", self.ring_ctrl_capacity),
            ("ring_ui_capacity", self.ring_ui_capacity),
            ("ring_ui_out_capacity", self.ring_ui_out_capacity),
        ] {
            if cap == 0 || !cap.is_power_of_two() {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a nonzero power of two, got {cap}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.mix_gain) {
            return Err(Error::InvalidConfig(format!(
                "mix_gain {} out of range (0-1)",
                self.mix_gain
            )));
        }
        if self.hard_timeout_blocks == 0 {
            return Err(Error::InvalidConfig(
                "hard_timeout_blocks must be nonzero".into(),
            ));
        }
        Ok(())
    }

    /// Wall-clock duration of one block.
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(f64::from(self.block_size) / self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size, 512);
        assert_eq!(config.num_blocks, 3);
    }

    #[test]
    fn rejects_non_power_of_two_rings() {
        let config = EngineConfig {
            ring_std_capacity: 1000,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shallow_pipeline() {
        let config = EngineConfig {
            num_blocks: 1,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn block_duration_matches_geometry() {
        let config = EngineConfig::default();
        let expected = 512.0 / 48_000.0;
        assert!((config.block_duration().as_secs_f64() - expected).abs() < 1e-12);
    }
}
