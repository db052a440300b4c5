//! # Tunables
//!
//! Configuration for the overlay protocol engine and the probing seeder.
//! Both structs start from the `DEFAULT_*` constants below and are checked by
//! `validate()` when the owning component is constructed, so a bad value is a
//! startup error rather than a runtime surprise.

use std::time::Duration;

use anyhow::{bail, Result};

/// Width of the identifier space in bits.
pub const DEFAULT_SPACE_BITS: usize = 128;

/// Width of one routing digit in bits (Pastry's `b` parameter).
pub const DEFAULT_BASE_BITS: usize = 4;

/// Time a single `send` may wait on a full peer queue before the peer is
/// reported as dropped.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);

/// Capacity of each peer's outbound application queue.
pub const DEFAULT_APP_BUFFER: usize = 64;

/// Capacity of each session queue (both directions).
pub const DEFAULT_NET_BUFFER: usize = 64;

/// Pause between seeds while the discovery phase is 0. Zero means the sink's
/// backpressure is the only limit.
pub const DEFAULT_SEEDER_FAST_INTERVAL: Duration = Duration::ZERO;

/// Pause between seeds once the discovery phase has moved past 0.
pub const DEFAULT_SEEDER_SLOW_INTERVAL: Duration = Duration::from_millis(250);

/// Largest digit width supported; a row holds `2^base_bits` slots.
const MAX_BASE_BITS: usize = 8;

#[derive(Clone, Debug)]
pub struct OverlayConfig {
    /// Identifier space width in bits.
    pub space_bits: usize,
    /// Routing digit width in bits. Must divide `space_bits`.
    pub base_bits: usize,
    /// Deadline for enqueueing one message onto a peer's outbound queue.
    pub send_timeout: Duration,
    /// Outbound application queue capacity per peer.
    pub app_buffer: usize,
    /// Session queue capacity per direction.
    pub net_buffer: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            space_bits: DEFAULT_SPACE_BITS,
            base_bits: DEFAULT_BASE_BITS,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            app_buffer: DEFAULT_APP_BUFFER,
            net_buffer: DEFAULT_NET_BUFFER,
        }
    }
}

impl OverlayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.send_timeout.is_zero() {
            bail!("send timeout must be non-zero");
        }
        if self.base_bits == 0 || self.base_bits > MAX_BASE_BITS {
            bail!("digit width {} outside 1..={}", self.base_bits, MAX_BASE_BITS);
        }
        if self.space_bits == 0 || self.space_bits % self.base_bits != 0 {
            bail!(
                "identifier space of {} bits is not a multiple of the {}-bit digit",
                self.space_bits,
                self.base_bits
            );
        }
        if self.app_buffer == 0 || self.net_buffer == 0 {
            bail!("queue capacities must be non-zero");
        }
        Ok(())
    }

    /// Number of digits in an identifier, i.e. routing matrix rows.
    pub fn digits(&self) -> usize {
        self.space_bits / self.base_bits
    }

    /// Number of slots in one routing matrix row.
    pub fn row_width(&self) -> usize {
        1 << self.base_bits
    }
}

#[derive(Clone, Debug)]
pub struct SeederConfig {
    pub fast_interval: Duration,
    pub slow_interval: Duration,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            fast_interval: DEFAULT_SEEDER_FAST_INTERVAL,
            slow_interval: DEFAULT_SEEDER_SLOW_INTERVAL,
        }
    }
}

impl SeederConfig {
    pub fn validate(&self) -> Result<()> {
        if self.slow_interval < self.fast_interval {
            bail!(
                "slow probe interval {:?} is shorter than the fast one {:?}",
                self.slow_interval,
                self.fast_interval
            );
        }
        Ok(())
    }

    /// Pacing delay for the given discovery phase.
    pub fn interval_for(&self, phase: u32) -> Duration {
        if phase == 0 {
            self.fast_interval
        } else {
            self.slow_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = OverlayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.digits(), 32);
        assert_eq!(config.row_width(), 16);

        let seeder = SeederConfig::default();
        assert!(seeder.validate().is_ok());
        assert!(seeder.fast_interval <= seeder.slow_interval);
    }

    #[test]
    fn zero_send_timeout_rejected() {
        let config = OverlayConfig {
            send_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn digit_geometry_checked() {
        let uneven = OverlayConfig {
            space_bits: 130,
            base_bits: 4,
            ..Default::default()
        };
        assert!(uneven.validate().is_err());

        let zero_digit = OverlayConfig {
            base_bits: 0,
            ..Default::default()
        };
        assert!(zero_digit.validate().is_err());

        let wide_digit = OverlayConfig {
            space_bits: 160,
            base_bits: 16,
            ..Default::default()
        };
        assert!(wide_digit.validate().is_err());
    }

    #[test]
    fn zero_buffers_rejected() {
        let config = OverlayConfig {
            app_buffer: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn seeder_interval_by_phase() {
        let config = SeederConfig {
            fast_interval: Duration::from_millis(1),
            slow_interval: Duration::from_millis(50),
        };
        assert_eq!(config.interval_for(0), Duration::from_millis(1));
        assert_eq!(config.interval_for(3), Duration::from_millis(50));

        let inverted = SeederConfig {
            fast_interval: Duration::from_secs(1),
            slow_interval: Duration::from_millis(1),
        };
        assert!(inverted.validate().is_err());
    }
}
