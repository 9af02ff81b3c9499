use std::time::Duration;

use crate::errors::ConfigError;

const MIN_FLUSH_TICK: Duration = Duration::from_millis(1);

/// Flush thresholds for the acknowledgement batcher.
///
/// A batch is flushed as soon as it holds `max_batch_size` handles, or when
/// its oldest handle has waited `max_batch_age`, whichever comes first. The
/// age is checked every `flush_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckSettings {
    max_batch_size: usize,
    max_batch_age: Duration,
    flush_tick: Option<Duration>,
}

impl AckSettings {
    pub fn new(max_batch_size: usize, max_batch_age: Duration) -> Result<Self, ConfigError> {
        if max_batch_size == 0 {
            return Err(ConfigError::invalid(
                "max_batch_size",
                max_batch_size,
                "must be at least 1",
            ));
        }
        if max_batch_age.is_zero() {
            return Err(ConfigError::invalid(
                "max_batch_age",
                format!("{max_batch_age:?}"),
                "must be greater than zero",
            ));
        }
        Ok(AckSettings {
            max_batch_size,
            max_batch_age,
            flush_tick: None,
        })
    }

    /// Overrides how often the age trigger looks at the pending batch.
    /// Clamped to at most `max_batch_age`.
    pub fn with_flush_tick(mut self, flush_tick: Duration) -> Self {
        self.flush_tick = Some(flush_tick);
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_batch_age(&self) -> Duration {
        self.max_batch_age
    }

    pub fn flush_tick(&self) -> Duration {
        self.flush_tick
            .unwrap_or(self.max_batch_age / 10)
            .clamp(MIN_FLUSH_TICK, self.max_batch_age.max(MIN_FLUSH_TICK))
    }
}

impl Default for AckSettings {
    fn default() -> Self {
        AckSettings {
            max_batch_size: 10,
            max_batch_age: Duration::from_secs(3),
            flush_tick: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_thresholds() {
        assert!(AckSettings::new(0, Duration::from_secs(1)).is_err());
        assert!(AckSettings::new(1, Duration::ZERO).is_err());
    }

    #[test]
    fn tick_defaults_to_a_tenth_of_the_age() {
        let settings = AckSettings::new(5, Duration::from_secs(3)).unwrap();
        assert_eq!(settings.flush_tick(), Duration::from_millis(300));
    }

    #[test]
    fn tick_never_exceeds_age() {
        let settings = AckSettings::new(5, Duration::from_millis(50))
            .unwrap()
            .with_flush_tick(Duration::from_secs(1));
        assert_eq!(settings.flush_tick(), Duration::from_millis(50));
    }
}
