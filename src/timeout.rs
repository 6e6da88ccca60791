//! Per-job timeout enforcement
//!
//! - `job_seconds`: maximum wall-clock time per job, measured from dispatch
//!
//! The enforcer only reports the condition. The sampler thread that owns it
//! terminates the process and the scheduler classifies the run as TIMED_OUT.

use std::time::{Duration, Instant};

/// Upper bound for a per-job timeout (one week)
pub const MAX_JOB_TIMEOUT_SECONDS: u64 = 7 * 24 * 3600;

/// Timeout configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum wall-clock time per job; `None` disables the timeout
    pub job_seconds: Option<u64>,
}

impl TimeoutConfig {
    pub fn new(job_seconds: Option<u64>) -> Self {
        Self { job_seconds }
    }

    /// Validate bounds: when set, `job_seconds` must be in (0, one week]
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        match self.job_seconds {
            Some(value) if value == 0 || value > MAX_JOB_TIMEOUT_SECONDS => {
                Err(TimeoutValidationError::JobOutOfBounds {
                    value,
                    max: MAX_JOB_TIMEOUT_SECONDS,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.job_seconds.is_some()
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimeoutValidationError {
    #[error("job_timeout_seconds must be in (0, {max}], got {value}")]
    JobOutOfBounds { value: u64, max: u64 },
}

/// Timeout check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    /// No timeout has occurred
    Ok,
    /// Wall-clock limit exceeded
    Exceeded { seconds: u64 },
}

impl TimeoutStatus {
    /// Returns true if a timeout occurred
    pub fn is_timeout(&self) -> bool {
        !matches!(self, TimeoutStatus::Ok)
    }
}

/// Timeout enforcer for one job run
#[derive(Debug)]
pub struct TimeoutEnforcer {
    config: TimeoutConfig,
    start_time: Instant,
}

impl TimeoutEnforcer {
    /// Start the clock now
    pub fn new(config: TimeoutConfig) -> Self {
        Self::started_at(config, Instant::now())
    }

    /// Start the clock at an earlier instant (the dispatch time)
    pub fn started_at(config: TimeoutConfig, start_time: Instant) -> Self {
        Self { config, start_time }
    }

    pub fn check(&self) -> TimeoutStatus {
        match self.config.job_seconds {
            Some(seconds) if self.elapsed() > Duration::from_secs(seconds) => {
                TimeoutStatus::Exceeded { seconds }
            }
            _ => TimeoutStatus::Ok,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Remaining time before the timeout fires, `None` when disabled
    pub fn remaining(&self) -> Option<Duration> {
        self.config
            .job_seconds
            .map(|seconds| Duration::from_secs(seconds).saturating_sub(self.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_default_is_disabled() {
        let config = TimeoutConfig::default();
        assert!(!config.is_enabled());
        assert!(config.validate().is_ok());
        let enforcer = TimeoutEnforcer::new(config);
        assert_eq!(enforcer.check(), TimeoutStatus::Ok);
        assert!(enforcer.remaining().is_none());
    }

    #[test]
    fn test_validation_zero() {
        assert_eq!(
            TimeoutConfig::new(Some(0)).validate(),
            Err(TimeoutValidationError::JobOutOfBounds {
                value: 0,
                max: MAX_JOB_TIMEOUT_SECONDS
            })
        );
    }

    #[test]
    fn test_validation_too_large() {
        assert!(TimeoutConfig::new(Some(MAX_JOB_TIMEOUT_SECONDS + 1))
            .validate()
            .is_err());
        assert!(TimeoutConfig::new(Some(MAX_JOB_TIMEOUT_SECONDS))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_enforcer_fresh_is_ok() {
        let enforcer = TimeoutEnforcer::new(TimeoutConfig::new(Some(10)));
        assert_eq!(enforcer.check(), TimeoutStatus::Ok);
        assert!(enforcer.remaining().unwrap() <= Duration::from_secs(10));
    }

    #[test]
    fn test_enforcer_exceeded() {
        let enforcer = TimeoutEnforcer::new(TimeoutConfig::new(Some(1)));
        sleep(Duration::from_millis(1100));
        assert_eq!(enforcer.check(), TimeoutStatus::Exceeded { seconds: 1 });
        assert!(enforcer.check().is_timeout());
        assert_eq!(enforcer.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_started_at_counts_from_dispatch() {
        let earlier = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .unwrap_or_else(Instant::now);
        let enforcer = TimeoutEnforcer::started_at(TimeoutConfig::new(Some(2)), earlier);
        if earlier.elapsed() >= Duration::from_secs(5) {
            assert!(enforcer.check().is_timeout());
        }
    }
}
