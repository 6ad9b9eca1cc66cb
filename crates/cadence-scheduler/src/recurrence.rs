use std::fmt;
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// When and how often a job runs.
///
/// Immutable value: every `with_*` method returns a new configuration.
/// With no field set the job runs once, immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceConfiguration {
    delay: Option<Duration>,
    repeat_times: Option<u32>,
    interval: Option<Duration>,
    cron_expression: Option<String>,
}

/// Classification of a [`RecurrenceConfiguration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    /// Run once, immediately.
    Once,
    /// Run once after a fixed delay.
    Delayed(Duration),
    /// Run `times` times, `interval` apart.
    FixedCount { times: u32, interval: Duration },
    /// Cron expression. Recognised but not executable.
    Cron(String),
}

impl RecurrenceConfiguration {
    pub fn once() -> Self {
        Self::default()
    }

    pub fn delayed(delay: Duration) -> Self {
        Self::default().with_delay(delay)
    }

    pub fn repeat(times: u32, interval: Duration) -> Self {
        Self::default().with_repeat_times(times).with_interval(interval)
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self::default().with_cron_expression(expression)
    }

    pub fn with_delay(&self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self.clone()
        }
    }

    pub fn with_repeat_times(&self, times: u32) -> Self {
        Self {
            repeat_times: Some(times),
            ..self.clone()
        }
    }

    pub fn with_interval(&self, interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            ..self.clone()
        }
    }

    pub fn with_cron_expression(&self, expression: impl Into<String>) -> Self {
        Self {
            cron_expression: Some(expression.into()),
            ..self.clone()
        }
    }

    /// Initial wait before the first execution; applies once regardless of repeats.
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    pub fn repeat_times(&self) -> Option<u32> {
        self.repeat_times
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    pub fn cron_expression(&self) -> Option<&str> {
        self.cron_expression.as_deref()
    }

    /// Repeat plan: `(count, interval)` when both repeat fields are set.
    ///
    /// A repeat count without an interval (or the reverse) does not make a
    /// repeat job; it runs once.
    pub fn repetitions(&self) -> Option<(u32, Duration)> {
        match (self.repeat_times, self.interval) {
            (Some(times), Some(interval)) => Some((times, interval)),
            _ => None,
        }
    }

    pub fn kind(&self) -> Recurrence {
        if let Some(expr) = &self.cron_expression {
            return Recurrence::Cron(expr.clone());
        }
        if let Some((times, interval)) = self.repetitions() {
            return Recurrence::FixedCount { times, interval };
        }
        match self.delay {
            Some(delay) => Recurrence::Delayed(delay),
            None => Recurrence::Once,
        }
    }

    /// Reject configurations the driver cannot execute.
    pub fn validate(&self) -> Result<()> {
        if self.cron_expression.is_some() {
            return Err(SchedulerError::Unsupported(
                "Cron recurrence not yet supported".to_string(),
            ));
        }
        if matches!(self.repetitions(), Some((0, _))) {
            return Err(SchedulerError::Configuration(
                "repeat_times must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Once => write!(f, "once"),
            Recurrence::Delayed(d) => write!(f, "delayed {}ms", d.as_millis()),
            Recurrence::FixedCount { times, interval } => {
                write!(f, "{times}x every {}ms", interval.as_millis())
            }
            Recurrence::Cron(expr) => write!(f, "cron '{expr}'"),
        }
    }
}
