//! Structured output of one orchestration run.
//!
//! The [`RunReport`] is the sole surface a caller sees: an ordered,
//! human-readable narrative plus the verification results, with partial
//! failure treated as a normal, reportable outcome rather than a crash.

use crate::verifier::VerificationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Severity label for one report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Narrative progress.
    Info,
    /// A stage or verification succeeded.
    Pass,
    /// A stage or verification failed.
    Fail,
}

/// One ordered line in the run narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity of the line.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// When the line was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every stage completed and every verification passed.
    Passed,
    /// All stages completed but at least one verification failed.
    VerificationFailed,
    /// A stage failed; the run went straight to teardown.
    Failed { stage: String, reason: String },
    /// The run was cancelled externally while `stage` was active.
    Cancelled { stage: String },
}

/// Immutable summary of a full orchestration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Ordered narrative of the run.
    pub entries: Vec<LogEntry>,
    /// One result per verified service, in verification order.
    pub verifications: Vec<VerificationResult>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Wall-clock duration of the whole run, teardown included.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl RunReport {
    /// Whether the run passed outright.
    pub fn passed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Passed)
    }

    /// Number of verifications that passed.
    pub fn passed_count(&self) -> usize {
        self.verifications.iter().filter(|v| v.passed).count()
    }

    /// Number of verifications that failed.
    pub fn failed_count(&self) -> usize {
        self.verifications.iter().filter(|v| !v.passed).count()
    }
}

/// Collects log entries while a run is in flight.
///
/// Entries are mirrored to `tracing` as they are recorded so a live observer
/// and the final report tell the same story.
#[derive(Debug, Default)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a narrative line.
    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    /// Records a PASS line.
    pub fn pass(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Pass, message.into());
    }

    /// Records a FAIL line.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Fail, message.into());
    }

    /// Consumes the log, yielding the ordered entries.
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Fail => error!("{message}"),
            LogLevel::Pass | LogLevel::Info => info!("{message}"),
        }
        self.entries.push(LogEntry {
            level,
            message,
            timestamp: Utc::now(),
        });
    }
}

/// Serde helper for Duration serialization as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
