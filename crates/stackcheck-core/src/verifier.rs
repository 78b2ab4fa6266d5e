//! The verification seam between orchestration and the browser.
//!
//! The orchestrator only depends on the [`Verifier`] trait, so its scheduling
//! and teardown logic can be exercised with a fake (see [`crate::testing`])
//! while the real implementation drives headless Chromium
//! ([`crate::browser::BrowserVerifier`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of checking one service's rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Service the check was for.
    pub service: String,
    /// URL that was rendered.
    pub url: String,
    /// Text the page body was expected to contain.
    pub expected_text: String,
    /// Body text actually observed.
    pub observed_text: String,
    /// Whether `observed_text` contains `expected_text`.
    pub passed: bool,
}

impl VerificationResult {
    /// Builds a result from observed body text, computing `passed` as
    /// substring containment.
    pub fn from_observed(
        service: impl Into<String>,
        url: impl Into<String>,
        expected_text: impl Into<String>,
        observed_text: impl Into<String>,
    ) -> Self {
        let expected_text = expected_text.into();
        let observed_text = observed_text.into();
        let passed = observed_text.contains(&expected_text);
        Self {
            service: service.into(),
            url: url.into(),
            expected_text,
            observed_text,
            passed,
        }
    }
}

/// Verification could not produce a result.
#[derive(Debug, Error)]
pub enum VerifierError {
    /// The verifier itself could not be brought up (e.g. no browser binary).
    /// Remaining verifications in the run are skipped, never silently passed.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),

    /// Navigation or body extraction failed for one URL. Other URLs in the
    /// same run are unaffected.
    #[error("verification of {url} failed: {reason}")]
    Navigation { url: String, reason: String },
}

/// Renders a URL and checks the page body for expected text.
#[async_trait]
pub trait Verifier: Send {
    /// Verifies that the page at `url` renders body text containing
    /// `expected_text`. Implementations acquire their session lazily on the
    /// first call; a failure for one URL must not poison the next call.
    async fn verify(
        &mut self,
        service: &str,
        url: &str,
        expected_text: &str,
    ) -> Result<VerificationResult, VerifierError>;

    /// Releases any session resources. Idempotent; called on every run exit
    /// path, success or failure.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_observed_passes_on_containment() {
        let result = VerificationResult::from_observed(
            "node",
            "http://127.0.0.1:3000/",
            "Hello World",
            "Hello World from Express",
        );
        assert!(result.passed);
    }

    #[test]
    fn test_from_observed_fails_on_mismatch() {
        let result = VerificationResult::from_observed(
            "django",
            "http://127.0.0.1:8000/",
            "Hello World",
            "It worked! Congratulations on your first Django page.",
        );
        assert!(!result.passed);
    }

    #[test]
    fn test_from_observed_is_case_sensitive() {
        let result =
            VerificationResult::from_observed("node", "http://x/", "Hello", "hello world");
        assert!(!result.passed);
    }
}
