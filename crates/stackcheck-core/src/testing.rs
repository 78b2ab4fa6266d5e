//! Test doubles for exercising orchestration without a real browser.
//!
//! The orchestrator's scheduling and teardown guarantees are what need
//! testing; a live Chromium is not. [`StaticVerifier`] serves canned page
//! bodies per URL, [`UnavailableVerifier`] simulates a machine with no
//! browser at all.

use crate::verifier::{VerificationResult, Verifier, VerifierError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A verifier that "renders" canned body text per URL.
#[derive(Debug, Default)]
pub struct StaticVerifier {
    pages: HashMap<String, String>,
    calls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl StaticVerifier {
    /// Creates a verifier with no pages; every URL fails navigation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the body text served for `url`.
    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    /// Shared counter of `verify` calls, for assertions after the run.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Shared flag set once `close` has been called.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl Verifier for StaticVerifier {
    async fn verify(
        &mut self,
        service: &str,
        url: &str,
        expected_text: &str,
    ) -> Result<VerificationResult, VerifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url) {
            Some(body) => Ok(VerificationResult::from_observed(
                service,
                url,
                expected_text,
                body.clone(),
            )),
            None => Err(VerifierError::Navigation {
                url: url.to_string(),
                reason: "no canned page for url".to_string(),
            }),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A verifier whose session can never be created.
#[derive(Debug, Default)]
pub struct UnavailableVerifier;

#[async_trait]
impl Verifier for UnavailableVerifier {
    async fn verify(
        &mut self,
        _service: &str,
        _url: &str,
        _expected_text: &str,
    ) -> Result<VerificationResult, VerifierError> {
        Err(VerifierError::Unavailable(
            "browser binary not found".to_string(),
        ))
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_verifier_serves_canned_pages() {
        let mut verifier =
            StaticVerifier::new().with_page("http://127.0.0.1:3000/", "Hello World");

        let result = verifier
            .verify("node", "http://127.0.0.1:3000/", "Hello World")
            .await
            .expect("canned page");
        assert!(result.passed);

        let err = verifier
            .verify("django", "http://127.0.0.1:8000/", "Hello World")
            .await
            .expect_err("unknown url");
        assert!(matches!(err, VerifierError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_static_verifier_tracks_calls_and_close() {
        let mut verifier = StaticVerifier::new().with_page("http://x/", "body");
        let calls = verifier.call_counter();
        let closed = verifier.closed_flag();

        let _ = verifier.verify("svc", "http://x/", "body").await;
        verifier.close().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(closed.load(Ordering::SeqCst));
    }
}
