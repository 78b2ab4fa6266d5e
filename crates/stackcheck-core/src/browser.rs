//! Headless-Chromium implementation of the [`Verifier`] seam.
//!
//! One browser session is launched lazily on the first `verify` call and
//! reused for the rest of the run; `close` tears it down. Every verification
//! opens a fresh page, so a navigation failure on one URL cannot poison the
//! next check.

use crate::verifier::{VerificationResult, Verifier, VerifierError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Extracts the rendered body text, tolerating pages without a body element.
const BODY_TEXT_JS: &str = "document.body ? document.body.innerText : ''";

/// Drives one headless Chromium session for the duration of a run.
pub struct BrowserVerifier {
    session: Option<BrowserSession>,
}

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserVerifier {
    /// Creates a verifier. No browser is launched until the first `verify`.
    pub fn new() -> Self {
        Self { session: None }
    }

    async fn session(&mut self) -> Result<&mut BrowserSession, VerifierError> {
        if self.session.is_none() {
            let config = BrowserConfig::builder()
                .build()
                .map_err(VerifierError::Unavailable)?;
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|err| VerifierError::Unavailable(err.to_string()))?;

            // The CDP event stream must be pumped for the session to make
            // progress; the task ends when the browser goes away.
            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            debug!("launched headless browser session");
            self.session = Some(BrowserSession { browser, handler });
        }
        match self.session.as_mut() {
            Some(session) => Ok(session),
            None => Err(VerifierError::Unavailable(
                "browser session missing after launch".to_string(),
            )),
        }
    }

    async fn body_text(page: &Page, url: &str) -> Result<String, VerifierError> {
        page.wait_for_navigation()
            .await
            .map_err(|err| navigation_error(url, &err))?;
        let evaluation = page
            .evaluate(BODY_TEXT_JS)
            .await
            .map_err(|err| navigation_error(url, &err))?;
        evaluation
            .into_value()
            .map_err(|err| navigation_error(url, &err))
    }
}

impl Default for BrowserVerifier {
    fn default() -> Self {
        Self::new()
    }
}

fn navigation_error(url: &str, err: &impl std::fmt::Display) -> VerifierError {
    VerifierError::Navigation {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl Verifier for BrowserVerifier {
    async fn verify(
        &mut self,
        service: &str,
        url: &str,
        expected_text: &str,
    ) -> Result<VerificationResult, VerifierError> {
        let session = self.session().await?;
        let page = session
            .browser
            .new_page(url)
            .await
            .map_err(|err| VerifierError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let observed = Self::body_text(&page, url).await;
        if let Err(err) = page.close().await {
            debug!(url, error = %err, "page close failed");
        }
        let observed = observed?;

        let result = VerificationResult::from_observed(service, url, expected_text, observed);
        debug!(service, url, passed = result.passed, "verified page");
        Ok(result)
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.browser.close().await {
                warn!(error = %err, "browser close failed");
            }
            if let Err(err) = session.browser.wait().await {
                warn!(error = %err, "browser wait failed");
            }
            session.handler.abort();
            debug!("closed browser session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_without_session_is_noop() {
        let mut verifier = BrowserVerifier::new();
        verifier.close().await;
        verifier.close().await;
    }

    /// Requires a Chromium binary on PATH; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_verify_real_page() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let body = "<html><body>Hello World</body></html>";
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        let mut verifier = BrowserVerifier::new();
        let result = verifier
            .verify("node", &format!("http://127.0.0.1:{port}/"), "Hello World")
            .await
            .expect("verification runs");
        verifier.close().await;
        server.abort();

        assert!(result.passed);
        assert!(result.observed_text.contains("Hello World"));
    }
}
