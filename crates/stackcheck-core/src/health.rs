//! HTTP health polling for freshly launched services.
//!
//! A booting server refusing connections is a normal transient state, not an
//! error: polling only ever fails for a malformed URL. Any HTTP response at
//! all counts as reachable — whether the page has the right content is the
//! verifier's job, not the health checker's.

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Default number of probes before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default pause between probes.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Per-probe request timeout. Kept short: the target is always loopback.
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// The polling target itself was unusable.
#[derive(Debug, Error)]
pub enum HealthError {
    /// The URL could not be parsed; nothing was probed.
    #[error("invalid health check url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Outcome of polling a service's root endpoint.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Service the poll was for.
    pub service: String,
    /// Whether any probe got an HTTP response.
    pub reachable: bool,
    /// Probes actually issued.
    pub attempts: u32,
    /// The last probe failure, when never reachable.
    pub last_error: Option<String>,
}

/// Polls a URL until it answers, with bounded attempts and fixed backoff.
///
/// The total duration is bounded by the schedule: at most `max_attempts`
/// probes of [`PROBE_TIMEOUT`] each, separated by `backoff` pauses. There is
/// no blind settle-time sleep anywhere — the first successful probe returns
/// immediately.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    max_attempts: u32,
    backoff: Duration,
}

impl HealthChecker {
    /// Creates a checker with the default schedule (10 probes, 500ms apart).
    pub fn new() -> reqwest::Result<Self> {
        Self::with_schedule(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF)
    }

    /// Creates a checker with a custom polling schedule.
    pub fn with_schedule(max_attempts: u32, backoff: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .connect_timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            backoff,
        })
    }

    /// Probes `url` until any HTTP response arrives or the schedule runs out.
    ///
    /// Connection refusals and timeouts while the server boots are recorded,
    /// never raised; only a malformed URL is an error.
    pub async fn poll(&self, service: &str, url: &str) -> Result<HealthCheckResult, HealthError> {
        let url: reqwest::Url = url.parse().map_err(|err| HealthError::InvalidUrl {
            url: url.to_string(),
            reason: format!("{err}"),
        })?;

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    debug!(service, attempt, status = %response.status(), "service answered");
                    return Ok(HealthCheckResult {
                        service: service.to_string(),
                        reachable: true,
                        attempts: attempt,
                        last_error: None,
                    });
                }
                Err(err) => {
                    trace!(service, attempt, error = %err, "probe failed");
                    last_error = Some(err.to_string());
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        Ok(HealthCheckResult {
            service: service.to_string(),
            reachable: false,
            attempts: self.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Serves one minimal HTTP response per connection until aborted.
    async fn http_stub() -> (tokio::task::JoinHandle<()>, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            }
        });
        (task, port)
    }

    /// A port with nothing listening on it.
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    #[tokio::test]
    async fn test_poll_succeeds_against_listening_server() {
        let (server, port) = http_stub().await;
        let checker = HealthChecker::with_schedule(3, Duration::from_millis(10)).expect("client");

        let result = checker
            .poll("node", &format!("http://127.0.0.1:{port}/"))
            .await
            .expect("well-formed url");

        assert!(result.reachable);
        assert_eq!(result.attempts, 1);
        assert!(result.last_error.is_none());
        server.abort();
    }

    #[tokio::test]
    async fn test_poll_exhausts_attempts_when_unreachable() {
        let port = dead_port().await;
        let checker = HealthChecker::with_schedule(3, Duration::from_millis(10)).expect("client");

        let result = checker
            .poll("django", &format!("http://127.0.0.1:{port}/"))
            .await
            .expect("well-formed url");

        assert!(!result.reachable);
        assert_eq!(result.attempts, 3);
        assert!(result.last_error.is_some());
    }

    #[tokio::test]
    async fn test_poll_duration_is_bounded_by_schedule() {
        let port = dead_port().await;
        let checker = HealthChecker::with_schedule(3, Duration::from_millis(20)).expect("client");

        let start = Instant::now();
        let result = checker
            .poll("node", &format!("http://127.0.0.1:{port}/"))
            .await
            .expect("well-formed url");
        let elapsed = start.elapsed();

        assert!(!result.reachable);
        // 3 probes (300ms cap each) + 2 pauses, with generous slack for CI.
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_poll_rejects_malformed_url() {
        let checker = HealthChecker::with_schedule(1, Duration::ZERO).expect("client");
        let err = checker
            .poll("node", "not a url")
            .await
            .expect_err("malformed url must be an error");
        assert!(matches!(err, HealthError::InvalidUrl { .. }));
    }
}
