//! The lifecycle state machine driving a full run.
//!
//! ```text
//! Idle → InstallingDeps → Launching(first) → Launching(second)
//!      → Verifying → TearingDown → Done
//! ```
//!
//! `Failed(stage, reason)` is reachable from every non-terminal state and,
//! like every other exit, funnels through `TearingDown`. The central
//! invariant: **no run, success or failure, leaves a launched process
//! running.** Handles are owned by the orchestrator for the whole run and
//! appear exactly once in the teardown set; external cancellation jumps
//! straight to teardown from whatever stage is active.

use crate::launcher::{LaunchError, ServiceLauncher};
use crate::process::ProcessHandle;
use crate::report::{RunLog, RunOutcome, RunReport};
use crate::spec::ServiceSpec;
use crate::verifier::{VerificationResult, Verifier, VerifierError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Grace period for a killed child to be reaped before escalation.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Stages of the run state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Validating inputs; nothing has been spawned.
    Idle,
    /// Installing a service's dependencies.
    InstallingDeps,
    /// Bringing up the named service.
    Launching(String),
    /// Checking rendered pages in the browser.
    Verifying,
    /// Killing every acquired process.
    TearingDown,
    /// The run completed and teardown finished.
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle"),
            Stage::InstallingDeps => write!(f, "installing-deps"),
            Stage::Launching(service) => write!(f, "launching-{service}"),
            Stage::Verifying => write!(f, "verifying"),
            Stage::TearingDown => write!(f, "tearing-down"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// How the pre-teardown portion of the run resolved.
enum Flow {
    Completed,
    Failed { stage: Stage, reason: String },
    Cancelled { stage: Stage },
}

/// Drives a pair of services through launch, verification, and teardown.
///
/// The orchestrator exclusively owns every [`ProcessHandle`] it acquires and
/// the verifier session used during the `Verifying` stage. `run` always
/// returns a [`RunReport`]; stage failures are recorded in it, never raised.
pub struct TestOrchestrator<V> {
    launcher: ServiceLauncher,
    verifier: V,
    cancel: CancellationToken,
}

impl TestOrchestrator<crate::browser::BrowserVerifier> {
    /// Creates an orchestrator with the default launcher and the headless
    /// browser verifier.
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self::with_parts(
            ServiceLauncher::new()?,
            crate::browser::BrowserVerifier::new(),
        ))
    }
}

impl<V: Verifier> TestOrchestrator<V> {
    /// Creates an orchestrator from explicit collaborators.
    pub fn with_parts(launcher: ServiceLauncher, verifier: V) -> Self {
        Self {
            launcher,
            verifier,
            cancel: CancellationToken::new(),
        }
    }

    /// Installs an external cancellation signal (e.g. a caller deadline).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the full lifecycle for `first` then `second`.
    ///
    /// Strict sequencing: the second service's launch never begins until the
    /// first has resolved. Teardown runs on every exit path that acquired a
    /// handle, and the verifier session is released on every path.
    pub async fn run(mut self, first: &ServiceSpec, second: &ServiceSpec) -> RunReport {
        let started = Instant::now();
        let mut log = RunLog::new();
        let mut handles: Vec<(String, ProcessHandle)> = Vec::new();
        let mut verifications: Vec<VerificationResult> = Vec::new();

        let flow = self
            .drive(first, second, &mut log, &mut handles, &mut verifications)
            .await;

        Self::teardown(&mut log, &mut handles).await;
        self.verifier.close().await;

        let outcome = match flow {
            Flow::Completed if verifications.iter().all(|v| v.passed) => {
                log.pass("run complete, all verifications passed");
                RunOutcome::Passed
            }
            Flow::Completed => {
                log.fail("run complete, at least one verification failed");
                RunOutcome::VerificationFailed
            }
            Flow::Failed { stage, reason } => {
                log.fail(format!("run failed during {stage}"));
                RunOutcome::Failed {
                    stage: stage.to_string(),
                    reason,
                }
            }
            Flow::Cancelled { stage } => {
                log.fail(format!("run cancelled during {stage}"));
                RunOutcome::Cancelled {
                    stage: stage.to_string(),
                }
            }
        };

        RunReport {
            entries: log.into_entries(),
            verifications,
            outcome,
            duration: started.elapsed(),
        }
    }

    async fn drive(
        &mut self,
        first: &ServiceSpec,
        second: &ServiceSpec,
        log: &mut RunLog,
        handles: &mut Vec<(String, ProcessHandle)>,
        verifications: &mut Vec<VerificationResult>,
    ) -> Flow {
        // Idle: both project directories must exist before anything spawns.
        if self.cancel.is_cancelled() {
            return Flow::Cancelled { stage: Stage::Idle };
        }
        for spec in [first, second] {
            if !spec.dir.is_dir() {
                log.fail(format!(
                    "project directory {} for {} not found",
                    spec.dir.display(),
                    spec.name
                ));
                return Flow::Failed {
                    stage: Stage::Idle,
                    reason: format!("missing project directory for {}", spec.name),
                };
            }
        }
        log.info(format!(
            "starting run: {} ({}) and {} ({})",
            first.name,
            first.dir.display(),
            second.name,
            second.dir.display()
        ));

        // Launch strictly in order; the second never starts until the first
        // has resolved.
        for spec in [first, second] {
            let stage = Stage::Launching(spec.name.clone());
            log.info(format!("launching {} on port {}", spec.name, spec.port));

            let launched = tokio::select! {
                () = self.cancel.cancelled() => return Flow::Cancelled { stage },
                launched = self.launcher.launch(spec) => launched,
            };

            match launched {
                Ok(service) => {
                    log.pass(format!(
                        "{} is up on port {} after {} health-check attempt(s)",
                        spec.name, spec.port, service.health.attempts
                    ));
                    handles.push((spec.name.clone(), service.handle));
                }
                Err(err) => {
                    // Install failures belong to the InstallingDeps stage of
                    // the state machine; everything else to this launch.
                    let stage = if err.is_install_failure() {
                        Stage::InstallingDeps
                    } else {
                        stage
                    };
                    log.fail(err.to_string());
                    return Flow::Failed {
                        stage,
                        reason: err.to_string(),
                    };
                }
            }
        }

        // Verifying: both services are confirmed reachable at this point, so
        // each gets exactly one verification attempt.
        for spec in [first, second] {
            if self.cancel.is_cancelled() {
                return Flow::Cancelled {
                    stage: Stage::Verifying,
                };
            }
            let url = spec.root_url();
            match self.verifier.verify(&spec.name, &url, &spec.expect).await {
                Ok(result) => {
                    if result.passed {
                        log.pass(format!("{}: page contains {:?}", spec.name, spec.expect));
                    } else {
                        log.fail(format!(
                            "{}: page does not contain {:?} (observed: {:?})",
                            spec.name,
                            spec.expect,
                            truncate(&result.observed_text, 120)
                        ));
                    }
                    verifications.push(result);
                }
                Err(VerifierError::Unavailable(reason)) => {
                    log.fail(format!(
                        "verifier unavailable: {reason}; skipping remaining verifications"
                    ));
                    return Flow::Failed {
                        stage: Stage::Verifying,
                        reason: format!("verifier unavailable: {reason}"),
                    };
                }
                Err(err @ VerifierError::Navigation { .. }) => {
                    // One bad page must not sink the other service's check.
                    log.fail(format!("{}: {err}", spec.name));
                    verifications.push(VerificationResult {
                        service: spec.name.clone(),
                        url,
                        expected_text: spec.expect.clone(),
                        observed_text: format!("<{err}>"),
                        passed: false,
                    });
                }
            }
        }

        Flow::Completed
    }

    /// Kills every acquired handle. Idempotent and non-failing; a handle
    /// that survives repeated kills is escalated, never silently dropped.
    async fn teardown(log: &mut RunLog, handles: &mut Vec<(String, ProcessHandle)>) {
        if handles.is_empty() {
            return;
        }
        info!("tearing down {} process(es)", handles.len());
        for (name, handle) in handles.iter_mut() {
            handle.kill().await;
            if handle.is_running() {
                // One more attempt, then escalate loudly: a survivor leaks
                // a port and a process into the next run.
                let _ = handle.wait(TEARDOWN_GRACE).await;
                handle.kill().await;
            }
            if handle.is_running() {
                error!(service = %name, pid = ?handle.pid(), "process survived repeated kill attempts");
                log.fail(format!(
                    "teardown: {} (pid {:?}) survived repeated kill attempts",
                    name,
                    handle.pid()
                ));
            } else {
                log.info(format!("stopped {name}"));
            }
        }
        handles.clear();
    }
}

fn truncate(text: &str, max_len: usize) -> &str {
    let mut end = max_len.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display_names_service() {
        assert_eq!(Stage::Launching("node".to_string()).to_string(), "launching-node");
        assert_eq!(Stage::InstallingDeps.to_string(), "installing-deps");
        assert_eq!(Stage::TearingDown.to_string(), "tearing-down");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = format!("{}é", "x".repeat(119));
        let cut = truncate(&text, 120);
        assert_eq!(cut.len(), 119);
    }
}
