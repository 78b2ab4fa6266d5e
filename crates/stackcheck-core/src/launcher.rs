//! Brings one service fully up: install, pre-start, spawn, confirm health.
//!
//! The launcher owns the whole per-service startup sequence. On any failure
//! nothing is left running: setup commands run to completion before the
//! server is spawned, and a server that never answers its port is killed
//! before the error is returned.

use crate::health::{HealthCheckResult, HealthChecker};
use crate::process::{self, CommandError, ProcessHandle, SpawnError};
use crate::spec::ServiceSpec;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Hard ceiling for synchronous install/pre-start commands.
pub const SETUP_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Which synchronous setup step was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    /// The dependency-install command.
    Install,
    /// The pre-start command (e.g. a schema migration).
    PreStart,
}

impl std::fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupPhase::Install => write!(f, "dependency install"),
            SetupPhase::PreStart => write!(f, "pre-start command"),
        }
    }
}

/// A service failed to come up. Nothing it spawned is left running.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The dependency-install command exited non-zero.
    #[error("dependency install for {service} failed with exit code {exit_code}: {stderr_tail}")]
    Install {
        service: String,
        exit_code: i32,
        stderr_tail: String,
    },

    /// The pre-start command exited non-zero.
    #[error("pre-start command for {service} failed with exit code {exit_code}: {stderr_tail}")]
    PreStart {
        service: String,
        exit_code: i32,
        stderr_tail: String,
    },

    /// A setup command timed out or hit an I/O failure mid-run.
    #[error("{phase} for {service} failed: {source}")]
    Command {
        service: String,
        phase: SetupPhase,
        #[source]
        source: CommandError,
    },

    /// A command could not be spawned at all.
    #[error("failed to start {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: SpawnError,
    },

    /// The server started but never answered its port within the schedule.
    #[error("{service} did not answer after {attempts} attempts: {last_error}")]
    Unhealthy {
        service: String,
        attempts: u32,
        last_error: String,
    },
}

impl LaunchError {
    /// Name of the service the failure belongs to.
    pub fn service(&self) -> &str {
        match self {
            LaunchError::Install { service, .. }
            | LaunchError::PreStart { service, .. }
            | LaunchError::Command { service, .. }
            | LaunchError::Spawn { service, .. }
            | LaunchError::Unhealthy { service, .. } => service,
        }
    }

    /// Whether the failure happened while installing dependencies.
    pub fn is_install_failure(&self) -> bool {
        matches!(
            self,
            LaunchError::Install { .. }
                | LaunchError::Command {
                    phase: SetupPhase::Install,
                    ..
                }
        )
    }
}

/// A service that is up and confirmed reachable.
#[derive(Debug)]
pub struct LaunchedService {
    /// The running server process, owned by the caller from here on.
    pub handle: ProcessHandle,
    /// The health poll that confirmed the service.
    pub health: HealthCheckResult,
}

/// Runs the startup sequence for a [`ServiceSpec`].
#[derive(Debug, Clone)]
pub struct ServiceLauncher {
    health: HealthChecker,
    setup_timeout: Duration,
}

impl ServiceLauncher {
    /// Creates a launcher with the default health-polling schedule.
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self::with_health_checker(HealthChecker::new()?))
    }

    /// Creates a launcher around a custom health checker.
    pub fn with_health_checker(health: HealthChecker) -> Self {
        Self {
            health,
            setup_timeout: SETUP_COMMAND_TIMEOUT,
        }
    }

    /// Overrides the setup-command timeout.
    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    /// Brings `spec` fully up and returns the live handle only once the
    /// service answers its port.
    ///
    /// Sequence: install (if any) → pre-start (if any) → spawn the server →
    /// poll `http://127.0.0.1:{port}/`. A server that never answers is
    /// killed before [`LaunchError::Unhealthy`] is returned.
    pub async fn launch(&self, spec: &ServiceSpec) -> Result<LaunchedService, LaunchError> {
        if let Some(install) = &spec.install {
            self.run_setup(spec, SetupPhase::Install, install).await?;
        }
        if let Some(pre_start) = &spec.pre_start {
            self.run_setup(spec, SetupPhase::PreStart, pre_start).await?;
        }

        info!(service = %spec.name, command = ?spec.start, "starting server");
        let mut handle =
            ProcessHandle::spawn(&spec.start, &spec.dir).map_err(|source| LaunchError::Spawn {
                service: spec.name.clone(),
                source,
            })?;

        let health = match self.health.poll(&spec.name, &spec.root_url()).await {
            Ok(health) => health,
            Err(err) => {
                handle.kill().await;
                return Err(LaunchError::Unhealthy {
                    service: spec.name.clone(),
                    attempts: 0,
                    last_error: err.to_string(),
                });
            }
        };

        if !health.reachable {
            warn!(
                service = %spec.name,
                attempts = health.attempts,
                "server never answered, killing it"
            );
            let last_error = health
                .last_error
                .clone()
                .unwrap_or_else(|| "no probe completed".to_string());
            let diagnostics = handle.output_tail();
            handle.kill().await;
            return Err(LaunchError::Unhealthy {
                service: spec.name.clone(),
                attempts: health.attempts,
                last_error: if diagnostics.is_empty() {
                    last_error
                } else {
                    format!("{last_error} (output: {diagnostics})")
                },
            });
        }

        info!(
            service = %spec.name,
            port = spec.port,
            attempts = health.attempts,
            pid = ?handle.pid(),
            "service is up"
        );
        Ok(LaunchedService { handle, health })
    }

    async fn run_setup(
        &self,
        spec: &ServiceSpec,
        phase: SetupPhase,
        argv: &[String],
    ) -> Result<(), LaunchError> {
        info!(service = %spec.name, %phase, command = ?argv, "running setup command");
        let output = process::run_to_completion(argv, &spec.dir, self.setup_timeout)
            .await
            .map_err(|source| match source {
                CommandError::Spawn(source) => LaunchError::Spawn {
                    service: spec.name.clone(),
                    source,
                },
                source => LaunchError::Command {
                    service: spec.name.clone(),
                    phase,
                    source,
                },
            })?;

        if !output.success() {
            let stderr_tail = output.stderr_tail();
            return Err(match phase {
                SetupPhase::Install => LaunchError::Install {
                    service: spec.name.clone(),
                    exit_code: output.exit_code,
                    stderr_tail,
                },
                SetupPhase::PreStart => LaunchError::PreStart {
                    service: spec.name.clone(),
                    exit_code: output.exit_code,
                    stderr_tail,
                },
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn spec_in(dir: &Path, port: u16) -> ServiceSpec {
        ServiceSpec {
            name: "svc".to_string(),
            dir: dir.to_path_buf(),
            install: None,
            pre_start: None,
            start: sh("sleep 30"),
            port,
            expect: "ok".to_string(),
        }
    }

    fn quick_launcher() -> ServiceLauncher {
        let health = HealthChecker::with_schedule(2, Duration::from_millis(10)).expect("client");
        ServiceLauncher::with_health_checker(health).with_setup_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_failed_install_aborts_launch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut spec = spec_in(dir.path(), 1);
        spec.install = Some(sh("echo broken >&2; exit 7"));

        let err = quick_launcher()
            .launch(&spec)
            .await
            .expect_err("install failure must abort");

        assert!(err.is_install_failure());
        match err {
            LaunchError::Install {
                service,
                exit_code,
                stderr_tail,
            } => {
                assert_eq!(service, "svc");
                assert_eq!(exit_code, 7);
                assert!(stderr_tail.contains("broken"));
            }
            other => panic!("expected Install error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_pre_start_aborts_launch() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut spec = spec_in(dir.path(), 1);
        spec.pre_start = Some(sh("exit 5"));

        let err = quick_launcher()
            .launch(&spec)
            .await
            .expect_err("pre-start failure must abort");

        assert!(matches!(err, LaunchError::PreStart { exit_code: 5, .. }));
        assert!(!err.is_install_failure());
    }

    #[tokio::test]
    async fn test_setup_timeout_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut spec = spec_in(dir.path(), 1);
        spec.install = Some(sh("sleep 30"));

        let launcher = quick_launcher().with_setup_timeout(Duration::from_millis(100));
        let err = launcher
            .launch(&spec)
            .await
            .expect_err("install must time out");

        assert!(matches!(
            err,
            LaunchError::Command {
                phase: SetupPhase::Install,
                source: CommandError::Timeout { .. },
                ..
            }
        ));
        assert!(err.is_install_failure());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_killed_and_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        // Bind-then-drop to find a port nobody serves.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = quick_launcher()
            .launch(&spec_in(dir.path(), port))
            .await
            .expect_err("must be unhealthy");

        match err {
            LaunchError::Unhealthy {
                service, attempts, ..
            } => {
                assert_eq!(service, "svc");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected Unhealthy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_start_executable_is_spawn_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut spec = spec_in(dir.path(), 1);
        spec.start = vec!["definitely-not-a-real-binary".to_string()];

        let err = quick_launcher()
            .launch(&spec)
            .await
            .expect_err("spawn must fail");

        assert!(matches!(err, LaunchError::Spawn { .. }));
    }
}
