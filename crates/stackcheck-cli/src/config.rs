//! Service-pair configuration file handling.
//!
//! The config is a YAML file holding exactly two service specs. It is
//! produced by whatever scaffolds the projects (or by `stackcheck init`,
//! which writes the canonical Node + Django pair); this harness only reads
//! it and assumes the directories already contain runnable projects.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use stackcheck_core::ServiceSpec;
use std::path::Path;

/// Top-level shape of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    /// The two services, in launch order.
    pub services: Vec<ServiceSpec>,
}

impl PairConfig {
    /// The services in launch order, as a pair.
    pub fn pair(&self) -> (&ServiceSpec, &ServiceSpec) {
        (&self.services[0], &self.services[1])
    }
}

/// Loads and validates a config file.
pub fn load(path: &Path) -> Result<PairConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: PairConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;

    if config.services.len() != 2 {
        bail!(
            "config must define exactly two services, found {}",
            config.services.len()
        );
    }
    if config.services[0].name == config.services[1].name {
        bail!("services must have distinct names");
    }
    if config.services[0].port == config.services[1].port {
        bail!("services must listen on distinct ports");
    }
    Ok(config)
}

/// The default config: a Node/Express server and a Django server, both
/// serving "Hello World" at `/`.
pub const DEFAULT_CONFIG: &str = r#"# stackcheck service pair.
#
# Each service is launched in order: install (optional), pre_start
# (optional), then start. The harness polls http://127.0.0.1:{port}/ until
# the server answers, then checks the rendered page for `expect` in a
# headless browser. Everything is killed when the run ends, pass or fail.
services:
  - name: node
    dir: code/node
    install: [npm, install]
    start: [npm, start]
    port: 3000
    expect: Hello World

  - name: django
    dir: code/django
    pre_start: [python, manage.py, migrate]
    start: [python, manage.py, runserver, "8000"]
    port: 8000
    expect: Hello World
"#;

/// Writes the default config to `path`.
pub fn write_default(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("writing config file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_as_valid_pair() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("stackcheck.yml");
        write_default(&path, false).expect("write default");

        let config = load(&path).expect("default config loads");
        let (node, django) = config.pair();
        assert_eq!(node.name, "node");
        assert_eq!(node.port, 3000);
        assert_eq!(node.install, Some(vec!["npm".into(), "install".into()]));
        assert_eq!(django.name, "django");
        assert_eq!(django.port, 8000);
        assert!(django.pre_start.is_some());
        assert_eq!(django.expect, "Hello World");
    }

    #[test]
    fn test_write_default_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("stackcheck.yml");
        write_default(&path, false).expect("first write");

        let err = write_default(&path, false).expect_err("second write must fail");
        assert!(err.to_string().contains("already exists"));

        write_default(&path, true).expect("forced write succeeds");
    }

    #[test]
    fn test_load_rejects_wrong_service_count() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("one.yml");
        std::fs::write(
            &path,
            "services:\n  - name: node\n    dir: x\n    start: [true]\n    port: 1\n    expect: hi\n",
        )
        .expect("write");

        let err = load(&path).expect_err("one service must be rejected");
        assert!(err.to_string().contains("exactly two services"));
    }

    #[test]
    fn test_load_rejects_duplicate_ports() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("dup.yml");
        let yaml = "services:\n  - {name: a, dir: x, start: [true], port: 3000, expect: hi}\n  - {name: b, dir: y, start: [true], port: 3000, expect: hi}\n";
        std::fs::write(&path, yaml).expect("write");

        let err = load(&path).expect_err("duplicate ports must be rejected");
        assert!(err.to_string().contains("distinct ports"));
    }

    #[test]
    fn test_load_missing_file_names_the_path() {
        let err = load(Path::new("/no/such/stackcheck.yml")).expect_err("must fail");
        assert!(err.to_string().contains("/no/such/stackcheck.yml"));
    }
}
