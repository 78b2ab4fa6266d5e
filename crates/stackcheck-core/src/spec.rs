//! Service specifications: what to launch and how to verify it.
//!
//! A [`ServiceSpec`] is supplied by the caller (typically loaded from the CLI
//! config file) and is immutable once constructed. The lifecycle machinery
//! never edits a spec; it only reads commands, the working directory, the
//! port, and the expected page text from it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Describes one HTTP service under test.
///
/// The canonical pair is a Node/Express-style server and a Django-style
/// server, but nothing here is framework-specific: any project directory
/// with a start command and a port fits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Short identifier used in logs and results (e.g. "node", "django").
    pub name: String,

    /// Directory containing the runnable project.
    pub dir: PathBuf,

    /// Optional dependency-install command (e.g. `npm install`), run to
    /// completion before anything is started. Treated as idempotent and
    /// safe to rerun on every run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<Vec<String>>,

    /// Optional pre-start command (e.g. a schema migration), run to
    /// completion after install and before the server starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_start: Option<Vec<String>>,

    /// Command that starts the long-running server.
    pub start: Vec<String>,

    /// TCP port the service listens on.
    pub port: u16,

    /// Text the rendered root page must contain for verification to pass.
    pub expect: String,
}

impl ServiceSpec {
    /// Root URL the service is expected to serve.
    pub fn root_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }
}
