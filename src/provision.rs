//! Provisioning driver boundary.
//!
//! A [`Provisioner`] runs one apply or destroy against a working copy of the
//! prior state and reports a tagged [`ProvisionOutcome`]. It never rolls back
//! on its own; remediation is the orchestrator's decision.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::command::CommandError;
use crate::log_sink::LogSink;
use crate::request::{Action, EnvMap, VarMap};

/// Where the configuration to provision comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModuleSource {
    /// An existing local directory, used in place.
    Local(Utf8PathBuf),
    /// A module address fetched into the working copy at init time.
    Remote(String),
}

impl ModuleSource {
    /// Classifies `raw`: an existing directory under `base_dir` is local,
    /// anything else is treated as a module address.
    #[must_use]
    pub fn resolve(base_dir: &Utf8Path, raw: &str) -> Self {
        let candidate = base_dir.join(raw);
        if candidate.is_dir() {
            Self::Local(candidate)
        } else {
            Self::Remote(raw.to_owned())
        }
    }
}

/// Everything the driver needs for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionRequest {
    /// Apply or destroy.
    pub action: Action,
    /// Configuration to provision.
    pub source: ModuleSource,
    /// Merged input variables.
    pub vars: VarMap,
    /// Extra environment for the tool.
    pub env: EnvMap,
    /// Prior state blob, if any.
    pub state: Option<Vec<u8>>,
    /// Time left before the run deadline.
    pub timeout: Option<Duration>,
}

/// Errors raised by a provisioning run.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// A tool step exited non-zero.
    #[error("terraform {step} failed with exit status {status}:\n{log_tail}")]
    StepFailed {
        /// Step that failed (`init`, `apply`, `destroy`, `output`).
        step: &'static str,
        /// Exit status text.
        status: String,
        /// Last lines of the captured log.
        log_tail: String,
    },
    /// A tool step exceeded the run deadline.
    #[error("terraform {step} timed out:\n{log_tail}")]
    TimedOut {
        /// Step that was killed.
        step: &'static str,
        /// Last lines of the captured log.
        log_tail: String,
    },
    /// The tool could not be run at all.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The local working copy could not be prepared or read.
    #[error("working directory error: {0}")]
    Workspace(String),
    /// The tool produced an unreadable output document.
    #[error("invalid output document: {0}")]
    Outputs(String),
}

/// Tagged result of a provisioning run.
#[derive(Clone, Debug, PartialEq)]
pub enum ProvisionOutcome {
    /// The run completed.
    Success {
        /// State left after the run, if the tool wrote one.
        state: Option<Vec<u8>>,
        /// Output document; empty for destroy.
        outputs: serde_json::Value,
    },
    /// The run failed part-way.
    Failure {
        /// Partial state left after the failure, if any.
        state: Option<Vec<u8>>,
        /// Cause of the failure.
        error: ProvisionError,
    },
}

/// Future returned by provisioners.
pub type ProvisionFuture<'a> = Pin<Box<dyn Future<Output = ProvisionOutcome> + Send + 'a>>;

/// Runs the external provisioning tool.
pub trait Provisioner {
    /// Executes `request`, streaming tool output to `sink`.
    fn execute<'a>(&'a self, request: &'a ProvisionRequest, sink: &'a LogSink)
    -> ProvisionFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn existing_directory_is_local() {
        let dir = TempDir::new().expect("tempdir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
        std::fs::create_dir(base.join("fixtures")).expect("create fixtures");

        assert_eq!(
            ModuleSource::resolve(&base, "fixtures"),
            ModuleSource::Local(base.join("fixtures"))
        );
    }

    #[rstest]
    #[case("github.com/example/module")]
    #[case("missing-dir/")]
    fn anything_else_is_remote(#[case] raw: &str) {
        let dir = TempDir::new().expect("tempdir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");

        assert_eq!(
            ModuleSource::resolve(&base, raw),
            ModuleSource::Remote(raw.to_owned())
        );
    }
}
