//! Terraform CLI implementation of [`Provisioner`].
//!
//! Each run gets a private working directory holding the state file and the
//! generated variable file. The directory is removed when the run finishes,
//! whatever the outcome.

use std::ffi::OsString;
use std::io;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::log_sink::LogSink;
use crate::provision::{
    ModuleSource, ProvisionError, ProvisionFuture, ProvisionOutcome, ProvisionRequest, Provisioner,
};
use crate::request::Action;

const STATE_FILE: &str = "terraform.tfstate";
const VARS_FILE: &str = "vars.tfvars.json";
const MODULE_DIR: &str = "module";
const DEFAULT_LOG_TAIL: usize = 40;
const AUTOMATION_ENV: [(&str, &str); 2] = [("TF_IN_AUTOMATION", "true"), ("TF_INPUT", "false")];

/// Drives the `terraform` binary through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct TerraformDriver<R> {
    runner: R,
    binary: String,
    log_tail_lines: usize,
    work_root: Utf8PathBuf,
}

impl<R: CommandRunner + Sync> TerraformDriver<R> {
    /// Creates a driver invoking `binary` with working copies under the
    /// system temporary directory.
    #[must_use]
    pub fn new(runner: R, binary: impl Into<String>) -> Self {
        let work_root = Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
        Self {
            runner,
            binary: binary.into(),
            log_tail_lines: DEFAULT_LOG_TAIL,
            work_root,
        }
    }

    /// Sets how many log lines are kept in error reports.
    #[must_use]
    pub const fn with_log_tail(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    /// Places working copies under `root` instead of the temporary directory.
    #[must_use]
    pub fn with_work_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.work_root = root.into();
        self
    }

    /// Returns the wrapped runner.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    async fn run_request(&self, request: &ProvisionRequest, sink: &LogSink) -> ProvisionOutcome {
        let workspace = match Workspace::prepare(&self.work_root, request) {
            Ok(workspace) => workspace,
            Err(err) => {
                return ProvisionOutcome::Failure {
                    state: request.state.clone(),
                    error: ProvisionError::Workspace(err.to_string()),
                };
            }
        };
        let deadline = request.timeout.map(|limit| Instant::now() + limit);

        let result = self.drive(&workspace, request, deadline, sink).await;
        match (result, workspace.read_state()) {
            (Ok(outputs), Ok(state)) => ProvisionOutcome::Success { state, outputs },
            (Err(error), Ok(state)) => ProvisionOutcome::Failure { state, error },
            (Ok(_), Err(err)) => ProvisionOutcome::Failure {
                state: None,
                error: ProvisionError::Workspace(format!("failed to read state file: {err}")),
            },
            (Err(error), Err(err)) => {
                warn!(error = %err, "failed to read state file after failed step");
                sink.line(&format!("could not read state file: {err}"));
                ProvisionOutcome::Failure { state: None, error }
            }
        }
    }

    async fn drive(
        &self,
        workspace: &Workspace,
        request: &ProvisionRequest,
        deadline: Option<Instant>,
        sink: &LogSink,
    ) -> Result<serde_json::Value, ProvisionError> {
        let mut init = vec![OsString::from("init"), OsString::from("-input=false")];
        if let ModuleSource::Remote(address) = &request.source {
            init.push(OsString::from(format!("-from-module={address}")));
        }
        self.step(workspace, request, "init", init, deadline, Some(sink))
            .await?;

        let verb = match request.action {
            Action::Apply => "apply",
            Action::Destroy => "destroy",
        };
        let mut change = vec![
            OsString::from(verb),
            OsString::from("-auto-approve"),
            OsString::from("-input=false"),
        ];
        change.extend(workspace.state_args());
        change.push(OsString::from("-backup=-"));
        change.push(OsString::from(format!("-var-file={}", workspace.vars_path())));
        self.step(workspace, request, verb, change, deadline, Some(sink))
            .await?;

        if request.action == Action::Destroy {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }

        let mut show = vec![OsString::from("output"), OsString::from("-json")];
        show.extend(workspace.state_args());
        let output = self
            .step(workspace, request, "output", show, deadline, None)
            .await?;
        if output.stdout.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&output.stdout).map_err(|err| ProvisionError::Outputs(err.to_string()))
    }

    async fn step(
        &self,
        workspace: &Workspace,
        request: &ProvisionRequest,
        name: &'static str,
        args: Vec<OsString>,
        deadline: Option<Instant>,
        sink: Option<&LogSink>,
    ) -> Result<CommandOutput, ProvisionError> {
        let remaining = deadline.map(|at| at.saturating_duration_since(Instant::now()));
        if remaining == Some(Duration::ZERO) {
            return Err(ProvisionError::TimedOut {
                step: name,
                log_tail: String::new(),
            });
        }

        let invocation = Invocation::new(self.binary.as_str())
            .arg(format!("-chdir={}", workspace.module_dir))
            .args(args)
            .envs(AUTOMATION_ENV)
            .envs(request.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .timeout(remaining);
        info!(step = name, "running terraform step");
        if let Some(target) = sink {
            target.line(&format!("$ {}", invocation.command_line()));
        }

        let output = self.runner.run(&invocation, sink).await?;
        if output.timed_out {
            warn!(step = name, "terraform step timed out");
            return Err(ProvisionError::TimedOut {
                step: name,
                log_tail: output.log_tail(self.log_tail_lines),
            });
        }
        if !output.is_success() {
            warn!(step = name, status = %output.status_text(), "terraform step failed");
            return Err(ProvisionError::StepFailed {
                step: name,
                status: output.status_text(),
                log_tail: output.log_tail(self.log_tail_lines),
            });
        }
        Ok(output)
    }
}

impl<R: CommandRunner + Sync> Provisioner for TerraformDriver<R> {
    fn execute<'a>(
        &'a self,
        request: &'a ProvisionRequest,
        sink: &'a LogSink,
    ) -> ProvisionFuture<'a> {
        Box::pin(self.run_request(request, sink))
    }
}

/// Private working copy for a single run, removed on drop.
struct Workspace {
    root: Utf8PathBuf,
    dir: Dir,
    module_dir: Utf8PathBuf,
}

impl Workspace {
    fn prepare(work_root: &Utf8Path, request: &ProvisionRequest) -> io::Result<Self> {
        let root = work_root.join(format!("terrastate-{}", Uuid::new_v4().simple()));
        Dir::create_ambient_dir_all(&root, ambient_authority())?;
        let dir = Dir::open_ambient_dir(&root, ambient_authority())?;
        debug!(path = %root, "prepared working directory");

        let module_dir = match &request.source {
            ModuleSource::Local(path) => path.clone(),
            ModuleSource::Remote(_) => {
                dir.create_dir(MODULE_DIR)?;
                root.join(MODULE_DIR)
            }
        };
        let workspace = Self {
            root,
            dir,
            module_dir,
        };

        if let Some(state) = &request.state {
            workspace.dir.write(STATE_FILE, state)?;
        }
        let vars = serde_json::to_vec_pretty(&request.vars).map_err(io::Error::other)?;
        workspace.dir.write(VARS_FILE, vars)?;
        Ok(workspace)
    }

    fn state_path(&self) -> Utf8PathBuf {
        self.root.join(STATE_FILE)
    }

    fn vars_path(&self) -> Utf8PathBuf {
        self.root.join(VARS_FILE)
    }

    fn state_args(&self) -> [OsString; 1] {
        [OsString::from(format!("-state={}", self.state_path()))]
    }

    fn read_state(&self) -> io::Result<Option<Vec<u8>>> {
        match self.dir.read(STATE_FILE) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.root) {
            debug!(path = %self.root, error = %err, "failed to remove working directory");
        }
    }
}
