//! Orchestrates a single apply or destroy against remote state.
//!
//! A run first resolves the request into a [`RunContext`], then walks an
//! explicit [`Phase`] machine: fetch prior state, provision, and either
//! record the new stable state or taint the environment. Every phase reports
//! progress to the caller's [`LogSink`] and to `tracing`.

use camino::Utf8Path;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::log_sink::LogSink;
use crate::merge::{ConfigError, merge};
use crate::namer::{Namer, ResolveError, resolve_name};
use crate::provision::{ModuleSource, ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner};
use crate::render::{RenderError, render};
use crate::request::{Action, EnvMap, MetadataEntry, OutRequest, OutResponse, VarMap, Version};
use crate::storage::{ObjectStore, StateKind, StateStore, StorageError, StoredEnv};

/// Tool variable that always carries the resolved environment name.
pub const ENV_NAME_VAR: &str = "env_name";

/// Errors that end a run, one per failure class.
#[derive(Debug, Error)]
pub enum RunError {
    /// The request is incomplete or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// No free random name was found.
    #[error("failed to generate a random name: all {attempts} candidates already exist")]
    NameClash {
        /// Number of candidates tried.
        attempts: usize,
    },
    /// The object store could not be read or written.
    #[error("state storage failed: {0}")]
    Storage(#[from] StorageError),
    /// The provisioning tool failed.
    #[error("{action} of environment {env_name} failed: {source}")]
    Provision {
        /// Action that failed.
        action: Action,
        /// Environment acted upon.
        env_name: String,
        /// Underlying tool failure, including the log tail.
        #[source]
        source: ProvisionError,
    },
    /// The output document could not be rendered.
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl From<ResolveError> for RunError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::NameClash { attempts } => Self::NameClash { attempts },
            ResolveError::Storage(err) => Self::Storage(err),
        }
    }
}

/// Settled configuration for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunContext {
    /// Resolved environment name.
    pub env_name: String,
    /// Requested action.
    pub action: Action,
    /// Configuration to provision.
    pub source: ModuleSource,
    /// Merged variables, with `env_name` set to the resolved name.
    pub vars: VarMap,
    /// Merged tool environment.
    pub env: EnvMap,
    /// Destroy partial infrastructure when apply fails.
    pub delete_on_failure: bool,
}

impl RunContext {
    fn provision_request(
        &self,
        action: Action,
        state: Option<Vec<u8>>,
        deadline: Option<Instant>,
    ) -> ProvisionRequest {
        ProvisionRequest {
            action,
            source: self.source.clone(),
            vars: self.vars.clone(),
            env: self.env.clone(),
            state,
            timeout: deadline.map(|at| at.saturating_duration_since(Instant::now())),
        }
    }

    fn response(&self, metadata: Vec<MetadataEntry>) -> OutResponse {
        OutResponse {
            version: Version {
                env_name: self.env_name.clone(),
            },
            metadata,
        }
    }
}

/// Steps of a run after the request has been resolved.
#[derive(Debug)]
enum Phase {
    Fetching,
    Provisioning {
        prior: Option<Vec<u8>>,
    },
    Succeeding {
        state: Option<Vec<u8>>,
        outputs: serde_json::Value,
    },
    Tainting {
        state: Option<Vec<u8>>,
        error: ProvisionError,
    },
    Done(Result<OutResponse, RunError>),
}

/// Composes merging, naming, storage, and provisioning into one run.
#[derive(Debug)]
pub struct Runner<S, P, N> {
    store: StateStore<S>,
    provisioner: P,
    namer: N,
    deadline: Option<Instant>,
}

impl<S, P, N> Runner<S, P, N>
where
    S: ObjectStore + Sync,
    P: Provisioner,
    N: Namer,
{
    /// Creates a runner.
    #[must_use]
    pub const fn new(store: StateStore<S>, provisioner: P, namer: N) -> Self {
        Self {
            store,
            provisioner,
            namer,
            deadline: None,
        }
    }

    /// Bounds provisioning by `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns the state store.
    #[must_use]
    pub const fn store(&self) -> &StateStore<S> {
        &self.store
    }

    /// Executes `request`, resolving relative paths against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] for invalid configuration, exhausted naming,
    /// storage failures, provisioning failures (after taint handling), and
    /// malformed outputs.
    pub async fn out(
        &self,
        request: &OutRequest,
        base_dir: &Utf8Path,
        sink: &LogSink,
    ) -> Result<OutResponse, RunError> {
        let ctx = self.resolve(request, base_dir, sink).await?;
        let mut phase = Phase::Fetching;
        loop {
            phase = match phase {
                Phase::Fetching => self.fetch(&ctx, sink).await,
                Phase::Provisioning { prior } => self.provision(&ctx, prior, sink).await,
                Phase::Succeeding { state, outputs } => {
                    Phase::Done(self.succeed(&ctx, state, &outputs, sink).await)
                }
                Phase::Tainting { state, error } => {
                    Phase::Done(self.taint(&ctx, state, error, sink).await)
                }
                Phase::Done(result) => return result,
            };
        }
    }

    /// Lists every environment under the bucket path.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Storage`] when listing fails.
    pub async fn list(&self) -> Result<Vec<StoredEnv>, RunError> {
        Ok(self.store.list().await?)
    }

    async fn resolve(
        &self,
        request: &OutRequest,
        base_dir: &Utf8Path,
        sink: &LogSink,
    ) -> Result<RunContext, RunError> {
        let merged = merge(&request.source, &request.params, base_dir)?;
        let env_name = resolve_name(&merged.name, &self.store, &self.namer).await?;
        info!(%env_name, action = %merged.action, "resolved environment");
        sink.line(&format!("{} environment {env_name}", merged.action));
        let mut vars = merged.vars;
        vars.insert(
            String::from(ENV_NAME_VAR),
            serde_json::Value::String(env_name.clone()),
        );
        Ok(RunContext {
            env_name,
            action: merged.action,
            source: ModuleSource::resolve(base_dir, &merged.terraform_source),
            vars,
            env: merged.env,
            delete_on_failure: merged.delete_on_failure,
        })
    }

    async fn fetch(&self, ctx: &RunContext, sink: &LogSink) -> Phase {
        sink.line(&format!("fetching state for {}", ctx.env_name));
        match self.prior_state(&ctx.env_name, sink).await {
            Ok(None) if ctx.action == Action::Destroy => {
                sink.line(&format!(
                    "no state found for {}, nothing to destroy",
                    ctx.env_name
                ));
                Phase::Done(Ok(ctx.response(Vec::new())))
            }
            Ok(prior) => Phase::Provisioning { prior },
            Err(err) => Phase::Done(Err(err.into())),
        }
    }

    /// Reads the tainted state, falling back to stable state.
    ///
    /// A tainted blob is always newer than any stable blob left beside it.
    async fn prior_state(
        &self,
        env_name: &str,
        sink: &LogSink,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(tainted) = self.store.fetch_tainted(env_name).await? {
            warn!(%env_name, "resuming from tainted state");
            sink.line(&format!("using tainted state for {env_name}"));
            return Ok(Some(tainted));
        }
        self.store.fetch(env_name).await
    }

    async fn provision(&self, ctx: &RunContext, prior: Option<Vec<u8>>, sink: &LogSink) -> Phase {
        info!(env_name = %ctx.env_name, action = %ctx.action, "provisioning");
        let request = ctx.provision_request(ctx.action, prior, self.deadline);
        match self.provisioner.execute(&request, sink).await {
            ProvisionOutcome::Success { state, outputs } => Phase::Succeeding { state, outputs },
            ProvisionOutcome::Failure { state, error } => Phase::Tainting {
                state: state.or(request.state),
                error,
            },
        }
    }

    async fn succeed(
        &self,
        ctx: &RunContext,
        state: Option<Vec<u8>>,
        outputs: &serde_json::Value,
        sink: &LogSink,
    ) -> Result<OutResponse, RunError> {
        match ctx.action {
            Action::Apply => {
                if let Some(blob) = state {
                    sink.line(&format!("uploading state for {}", ctx.env_name));
                    self.store.put(&ctx.env_name, blob, false).await?;
                }
                if self.store.has(&ctx.env_name, StateKind::Tainted).await? {
                    sink.line(&format!("clearing tainted state for {}", ctx.env_name));
                    self.store.delete(&ctx.env_name, true).await?;
                }
                let metadata = render(outputs, &ctx.env_name)?;
                Ok(ctx.response(metadata))
            }
            Action::Destroy => {
                self.forget(&ctx.env_name, sink).await?;
                Ok(ctx.response(Vec::new()))
            }
        }
    }

    async fn taint(
        &self,
        ctx: &RunContext,
        state: Option<Vec<u8>>,
        error: ProvisionError,
        sink: &LogSink,
    ) -> Result<OutResponse, RunError> {
        warn!(env_name = %ctx.env_name, action = %ctx.action, %error, "provisioning failed");
        sink.line(&format!("{} failed: {error}", ctx.action));

        let failure = RunError::Provision {
            action: ctx.action,
            env_name: ctx.env_name.clone(),
            source: error,
        };
        let Some(blob) = state else {
            sink.line("no state was produced, nothing to taint");
            return Err(failure);
        };

        sink.line(&format!("writing tainted state for {}", ctx.env_name));
        self.store.put(&ctx.env_name, blob.clone(), true).await?;
        self.store.delete(&ctx.env_name, false).await?;
        if ctx.delete_on_failure && ctx.action == Action::Apply {
            self.destroy_after_failure(ctx, blob, sink).await?;
        }
        Err(failure)
    }

    /// Destroys a failed apply; the tainted key survives a failed destroy.
    async fn destroy_after_failure(
        &self,
        ctx: &RunContext,
        tainted: Vec<u8>,
        sink: &LogSink,
    ) -> Result<(), StorageError> {
        sink.line(&format!("delete_on_failure is set, destroying {}", ctx.env_name));
        let request = ctx.provision_request(Action::Destroy, Some(tainted), self.deadline);
        match self.provisioner.execute(&request, sink).await {
            ProvisionOutcome::Success { .. } => self.forget(&ctx.env_name, sink).await,
            ProvisionOutcome::Failure { state, error } => {
                warn!(env_name = %ctx.env_name, %error, "cleanup destroy failed");
                sink.line(&format!(
                    "cleanup destroy failed, keeping tainted state: {error}"
                ));
                if let Some(partial) = state {
                    self.store.put(&ctx.env_name, partial, true).await?;
                }
                Ok(())
            }
        }
    }

    async fn forget(&self, env_name: &str, sink: &LogSink) -> Result<(), StorageError> {
        sink.line(&format!("removing state for {env_name}"));
        self.store.delete(env_name, false).await?;
        self.store.delete(env_name, true).await
    }
}
