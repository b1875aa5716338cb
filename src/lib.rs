//! Core library for the Terrastate provisioning orchestrator.
//!
//! The crate applies or destroys a Terraform configuration for a named
//! environment, keeping the resulting state in an S3 bucket. Failed runs are
//! recorded under a separate tainted key so known-good state is never
//! overwritten by a partial apply.

pub mod command;
pub mod config;
pub mod log_sink;
pub mod merge;
pub mod namer;
pub mod provision;
pub mod render;
pub mod request;
pub mod run;
pub mod storage;
pub mod terraform;
pub mod test_support;

pub use command::{CommandError, CommandOutput, CommandRunner, Invocation, StreamingCommandRunner};
pub use config::{ToolConfig, ToolConfigError};
pub use log_sink::{CapturedLog, LogSink};
pub use merge::{ConfigError, MergedConfig, NameChoice, merge, normalize_env_name, validate_storage};
pub use namer::{NAME_CLASH_RETRIES, Namer, RandomNamer, ResolveError, resolve_name};
pub use provision::{ModuleSource, ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner};
pub use render::{RenderError, render};
pub use request::{Action, ListRequest, MetadataEntry, OutRequest, OutResponse, Source, Version};
pub use run::{ENV_NAME_VAR, RunContext, RunError, Runner};
pub use storage::{
    Encryption, ObjectStore, S3ObjectStore, StateStore, StorageError, StoredEnv, within_deadline,
};
pub use terraform::TerraformDriver;
