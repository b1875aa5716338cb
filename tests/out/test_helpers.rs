//! Shared fixtures for out workflow scenarios.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use serde_json::json;
use tempfile::TempDir;
use terrastate::test_support::{FixedNamer, MemoryObjectStore, ScriptedRunner};
use terrastate::{
    Encryption, Invocation, OutRequest, OutResponse, Runner, StateStore, TerraformDriver,
};

/// Runner wired to in-memory storage and a scripted terraform binary.
pub type WorkflowRunner = Runner<MemoryObjectStore, TerraformDriver<ScriptedRunner>, FixedNamer>;

#[derive(Clone, Debug)]
pub enum RunResult {
    Success(OutResponse),
    Failure(String),
}

#[derive(Clone, Debug)]
pub struct OutContext {
    pub _dir: Arc<TempDir>,
    pub base_dir: Utf8PathBuf,
    pub bucket_path: String,
    pub objects: MemoryObjectStore,
    pub terraform: ScriptedRunner,
    pub outcome: Option<RunResult>,
}

impl OutContext {
    pub fn key(&self, env_name: &str, tainted: bool) -> String {
        let suffix = if tainted { ".tfstate.tainted" } else { ".tfstate" };
        format!("{}/{env_name}{suffix}", self.bucket_path)
    }

    pub fn runner(&self) -> WorkflowRunner {
        let store = StateStore::new(
            self.objects.clone(),
            &self.bucket_path,
            Encryption::default(),
        );
        let driver = TerraformDriver::new(self.terraform.clone(), "terraform")
            .with_work_root(self.base_dir.join("work"))
            .with_log_tail(10);
        Runner::new(store, driver, FixedNamer::new(["unused-name-001"]))
    }

    /// Terraform subcommands in invocation order.
    pub fn steps(&self) -> Vec<String> {
        self.terraform.invocations().iter().filter_map(subcommand).collect()
    }
}

fn subcommand(invocation: &Invocation) -> Option<String> {
    invocation
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .find(|arg| !arg.starts_with('-'))
}

#[fixture]
pub fn out_context() -> OutContext {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir should be created: {err}"));
    let base_dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("tempdir should be UTF-8: {}", path.display()));
    std::fs::create_dir_all(base_dir.join("module"))
        .unwrap_or_else(|err| panic!("module dir should be created: {err}"));
    OutContext {
        _dir: Arc::new(dir),
        base_dir,
        bucket_path: String::from("envs"),
        objects: MemoryObjectStore::default(),
        terraform: ScriptedRunner::new(),
        outcome: None,
    }
}

pub fn out_request(env_name: &str, action: &str, delete_on_failure: bool) -> OutRequest {
    let document = json!({
        "source": {
            "storage": {"bucket": "state-bucket", "bucket_path": "envs"},
            "terraform": {
                "source": "module",
                "vars": {"tag_name": "behaviour"}
            }
        },
        "params": {
            "env_name": env_name,
            "action": action,
            "terraform": {"delete_on_failure": delete_on_failure}
        }
    });
    serde_json::from_value(document)
        .unwrap_or_else(|err| panic!("request fixture should deserialise: {err}"))
}

pub fn output_document(name: &str, value: &str) -> String {
    json!({name: {"sensitive": false, "type": "string", "value": value}}).to_string()
}
