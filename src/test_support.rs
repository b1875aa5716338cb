//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::command::{CommandError, CommandFuture, CommandOutput, CommandRunner, Invocation};
use crate::log_sink::LogSink;
use crate::namer::Namer;
use crate::provision::{ProvisionFuture, ProvisionOutcome, ProvisionRequest, Provisioner};
use crate::storage::{Encryption, ObjectStore, StorageError, StoreFuture};

#[derive(Clone, Debug)]
struct ScriptedResponse {
    output: CommandOutput,
    state: Option<Vec<u8>>,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// A response may also carry a state blob, written to the path named by the
/// invocation's `-state=` argument to imitate the tool updating its state.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns each recorded invocation as a plain command line.
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|invocation| {
                let mut parts = vec![invocation.program.clone()];
                parts.extend(
                    invocation
                        .args
                        .iter()
                        .map(|arg| arg.to_string_lossy().into_owned()),
                );
                parts.join(" ")
            })
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with stdout text.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a successful exit that writes `state` to the state file.
    pub fn push_state_write(&self, state: impl Into<Vec<u8>>) {
        self.push_response(
            CommandOutput {
                code: Some(0),
                ..CommandOutput::default()
            },
            Some(state.into()),
        );
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes a failing exit that still leaves `state` behind.
    pub fn push_failure_with_state(
        &self,
        code: i32,
        stderr: impl Into<String>,
        state: impl Into<Vec<u8>>,
    ) {
        self.push_response(
            CommandOutput {
                code: Some(code),
                stderr: stderr.into(),
                ..CommandOutput::default()
            },
            Some(state.into()),
        );
    }

    /// Pushes a response for a process killed at its deadline.
    pub fn push_timeout(&self) {
        self.push_response(
            CommandOutput {
                timed_out: true,
                ..CommandOutput::default()
            },
            None,
        );
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.push_response(
            CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
                timed_out: false,
            },
            None,
        );
    }

    fn push_response(&self, output: CommandOutput, state: Option<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(ScriptedResponse { output, state });
    }

    fn respond(&self, invocation: &Invocation, sink: Option<&LogSink>) -> Result<CommandOutput, CommandError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
        let response = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: invocation.program.clone(),
                message: String::from("no scripted response available"),
            })?;

        if let Some(state) = response.state {
            let target = invocation
                .args
                .iter()
                .filter_map(|arg| arg.to_str())
                .find_map(|arg| arg.strip_prefix("-state="))
                .ok_or_else(|| CommandError::Io {
                    program: invocation.program.clone(),
                    message: String::from("scripted state write without -state= argument"),
                })?;
            std::fs::write(target, state).map_err(|err| CommandError::Io {
                program: invocation.program.clone(),
                message: err.to_string(),
            })?;
        }

        if let Some(target) = sink {
            for line in response
                .output
                .stdout
                .lines()
                .chain(response.output.stderr.lines())
            {
                target.line(line);
            }
        }
        Ok(response.output)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        sink: Option<&'a LogSink>,
    ) -> CommandFuture<'a> {
        Box::pin(async move { self.respond(invocation, sink) })
    }
}

/// In-memory object store with optional failure injection.
#[derive(Clone, Debug, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    encryption: Arc<Mutex<BTreeMap<String, Encryption>>>,
    failing: Arc<Mutex<BTreeSet<&'static str>>>,
}

impl MemoryObjectStore {
    /// Seeds an object directly.
    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), body);
    }

    /// Returns the stored object, if any.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns every stored key in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Returns the encryption parameters used for the last put of `key`.
    #[must_use]
    pub fn encryption_for(&self, key: &str) -> Option<Encryption> {
        self.encryption
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Makes every call of `operation` (`get`, `put`, `delete`, `exists`,
    /// `list`) fail with a transport error.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation);
    }

    fn check(&self, operation: &'static str, key: &str) -> Result<(), StorageError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(operation)
        {
            return Err(StorageError::Transport {
                operation,
                key: key.to_owned(),
                message: String::from("AccessDenied: simulated failure"),
            });
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            self.check("get", key)?;
            Ok(self.object(key))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
        encryption: &'a Encryption,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check("put", key)?;
            self.insert(key, body);
            self.encryption
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.to_owned(), encryption.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check("delete", key)?;
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check("exists", key)?;
            Ok(self.object(key).is_some())
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.check("list", prefix)?;
            Ok(self
                .keys()
                .into_iter()
                .filter(|key| key.starts_with(prefix))
                .collect())
        })
    }
}

/// Namer returning a fixed sequence, repeating the last name once exhausted.
#[derive(Debug, Default)]
pub struct FixedNamer {
    names: Vec<String>,
    calls: AtomicUsize,
}

impl FixedNamer {
    /// Creates a namer yielding `names` in order.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of names handed out so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Namer for FixedNamer {
    fn random_name(&self) -> String {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.names
            .get(index)
            .or_else(|| self.names.last())
            .cloned()
            .unwrap_or_default()
    }
}

/// Provisioner returning pre-seeded outcomes and recording requests.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvisioner {
    outcomes: Arc<Mutex<VecDeque<ProvisionOutcome>>>,
    requests: Arc<Mutex<Vec<ProvisionRequest>>>,
}

impl ScriptedProvisioner {
    /// Creates a provisioner with no queued outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome for the next call.
    pub fn push(&self, outcome: ProvisionOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Returns a snapshot of all requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ProvisionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Provisioner for ScriptedProvisioner {
    fn execute<'a>(
        &'a self,
        request: &'a ProvisionRequest,
        sink: &'a LogSink,
    ) -> ProvisionFuture<'a> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());
            sink.line(&format!("scripted {} run", request.action));
            self.outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| ProvisionOutcome::Success {
                    state: request.state.clone(),
                    outputs: serde_json::Value::Object(serde_json::Map::new()),
                })
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
