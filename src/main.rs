//! Binary entry point for the Terrastate CLI.
//!
//! Reads a JSON request on stdin, writes the JSON response on stdout, and
//! reserves stderr for the operator log and diagnostics.

use std::io::{self, Read, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use terrastate::request::StorageConfig;
use terrastate::{
    Encryption, ListRequest, LogSink, OutRequest, RandomNamer, RunError, Runner, S3ObjectStore,
    StateStore, StreamingCommandRunner, TerraformDriver, ToolConfig, validate_storage,
};

mod cli;

use cli::{Cli, OutCommand};

const LOG_FILTER_ENV: &str = "TERRASTATE_LOG";

type ProductionRunner = Runner<S3ObjectStore, TerraformDriver<StreamingCommandRunner>, RandomNamer>;

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid request: {0}")]
    Request(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("failed to write response: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match execute(&cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn execute(cli: &Cli) -> Result<(), CliError> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|err| CliError::Request(err.to_string()))?;
    let mut stdout = io::stdout().lock();
    dispatch(cli, &input, &mut stdout).await
}

async fn dispatch(cli: &Cli, input: &str, out: &mut impl Write) -> Result<(), CliError> {
    match cli {
        Cli::Out(command) => run_out(command, input, out).await,
        Cli::List => run_list(input, out).await,
    }
}

async fn run_out(command: &OutCommand, input: &str, out: &mut impl Write) -> Result<(), CliError> {
    let request: OutRequest = parse_request(input)?;
    let runner = build_runner(&request.source.storage).await?;
    let response = runner
        .out(&request, &command.source_dir, &LogSink::stderr())
        .await?;
    write_json(out, &response)
}

async fn run_list(input: &str, out: &mut impl Write) -> Result<(), CliError> {
    let request: ListRequest = parse_request(input)?;
    let runner = build_runner(&request.source.storage).await?;
    let envs = runner.list().await?;
    write_json(out, &envs)
}

fn parse_request<T: serde::de::DeserializeOwned>(input: &str) -> Result<T, CliError> {
    serde_json::from_str(input).map_err(|err| CliError::Request(err.to_string()))
}

async fn build_runner(storage: &StorageConfig) -> Result<ProductionRunner, CliError> {
    validate_storage(storage).map_err(|err| CliError::Config(err.to_string()))?;
    let tool = ToolConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    tool.validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let deadline = Instant::now() + tool.run_timeout();
    let encryption = Encryption::new(
        storage.server_side_encryption.clone(),
        storage.sse_kms_key_id.clone(),
    );
    let objects = S3ObjectStore::connect(storage, Some(deadline))
        .await
        .map_err(RunError::from)?;
    let store = StateStore::new(objects, &storage.bucket_path, encryption)
        .with_deadline(Some(deadline));
    let driver = TerraformDriver::new(StreamingCommandRunner, tool.terraform_bin.as_str())
        .with_log_tail(tool.log_tail_lines);

    Ok(Runner::new(store, driver, RandomNamer).with_deadline(Some(deadline)))
}

fn write_json(out: &mut impl Write, value: &impl serde::Serialize) -> Result<(), CliError> {
    serde_json::to_writer(&mut *out, value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(out).map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
