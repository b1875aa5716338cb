//! BDD step definitions for the out workflow.

use rstest_bdd_macros::{given, then, when};
use terrastate::LogSink;
use tokio::runtime::Runtime;

use super::test_helpers::{OutContext, RunResult, out_request, output_document};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("an out workflow with bucket path \"{path}\"")]
fn out_workflow(mut out_context: OutContext, path: String) -> OutContext {
    out_context.bucket_path = path;
    out_context
}

#[given("stable state \"{state}\" exists for \"{env_name}\"")]
fn stable_state_exists(out_context: OutContext, state: String, env_name: String) -> OutContext {
    out_context
        .objects
        .insert(&out_context.key(&env_name, false), state.into_bytes());
    out_context
}

#[given("tainted state \"{state}\" exists for \"{env_name}\"")]
fn tainted_state_exists(out_context: OutContext, state: String, env_name: String) -> OutContext {
    out_context
        .objects
        .insert(&out_context.key(&env_name, true), state.into_bytes());
    out_context
}

#[given("terraform applies writing state \"{state}\" with output \"{name}\" = \"{value}\"")]
fn terraform_applies(
    out_context: OutContext,
    state: String,
    name: String,
    value: String,
) -> OutContext {
    out_context.terraform.push_success(); // init
    out_context.terraform.push_state_write(state.into_bytes());
    out_context
        .terraform
        .push_stdout(output_document(&name, &value));
    out_context
}

#[given("terraform apply fails with exit code {code:i32} leaving state \"{state}\"")]
fn terraform_apply_fails(out_context: OutContext, code: i32, state: String) -> OutContext {
    out_context.terraform.push_success(); // init
    out_context.terraform.push_failure_with_state(
        code,
        "Error: creating EC2 VPC: UnauthorizedOperation",
        state.into_bytes(),
    );
    out_context
}

#[given("terraform destroy succeeds")]
fn terraform_destroy_succeeds(out_context: OutContext) -> OutContext {
    out_context.terraform.push_success(); // init
    out_context.terraform.push_success(); // destroy
    out_context
}

fn run_out(
    mut out_context: OutContext,
    env_name: &str,
    action: &str,
    delete_on_failure: bool,
) -> Result<OutContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let runner = out_context.runner();
    let request = out_request(env_name, action, delete_on_failure);
    let base_dir = out_context.base_dir.clone();

    let result =
        runtime.block_on(async move { runner.out(&request, &base_dir, &LogSink::discard()).await });
    out_context.outcome = Some(match result {
        Ok(response) => RunResult::Success(response),
        Err(err) => RunResult::Failure(err.to_string()),
    });
    Ok(out_context)
}

#[when("I apply environment \"{env_name}\"")]
fn apply_environment(out_context: OutContext, env_name: String) -> Result<OutContext, StepError> {
    run_out(out_context, &env_name, "apply", false)
}

#[when("I apply environment \"{env_name}\" with delete on failure")]
fn apply_with_delete_on_failure(
    out_context: OutContext,
    env_name: String,
) -> Result<OutContext, StepError> {
    run_out(out_context, &env_name, "apply", true)
}

#[when("I destroy environment \"{env_name}\"")]
fn destroy_environment(
    out_context: OutContext,
    env_name: String,
) -> Result<OutContext, StepError> {
    run_out(out_context, &env_name, "destroy", false)
}

#[then("the run succeeds with version \"{env_name}\"")]
fn run_succeeds(out_context: &OutContext, env_name: String) -> Result<(), StepError> {
    match out_context.outcome {
        Some(RunResult::Success(ref response)) if response.version.env_name == env_name => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected success for {env_name}, got {other:?}"
        ))),
    }
}

#[then("the metadata includes \"{name}\" = \"{value}\"")]
fn metadata_includes(out_context: &OutContext, name: String, value: String) -> Result<(), StepError> {
    let Some(RunResult::Success(ref response)) = out_context.outcome else {
        return Err(StepError::Assertion(format!(
            "expected success, got {:?}",
            out_context.outcome
        )));
    };
    if response
        .metadata
        .iter()
        .any(|entry| entry.name == name && entry.value == value)
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "missing {name}={value} in {:?}",
            response.metadata
        )))
    }
}

#[then("the run fails mentioning \"{text}\"")]
fn run_fails(out_context: &OutContext, text: String) -> Result<(), StepError> {
    match out_context.outcome {
        Some(RunResult::Failure(ref message)) if message.contains(&text) => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected failure mentioning {text:?}, got {other:?}"
        ))),
    }
}

fn expect_object(out_context: &OutContext, key: &str, expected: &str) -> Result<(), StepError> {
    let actual = out_context.objects.object(key);
    if actual.as_deref() == Some(expected.as_bytes()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {key} to hold {expected:?}, got {:?}",
            actual.map(|body| String::from_utf8_lossy(&body).into_owned())
        )))
    }
}

#[then("the stable state for \"{env_name}\" is \"{state}\"")]
fn stable_state_is(out_context: &OutContext, env_name: String, state: String) -> Result<(), StepError> {
    expect_object(out_context, &out_context.key(&env_name, false), &state)
}

#[then("the tainted state for \"{env_name}\" is \"{state}\"")]
fn tainted_state_is(out_context: &OutContext, env_name: String, state: String) -> Result<(), StepError> {
    expect_object(out_context, &out_context.key(&env_name, true), &state)
}

fn expect_absent(out_context: &OutContext, key: &str) -> Result<(), StepError> {
    match out_context.objects.object(key) {
        None => Ok(()),
        Some(_) => Err(StepError::Assertion(format!("{key} should be absent"))),
    }
}

#[then("no tainted state exists for \"{env_name}\"")]
fn no_tainted_state(out_context: &OutContext, env_name: String) -> Result<(), StepError> {
    expect_absent(out_context, &out_context.key(&env_name, true))
}

#[then("no stable state exists for \"{env_name}\"")]
fn no_stable_state(out_context: &OutContext, env_name: String) -> Result<(), StepError> {
    expect_absent(out_context, &out_context.key(&env_name, false))
}

#[then("no state exists for \"{env_name}\"")]
fn no_state(out_context: &OutContext, env_name: String) -> Result<(), StepError> {
    let remaining: Vec<String> = [false, true]
        .into_iter()
        .map(|tainted| out_context.key(&env_name, tainted))
        .filter(|key| out_context.objects.object(key).is_some())
        .collect();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("objects remain: {remaining:?}")))
    }
}

#[then("terraform ran the steps \"{steps}\"")]
fn terraform_ran_steps(out_context: &OutContext, steps: String) -> Result<(), StepError> {
    let expected: Vec<&str> = steps.split(',').map(str::trim).collect();
    let actual = out_context.steps();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected steps {expected:?}, got {actual:?}"
        )))
    }
}

#[then("terraform was not invoked")]
fn terraform_not_invoked(out_context: &OutContext) -> Result<(), StepError> {
    let steps = out_context.steps();
    if steps.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected steps: {steps:?}")))
    }
}
