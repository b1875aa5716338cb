//! BDD scenarios for the out workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{OutContext, out_context};

#[scenario(
    path = "tests/features/out.feature",
    name = "Apply a new environment and record stable state"
)]
fn scenario_apply_new_environment(out_context: OutContext) {
    drop(out_context);
}

#[scenario(
    path = "tests/features/out.feature",
    name = "A failed apply moves the environment to tainted state"
)]
fn scenario_failed_apply_taints(out_context: OutContext) {
    drop(out_context);
}

#[scenario(
    path = "tests/features/out.feature",
    name = "A successful apply clears an earlier taint"
)]
fn scenario_apply_clears_taint(out_context: OutContext) {
    drop(out_context);
}

#[scenario(
    path = "tests/features/out.feature",
    name = "Delete on failure destroys the partial environment"
)]
fn scenario_delete_on_failure(out_context: OutContext) {
    drop(out_context);
}

#[scenario(
    path = "tests/features/out.feature",
    name = "Destroy removes every state object"
)]
fn scenario_destroy_removes_state(out_context: OutContext) {
    drop(out_context);
}

#[scenario(
    path = "tests/features/out.feature",
    name = "Destroying an unknown environment runs nothing"
)]
fn scenario_destroy_unknown(out_context: OutContext) {
    drop(out_context);
}
