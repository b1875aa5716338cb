//! Step definitions, fixtures, and scenarios for the out workflow.

mod bdd_steps;
mod scenarios;
mod test_helpers;
