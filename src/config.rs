//! Ambient tool configuration loaded via `ortho-config`.
//!
//! These settings describe the host running the orchestrator rather than the
//! environment being provisioned, so they come from `terrastate.toml` and
//! `TERRASTATE_*` variables instead of the JSON request.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default provisioning tool binary.
pub const DEFAULT_TERRAFORM_BIN: &str = "terraform";

/// Host-level settings for a run.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TERRASTATE",
    discovery(
        app_name = "terrastate",
        env_var = "TERRASTATE_CONFIG_PATH",
        config_file_name = "terrastate.toml",
        dotfile_name = ".terrastate.toml",
        project_file_name = "terrastate.toml"
    )
)]
pub struct ToolConfig {
    /// Path to the `terraform` executable.
    #[ortho_config(default = DEFAULT_TERRAFORM_BIN.to_owned())]
    pub terraform_bin: String,
    /// Overall deadline for one invocation, in seconds.
    #[ortho_config(default = 3600)]
    pub run_timeout_secs: u64,
    /// Number of tool log lines quoted in failure messages.
    #[ortho_config(default = 40)]
    pub log_tail_lines: usize,
}

/// Errors raised when loading or validating [`ToolConfig`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ToolConfigError {
    /// A field holds an unusable value.
    #[error("invalid {field}: set {env_var} or {field} in terrastate.toml to a non-empty, non-zero value")]
    Invalid {
        /// TOML key of the field.
        field: &'static str,
        /// Environment variable overriding the field.
        env_var: &'static str,
    },
    /// Merging configuration layers failed.
    #[error("tool configuration parsing failed: {0}")]
    Parse(String),
}

impl ToolConfig {
    /// Loads defaults, configuration files, and environment variables without
    /// reading CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ToolConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("terrastate")])
            .map_err(|err| ToolConfigError::Parse(err.to_string()))
    }

    /// Rejects an empty binary path and zero limits.
    ///
    /// # Errors
    ///
    /// Returns [`ToolConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ToolConfigError> {
        if self.terraform_bin.trim().is_empty() {
            return Err(ToolConfigError::Invalid {
                field: "terraform_bin",
                env_var: "TERRASTATE_TERRAFORM_BIN",
            });
        }
        if self.run_timeout_secs == 0 {
            return Err(ToolConfigError::Invalid {
                field: "run_timeout_secs",
                env_var: "TERRASTATE_RUN_TIMEOUT_SECS",
            });
        }
        if self.log_tail_lines == 0 {
            return Err(ToolConfigError::Invalid {
                field: "log_tail_lines",
                env_var: "TERRASTATE_LOG_TAIL_LINES",
            });
        }
        Ok(())
    }

    /// Overall run deadline.
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl From<ortho_config::OrthoError> for ToolConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use rstest::{fixture, rstest};

    #[fixture]
    fn base_config() -> ToolConfig {
        ToolConfig {
            terraform_bin: DEFAULT_TERRAFORM_BIN.to_owned(),
            run_timeout_secs: 3600,
            log_tail_lines: 40,
        }
    }

    #[rstest]
    fn defaults_validate(base_config: ToolConfig) {
        assert!(base_config.validate().is_ok());
        assert_eq!(base_config.run_timeout(), Duration::from_secs(3600));
    }

    #[rstest]
    #[case::blank_binary(|cfg: &mut ToolConfig| cfg.terraform_bin = String::from("  "), "terraform_bin")]
    #[case::zero_timeout(|cfg: &mut ToolConfig| cfg.run_timeout_secs = 0, "run_timeout_secs")]
    #[case::zero_tail(|cfg: &mut ToolConfig| cfg.log_tail_lines = 0, "log_tail_lines")]
    fn validation_names_offending_field(
        mut base_config: ToolConfig,
        #[case] mutate: fn(&mut ToolConfig),
        #[case] expected: &str,
    ) {
        mutate(&mut base_config);

        let err = base_config.validate().expect_err("validation should fail");

        let ToolConfigError::Invalid { field, env_var } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert_eq!(field, expected);
        assert!(env_var.starts_with("TERRASTATE_"));
    }

    #[tokio::test]
    async fn environment_overrides_defaults() {
        let _guard = EnvGuard::set_vars(&[
            ("TERRASTATE_TERRAFORM_BIN", "/opt/terraform/bin/terraform"),
            ("TERRASTATE_RUN_TIMEOUT_SECS", "120"),
        ])
        .await;

        let config = ToolConfig::load_without_cli_args().expect("config should load");

        assert_eq!(config.terraform_bin, "/opt/terraform/bin/terraform");
        assert_eq!(config.run_timeout_secs, 120);
        assert_eq!(config.log_tail_lines, 40);
    }
}
