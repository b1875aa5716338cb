//! Command-line interface definitions for the `terrastate` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `terrastate` binary.
#[derive(Debug, Parser)]
#[command(
    name = "terrastate",
    about = "Apply or destroy Terraform environments whose state lives in S3",
    version,
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Apply or destroy the environment described by the JSON request on stdin.
    #[command(
        name = "out",
        about = "Apply or destroy the environment described by the JSON request on stdin"
    )]
    Out(OutCommand),
    /// List environments stored under the configured bucket path.
    #[command(
        name = "list",
        about = "List environments stored under the configured bucket path"
    )]
    List,
}

/// Arguments for the `terrastate out` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct OutCommand {
    /// Directory that relative paths in the request resolve against.
    ///
    /// Variable files, name files, and local Terraform sources named in the
    /// request are looked up relative to this directory.
    #[arg(value_name = "SOURCE_DIR", default_value = ".")]
    pub(crate) source_dir: Utf8PathBuf,
}
