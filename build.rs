//! Build script generating man pages for `terrastate` and its subcommands.
//!
//! Pages land in `$OUT_DIR/man`: `terrastate.1` plus one page per
//! subcommand (`terrastate-out.1`, `terrastate-list.1`).

use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;

#[path = "src/cli/mod.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs", "Cargo.toml"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set"))?;
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    clap_mangen::generate_to(cli::Cli::command(), &man_dir)?;
    Ok(())
}
