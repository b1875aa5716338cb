//! Resolution of the layered request into the configuration used for a run.
//!
//! Variables merge over three ordered layers (source defaults, step
//! overrides, then the contents of the variable file), each layer replacing
//! only the keys it defines. The environment name comes from the first of:
//! literal name, name file, random generation.

use std::collections::BTreeMap;
use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::request::{Action, EnvMap, OutParams, Source, StorageConfig, VarMap};

/// Errors raised for missing or invalid configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// None of the name sources supplied a name.
    #[error("no environment name provided: set env_name, env_name_file or generate_random_name")]
    MissingEnvName,
    /// The name file was empty after trimming.
    #[error("env_name_file {path} is empty")]
    EmptyEnvNameFile {
        /// Path as given in the request.
        path: String,
    },
    /// Neither layer names a configuration to provision.
    #[error("no terraform source provided: set source.terraform.source or params.terraform.source")]
    MissingSource,
    /// The action selector is not recognised.
    #[error("invalid action '{0}': expected apply or destroy")]
    InvalidAction(String),
    /// A required storage field is empty.
    #[error("missing required field source.storage.{0}")]
    MissingStorageField(String),
    /// An input file could not be read.
    #[error("failed to read {path}: {message}")]
    ReadFile {
        /// Path as given in the request.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// The variable file is not a YAML mapping.
    #[error("var_file {path} must contain a YAML mapping: {message}")]
    VarFile {
        /// Path as given in the request.
        path: String,
        /// Parser error message.
        message: String,
    },
    /// Ambient tool configuration is invalid.
    #[error("{0}")]
    Tool(String),
}

/// How the environment name will be obtained.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NameChoice {
    /// The request supplied the name, already normalised.
    Given(String),
    /// A unique random name must be generated.
    Generate,
}

/// Final configuration for a single run.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedConfig {
    /// Environment name, or the request to generate one.
    pub name: NameChoice,
    /// Operation to perform.
    pub action: Action,
    /// Local directory or module address to provision.
    pub terraform_source: String,
    /// Variables after applying layer precedence.
    pub vars: VarMap,
    /// Tool environment after applying layer precedence.
    pub env: EnvMap,
    /// Destroy partial infrastructure when apply fails.
    pub delete_on_failure: bool,
}

/// Overlays `layers` from lowest to highest precedence.
///
/// Keys defined by a later layer replace those of earlier layers; keys that
/// only a lower layer defines survive unchanged.
#[must_use]
pub fn merge_layers<V: Clone>(layers: &[&BTreeMap<String, V>]) -> BTreeMap<String, V> {
    let mut merged = BTreeMap::new();
    for layer in layers {
        merged.extend(
            layer
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
    }
    merged
}

/// Trims surrounding whitespace and replaces spaces with hyphens.
#[must_use]
pub fn normalize_env_name(raw: &str) -> String {
    raw.trim().replace(' ', "-")
}

/// Resolves the request into a [`MergedConfig`].
///
/// Relative file paths are resolved against `base_dir`.
///
/// # Errors
///
/// Returns [`ConfigError`] when the action is unknown, no name source or
/// terraform source is given, or an input file is unreadable or malformed.
pub fn merge(
    source: &Source,
    params: &OutParams,
    base_dir: &Utf8Path,
) -> Result<MergedConfig, ConfigError> {
    let action = Action::parse(params.action.as_deref())
        .ok_or_else(|| ConfigError::InvalidAction(params.action.clone().unwrap_or_default()))?;

    let terraform_source = params
        .terraform
        .source
        .as_deref()
        .or(source.terraform.source.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingSource)?
        .to_owned();

    let file_vars = match params.terraform.var_file.as_deref() {
        Some(path) if !path.trim().is_empty() => read_var_file(base_dir, path)?,
        _ => VarMap::new(),
    };
    let vars = merge_layers(&[&source.terraform.vars, &params.terraform.vars, &file_vars]);
    let env = merge_layers(&[&source.terraform.env, &params.terraform.env]);

    Ok(MergedConfig {
        name: resolve_name_choice(params, base_dir)?,
        action,
        terraform_source,
        vars,
        env,
        delete_on_failure: source.terraform.delete_on_failure
            || params.terraform.delete_on_failure,
    })
}

/// Checks the storage fields every object-store operation depends on.
///
/// # Errors
///
/// Returns [`ConfigError::MissingStorageField`] when the bucket is blank.
pub fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.bucket.trim().is_empty() {
        return Err(ConfigError::MissingStorageField(String::from("bucket")));
    }
    Ok(())
}

fn resolve_name_choice(params: &OutParams, base_dir: &Utf8Path) -> Result<NameChoice, ConfigError> {
    if let Some(name) = params
        .env_name
        .as_deref()
        .map(normalize_env_name)
        .filter(|name| !name.is_empty())
    {
        return Ok(NameChoice::Given(name));
    }

    if let Some(path) = params
        .env_name_file
        .as_deref()
        .filter(|path| !path.trim().is_empty())
    {
        let contents = read_input_file(base_dir, path).map_err(|err| ConfigError::ReadFile {
            path: path.to_owned(),
            message: err.to_string(),
        })?;
        let name = normalize_env_name(&contents);
        if name.is_empty() {
            return Err(ConfigError::EmptyEnvNameFile {
                path: path.to_owned(),
            });
        }
        return Ok(NameChoice::Given(name));
    }

    if params.generate_random_name {
        return Ok(NameChoice::Generate);
    }

    Err(ConfigError::MissingEnvName)
}

fn read_var_file(base_dir: &Utf8Path, path: &str) -> Result<VarMap, ConfigError> {
    let contents = read_input_file(base_dir, path).map_err(|err| ConfigError::ReadFile {
        path: path.to_owned(),
        message: err.to_string(),
    })?;
    if contents.trim().is_empty() {
        return Ok(VarMap::new());
    }
    serde_yaml::from_str(&contents).map_err(|err| ConfigError::VarFile {
        path: path.to_owned(),
        message: err.to_string(),
    })
}

/// Reads `path`, resolving relative paths against `base_dir`.
pub(crate) fn read_input_file(base_dir: &Utf8Path, path: &str) -> io::Result<String> {
    let full = base_dir.join(path.trim());
    let file_name = full
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let parent = full
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(file_name)
}
