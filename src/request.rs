//! JSON models for the invocation boundary.
//!
//! A request carries the pipeline-level [`Source`] configuration and the
//! per-step [`OutParams`]. Field names follow the wire format consumed from
//! standard input; everything optional defaults to empty so that partially
//! specified requests deserialise and are rejected later with a precise
//! [`ConfigError`](crate::merge::ConfigError).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mapping of tool variable name to value.
pub type VarMap = BTreeMap<String, serde_json::Value>;

/// Mapping of environment variable name to value.
pub type EnvMap = BTreeMap<String, String>;

/// Request accepted by the `out` command.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct OutRequest {
    /// Pipeline-level configuration.
    #[serde(default)]
    pub source: Source,
    /// Step-level parameters.
    #[serde(default)]
    pub params: OutParams,
}

/// Request accepted by the `list` command.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ListRequest {
    /// Pipeline-level configuration.
    #[serde(default)]
    pub source: Source,
}

/// Pipeline-level configuration shared by every invocation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Source {
    /// Object store connection settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Default provisioning configuration.
    #[serde(default)]
    pub terraform: TerraformConfig,
}

/// Object store connection settings.
#[derive(Clone, Default, Deserialize, Eq, PartialEq)]
pub struct StorageConfig {
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bucket holding the state files.
    #[serde(default)]
    pub bucket: String,
    /// Key prefix under which state files are stored.
    #[serde(default)]
    pub bucket_path: String,
    /// Static access key identifier.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Static secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Region used to sign requests.
    #[serde(default)]
    pub region_name: Option<String>,
    /// Server-side encryption mode (for example `AES256` or `aws:kms`).
    #[serde(default)]
    pub server_side_encryption: Option<String>,
    /// KMS key used when encrypting with `aws:kms`.
    #[serde(default)]
    pub sse_kms_key_id: Option<String>,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("bucket_path", &self.bucket_path)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region_name", &self.region_name)
            .field("server_side_encryption", &self.server_side_encryption)
            .field("sse_kms_key_id", &self.sse_kms_key_id)
            .finish()
    }
}

/// Provisioning configuration, present at both the source and params layer.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TerraformConfig {
    /// Local directory or module address of the configuration to apply.
    #[serde(default)]
    pub source: Option<String>,
    /// Input variables.
    #[serde(default)]
    pub vars: VarMap,
    /// YAML file whose mapping overrides `vars`.
    #[serde(default)]
    pub var_file: Option<String>,
    /// Environment variables passed to the tool.
    #[serde(default)]
    pub env: EnvMap,
    /// Destroy partially created infrastructure when apply fails.
    #[serde(default)]
    pub delete_on_failure: bool,
}

/// Step-level parameters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct OutParams {
    /// Literal environment name.
    #[serde(default)]
    pub env_name: Option<String>,
    /// File whose trimmed contents supply the environment name.
    #[serde(default)]
    pub env_name_file: Option<String>,
    /// Generate a random, unused environment name.
    #[serde(default)]
    pub generate_random_name: bool,
    /// Whether to apply or destroy.
    #[serde(default)]
    pub action: Option<String>,
    /// Provisioning overrides.
    #[serde(default)]
    pub terraform: TerraformConfig,
}

/// Operation selected by the request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Action {
    /// Create or update the environment.
    #[default]
    Apply,
    /// Tear the environment down.
    Destroy,
}

impl Action {
    /// Parses the wire representation; `None` selects [`Action::Apply`].
    #[must_use]
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("" | "apply") => Some(Self::Apply),
            Some("destroy") => Some(Self::Destroy),
            Some(_) => None,
        }
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response written to standard output.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OutResponse {
    /// Identity of the environment acted upon.
    pub version: Version,
    /// Rendered outputs, in declared order, ending with `env_name`.
    pub metadata: Vec<MetadataEntry>,
}

/// Environment identity reported back to the pipeline.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Version {
    /// Resolved environment name.
    pub env_name: String,
}

/// One rendered output.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MetadataEntry {
    /// Output name.
    pub name: String,
    /// Rendered value.
    pub value: String,
}

impl MetadataEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
