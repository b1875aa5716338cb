//! S3 implementation of [`ObjectStore`].

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Builder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use tokio::time::Instant;
use tracing::debug;

use super::{Encryption, ObjectStore, StorageError, StoreFuture, within_deadline};
use crate::request::StorageConfig;

const DEFAULT_REGION: &str = "us-east-1";
const CREDENTIALS_PROVIDER: &str = "terrastate-static";

/// Object store backed by an S3 (or S3-compatible) bucket.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds a client from request storage settings before `deadline`.
    ///
    /// Static credentials are used when both halves are given; otherwise the
    /// ambient AWS credential chain applies. A custom endpoint switches to
    /// path-style addressing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Timeout`] when loading the ambient
    /// configuration outlives the deadline.
    pub async fn connect(
        storage: &StorageConfig,
        deadline: Option<Instant>,
    ) -> Result<Self, StorageError> {
        within_deadline(deadline, "connect", &storage.bucket, async {
            Ok(Self::build(storage).await)
        })
        .await
    }

    async fn build(storage: &StorageConfig) -> Self {
        let region = Region::new(
            storage
                .region_name
                .clone()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| String::from(DEFAULT_REGION)),
        );

        let static_credentials = match (
            non_blank(storage.access_key_id.as_deref()),
            non_blank(storage.secret_access_key.as_deref()),
        ) {
            (Some(key), Some(secret)) => Some(Credentials::new(
                key,
                secret,
                None,
                None,
                CREDENTIALS_PROVIDER,
            )),
            _ => None,
        };

        let mut builder = match static_credentials {
            Some(credentials) => Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(credentials),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region.clone())
                    .load()
                    .await;
                Builder::from(&shared)
            }
        }
        .region(region);

        if let Some(endpoint) = non_blank(storage.endpoint.as_deref()) {
            debug!(%endpoint, "using custom object store endpoint");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: storage.bucket.clone(),
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await;
            let output = match response {
                Ok(output) => output,
                Err(err) if err.as_service_error().is_some_and(GetObjectError::is_no_such_key) => {
                    return Ok(None);
                }
                Err(err) => return Err(transport("get", key, &DisplayErrorContext(err))),
            };
            let data = output
                .body
                .collect()
                .await
                .map_err(|err| transport("get", key, &err))?;
            Ok(Some(data.into_bytes().to_vec()))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
        encryption: &'a Encryption,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body))
                .set_server_side_encryption(
                    encryption
                        .mode
                        .as_deref()
                        .map(ServerSideEncryption::from),
                )
                .set_ssekms_key_id(encryption.kms_key_id.clone())
                .send()
                .await
                .map_err(|err| transport("put", key, &DisplayErrorContext(err)))?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| transport("delete", key, &DisplayErrorContext(err)))?;
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(err) if err.as_service_error().is_some_and(HeadObjectError::is_not_found) => {
                    Ok(false)
                }
                Err(err) => Err(transport("head", key, &DisplayErrorContext(err))),
            }
        })
    }

    fn list<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let mut keys = Vec::new();
            let mut token: Option<String> = None;
            loop {
                let page = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(token.take())
                    .send()
                    .await
                    .map_err(|err| transport("list", prefix, &DisplayErrorContext(err)))?;
                keys.extend(
                    page.contents()
                        .iter()
                        .filter_map(|object| object.key().map(str::to_owned)),
                );
                match page.next_continuation_token() {
                    Some(next) if page.is_truncated().unwrap_or(false) => {
                        token = Some(next.to_owned());
                    }
                    _ => break,
                }
            }
            Ok(keys)
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|candidate| !candidate.is_empty())
}

fn transport(operation: &'static str, key: &str, err: &dyn std::fmt::Display) -> StorageError {
    StorageError::Transport {
        operation,
        key: key.to_owned(),
        message: err.to_string(),
    }
}
