use crate::config::S3Config;
use crate::error::{CatalogError, CatalogResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// An object enumerated under a prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub key: String,
    pub size: u64,
}

/// One page of a prefix listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<StorageObject>,
    /// Token for the next page, `None` on the last page
    pub next_continuation: Option<String>,
}

/// Errors when a single object is required for a suffix
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ObjectMatchError {
    #[error("No object ending with {suffix}")]
    NoMatch { suffix: String },

    #[error("{} objects end with {suffix}", keys.len())]
    Ambiguous { suffix: String, keys: Vec<String> },
}

/// Paged listing of an object store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> CatalogResult<ObjectPage>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> CatalogResult<ObjectPage> {
        let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::StoreAccess(format!("list_objects_v2 failed: {e}")))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| StorageObject {
                    key: key.to_string(),
                    size: obj.size().unwrap_or_default().max(0) as u64,
                })
            })
            .collect();

        let next_continuation = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            next_continuation,
        })
    }
}

/// Finds scenario objects in one bucket
#[derive(Clone)]
pub struct ObjectLocator {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectLocator {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// List every object under `prefix`, following continuation tokens
    /// until the store reports the last page.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn list_objects(&self, prefix: &str) -> CatalogResult<Vec<StorageObject>> {
        let mut objects = Vec::new();
        let mut continuation = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .store
                .list_page(&self.bucket, prefix, continuation.take())
                .await?;
            pages += 1;
            objects.extend(page.objects);

            match page.next_continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        debug!(pages, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    /// Key of the one object under `prefix` ending with `suffix`
    pub async fn find_key(&self, prefix: &str, suffix: &str) -> CatalogResult<String> {
        let objects = self.list_objects(prefix).await?;
        let key = find_single_key(&objects, suffix)?;
        Ok(key.to_string())
    }
}

/// Select the only object whose key ends with `suffix`.
///
/// Several matches are an error instead of being joined into one key.
pub fn find_single_key<'a>(
    objects: &'a [StorageObject],
    suffix: &str,
) -> Result<&'a str, ObjectMatchError> {
    let mut matches: Vec<&str> = objects
        .iter()
        .map(|obj| obj.key.as_str())
        .filter(|key| key.ends_with(suffix))
        .collect();

    match matches.len() {
        0 => Err(ObjectMatchError::NoMatch {
            suffix: suffix.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        _ => {
            matches.sort_unstable();
            Err(ObjectMatchError::Ambiguous {
                suffix: suffix.to_string(),
                keys: matches.into_iter().map(String::from).collect(),
            })
        }
    }
}

/// Archive objects in enumeration order; a repeated key keeps its first entry
pub fn find_archives<'a>(objects: &'a [StorageObject], archive_suffix: &str) -> Vec<&'a StorageObject> {
    let mut seen = HashSet::new();
    objects
        .iter()
        .filter(|obj| obj.key.ends_with(archive_suffix))
        .filter(|obj| seen.insert(obj.key.as_str()))
        .collect()
}

/// Last path segment of a key
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
