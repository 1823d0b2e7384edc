//! HTTP object store speaking the storage JSON API
//!
//! Only the three calls the transfer manager needs are implemented:
//! object metadata, media download (optionally ranged) and media upload.

use super::{default_object_name, write_destination, ObjectStore};
use crate::error::TransferError;
use async_trait::async_trait;
use bferry_types::{
    ByteRange, DownloadOptions, ObjectHandle, ObjectMetadata, Preconditions, UploadOptions,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

/// Object store backed by a JSON-API storage endpoint
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl HttpStore {
    /// Create a store for `bucket` at `endpoint`
    pub fn new(endpoint: &str, bucket: impl Into<String>) -> Result<Self, TransferError> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(TransferError::InvalidUrl(endpoint.to_string()));
        }

        let client = Client::builder()
            .user_agent(concat!("bferry/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            bucket: bucket.into(),
            token: None,
        })
    }

    /// Authenticate every request with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, TransferError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| TransferError::InvalidUrl(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, object: &ObjectHandle) -> Result<Url, TransferError> {
        if object.bucket != self.bucket {
            return Err(TransferError::InvalidConfig(format!(
                "{} is not in bucket {}",
                object, self.bucket
            )));
        }
        let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o", &object.name])?;
        if let Some(generation) = object.generation {
            url.query_pairs_mut()
                .append_pair("generation", &generation.to_string());
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<Response, TransferError> {
        let response = self.authorize(request).send().await?;
        error_for_status(response, context).await
    }

    /// Attach custom metadata to a freshly uploaded generation
    async fn patch_metadata(
        &self,
        meta: &ObjectMetadata,
        metadata: &BTreeMap<String, String>,
    ) -> Result<ObjectMetadata, TransferError> {
        let mut url = self.object_url(&meta.handle())?;
        url.query_pairs_mut()
            .append_pair("ifGenerationMatch", &meta.generation.to_string());
        let body = serde_json::json!({ "metadata": metadata });

        let response = self
            .send(self.client.patch(url).json(&body), &meta.name)
            .await?;
        let resource: ObjectResource = response.json().await?;
        Ok(resource.into())
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        local_path: &Path,
        options: UploadOptions,
    ) -> Result<(ObjectHandle, ObjectMetadata), TransferError> {
        let name = match options.destination {
            Some(ref destination) => destination.clone(),
            None => default_object_name(local_path)?,
        };

        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("uploadType", "media").append_pair("name", &name);
            for (key, value) in precondition_params(options.preconditions.as_ref()) {
                query.append_pair(key, &value.to_string());
            }
        }

        let file = tokio::fs::File::open(local_path).await?;
        let length = file.metadata().await?.len();
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());

        info!("Uploading {:?} ({} bytes) to {}/{}", local_path, length, self.bucket, name);

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        let response = self.send(request, &name).await?;
        let resource: ObjectResource = response.json().await?;
        let mut meta: ObjectMetadata = resource.into();

        if !options.metadata.is_empty() {
            meta = self.patch_metadata(&meta, &options.metadata).await?;
        }

        Ok((meta.handle(), meta))
    }

    async fn download(
        &self,
        object: &ObjectHandle,
        options: DownloadOptions,
    ) -> Result<Vec<u8>, TransferError> {
        let mut url = self.object_url(object)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let mut request = self.client.get(url);
        if let Some(range) = options.range {
            debug!("Requesting {} of {}", range, object);
            request = request.header(reqwest::header::RANGE, range.to_string());
        }

        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            let range = options.range.unwrap_or(ByteRange::new(0, 0));
            let size = response
                .headers()
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.rsplit('/').next())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            return Err(TransferError::InvalidRange {
                start: range.start,
                end: range.end,
                size,
            });
        }
        let response = error_for_status(response, &object.to_string()).await?;
        let status = response.status();
        let body = response.bytes().await?;

        let contents = match options.range {
            // Server ignored the Range header and sent the whole object
            Some(range) if status == StatusCode::OK => {
                warn!("Server ignored range request for {}, slicing locally", object);
                let size = body.len() as u64;
                if range.start >= size {
                    return Err(TransferError::InvalidRange {
                        start: range.start,
                        end: range.end,
                        size,
                    });
                }
                let end = range.end.min(size - 1);
                body[range.start as usize..=end as usize].to_vec()
            }
            _ => body.to_vec(),
        };

        if let Some(destination) = options.destination {
            write_destination(&destination, &contents).await?;
        }

        Ok(contents)
    }

    async fn get_metadata(&self, object: &ObjectHandle) -> Result<ObjectMetadata, TransferError> {
        let url = self.object_url(object)?;
        let response = self
            .send(self.client.get(url), &object.to_string())
            .await?;
        let resource: ObjectResource = response.json().await?;
        Ok(resource.into())
    }
}

fn precondition_params(preconditions: Option<&Preconditions>) -> Vec<(&'static str, i64)> {
    let Some(p) = preconditions.filter(|p| !p.is_empty()) else {
        return Vec::new();
    };
    [
        ("ifGenerationMatch", p.if_generation_match),
        ("ifGenerationNotMatch", p.if_generation_not_match),
        ("ifMetagenerationMatch", p.if_metageneration_match),
        ("ifMetagenerationNotMatch", p.if_metageneration_not_match),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|v| (key, v)))
    .collect()
}

async fn error_for_status(response: Response, context: &str) -> Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => TransferError::NotFound(context.to_string()),
        StatusCode::PRECONDITION_FAILED => {
            TransferError::PreconditionFailed(format!("{}: {}", context, message))
        }
        _ => TransferError::ServerError {
            status: status.as_u16(),
            message,
        },
    })
}

/// Object resource as returned by the JSON API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    bucket: String,
    name: String,
    #[serde(deserialize_with = "string_or")]
    size: u64,
    #[serde(deserialize_with = "string_or")]
    generation: i64,
    #[serde(default = "default_metageneration", deserialize_with = "string_or")]
    metageneration: i64,
    content_type: Option<String>,
    md5_hash: Option<String>,
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

fn default_metageneration() -> i64 {
    1
}

impl From<ObjectResource> for ObjectMetadata {
    fn from(resource: ObjectResource) -> Self {
        ObjectMetadata {
            bucket: resource.bucket,
            name: resource.name,
            size: resource.size,
            generation: resource.generation,
            metageneration: resource.metageneration,
            content_type: resource.content_type,
            md5_hash: resource.md5_hash,
            updated: resource.updated,
            metadata: resource.metadata,
        }
    }
}

/// The JSON API encodes 64-bit integers as strings
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOr<T> {
    Value(T),
    Text(String),
}

fn string_or<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    match StringOr::<T>::deserialize(deserializer)? {
        StringOr::Value(value) => Ok(value),
        StringOr::Text(text) => text.parse().map_err(de::Error::custom),
    }
}
