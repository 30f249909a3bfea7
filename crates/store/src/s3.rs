//! S3-compatible backend.
//!
//! Requests are presigned with `rusty-s3` and sent through `reqwest`. Every
//! [`S3Connector::connect`] builds a new HTTP client, so a retry never reuses
//! a connection pool that has already failed.

use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rusty_s3::actions::CreateMultipartUpload;
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use tablevault_transfer::normalize_etag;

use crate::types::{
    CompletedPart, FileStat, MultipartSession, ObjectBody, ObjectMetadata, PutReceipt,
    RemoteObject, STAT_METADATA_KEY,
};
use crate::{ObjectStore, StoreConnector, StoreError, StoreFuture};

/// Validity of presigned request URLs.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// TCP connect timeout of the HTTP client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const SSE_HEADER: &str = "x-amz-server-side-encryption";

/// Connection settings for an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Service endpoint. Defaults to the AWS endpoint of `region`.
    pub endpoint: Option<String>,
    /// Use path-style (`endpoint/bucket/key`) instead of virtual-host addressing.
    pub path_style: bool,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Request server-side encryption (AES256) for every object.
    pub sse: bool,
}

impl S3Config {
    fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }
}

/// Produces fresh [`S3Store`] connections.
#[derive(Clone)]
pub struct S3Connector {
    bucket: Bucket,
    credentials: Credentials,
    sse: bool,
}

impl S3Connector {
    pub fn new(config: &S3Config) -> Result<Self, StoreError> {
        let endpoint = config.endpoint_url();
        let base_url: url::Url = endpoint.parse().map_err(|e| {
            StoreError::Config(format!("invalid S3 endpoint URL '{endpoint}': {e}"))
        })?;

        let url_style = if config.path_style {
            UrlStyle::Path
        } else {
            UrlStyle::VirtualHost
        };

        let bucket = Bucket::new(
            base_url,
            url_style,
            config.bucket.clone(),
            config.region.clone(),
        )
        .map_err(|e| StoreError::Config(format!("failed to create S3 bucket handle: {e}")))?;

        Ok(Self {
            bucket,
            credentials: Credentials::new(&config.access_key_id, &config.secret_access_key),
            sse: config.sse,
        })
    }
}

impl StoreConnector for S3Connector {
    fn connect(&self) -> Result<Box<dyn ObjectStore>, StoreError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        debug!(bucket = %self.bucket.name(), "opened S3 connection");
        Ok(Box::new(S3Store {
            client,
            bucket: self.bucket.clone(),
            credentials: self.credentials.clone(),
            sse: self.sse,
        }))
    }
}

/// One connection to an S3-compatible service.
pub struct S3Store {
    client: Client,
    bucket: Bucket,
    credentials: Credentials,
    sse: bool,
}

impl S3Store {
    /// Headers to sign into and send with a write request.
    fn write_headers(&self, metadata: &ObjectMetadata) -> Result<Vec<(String, String)>, StoreError> {
        let mut headers = Vec::new();
        if let Some(stat) = &metadata.stat {
            headers.push((format!("x-amz-meta-{STAT_METADATA_KEY}"), stat.to_json()?));
        }
        if self.sse {
            headers.push((SSE_HEADER.to_string(), "AES256".to_string()));
        }
        Ok(headers)
    }
}

/// Signs `headers` into `action` and returns the presigned URL.
fn sign_with_headers<'a, A: S3Action<'a>>(mut action: A, headers: &[(String, String)]) -> url::Url {
    for (name, value) in headers {
        action.headers_mut().insert(name.clone(), value.clone());
    }
    action.sign(PRESIGN_DURATION)
}

fn apply_headers(mut request: RequestBuilder, headers: &[(String, String)]) -> RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

/// Maps a non-success response to [`StoreError::Status`].
async fn check_status(
    response: Response,
    operation: &'static str,
    key: &str,
) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!(operation, key, status = status.as_u16(), body = %body, "S3 request failed");
    Err(StoreError::Status {
        operation,
        key: key.to_string(),
        status: status.as_u16(),
    })
}

fn header_etag(headers: &HeaderMap, operation: &str, key: &str) -> Result<String, StoreError> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(normalize_etag)
        .ok_or_else(|| StoreError::InvalidResponse(format!("{operation} {key}: missing ETag")))
}

/// Extracts the text of the first `<tag>` element of an XML body.
fn xml_element<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(&body[start..end])
}

impl ObjectStore for S3Store {
    fn head_object<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<RemoteObject>> {
        Box::pin(async move {
            let url = self
                .bucket
                .head_object(Some(&self.credentials), key)
                .sign(PRESIGN_DURATION);
            let response = self.client.head(url).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = check_status(response, "HEAD", key).await?;
            let headers = response.headers();

            let size = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| {
                    StoreError::InvalidResponse(format!("HEAD {key}: missing Content-Length"))
                })?;
            let etag = header_etag(headers, "HEAD", key)?;

            let meta_header = format!("x-amz-meta-{STAT_METADATA_KEY}");
            let stat = match headers.get(meta_header.as_str()).and_then(|v| v.to_str().ok()) {
                Some(raw) => match FileStat::from_json(raw) {
                    Ok(stat) => Some(stat),
                    Err(e) => {
                        warn!(key, error = %e, "ignoring unreadable stat metadata");
                        None
                    }
                },
                None => None,
            };

            Ok(Some(RemoteObject {
                key: key.to_string(),
                size,
                etag,
                stat,
            }))
        })
    }

    fn put_object<'a>(
        &'a self,
        key: &'a str,
        body: ObjectBody,
        metadata: &'a ObjectMetadata,
    ) -> StoreFuture<'a, PutReceipt> {
        Box::pin(async move {
            let headers = self.write_headers(metadata)?;
            let url = sign_with_headers(
                self.bucket.put_object(Some(&self.credentials), key),
                &headers,
            );

            let len = body.len();
            let payload = match body {
                ObjectBody::Bytes(data) => reqwest::Body::from(data),
                ObjectBody::File { path, .. } => {
                    let file = tokio::fs::File::open(&path).await?;
                    reqwest::Body::wrap_stream(ReaderStream::new(file))
                }
            };

            let mut request = apply_headers(self.client.put(url), &headers)
                .header(CONTENT_LENGTH, len)
                .body(payload);
            if let Some(content_type) = &metadata.content_type {
                request = request.header(CONTENT_TYPE, content_type.as_str());
            }

            let response = check_status(request.send().await?, "PUT", key).await?;
            let etag = header_etag(response.headers(), "PUT", key)?;
            Ok(PutReceipt { etag })
        })
    }

    fn initiate_multipart<'a>(
        &'a self,
        key: &'a str,
        metadata: &'a ObjectMetadata,
    ) -> StoreFuture<'a, MultipartSession> {
        Box::pin(async move {
            let headers = self.write_headers(metadata)?;
            let url = sign_with_headers(
                self.bucket
                    .create_multipart_upload(Some(&self.credentials), key),
                &headers,
            );

            let response = apply_headers(self.client.post(url), &headers)
                .send()
                .await?;
            let body = check_status(response, "CreateMultipartUpload", key)
                .await?
                .text()
                .await?;
            let parsed = CreateMultipartUpload::parse_response(&body).map_err(|e| {
                StoreError::InvalidResponse(format!("CreateMultipartUpload {key}: {e}"))
            })?;

            Ok(MultipartSession {
                key: key.to_string(),
                upload_id: parsed.upload_id().to_string(),
            })
        })
    }

    fn upload_part<'a>(
        &'a self,
        session: &'a MultipartSession,
        part_number: u16,
        data: Vec<u8>,
    ) -> StoreFuture<'a, CompletedPart> {
        Box::pin(async move {
            let url = self
                .bucket
                .upload_part(
                    Some(&self.credentials),
                    &session.key,
                    part_number,
                    &session.upload_id,
                )
                .sign(PRESIGN_DURATION);

            let len = data.len();
            let response = self
                .client
                .put(url)
                .header(CONTENT_LENGTH, len)
                .body(data)
                .send()
                .await?;
            let response = check_status(response, "UploadPart", &session.key).await?;
            let etag = header_etag(response.headers(), "UploadPart", &session.key)?;
            Ok(CompletedPart { part_number, etag })
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        session: &'a MultipartSession,
        parts: &'a [CompletedPart],
    ) -> StoreFuture<'a, PutReceipt> {
        Box::pin(async move {
            let action = self.bucket.complete_multipart_upload(
                Some(&self.credentials),
                &session.key,
                &session.upload_id,
                parts.iter().map(|p| p.etag.as_str()),
            );
            let url = action.sign(PRESIGN_DURATION);
            let request_body = action.body();

            let response = self.client.post(url).body(request_body).send().await?;
            let body = check_status(response, "CompleteMultipartUpload", &session.key)
                .await?
                .text()
                .await?;

            // The service may report a failure inside a 200 response.
            if let Some(code) = xml_element(&body, "Code") {
                return Err(StoreError::InvalidResponse(format!(
                    "CompleteMultipartUpload {}: {code}",
                    session.key
                )));
            }
            let etag = xml_element(&body, "ETag")
                .map(normalize_etag)
                .ok_or_else(|| {
                    StoreError::InvalidResponse(format!(
                        "CompleteMultipartUpload {}: missing ETag",
                        session.key
                    ))
                })?;
            Ok(PutReceipt { etag })
        })
    }

    fn cancel_multipart<'a>(&'a self, session: &'a MultipartSession) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let url = self
                .bucket
                .abort_multipart_upload(Some(&self.credentials), &session.key, &session.upload_id)
                .sign(PRESIGN_DURATION);
            let response = self.client.delete(url).send().await?;
            check_status(response, "AbortMultipartUpload", &session.key).await?;
            Ok(())
        })
    }
}
