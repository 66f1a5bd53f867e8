use std::{io, pin::Pin, task::Poll};

use async_trait::async_trait;
use futures::ready;
use pin_project::pin_project;
use s3::{Bucket, Region, creds::Credentials, error::S3Error};

use crate::{config::S3Config, data::encode::OrientationPartition, error::Error, util};

/// Generates the key for a new object: `<partition>/<random name>.<extension>`.
pub fn generate_object_key(
    partition: OrientationPartition,
    extension: &str,
) -> Result<String, Error> {
    Ok(format!(
        "{}/{}.{}",
        partition.as_str(),
        util::random_name()?,
        extension
    ))
}

/// Durable object storage the processed uploads are written to.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams the file to the given key. There is exactly one write attempt, returns the number of
    /// bytes written.
    async fn put_object(
        &self,
        key: &str,
        file: tokio::fs::File,
        content_type: &str,
    ) -> Result<u64, Error>;

    /// Public retrieval URL of the object with the given key.
    fn object_url(&self, key: &str) -> String;
}

pub struct S3ObjectStore {
    bucket: Bucket,
    bucket_name: String,
    region: String,
    endpoint: Option<String>,
}

impl S3ObjectStore {
    pub fn new(config: &S3Config) -> Result<Self, Error> {
        let bucket = create_bucket(config)?;
        Ok(Self {
            bucket,
            bucket_name: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        file: tokio::fs::File,
        content_type: &str,
    ) -> Result<u64, Error> {
        let mut reader = ByteCountingTokioFileReader::new(file);
        log::info!("Starting S3 upload for {key}");
        let status = match self
            .bucket
            .put_object_stream_with_content_type(&mut reader, key, content_type)
            .await
        {
            Ok(status) => Ok(status),
            Err(S3Error::Io(e)) => Err(Error::IoError(format!(
                "Failed reading processed file for upload of {key}: {e}"
            ))),
            Err(e) => Err(Error::S3Error(format!("Failed to upload '{key}': {e}"))),
        }?;
        if status >= 300 {
            return Err(Error::S3ResponseError(status));
        }
        log::info!(
            "Finished S3 upload for {key} ({} bytes)",
            reader.byte_count
        );

        Ok(reader.byte_count as u64)
    }

    fn object_url(&self, key: &str) -> String {
        object_url(&self.bucket_name, &self.region, self.endpoint.as_deref(), key)
    }
}

/// Composes the public URL of an object, virtual host style for AWS and path style for custom
/// endpoints.
pub fn object_url(bucket: &str, region: &str, endpoint: Option<&str>, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}

pub fn create_bucket(config: &S3Config) -> Result<Bucket, Error> {
    let region = match config.endpoint {
        Some(ref endpoint) => Ok(Region::Custom {
            region: config.region.clone(),
            endpoint: endpoint.clone(),
        }),
        None => config
            .region
            .parse::<Region>()
            .map_err(|e| Error::S3Error(format!("Invalid region '{}': {e}", &config.region))),
    }?;

    let credentials = Credentials {
        access_key: Some(config.access_key.clone()),
        secret_key: Some(config.secret_key.clone()),
        security_token: None,
        session_token: None,
        expiration: None,
    };

    Bucket::new(&config.bucket, region, credentials)
        .map_err(|e| Error::S3Error(format!("Invalid bucket '{}': {e}", &config.bucket)))
        .map(|b| {
            if config.endpoint.is_some() {
                b.with_path_style()
            } else {
                b
            }
        })
}

#[pin_project]
pub struct ByteCountingTokioFileReader {
    #[pin]
    file: tokio::fs::File,
    byte_count: usize,
}

impl ByteCountingTokioFileReader {
    pub fn new(file: tokio::fs::File) -> Self {
        ByteCountingTokioFileReader {
            file,
            byte_count: 0,
        }
    }
}

impl tokio::io::AsyncRead for ByteCountingTokioFileReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let curr_len = buf.filled().len();
        ready!(tokio::io::AsyncRead::poll_read(this.file, cx, buf))?;
        *this.byte_count += buf.filled().len() - curr_len;
        Poll::Ready(Ok(()))
    }
}
