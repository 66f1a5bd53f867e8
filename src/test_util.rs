use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use url::Url;
use uuid::Uuid;

use crate::{
    auth::tests::make_jwt,
    context::{AppContext, Context},
    data::{
        encode::{AspectRatio, MediaProcessor, ProcessedMedia},
        s3utils::{ObjectStore, object_url},
        thumbnail::{MemoryThumbnailStore, ThumbnailStore},
    },
    error::Error,
    model::Video,
    store::VideoStore,
};

pub const JWT_SECRET: &str = "test-secret";
pub const BUCKET: &str = "tubely-test";
pub const REGION: &str = "us-east-2";

pub fn sample_video(user_id: Uuid) -> Video {
    let now = Utc::now();
    Video {
        id: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
        title: String::from("Boots in space"),
        description: String::from("A short clip"),
        thumbnail_url: None,
        video_url: None,
        user_id,
    }
}

#[derive(Default)]
pub struct MemoryVideoStore {
    videos: Mutex<HashMap<Uuid, Video>>,
    pub fail_updates: AtomicBool,
}

impl MemoryVideoStore {
    pub fn insert(&self, video: Video) {
        self.videos.lock().insert(video.id, video);
    }

    pub fn get(&self, id: Uuid) -> Option<Video> {
        self.videos.lock().get(&id).cloned()
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<Video>, Error> {
        Ok(self.get(id))
    }

    async fn update_video(&self, video: &Video) -> Result<Video, Error> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::QueryError(String::from("connection reset")));
        }
        let mut video = video.clone();
        video.updated_at = Utc::now();
        self.videos.lock().insert(video.id, video.clone());
        Ok(video)
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<Vec<(String, StoredObject)>>,
    pub put_attempts: AtomicUsize,
    pub fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn objects(&self) -> Vec<(String, StoredObject)> {
        self.objects.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        mut file: tokio::fs::File,
        content_type: &str,
    ) -> Result<u64, Error> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::S3ResponseError(500));
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;
        let len = data.len() as u64;
        self.objects.lock().push((
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        ));
        Ok(len)
    }

    fn object_url(&self, key: &str) -> String {
        object_url(BUCKET, REGION, None, key)
    }
}

/// [`MediaProcessor`] reporting a configurable aspect ratio. The rewrite copies the input with a
/// `faststart:` prefix next to the input file, the same place ffmpeg writes to.
pub struct FakeMediaProcessor {
    aspect_ratio: Mutex<String>,
    pub fail_inspect: AtomicBool,
    pub fail_rewrite: AtomicBool,
    pub inspect_calls: AtomicUsize,
}

impl Default for FakeMediaProcessor {
    fn default() -> Self {
        Self {
            aspect_ratio: Mutex::new(String::from("16:9")),
            fail_inspect: AtomicBool::new(false),
            fail_rewrite: AtomicBool::new(false),
            inspect_calls: AtomicUsize::new(0),
        }
    }
}

impl FakeMediaProcessor {
    pub fn set_aspect_ratio(&self, ratio: &str) {
        *self.aspect_ratio.lock() = ratio.to_string();
    }
}

#[async_trait]
impl MediaProcessor for FakeMediaProcessor {
    async fn inspect(&self, path: &Path) -> Result<AspectRatio, Error> {
        self.inspect_calls.fetch_add(1, Ordering::SeqCst);
        assert!(path.is_file(), "inspected file must be staged");
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(Error::FfmpegProcessError(String::from(
                "ffprobe failed with status exit status: 1",
            )));
        }
        Ok(AspectRatio::new(self.aspect_ratio.lock().clone()))
    }

    async fn rewrite_for_streaming(&self, path: &Path) -> Result<ProcessedMedia, Error> {
        let processed = ProcessedMedia::for_input(path);
        let mut data = b"faststart:".to_vec();
        data.extend(std::fs::read(path)?);
        // partial output must be removed by the guard as well
        std::fs::write(processed.path(), &data)?;
        if self.fail_rewrite.load(Ordering::SeqCst) {
            return Err(Error::FfmpegProcessError(String::from(
                "ffmpeg failed with status exit status: 1",
            )));
        }
        Ok(processed)
    }
}

pub struct TestEnv {
    pub videos: Arc<MemoryVideoStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub media: Arc<FakeMediaProcessor>,
    pub thumbnails: Arc<MemoryThumbnailStore>,
    pub staging_dir: TempDir,
    pub max_video_upload_bytes: u64,
    pub max_thumbnail_upload_bytes: u64,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            videos: Arc::new(MemoryVideoStore::default()),
            objects: Arc::new(MemoryObjectStore::default()),
            media: Arc::new(FakeMediaProcessor::default()),
            thumbnails: Arc::new(MemoryThumbnailStore::new(api_base_url())),
            staging_dir: tempfile::tempdir().expect("Failed to create staging dir"),
            max_video_upload_bytes: 1 << 20,
            max_thumbnail_upload_bytes: 1024,
        }
    }

    pub fn context(&self) -> Context {
        Arc::new(AppContext {
            videos: self.videos.clone(),
            objects: self.objects.clone(),
            media: self.media.clone(),
            thumbnails: self.thumbnails.clone() as Arc<dyn ThumbnailStore>,
            jwt_secret: String::from(JWT_SECRET),
            staging_dir: self.staging_dir.path().to_path_buf(),
            max_video_upload_bytes: self.max_video_upload_bytes,
            max_thumbnail_upload_bytes: self.max_thumbnail_upload_bytes,
        })
    }

    pub fn insert_video(&self, video: Video) -> Video {
        self.videos.insert(video.clone());
        video
    }

    pub fn assert_staging_dir_empty(&self) {
        let leftovers = std::fs::read_dir(self.staging_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect::<Vec<_>>();
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
    }
}

pub fn api_base_url() -> Url {
    Url::parse("http://localhost:8091/").unwrap()
}

pub fn bearer_token(user_id: Uuid) -> String {
    format!(
        "Bearer {}",
        make_jwt(user_id, JWT_SECRET, Duration::hours(1))
    )
}

pub const BOUNDARY: &str = "----tubelyboundary7MA4YWxk";

/// Builds a `multipart/form-data` body with a single file field.
pub fn multipart_body(field: &str, content_type: Option<&str>, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"upload\"\r\n")
            .as_bytes(),
    );
    if let Some(content_type) = content_type {
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
    }
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}
