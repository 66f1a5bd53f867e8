use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use mime::Mime;
use parking_lot::RwLock;
use url::Url;
use uuid::Uuid;

use crate::{
    context::AppContext,
    data::classify::{MediaKind, classify},
    error::Error,
    model::{Thumbnail, Video},
    util::{join_url, random_name},
};

/// Stores the uploaded image through the configured [`ThumbnailStore`] and persists its URL on the
/// video. Thumbnails are small enough to be buffered, the size is bounded by the request limit.
pub async fn upload_thumbnail<S>(
    context: &AppContext,
    mut video: Video,
    content_type: &str,
    mut file: S,
) -> Result<Video, Error>
where
    S: Stream<Item = Result<Bytes, Error>> + Unpin,
{
    let (media_type, extension) = classify(MediaKind::Image, content_type)?;

    let mut data = BytesMut::new();
    while let Some(chunk) = file.try_next().await? {
        data.extend_from_slice(&chunk);
    }
    if data.is_empty() {
        return Err(Error::InvalidFileError(String::from("Empty thumbnail")));
    }

    let thumbnail_url = context
        .thumbnails
        .store(video.id, extension, media_type, data.freeze())
        .await?;
    video.thumbnail_url = Some(thumbnail_url);
    context.videos.update_video(&video).await
}

/// Storage for thumbnail images, returns the URL the stored thumbnail can be retrieved from.
#[async_trait]
pub trait ThumbnailStore: Send + Sync {
    async fn store(
        &self,
        video_id: Uuid,
        extension: &str,
        media_type: Mime,
        data: Bytes,
    ) -> Result<String, Error>;

    /// Loads a thumbnail served by the application itself, `None` for stores whose thumbnails are
    /// served as static files.
    async fn load(&self, video_id: Uuid) -> Result<Option<Thumbnail>, Error>;
}

/// Writes thumbnails to the assets directory which is served under `/assets/`.
pub struct DiskThumbnailStore {
    assets_root: PathBuf,
    api_base_url: Url,
}

impl DiskThumbnailStore {
    pub fn new(assets_root: PathBuf, api_base_url: Url) -> Result<Self, Error> {
        std::fs::create_dir_all(&assets_root).map_err(|e| {
            Error::IoError(format!(
                "Failed to create assets directory {}: {e}",
                assets_root.display()
            ))
        })?;
        Ok(Self {
            assets_root,
            api_base_url,
        })
    }
}

#[async_trait]
impl ThumbnailStore for DiskThumbnailStore {
    async fn store(
        &self,
        video_id: Uuid,
        extension: &str,
        _media_type: Mime,
        data: Bytes,
    ) -> Result<String, Error> {
        let file_name = format!("{}.{}", random_name()?, extension);
        let path = self.assets_root.join(&file_name);
        tokio::fs::write(&path, &data).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to write thumbnail {}: {e}",
                path.display()
            ))
        })?;
        log::info!(
            "Stored thumbnail {} for video {} ({} bytes)",
            &file_name,
            video_id,
            data.len()
        );

        let mut url = self.api_base_url.clone();
        join_url(&mut url, ["assets", &file_name])?;
        Ok(url.to_string())
    }

    async fn load(&self, _video_id: Uuid) -> Result<Option<Thumbnail>, Error> {
        Ok(None)
    }
}

/// Keeps thumbnails in memory for the lifetime of the process, served by `/api/thumbnails/{id}`.
pub struct MemoryThumbnailStore {
    thumbnails: RwLock<HashMap<Uuid, Thumbnail>>,
    api_base_url: Url,
}

impl MemoryThumbnailStore {
    pub fn new(api_base_url: Url) -> Self {
        Self {
            thumbnails: RwLock::new(HashMap::new()),
            api_base_url,
        }
    }
}

#[async_trait]
impl ThumbnailStore for MemoryThumbnailStore {
    async fn store(
        &self,
        video_id: Uuid,
        _extension: &str,
        media_type: Mime,
        data: Bytes,
    ) -> Result<String, Error> {
        self.thumbnails
            .write()
            .insert(video_id, Thumbnail { data, media_type });

        let mut url = self.api_base_url.clone();
        join_url(&mut url, ["api", "thumbnails", &video_id.to_string()])?;
        Ok(url.to_string())
    }

    async fn load(&self, video_id: Uuid) -> Result<Option<Thumbnail>, Error> {
        Ok(self.thumbnails.read().get(&video_id).cloned())
    }
}
