use std::time::Instant;

use bytes::Bytes;
use futures::Stream;
use uuid::Uuid;

use crate::{
    context::AppContext,
    data::{
        classify::{MediaKind, classify},
        s3utils::generate_object_key,
        staging::StagedUpload,
    },
    error::Error,
    model::Video,
    store::VideoStore,
};

pub fn parse_video_id(video_id: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(video_id).map_err(|_| Error::InvalidIdError(video_id.to_string()))
}

/// Loads the video and checks that it belongs to the given user.
///
/// A missing video is reported the same way as a video owned by someone else so that the
/// response does not reveal which videos exist.
pub async fn resolve_owned_video(
    videos: &dyn VideoStore,
    video_id: Uuid,
    user_id: Uuid,
) -> Result<Video, Error> {
    match videos.get_video(video_id).await? {
        Some(video) if video.user_id == user_id => Ok(video),
        Some(_) => {
            log::warn!("User {user_id} tried to upload to video {video_id} owned by another user");
            Err(Error::NotVideoOwnerError)
        }
        None => {
            log::debug!("User {user_id} tried to upload to nonexistent video {video_id}");
            Err(Error::NotVideoOwnerError)
        }
    }
}

/// Sets the video URL and persists the video. An object uploaded before a failed update is not
/// removed again.
pub async fn publish_video_url(
    videos: &dyn VideoStore,
    mut video: Video,
    video_url: String,
) -> Result<Video, Error> {
    video.video_url = Some(video_url);
    videos.update_video(&video).await
}

/// Runs the upload pipeline for a video the user has been verified to own: classify the declared
/// content type, stage the upload, inspect and rewrite it, upload it to the object store and
/// publish the resulting URL.
///
/// Both temporary files are owned by this function and removed on every return path.
pub async fn upload_video<S>(
    context: &AppContext,
    video: Video,
    content_type: &str,
    file: S,
) -> Result<Video, Error>
where
    S: Stream<Item = Result<Bytes, Error>> + Unpin,
{
    let start_time = Instant::now();
    let video_id = video.id;
    let (media_type, extension) = classify(MediaKind::Video, content_type)?;

    let staged = StagedUpload::stage(&context.staging_dir, file).await?;
    if staged.is_empty() {
        return Err(Error::InvalidFileError(String::from("Empty video")));
    }
    log::debug!(
        "Staged {} bytes for video {} at {}",
        staged.len(),
        video_id,
        staged.path().display()
    );

    let aspect_ratio = context.media.inspect(staged.path()).await?;
    let partition = aspect_ratio.partition();
    log::debug!("Video {video_id} has aspect ratio {aspect_ratio}, using partition {partition}");

    let processed = context.media.rewrite_for_streaming(staged.path()).await?;
    log::debug!(
        "Rewrote video {} for fast start to {}",
        video_id,
        processed.path().display()
    );

    let object_key = generate_object_key(partition, extension)?;
    let file = processed.open().await?;
    let bytes_uploaded = context
        .objects
        .put_object(&object_key, file, media_type.essence_str())
        .await?;
    log::debug!("Uploaded {bytes_uploaded} bytes for video {video_id} to {object_key}");

    let video_url = context.objects.object_url(&object_key);
    let video = match publish_video_url(context.videos.as_ref(), video, video_url).await {
        Ok(video) => video,
        Err(e) => {
            log::error!(
                "Failed to publish url of uploaded object {object_key} for video {video_id}, the object is orphaned: {e}"
            );
            return Err(e);
        }
    };

    log::info!(
        "Completed upload of video {} to {} after {:?}",
        video_id,
        &object_key,
        start_time.elapsed()
    );

    Ok(video)
}
