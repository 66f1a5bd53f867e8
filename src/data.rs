use std::{
    io,
    pin::Pin,
    task::{self, Poll},
};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use mime::Mime;
use mpart_async::server::MultipartStream;
use pin_project::pin_project;
use uuid::Uuid;
use warp::{Buf, Rejection, Reply};

use crate::{context::Context, error::Error};

use self::limit::BodyLimit;

pub mod classify;
pub mod encode;
pub mod limit;
pub mod s3utils;
pub mod staging;
pub mod thumbnail;
pub mod up;

const VIDEO_FIELD: &str = "video";
const THUMBNAIL_FIELD: &str = "thumbnail";

fn multipart_boundary(mime: &Mime) -> Result<String, Error> {
    if mime.type_() != mime::MULTIPART {
        return Err(Error::InvalidFileError(format!(
            "Expected multipart/form-data request, got '{mime}'"
        )));
    }
    mime.get_param("boundary")
        .map(|v| v.to_string())
        .ok_or_else(|| Error::InvalidFileError(String::from("No mime boundary")))
}

/// File field of a multipart body. Owns the multipart stream the field is read from.
#[pin_project]
struct FileField<F, M> {
    #[pin]
    field: F,
    _multipart: M,
}

impl<F: Stream, M> Stream for FileField<F, M> {
    type Item = F::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().field.poll_next(cx)
    }
}

/// Reads the multipart body up to the field with the given name and returns the declared content
/// type of the field along with its contents. Read errors of the field are mapped through the
/// body limit.
async fn find_file_field(
    mime: &Mime,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
    limit: &BodyLimit,
    name: &'static str,
) -> Result<(String, impl Stream<Item = Result<Bytes, Error>> + Unpin), Error> {
    let boundary = multipart_boundary(mime)?;
    let mut stream = MultipartStream::new(
        boundary,
        limit.wrap(
            body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining()))
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        ),
    );

    let field = loop {
        match stream.try_next().await {
            Ok(Some(field)) => {
                if field.name().map_err(|e| limit.read_error(e))? == name {
                    break field;
                }
            }
            Ok(None) => {
                return Err(Error::InvalidFileError(format!(
                    "No file specified, no multipart form field found for name '{name}'"
                )));
            }
            Err(e) => return Err(limit.read_error(e)),
        }
    };

    let content_type = field
        .content_type()
        .map(|c| c.to_string())
        .unwrap_or_default();
    let read_limit = limit.clone();
    let file = FileField {
        field: field.map_err(move |e| read_limit.read_error(e)),
        _multipart: stream,
    };

    Ok((content_type, file))
}

/// Handler for `POST /api/video_upload/{videoID}`, receives the video as multipart form field
/// `video` and returns the updated video.
pub async fn upload_video_handler(
    video_id: String,
    user_id: Uuid,
    mime: Mime,
    content_length: Option<u64>,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
    context: Context,
) -> Result<impl Reply, Rejection> {
    let video_id = up::parse_video_id(&video_id)?;
    let limit = BodyLimit::new(context.max_video_upload_bytes);
    limit::check_content_length(content_length, limit.limit())?;

    let video = up::resolve_owned_video(context.videos.as_ref(), video_id, user_id).await?;
    log::info!("Uploading video {video_id} by user {user_id}");

    let (content_type, file) = find_file_field(&mime, body, &limit, VIDEO_FIELD).await?;
    let video = up::upload_video(&context, video, &content_type, file).await?;
    log::info!("Video {video_id} uploaded by user {user_id}");
    Ok(warp::reply::json(&video))
}

/// Handler for `POST /api/thumbnail_upload/{videoID}`, receives the image as multipart form field
/// `thumbnail` and returns the updated video.
pub async fn upload_thumbnail_handler(
    video_id: String,
    user_id: Uuid,
    mime: Mime,
    content_length: Option<u64>,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
    context: Context,
) -> Result<impl Reply, Rejection> {
    let video_id = up::parse_video_id(&video_id)?;
    let limit = BodyLimit::new(context.max_thumbnail_upload_bytes);
    limit::check_content_length(content_length, limit.limit())?;

    let video = up::resolve_owned_video(context.videos.as_ref(), video_id, user_id).await?;
    log::info!("Uploading thumbnail for video {video_id} by user {user_id}");

    let (content_type, file) = find_file_field(&mime, body, &limit, THUMBNAIL_FIELD).await?;
    let video = thumbnail::upload_thumbnail(&context, video, &content_type, file).await?;
    Ok(warp::reply::json(&video))
}

/// Handler for `GET /api/thumbnails/{videoID}` serving thumbnails held in memory.
pub async fn get_thumbnail_handler(
    video_id: String,
    context: Context,
) -> Result<impl Reply, Rejection> {
    let video_id = up::parse_video_id(&video_id)?;
    let thumbnail = context
        .thumbnails
        .load(video_id)
        .await?
        .ok_or(Error::ThumbnailNotFoundError(video_id))?;

    Ok(warp::reply::with_header(
        thumbnail.data.to_vec(),
        "content-type",
        thumbnail.media_type.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bytes::Bytes;
    use futures::stream;
    use mime::Mime;
    use uuid::Uuid;
    use warp::{Rejection, Reply, http::StatusCode};

    use super::{multipart_boundary, upload_thumbnail_handler, upload_video_handler};
    use crate::{
        data::thumbnail::ThumbnailStore,
        error::Error,
        model::Video,
        test_util::{TestEnv, multipart_body, multipart_content_type, sample_video},
    };

    /// Body without a declared length, delivered in small chunks like a chunked transfer.
    fn chunked_body(
        data: Vec<u8>,
        chunk_size: usize,
    ) -> impl futures::Stream<Item = Result<Bytes, warp::Error>> + Unpin {
        let chunks = data
            .chunks(chunk_size)
            .map(|chunk| Ok::<_, warp::Error>(Bytes::copy_from_slice(chunk)))
            .collect::<Vec<_>>();
        stream::iter(chunks)
    }

    fn content_type() -> Mime {
        multipart_content_type().parse::<Mime>().unwrap()
    }

    fn expect_error(result: Result<impl Reply, Rejection>) -> StatusCode {
        let Err(rejection) = result else {
            panic!("expected the upload to be rejected");
        };
        rejection
            .find::<Error>()
            .expect("rejection should carry an application error")
            .status_and_message()
            .0
    }

    #[test]
    fn test_multipart_boundary() {
        let mime = "multipart/form-data; boundary=----tubely"
            .parse::<mime::Mime>()
            .unwrap();
        assert_eq!(multipart_boundary(&mime).unwrap(), "----tubely");

        let mime = "multipart/form-data".parse::<mime::Mime>().unwrap();
        assert!(matches!(
            multipart_boundary(&mime),
            Err(Error::InvalidFileError(_))
        ));

        assert!(matches!(
            multipart_boundary(&mime::APPLICATION_JSON),
            Err(Error::InvalidFileError(_))
        ));
    }

    #[tokio::test]
    async fn test_video_exceeding_limit_mid_stream() {
        let mut env = TestEnv::new();
        env.max_video_upload_bytes = 1000;
        let owner = Uuid::new_v4();
        let video = env.insert_video(sample_video(owner));
        let body = multipart_body("video", Some("video/mp4"), &[7u8; 5000]);

        for chunk_size in [64, 1024] {
            let result = upload_video_handler(
                video.id.to_string(),
                owner,
                content_type(),
                None,
                chunked_body(body.clone(), chunk_size),
                env.context(),
            )
            .await;

            assert_eq!(expect_error(result), StatusCode::PAYLOAD_TOO_LARGE);
            assert_eq!(env.media.inspect_calls.load(Ordering::SeqCst), 0);
            assert!(env.objects.objects().is_empty());
            assert_eq!(env.videos.get(video.id).unwrap().video_url, None);
            env.assert_staging_dir_empty();
        }
    }

    #[tokio::test]
    async fn test_video_within_limit_without_content_length() {
        let env = TestEnv::new();
        let owner = Uuid::new_v4();
        let video = env.insert_video(sample_video(owner));
        let body = multipart_body("video", Some("video/mp4"), &[7u8; 5000]);

        let reply = match upload_video_handler(
            video.id.to_string(),
            owner,
            content_type(),
            None,
            chunked_body(body, 64),
            env.context(),
        )
        .await
        {
            Ok(reply) => reply.into_response(),
            Err(rejection) => panic!("upload failed: {rejection:?}"),
        };

        assert_eq!(reply.status(), StatusCode::OK);
        assert_eq!(env.objects.objects().len(), 1);
        assert!(env.videos.get(video.id).unwrap().video_url.is_some());
        env.assert_staging_dir_empty();
    }

    #[tokio::test]
    async fn test_thumbnail_exceeding_limit_mid_stream() {
        let mut env = TestEnv::new();
        env.max_thumbnail_upload_bytes = 512;
        let owner = Uuid::new_v4();
        let video = env.insert_video(sample_video(owner));
        let body = multipart_body("thumbnail", Some("image/png"), &[1u8; 2048]);

        let result = upload_thumbnail_handler(
            video.id.to_string(),
            owner,
            content_type(),
            None,
            chunked_body(body, 64),
            env.context(),
        )
        .await;

        assert_eq!(expect_error(result), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(env.thumbnails.load(video.id).await.unwrap().is_none());
        assert_eq!(env.videos.get(video.id).unwrap().thumbnail_url, None);
    }

    #[tokio::test]
    async fn test_thumbnail_declared_too_large() {
        let mut env = TestEnv::new();
        env.max_thumbnail_upload_bytes = 512;
        let owner = Uuid::new_v4();
        let video = env.insert_video(sample_video(owner));

        let result = upload_thumbnail_handler(
            video.id.to_string(),
            owner,
            content_type(),
            Some(513),
            chunked_body(Vec::new(), 64),
            env.context(),
        )
        .await;

        assert_eq!(expect_error(result), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(env.videos.get(video.id).unwrap(), video);
    }

    #[tokio::test]
    async fn test_thumbnail_within_limit() {
        let env = TestEnv::new();
        let owner = Uuid::new_v4();
        let video = env.insert_video(sample_video(owner));
        let body = multipart_body("thumbnail", Some("image/jpeg"), b"jpeg data");

        let reply = match upload_thumbnail_handler(
            video.id.to_string(),
            owner,
            content_type(),
            None,
            chunked_body(body, 16),
            env.context(),
        )
        .await
        {
            Ok(reply) => reply.into_response(),
            Err(rejection) => panic!("upload failed: {rejection:?}"),
        };

        assert_eq!(reply.status(), StatusCode::OK);
        let stored: Video = env.videos.get(video.id).unwrap();
        assert!(stored.thumbnail_url.is_some());
        assert!(env.thumbnails.load(video.id).await.unwrap().is_some());
    }
}
