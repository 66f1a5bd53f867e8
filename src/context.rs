use std::{convert::Infallible, path::PathBuf, sync::Arc};

use warp::Filter;

use crate::{
    data::{encode::MediaProcessor, s3utils::ObjectStore, thumbnail::ThumbnailStore},
    store::VideoStore,
};

pub type Context = Arc<AppContext>;

/// Capabilities and settings shared by all request handlers. Created once on start-up and passed
/// to the handlers through [`with_context`].
pub struct AppContext {
    pub videos: Arc<dyn VideoStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub media: Arc<dyn MediaProcessor>,
    pub thumbnails: Arc<dyn ThumbnailStore>,
    pub jwt_secret: String,
    pub staging_dir: PathBuf,
    pub max_video_upload_bytes: u64,
    pub max_thumbnail_upload_bytes: u64,
}

pub fn with_context(context: Context) -> impl Filter<Extract = (Context,), Error = Infallible> + Clone {
    warp::any().map(move || context.clone())
}
