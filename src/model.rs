use bytes::Bytes;
use chrono::{DateTime, Utc};
use mime::Mime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::videos;

/// A video record. Records are created by the metadata service before upload, the upload pipeline
/// only ever sets `thumbnail_url` and `video_url`.
#[derive(Identifiable, Queryable, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[diesel(table_name = videos)]
pub struct Video {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub user_id: Uuid,
}

/// Thumbnail image held by the in-memory thumbnail store.
#[derive(Clone, Debug)]
pub struct Thumbnail {
    pub data: Bytes,
    pub media_type: Mime,
}
