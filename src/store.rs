use async_trait::async_trait;
use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::{
        AsyncDieselConnectionManager,
        deadpool::{Object, Pool},
    },
};
use uuid::Uuid;

use crate::{error::Error, model::Video, schema::videos};

/// Record store holding the video metadata. The upload pipeline only reads records and updates
/// their URLs, records are created and deleted elsewhere.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, id: Uuid) -> Result<Option<Video>, Error>;

    /// Persists the mutable fields of the given video and returns the stored record.
    async fn update_video(&self, video: &Video) -> Result<Video, Error>;
}

pub struct PgVideoStore {
    pool: Pool<AsyncPgConnection>,
}

impl PgVideoStore {
    pub fn new(database_url: &str, max_connections: usize) -> Result<Self, Error> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| Error::DatabaseConnectionError(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn acquire_db_connection(&self) -> Result<Object<AsyncPgConnection>, Error> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::DatabaseConnectionError(e.to_string()))
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<Video>, Error> {
        let mut connection = self.acquire_db_connection().await?;
        videos::table
            .filter(videos::id.eq(id))
            .get_result::<Video>(&mut *connection)
            .await
            .optional()
            .map_err(Error::from)
    }

    async fn update_video(&self, video: &Video) -> Result<Video, Error> {
        let mut connection = self.acquire_db_connection().await?;
        diesel::update(videos::table)
            .filter(videos::id.eq(video.id))
            .set((
                videos::title.eq(&video.title),
                videos::description.eq(&video.description),
                videos::thumbnail_url.eq(&video.thumbnail_url),
                videos::video_url.eq(&video.video_url),
                videos::updated_at.eq(Utc::now()),
            ))
            .get_result::<Video>(&mut *connection)
            .await
            .map_err(Error::from)
    }
}
