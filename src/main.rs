#[macro_use]
extern crate diesel;
#[cfg(feature = "auto_migration")]
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use std::{path::PathBuf, sync::Arc};

use config::{Config, ThumbnailStorage};
use context::{AppContext, Context, with_context};
use data::{
    encode::FfmpegProcessor,
    s3utils::S3ObjectStore,
    thumbnail::{DiskThumbnailStore, MemoryThumbnailStore, ThumbnailStore},
};
use error::Error;
use mime::Mime;
use store::PgVideoStore;
use warp::{Filter, Rejection, Reply};

use crate::util::OptFmt;

mod auth;
mod config;
mod context;
mod data;
mod error;
mod model;
mod schema;
mod store;
#[cfg(test)]
mod test_util;
mod util;

#[cfg(feature = "auto_migration")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn main() {
    dotenvy::dotenv().ok();

    setup_logger();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    #[cfg(feature = "auto_migration")]
    {
        use diesel::{Connection, PgConnection};

        log::info!("Running diesel migrations");
        let mut connection = PgConnection::establish(&config.database_url)
            .expect("Failed to establish database connection for migrations");
        if let Err(e) = connection.run_pending_migrations(MIGRATIONS) {
            panic!("Failed running db migrations: {}", e);
        }
        log::info!("Done running diesel migrations");
    }

    setup_tokio_runtime(config);
}

fn build_context(config: &Config) -> Result<Context, Error> {
    let thumbnails: Arc<dyn ThumbnailStore> = match config.thumbnail_storage {
        ThumbnailStorage::Disk => Arc::new(DiskThumbnailStore::new(
            config.assets_root.clone(),
            config.api_base_url.clone(),
        )?),
        ThumbnailStorage::Memory => {
            Arc::new(MemoryThumbnailStore::new(config.api_base_url.clone()))
        }
    };

    std::fs::create_dir_all(&config.staging_dir).map_err(|e| {
        Error::IoError(format!(
            "Failed to create staging directory {}: {e}",
            config.staging_dir.display()
        ))
    })?;

    Ok(Arc::new(AppContext {
        videos: Arc::new(PgVideoStore::new(
            &config.database_url,
            config.max_db_connections,
        )?),
        objects: Arc::new(S3ObjectStore::new(&config.s3)?),
        media: Arc::new(FfmpegProcessor::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        )),
        thumbnails,
        jwt_secret: config.jwt_secret.clone(),
        staging_dir: config.staging_dir.clone(),
        max_video_upload_bytes: config.max_video_upload_bytes,
        max_thumbnail_upload_bytes: config.max_thumbnail_upload_bytes,
    }))
}

fn routes(
    context: Context,
    assets_root: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone + Send + Sync + 'static {
    let video_upload_route = warp::path!("api" / "video_upload" / String)
        .and(warp::post())
        .and(auth::with_user(context.clone()))
        .and(warp::header::<Mime>("content-type"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and(with_context(context.clone()))
        .and_then(data::upload_video_handler);

    let thumbnail_upload_route = warp::path!("api" / "thumbnail_upload" / String)
        .and(warp::post())
        .and(auth::with_user(context.clone()))
        .and(warp::header::<Mime>("content-type"))
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and(with_context(context.clone()))
        .and_then(data::upload_thumbnail_handler);

    let get_thumbnail_route = warp::path!("api" / "thumbnails" / String)
        .and(warp::get())
        .and(with_context(context))
        .and_then(data::get_thumbnail_handler);

    let assets_route = warp::path("assets")
        .and(warp::get())
        .and(warp::fs::dir(assets_root));

    video_upload_route
        .or(thumbnail_upload_route)
        .or(get_thumbnail_route)
        .or(assets_route)
        .recover(error::handle_rejection)
}

/// Start a tokio runtime that runs a warp server.
#[tokio::main]
async fn setup_tokio_runtime(config: Config) {
    let context = match build_context(&config) {
        Ok(context) => context,
        Err(e) => {
            log::error!("Failed to set up application: {e}");
            std::process::exit(1);
        }
    };

    let filter = routes(context, config.assets_root.clone()).with(warp::log::custom(|info| {
        let log_level = if info.elapsed().as_secs() >= 10
            && !info.path().starts_with("/api/video_upload")
        {
            log::Level::Warn
        } else if info.elapsed().as_millis() >= 250 {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        log::log!(
            target: "tubely::api",
            log_level,
            "{} \"{} {} {:?}\" {} \"{}\" \"{}\" {:?}",
            OptFmt(info.remote_addr()),
            info.method(),
            info.path(),
            info.version(),
            info.status().as_u16(),
            OptFmt(info.referer()),
            OptFmt(info.user_agent()),
            info.elapsed(),
        );
    }));

    #[cfg(debug_assertions)]
    let filter = filter.with(
        warp::cors()
            .allow_any_origin()
            .allow_header("content-type")
            .allow_header("Authorization")
            .allow_method(warp::http::Method::GET)
            .allow_method(warp::http::Method::OPTIONS)
            .allow_method(warp::http::Method::POST),
    );

    log::info!(
        "Serving tubely on port {} with base url {}",
        config.port,
        &config.api_base_url
    );

    match (config.cert_path, config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            warp::serve(filter)
                .tls()
                .cert_path(cert_path)
                .key_path(key_path)
                .run(([0, 0, 0, 0], config.port))
                .await;
        }
        _ => warp::serve(filter).run(([0, 0, 0, 0], config.port)).await,
    }
}

fn setup_logger() {
    // create logs dir as fern does not appear to handle that itself
    if !std::path::Path::new("logs/").exists() {
        std::fs::create_dir("logs").expect("Failed to create logs/ directory");
    }

    let logging_level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}]{}[{}] {}",
                record.level(),
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("tubely", logging_level)
        .level_for("tubely_server", logging_level)
        .chain(std::io::stdout())
        .chain(fern::DateBased::new("logs/", "logs_%Y-%m-%d.log"))
        .apply()
        .expect("Failed to set up logging");
}
