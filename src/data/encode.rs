use std::{
    ffi::OsString,
    fmt,
    io,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use async_trait::async_trait;
use lazy_static::lazy_static;
use rusty_pool::ThreadPool;
use serde::Deserialize;

use crate::error::Error;

lazy_static! {
    pub static ref ENCODE_POOL: ThreadPool = rusty_pool::Builder::new()
        .name(String::from("encode_pool"))
        .build();
}

async fn spawn_blocking<R: Send + 'static>(
    task: impl FnOnce() -> Result<R, Error> + Send + 'static,
) -> Result<R, Error> {
    let join_handle = ENCODE_POOL.evaluate(task);

    match join_handle.receiver.await {
        Ok(t) => t,
        Err(_) => Err(Error::CancellationError),
    }
}

/// Storage partition of a video, derived from its declared display aspect ratio and used as the
/// prefix of the object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrientationPartition {
    Landscape,
    Portrait,
    Other,
}

impl OrientationPartition {
    /// Only the exact ratios `16:9` and `9:16` are recognised, the ratio is not computed from the
    /// stream dimensions so ratios like `1.91:1` or `1920:1080` end up in [`OrientationPartition::Other`].
    pub fn from_aspect_ratio(ratio: &str) -> Self {
        match ratio {
            "16:9" => OrientationPartition::Landscape,
            "9:16" => OrientationPartition::Portrait,
            _ => OrientationPartition::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrientationPartition::Landscape => "landscape",
            OrientationPartition::Portrait => "portrait",
            OrientationPartition::Other => "other",
        }
    }
}

impl fmt::Display for OrientationPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display aspect ratio as declared by the container, empty if the first video stream does not
/// declare one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AspectRatio(String);

impl AspectRatio {
    pub fn new(ratio: impl Into<String>) -> Self {
        Self(ratio.into())
    }

    pub fn partition(&self) -> OrientationPartition {
        OrientationPartition::from_aspect_ratio(&self.0)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Fast-start rewritten copy of a staged upload. The file is removed when the value is dropped,
/// the guard is created before the rewrite runs so partial output is removed as well.
#[derive(Debug)]
pub struct ProcessedMedia {
    path: PathBuf,
}

impl ProcessedMedia {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Derives the output path of the rewrite for the given input path.
    pub fn for_input(input: &Path) -> Self {
        Self::new(processing_path(input))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn open(&self) -> Result<tokio::fs::File, Error> {
        tokio::fs::File::open(&self.path).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to open processed file {}: {e}",
                self.path.display()
            ))
        })
    }
}

impl Drop for ProcessedMedia {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed processed file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::error!(
                "Failed to remove processed file {}: {e}",
                self.path.display()
            ),
        }
    }
}

pub fn processing_path(input: &Path) -> PathBuf {
    let mut path = OsString::from(input.as_os_str());
    path.push(".processing");
    PathBuf::from(path)
}

/// External media tooling used by the upload pipeline.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Reads the display aspect ratio declared for the first video stream of the file.
    async fn inspect(&self, path: &Path) -> Result<AspectRatio, Error>;

    /// Rewrites the container so that its metadata precedes the media data, without re-encoding.
    async fn rewrite_for_streaming(&self, path: &Path) -> Result<ProcessedMedia, Error>;
}

/// [`MediaProcessor`] spawning `ffprobe` and `ffmpeg` processes.
pub struct FfmpegProcessor {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegProcessor {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn inspect(&self, path: &Path) -> Result<AspectRatio, Error> {
        let process = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-select_streams")
            .arg("v:0")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::FfmpegProcessError(format!("Failed to spawn ffprobe process: {e}"))
            })?;

        let process_output = wait_for_output(process, "ffprobe").await?;
        if !process_output.status.success() {
            let error_msg = String::from_utf8_lossy(&process_output.stderr);
            return Err(Error::FfmpegProcessError(format!(
                "ffprobe for {} failed with status {}: {}",
                path.display(),
                process_output.status,
                error_msg
            )));
        }

        parse_aspect_ratio(&process_output.stdout)
    }

    async fn rewrite_for_streaming(&self, path: &Path) -> Result<ProcessedMedia, Error> {
        let processed = ProcessedMedia::for_input(path);

        log::debug!(
            "Spawning ffmpeg process to rewrite {} to {}",
            path.display(),
            processed.path().display()
        );
        let process = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(path)
            .arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("faststart")
            .arg("-f")
            .arg("mp4")
            .arg("-v")
            .arg("error")
            .arg(processed.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::FfmpegProcessError(format!("Failed to spawn ffmpeg process: {e}"))
            })?;

        let process_output = wait_for_output(process, "ffmpeg").await?;
        if !process_output.status.success() {
            let error_msg = String::from_utf8_lossy(&process_output.stderr);
            return Err(Error::FfmpegProcessError(format!(
                "ffmpeg fast-start rewrite of {} failed with status {}: {}",
                path.display(),
                process_output.status,
                error_msg
            )));
        }

        if !processed.path().is_file() {
            return Err(Error::FfmpegProcessError(format!(
                "ffmpeg finished without writing {}",
                processed.path().display()
            )));
        }

        Ok(processed)
    }
}

async fn wait_for_output(
    process: std::process::Child,
    program: &'static str,
) -> Result<Output, Error> {
    spawn_blocking(move || {
        process.wait_with_output().map_err(|e| {
            Error::FfmpegProcessError(format!("Failed to get {program} process output: {e}"))
        })
    })
    .await
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    display_aspect_ratio: Option<String>,
}

/// Extracts the display aspect ratio of the first video stream from `ffprobe -print_format json`
/// output.
pub fn parse_aspect_ratio(ffprobe_stdout: &[u8]) -> Result<AspectRatio, Error> {
    let output = serde_json::from_slice::<FfprobeOutput>(ffprobe_stdout).map_err(|e| {
        Error::FfmpegProcessError(format!("Failed to deserialize ffprobe output: {e}"))
    })?;

    let ratio = output
        .streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref().is_none_or(|t| t == "video"))
        .and_then(|stream| stream.display_aspect_ratio)
        .unwrap_or_default();

    Ok(AspectRatio(ratio))
}
