use std::{io::SeekFrom, path::Path};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tempfile::NamedTempFile;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::error::Error;

const STAGING_FILE_PREFIX: &str = "tubely-upload";
const STAGING_FILE_SUFFIX: &str = ".mp4";

/// Request scoped local copy of an uploaded file. The file is closed and removed when the value
/// is dropped, regardless of whether the request succeeded.
pub struct StagedUpload {
    file: NamedTempFile,
    size: u64,
}

impl StagedUpload {
    /// Streams the uploaded bytes into a new temporary file in `dir` chunk by chunk and rewinds the
    /// file to the start.
    pub async fn stage<S>(dir: &Path, mut stream: S) -> Result<Self, Error>
    where
        S: Stream<Item = Result<Bytes, Error>> + Unpin,
    {
        let file = tempfile::Builder::new()
            .prefix(STAGING_FILE_PREFIX)
            .suffix(STAGING_FILE_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| Error::IoError(format!("Failed to create staging file: {e}")))?;
        log::debug!("Created staging file {}", file.path().display());

        // the cloned handle shares the file cursor with the handle owned by the NamedTempFile
        let mut writer = tokio::fs::File::from_std(file.as_file().try_clone()?);
        let mut size = 0;
        // on error `file` is dropped and removed
        while let Some(chunk) = stream.try_next().await? {
            writer.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        writer.flush().await?;
        writer.seek(SeekFrom::Start(0)).await?;

        Ok(Self { file, size })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of bytes written to the staging file.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[cfg(test)]
mod tests {
    use std::io::Seek;

    use bytes::Bytes;
    use futures::stream;
    use tokio::io::AsyncReadExt;

    use super::StagedUpload;
    use crate::error::Error;

    fn chunked(data: &[u8], chunk_size: usize) -> Vec<Result<Bytes, Error>> {
        data.chunks(chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect()
    }

    #[tokio::test]
    async fn test_stage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = (0..100_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();

        let staged = StagedUpload::stage(dir.path(), stream::iter(chunked(&data, 8192)))
            .await
            .unwrap();
        assert_eq!(staged.len(), data.len() as u64);
        assert!(staged.path().starts_with(dir.path()));

        let mut position_handle = staged.file.as_file().try_clone().unwrap();
        assert_eq!(position_handle.stream_position().unwrap(), 0);

        let mut read_back = Vec::new();
        tokio::fs::File::from_std(position_handle)
            .read_to_end(&mut read_back)
            .await
            .unwrap();
        assert_eq!(read_back.len() as u64, staged.len());
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_staged_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedUpload::stage(dir.path(), stream::iter(chunked(b"abc", 1)))
            .await
            .unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut chunks = chunked(b"partial upload", 4);
        chunks.push(Err(Error::PayloadTooLargeError(8)));

        let result = StagedUpload::stage(dir.path(), stream::iter(chunks)).await;
        assert!(matches!(result, Err(Error::PayloadTooLargeError(8))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_stage_empty_upload() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedUpload::stage(dir.path(), stream::iter(Vec::<Result<Bytes, Error>>::new()))
            .await
            .unwrap();
        assert!(staged.is_empty());
    }
}
