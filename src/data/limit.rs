use std::{
    fmt::Display,
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, ready};
use pin_project::pin_project;

use crate::error::Error;

/// Rejects requests that declare a body larger than the limit before any processing begins.
pub fn check_content_length(content_length: Option<u64>, limit: u64) -> Result<(), Error> {
    match content_length {
        Some(content_length) if content_length > limit => {
            log::debug!("Rejecting request with content length {content_length} over limit {limit}");
            Err(Error::PayloadTooLargeError(limit))
        }
        _ => Ok(()),
    }
}

/// Upload size limit for a single request body. The limit is shared with the [`LimitedBody`]
/// created by [`BodyLimit::wrap`] so that read errors further downstream can be attributed to the
/// limit.
#[derive(Clone)]
pub struct BodyLimit {
    limit: u64,
    exceeded: Arc<AtomicBool>,
}

impl BodyLimit {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            exceeded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Acquire)
    }

    pub fn wrap<S>(&self, stream: S) -> LimitedBody<S> {
        LimitedBody {
            stream,
            limit: self.clone(),
            bytes_read: 0,
        }
    }

    /// Maps an error that occurred while reading the (multipart) body.
    pub fn read_error(&self, e: impl Display) -> Error {
        if self.exceeded() {
            Error::PayloadTooLargeError(self.limit)
        } else {
            Error::InvalidFileError(e.to_string())
        }
    }
}

#[pin_project]
pub struct LimitedBody<S> {
    #[pin]
    stream: S,
    limit: BodyLimit,
    bytes_read: u64,
}

impl<S> Stream for LimitedBody<S>
where
    S: Stream<Item = Result<Bytes, io::Error>>,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if this.limit.exceeded() {
            return Poll::Ready(Some(Err(limit_exceeded_error(this.limit.limit))));
        }

        match ready!(this.stream.poll_next(cx)) {
            Some(Ok(chunk)) => {
                *this.bytes_read += chunk.len() as u64;
                if *this.bytes_read > this.limit.limit {
                    this.limit.exceeded.store(true, Ordering::Release);
                    Poll::Ready(Some(Err(limit_exceeded_error(this.limit.limit))))
                } else {
                    Poll::Ready(Some(Ok(chunk)))
                }
            }
            other => Poll::Ready(other),
        }
    }
}

fn limit_exceeded_error(limit: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Request body exceeds upload limit of {limit} bytes"),
    )
}
