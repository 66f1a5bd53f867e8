use std::fmt;

use ring::rand::{SecureRandom, SystemRandom};
use url::Url;

use crate::error::Error;

/// Number of random bytes used for generated file names, encodes to 43 url safe characters.
pub const RANDOM_NAME_BYTES: usize = 32;

pub struct OptFmt<T>(pub Option<T>);

impl<T: fmt::Display> fmt::Display for OptFmt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.0 {
            fmt::Display::fmt(t, f)
        } else {
            f.write_str("-")
        }
    }
}

pub fn join_url<'a>(
    url: &mut Url,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<(), Error> {
    let mut path_segments = url
        .path_segments_mut()
        .map_err(|_| Error::InvalidUrlError(String::from("URL cannot be a base")))?;
    path_segments.pop_if_empty();
    for segment in segments {
        path_segments.push(segment);
    }
    Ok(())
}

/// Generates a cryptographically random, url safe file name without extension.
pub fn random_name() -> Result<String, Error> {
    let mut bytes = [0u8; RANDOM_NAME_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::IoError(String::from("Failed to generate random bytes")))?;
    Ok(data_encoding::BASE64URL_NOPAD.encode(&bytes))
}
