use mime::Mime;

use crate::error::Error;

/// Kind of upload, selects the allow-list of accepted media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
}

const VIDEO_TYPES: &[(&str, &str)] = &[("video/mp4", "mp4")];
const IMAGE_TYPES: &[(&str, &str)] = &[("image/png", "png"), ("image/jpeg", "jpeg")];

impl MediaKind {
    fn allowed_types(self) -> &'static [(&'static str, &'static str)] {
        match self {
            MediaKind::Video => VIDEO_TYPES,
            MediaKind::Image => IMAGE_TYPES,
        }
    }
}

/// Parses the declared content type of an uploaded file, parameters such as `charset` are kept but
/// ignored when classifying.
pub fn parse_media_type(content_type: &str) -> Result<Mime, Error> {
    content_type
        .trim()
        .parse::<Mime>()
        .map_err(|_| Error::InvalidContentTypeError(content_type.to_string()))
}

/// Maps the media type to the file extension used for stored files. Only types in the allow-list
/// of the given kind are accepted.
pub fn extension_for(kind: MediaKind, media_type: &Mime) -> Result<&'static str, Error> {
    let essence = media_type.essence_str();
    kind.allowed_types()
        .iter()
        .find(|(allowed, _)| allowed.eq_ignore_ascii_case(essence))
        .map(|(_, extension)| *extension)
        .ok_or_else(|| Error::UnsupportedMediaTypeError(essence.to_string()))
}

/// Parses and classifies the declared content type in one go.
pub fn classify(kind: MediaKind, content_type: &str) -> Result<(Mime, &'static str), Error> {
    let media_type = parse_media_type(content_type)?;
    let extension = extension_for(kind, &media_type)?;
    Ok((media_type, extension))
}
