use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::{
    Filter, Rejection,
    filters::header::headers_cloned,
    http::header::{self, HeaderMap},
};

use crate::{
    context::{Context, with_context},
    error::Error,
};

pub const TOKEN_ISSUER: &str = "tubely-access";
const JWT_BEARER_PREFIX: &str = "Bearer ";

/// Struct encoded in the JWT that contains its expiry and subject user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// Warp filter for requests that require a logged in user provided by the auth header, extracts the
/// id of the user.
pub fn with_user(context: Context) -> impl Filter<Extract = (Uuid,), Error = Rejection> + Clone {
    headers_cloned()
        .and(with_context(context))
        .and_then(require_user_from_auth_header)
}

async fn require_user_from_auth_header(
    header_map: HeaderMap,
    context: Context,
) -> Result<Uuid, Rejection> {
    let token = get_bearer_token(&header_map)?;
    let user_id = validate_jwt(token, &context.jwt_secret)?;
    Ok(user_id)
}

pub fn get_bearer_token(header_map: &HeaderMap) -> Result<&str, Error> {
    let auth_header = match header_map.get(header::AUTHORIZATION) {
        Some(h) => std::str::from_utf8(h.as_bytes()).map_err(|_| Error::UtfEncodingError)?,
        None => return Err(Error::MissingAuthHeaderError),
    };

    auth_header
        .strip_prefix(JWT_BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(Error::InvalidAuthHeaderError)
}

/// Validates the signature, issuer and expiry of the token and returns the user id it was issued for.
pub fn validate_jwt(token: &str, secret: &str) -> Result<Uuid, Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[TOKEN_ISSUER]);
    // fails if expired
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| Error::InvalidJwtError)?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| Error::InvalidJwtError)
}
