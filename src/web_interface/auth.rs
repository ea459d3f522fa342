//! Access token checks for the websocket upgrade and the HTTP endpoints.
//!
//! Tokens are HS256 JWTs issued by the account service; the `id` claim is the
//! stable user id every per-user resource is keyed by.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error_handling::types::AuthError;
use crate::storage::types::UserId;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub exp: u64,
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    cookie_name: String,
}

impl TokenVerifier {
    pub fn new(secret: &str, cookie_name: impl Into<String>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            cookie_name: cookie_name.into(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("Rejected access token: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            }
        })?;

        if data.claims.id.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(UserId::new(data.claims.id))
    }

    /// Picks the token from, in order: the access cookie, an `Authorization: Bearer`
    /// header, the `token` query parameter. Empty values fall through to the next source.
    pub fn token_from<'a>(
        &self,
        cookie_header: Option<&'a str>,
        authorization: Option<&'a str>,
        query_token: Option<&'a str>,
    ) -> Option<&'a str> {
        let present = |token: &&str| !token.is_empty();
        cookie_header
            .and_then(|header| cookie_value(header, &self.cookie_name))
            .filter(present)
            .or_else(|| {
                authorization
                    .and_then(|h| h.strip_prefix("Bearer "))
                    .map(str::trim)
                    .filter(present)
            })
            .or_else(|| query_token.filter(present))
    }

    /// Full check of a request's credentials.
    pub fn authenticate(
        &self,
        cookie_header: Option<&str>,
        authorization: Option<&str>,
        query_token: Option<&str>,
    ) -> Result<UserId, AuthError> {
        let token = self
            .token_from(cookie_header, authorization, query_token)
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}

fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}
