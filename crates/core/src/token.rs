//! Room access tokens.
//!
//! Tokens are HS256 JWTs in the layout LiveKit servers accept, signed with the
//! API secret. The same issuer verifies them when the in-process room hub
//! admits a browser candidate.

use crate::error::TokenError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Room permissions carried in the `video` claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
    #[serde(default)]
    pub can_publish: bool,
    #[serde(default)]
    pub can_subscribe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default)]
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

/// Everything a transport needs to join a room as one participant.
#[derive(Debug, Clone)]
pub struct JoinGrant {
    pub url: String,
    pub room: String,
    pub identity: String,
    pub name: String,
    pub token: String,
}

#[derive(Clone)]
pub struct TokenIssuer {
    api_key: String,
    api_secret: SecretString,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(api_key: impl Into<String>, api_secret: SecretString) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Signs a token letting `identity` join, publish and subscribe in `room`.
    pub fn issue(&self, room: &str, identity: &str, name: &str) -> Result<String, TokenError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            iss: self.api_key.clone(),
            sub: identity.to_string(),
            name: name.to_string(),
            nbf: now,
            exp: now + self.ttl.as_secs() as i64,
            video: VideoGrant {
                room_join: true,
                room: room.to_string(),
                can_publish: true,
                can_subscribe: true,
            },
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.api_secret.expose_secret().as_bytes()),
        )
        .map_err(|e| TokenError::Encode(e.to_string()))
    }

    pub fn grant(
        &self,
        url: &str,
        room: &str,
        identity: &str,
        name: &str,
    ) -> Result<JoinGrant, TokenError> {
        Ok(JoinGrant {
            url: url.to_string(),
            room: room.to_string(),
            identity: identity.to_string(),
            name: name.to_string(),
            token: self.issue(room, identity, name)?,
        })
    }

    /// Checks signature, issuer and expiry, and that the token admits `room`.
    pub fn verify(&self, token: &str, room: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.api_key.as_str()]);
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims.remove("aud");

        let claims = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.api_secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| TokenError::Invalid(e.to_string()))?
        .claims;

        if !claims.video.room_join || claims.video.room != room {
            return Err(TokenError::WrongRoom(room.to_string()));
        }
        Ok(claims)
    }
}
