use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::future::{ready, Ready};
use std::str::FromStr;

use crate::error::ApiError;
use crate::models::Id;

const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self { Role::User }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id, as a string.
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("JWT_SECRET not set")]
    MissingSecret,
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

fn secret() -> Result<String, TokenError> {
    env::var("JWT_SECRET").map_err(|_| TokenError::MissingSecret)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, TokenError> {
    let secret = secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Create a 24h token for an account.
pub fn create_jwt(user_id: Id, roles: Vec<Role>) -> Result<String, TokenError> {
    let secret = secret()?;
    let exp = (chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp();
    let claims = Claims { sub: user_id.to_string(), exp: exp as usize, roles };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Option<Id> {
        self.0.sub.parse().ok()
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.0.roles.contains(&role)
    }

    /// Owners may act on their own account; admins on any.
    pub fn ensure_can_act_for(&self, id: Id) -> Result<(), ApiError> {
        if self.user_id() == Some(id) || self.has_role(Role::Admin) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(ApiError::Unauthorized("Autorización requerida".into()).into()));
        };
        match decode_jwt(bearer.token()) {
            Ok(claims) => ready(Ok(Auth(claims))),
            Err(e) => {
                tracing::debug!("rejected bearer token: {e}");
                ready(Err(ApiError::Unauthorized("Token inválido".into()).into()))
            }
        }
    }
}
