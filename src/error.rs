use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::payments::PaymentError;
use crate::repo::RepoError;

/// Wire shape of every error response: `{error, detalles?}`.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detalles: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Datos inválidos")] Validation(String),
    #[error("{0}")] Unauthorized(String),
    #[error("Acceso denegado")] Forbidden,
    #[error("{0}")] NotFound(String),
    #[error("{0}")] Conflict(String),
    #[error("Demasiadas solicitudes")] TooManyRequests,
    #[error("Servicio no disponible")] ServiceUnavailable(String),
    #[error("Error interno del servidor")] Internal,
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{what} no encontrado"))
    }

    fn detalles(&self) -> Option<String> {
        match self {
            ApiError::Validation(d) | ApiError::ServiceUnavailable(d) => Some(d.clone()),
            _ => None,
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound("Recurso no encontrado".into()),
            RepoError::Conflict => ApiError::Conflict("El recurso ya existe".into()),
            RepoError::Invalid(msg) => ApiError::Validation(msg),
            RepoError::Internal(msg) => {
                tracing::error!("repository failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::NotConfigured => {
                ApiError::ServiceUnavailable("el procesador de pagos no está configurado".into())
            }
            PaymentError::InvalidSignature(msg) => ApiError::Validation(msg),
            PaymentError::NotFound => ApiError::not_found("Sesión de pago"),
            other => {
                tracing::error!("payment processor failure: {other}");
                ApiError::Internal
            }
        }
    }
}

/// Turn a `RepoError::NotFound` into an entity-specific 404 message.
pub trait OrNotFound<T> {
    fn or_not_found(self, what: &str) -> Result<T, ApiError>;
}

impl<T> OrNotFound<T> for Result<T, RepoError> {
    fn or_not_found(self, what: &str) -> Result<T, ApiError> {
        self.map_err(|e| match e {
            RepoError::NotFound => ApiError::not_found(what),
            other => other.into(),
        })
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody {
            error: self.to_string(),
            detalles: self.detalles(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_errors_map_to_statuses() {
        assert_eq!(ApiError::from(RepoError::NotFound).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(RepoError::Conflict).status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::from(RepoError::Invalid("x".into())).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(RepoError::Internal("db down".into())).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err: Result<(), _> = Err::<(), _>(RepoError::NotFound).or_not_found("Auto");
        assert_eq!(err.unwrap_err().to_string(), "Auto no encontrado");
    }
}
