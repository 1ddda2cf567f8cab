use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

pub type AppResult<T> = Result<T, Error>;

/// every failure the pipeline can surface, mapped onto an http status.
/// upstream statuses are mirrored as-is so the player sees what the origin said.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    // non-2xx/3xx from the origin, mirrored back
    #[error("upstream returned {0}")]
    UpstreamStatus(u16),

    #[error("{0}")]
    BadGateway(String),

    // origin sent a 200 with nothing in it, we refuse to rewrite air
    #[error("empty body from upstream")]
    EmptyUpstream,

    #[error("origin fetch deadline exceeded: {0}")]
    Timeout(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("internal server error")]
    InternalServerError,

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UpstreamStatus(code) => {
                // a busted origin status shouldn't panic the envelope, fall back to 502
                StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::BadGateway(_) | Error::EmptyUpstream => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InternalServerError | Error::InternalServerErrorWithContext(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_is_mirrored() {
        assert_eq!(Error::UpstreamStatus(404).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::UpstreamStatus(451).status(), StatusCode::from_u16(451).unwrap());
    }

    #[test]
    fn bogus_upstream_status_falls_back_to_502() {
        assert_eq!(Error::UpstreamStatus(42).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn timeout_maps_to_504() {
        assert_eq!(
            Error::Timeout("8s deadline".to_string()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
