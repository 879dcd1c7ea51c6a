use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use certflow::{ClassifiedError, Environment, ErrorCategory, ErrorResponse, NUMBER_CONFLICT};
use serde_json::json;

/// Failure of an HTTP handler.
#[derive(Debug)]
pub enum ApiError {
    /// No session with this id is registered (never existed or evicted).
    SessionNotFound(String),
    /// A classified failure, rendered for the given environment.
    Classified {
        error: ClassifiedError,
        environment: Environment,
    },
}

impl ApiError {
    pub fn classified(error: ClassifiedError, environment: Environment) -> Self {
        Self::Classified { error, environment }
    }
}

/// HTTP status for a classified failure.
pub fn status_for(error: &ClassifiedError) -> StatusCode {
    match error.category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
        ErrorCategory::Authorization => StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Database if error.code == NUMBER_CONFLICT => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::SessionNotFound(id) => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "success": false,
                    "error": format!("Generation session {id} was not found"),
                    "errorCode": "SESSION_NOT_FOUND",
                })),
            )
                .into_response(),
            Self::Classified { error, environment } => {
                let body = ErrorResponse::from_error(&error, environment);
                let mut response = (status_for(&error), Json(&body)).into_response();
                if let Some(secs) = body.retry_after {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_statuses() {
        let status = |category| status_for(&ClassifiedError::new(category, "x"));
        assert_eq!(status(ErrorCategory::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status(ErrorCategory::Authentication), StatusCode::UNAUTHORIZED);
        assert_eq!(status(ErrorCategory::Authorization), StatusCode::FORBIDDEN);
        assert_eq!(status(ErrorCategory::RateLimit), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status(ErrorCategory::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status(ErrorCategory::Database), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status(ErrorCategory::Unknown), StatusCode::INTERNAL_SERVER_ERROR);

        let conflict =
            ClassifiedError::new(ErrorCategory::Database, "busy").with_code(NUMBER_CONFLICT);
        assert_eq!(status_for(&conflict), StatusCode::CONFLICT);
    }

    #[test]
    fn retryable_errors_carry_retry_after() {
        let err = ClassifiedError::new(ErrorCategory::RateLimit, "slow down");
        let response = ApiError::classified(err, Environment::Production).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");

        let err = ClassifiedError::validation("bad");
        let response = ApiError::classified(err, Environment::Production).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
