use http::StatusCode;
use thiserror::Error;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is used to generate a synthetic error response
pub(crate) type HttpResult<T> = std::result::Result<T, HttpError>;

/// Describes things that can go wrong while forwarding a request
#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("Backend did not respond in time: {0}")]
    GatewayTimeout(String),

    #[error("Failed to get response from backend: {0}")]
    BadGateway(String),

    #[error("Failed to generate upstream request: {0}")]
    UpstreamRequest(String),
}

impl From<HttpError> for StatusCode {
    fn from(e: HttpError) -> StatusCode {
        match e {
            HttpError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HttpError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HttpError::UpstreamRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
