use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No healthy backend servers available")]
    NoHealthyBackend,
    #[error("upstream returned {status}")]
    UpstreamStatus { status: StatusCode },
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status and reason emitted to the client once the retry budget is spent.
    pub fn client_response(&self) -> (StatusCode, String) {
        match self {
            ProxyError::NoHealthyBackend => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No healthy backend servers available".to_string(),
            ),
            ProxyError::UpstreamStatus { status } => (
                *status,
                status.canonical_reason().unwrap_or("Upstream Error").to_string(),
            ),
            ProxyError::Transport(cause) => (StatusCode::INTERNAL_SERVER_ERROR, cause.clone()),
            ProxyError::Config(reason) => {
                (StatusCode::INTERNAL_SERVER_ERROR, reason.clone())
            }
            ProxyError::Tls(reason) => (StatusCode::INTERNAL_SERVER_ERROR, reason.clone()),
            ProxyError::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_propagates_code_and_reason() {
        let err = ProxyError::UpstreamStatus {
            status: StatusCode::NOT_FOUND,
        };
        let (status, reason) = err.client_response();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(reason, "Not Found");
    }

    #[test]
    fn transport_and_no_backend_map_to_500() {
        let (status, reason) = ProxyError::Transport("connection refused".to_string())
            .client_response();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reason, "connection refused");

        let (status, reason) = ProxyError::NoHealthyBackend.client_response();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reason, "No healthy backend servers available");
    }
}
