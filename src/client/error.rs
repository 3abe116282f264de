//! Backend error payloads.

use serde::Deserialize;

use crate::Error;

/// Error body returned by the payment backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn into_error(self, status: u16) -> Error {
        let message = self
            .error
            .message
            .unwrap_or_else(|| format!("backend returned HTTP {}", status));

        if status == 401 {
            return Error::AuthRejected { status, message };
        }

        Error::Remote {
            message,
            status: Some(status),
            error_type: self.error.error_type,
        }
    }
}

/// Maps a non-success response body to a crate error.
pub fn error_from_body(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(response) => response.into_error(status),
        Err(_) if status == 401 => Error::AuthRejected {
            status,
            message: body.to_string(),
        },
        Err(_) => Error::Remote {
            message: if body.is_empty() {
                format!("backend returned HTTP {}", status)
            } else {
                body.to_string()
            },
            status: Some(status),
            error_type: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_auth_rejected() {
        let body = r#"{"error":{"type":"invalid_request_error","message":"Expired key"}}"#;
        match error_from_body(401, body) {
            Error::AuthRejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Expired key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_other_status_is_remote() {
        let body = r#"{"error":{"type":"card_error","message":"No such source","code":"resource_missing"}}"#;
        match error_from_body(404, body) {
            Error::Remote {
                status, error_type, ..
            } => {
                assert_eq!(status, Some(404));
                assert_eq!(error_type.as_deref(), Some("card_error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unparsable_body() {
        assert!(matches!(
            error_from_body(502, "Bad Gateway"),
            Error::Remote { status: Some(502), .. }
        ));
        assert!(matches!(
            error_from_body(401, ""),
            Error::AuthRejected { .. }
        ));
    }
}
