//! Response classification.

use serde_json::Value;

use crate::governor::{parse_retry_after, FetchError};

/// Longest body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Map an HTTP status to success or a typed failure.
///
/// 429 is the only retryable status; every other non-2xx is a remote error.
pub fn classify_status(status: u16, retry_after: Option<&str>, body: &str) -> Result<(), FetchError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(FetchError::RateLimited {
            retry_after: parse_retry_after(retry_after),
        }),
        _ => Err(FetchError::Remote {
            status,
            message: error_message(body),
        }),
    }
}

/// Best human-readable message from an error body.
///
/// Understands the common JSON shapes (`message`, `error.message`,
/// `error_description`, string `error`) and falls back to a body excerpt.
pub fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            json.get("message"),
            json.get("error").and_then(|e| e.get("message")),
            json.get("error_description"),
            json.get("error"),
        ];
        if let Some(message) = candidates.into_iter().flatten().find_map(Value::as_str) {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_success_statuses() {
        assert!(classify_status(200, None, "").is_ok());
        assert!(classify_status(204, None, "").is_ok());
    }

    #[test]
    fn test_429_is_rate_limited_with_hint() {
        assert_eq!(
            classify_status(429, Some("12"), ""),
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_secs(12))
            })
        );
        assert_eq!(
            classify_status(429, None, ""),
            Err(FetchError::RateLimited { retry_after: None })
        );
    }

    #[test]
    fn test_other_failures_are_remote_errors() {
        assert_eq!(
            classify_status(404, None, r#"{"error":{"status":404,"message":"Not found."}}"#),
            Err(FetchError::Remote {
                status: 404,
                message: "Not found.".to_string()
            })
        );
        assert_eq!(
            classify_status(503, Some("5"), "Service Unavailable"),
            Err(FetchError::Remote {
                status: 503,
                message: "Service Unavailable".to_string()
            })
        );
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(error_message(r#"{"message":"User not found","error":6}"#), "User not found");
        assert_eq!(
            error_message(r#"{"error":"invalid_client","error_description":"Invalid client secret"}"#),
            "Invalid client secret"
        );
        assert_eq!(error_message(r#"{"error":"invalid_client"}"#), "invalid_client");
        assert_eq!(error_message("   "), "empty response body");
        assert_eq!(error_message(&"x".repeat(500)).len(), 200);
    }
}
