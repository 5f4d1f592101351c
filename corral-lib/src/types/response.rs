use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;

use crate::{ErrorKind, Result};

/// The decoded body of a successful request.
///
/// Every waiter of a coalesced request receives a clone of the same [`Arc`].
pub type Body = Arc<Value>;

/// What a [`crate::Transport`] hands back: the status line and the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Status code sent by the server
    pub status: StatusCode,
    /// Response body as text
    pub text: String,
}

impl RawResponse {
    /// Create a new response
    #[must_use]
    pub fn new(status: StatusCode, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    /// Turn the response into a decoded [`Body`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::HttpStatus`] for any status outside of `2xx`, and
    /// [`ErrorKind::Decode`] if the body is not valid JSON.
    pub fn into_body(self, url: &str) -> Result<Body> {
        if !self.status.is_success() {
            return Err(ErrorKind::HttpStatus {
                url: url.to_string(),
                status: self.status,
            });
        }

        serde_json::from_str(&self.text)
            .map(Arc::new)
            .map_err(|e| ErrorKind::Decode {
                url: url.to_string(),
                source: Arc::new(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const URL: &str = "https://example.com/data";

    #[test]
    fn test_success_is_decoded() {
        let body = RawResponse::new(StatusCode::OK, r#"{"id": 7}"#)
            .into_body(URL)
            .unwrap();
        assert_eq!(*body, json!({"id": 7}));
    }

    #[test]
    fn test_non_success_status_is_an_error() {
        // the body is not even looked at
        let error = RawResponse::new(StatusCode::INTERNAL_SERVER_ERROR, r#"{"id": 7}"#)
            .into_body(URL)
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_redirect_status_is_an_error() {
        let error = RawResponse::new(StatusCode::FOUND, "")
            .into_body(URL)
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::FOUND));
    }

    #[test]
    fn test_invalid_json_is_a_decode_error() {
        let error = RawResponse::new(StatusCode::OK, "<html></html>")
            .into_body(URL)
            .unwrap_err();
        assert!(matches!(error, ErrorKind::Decode { .. }));
    }
}
