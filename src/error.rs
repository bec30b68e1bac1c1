use std::fmt;

/// Classified portal error — tells the caller *why* an operation failed so it
/// can pick the right recovery strategy (surface, rollback, or retry).
#[derive(Debug, Clone)]
pub struct PortalError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Seconds to wait before retrying (from a 429 Retry-After header or body).
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed required field.
    Validation,
    /// 401 — missing/expired token or bad credentials.
    Auth,
    /// 403 — the caller does not own the resource.
    Forbidden,
    /// 404 or unknown id.
    NotFound,
    /// Sync attempted without connectivity.
    Offline,
    /// A chat operation needs an active chat and none is open.
    NoActiveChat,
    /// The operation is already in flight; one at a time.
    Busy,
    /// 429 — upstream throttling.
    RateLimit,
    /// Local store failure (full, corrupt, io).
    Storage,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// Request exceeded its deadline.
    Timeout,
    /// 500/502/503/504 — remote-side outage.
    ServerError,
    /// Anything else.
    Unknown,
}

impl PortalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn offline() -> Self {
        Self::new(ErrorKind::Offline, "Cannot sync while offline")
    }

    pub fn no_active_chat() -> Self {
        Self::new(ErrorKind::NoActiveChat, "No active chat")
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Classify a non-2xx HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 => ErrorKind::Validation,
            401 => ErrorKind::Auth,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        };

        let retry_after_secs = if kind == ErrorKind::RateLimit {
            extract_retry_after(body)
        } else {
            None
        };

        Self {
            kind,
            status: Some(status),
            message: extract_message(body).unwrap_or_else(|| truncate_body(body)),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    /// Human-readable summary suitable for showing to a kiosk user.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::Auth => "Not authorized. Please log in again.".to_string(),
            ErrorKind::Forbidden => "You do not have access to this resource.".to_string(),
            ErrorKind::NotFound => "Not found.".to_string(),
            ErrorKind::Offline => "Cannot sync while offline".to_string(),
            ErrorKind::NoActiveChat => "No active chat".to_string(),
            ErrorKind::Busy => self.message.clone(),
            ErrorKind::RateLimit => {
                if let Some(secs) = self.retry_after_secs {
                    format!("Too many requests. Try again in {}s.", secs)
                } else {
                    "Too many requests. Try again shortly.".to_string()
                }
            }
            ErrorKind::Storage => format!("Local storage error: {}", self.message),
            ErrorKind::Network => "Cannot reach the portal server (network error).".to_string(),
            ErrorKind::Timeout => "The portal server took too long to respond.".to_string(),
            ErrorKind::ServerError => {
                "The portal server is experiencing issues. Try again later.".to_string()
            }
            ErrorKind::Unknown => format!("Unexpected error: {}", self.message),
        }
    }

    /// Whether retrying the same operation is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::RateLimit
                | ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::ServerError
                | ErrorKind::Offline
        )
    }
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "{:?} (HTTP {}): {}", self.kind, status, self.message)
        } else {
            write!(f, "{:?}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for PortalError {}

/// Pull the portal's `{"success": false, "message": "..."}` envelope apart.
fn extract_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("message")
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}

fn extract_retry_after(body: &str) -> Option<u64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("retry_after")
        .or_else(|| v.get("retryAfter"))
        .and_then(|r| r.as_u64())
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_the_taxonomy() {
        assert_eq!(PortalError::from_status(400, "{}").kind, ErrorKind::Validation);
        assert_eq!(PortalError::from_status(401, "{}").kind, ErrorKind::Auth);
        assert_eq!(PortalError::from_status(403, "{}").kind, ErrorKind::Forbidden);
        assert_eq!(PortalError::from_status(404, "{}").kind, ErrorKind::NotFound);
        assert_eq!(PortalError::from_status(429, "{}").kind, ErrorKind::RateLimit);
        assert_eq!(PortalError::from_status(503, "{}").kind, ErrorKind::ServerError);
    }

    #[test]
    fn envelope_message_is_extracted() {
        let err = PortalError::from_status(
            403,
            r#"{"success":false,"message":"Not authorized to access this chat"}"#,
        );
        assert_eq!(err.message, "Not authorized to access this chat");
        assert_eq!(err.status, Some(403));
    }

    #[test]
    fn retry_after_parsed_for_rate_limits() {
        let err = PortalError::from_status(429, r#"{"retry_after": 12}"#);
        assert_eq!(err.retry_after_secs, Some(12));
        assert!(err.user_message().contains("12s"));
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!PortalError::validation("Please provide message content").is_retryable());
        assert!(PortalError::offline().is_retryable());
    }
}
