use thiserror::Error;

/// Accrual service failures
///
/// None of these is fatal to the reconciler: the order is skipped and polled
/// again on a later cycle.
#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("Accrual service unavailable: {0}")]
    Unavailable(String),

    #[error("Accrual request timed out")]
    Timeout,

    #[error("Unexpected accrual response status: {0}")]
    UnexpectedStatus(u16),

    #[error("Malformed accrual response: {0}")]
    Decode(String),

    #[error("Accrual client configuration error: {0}")]
    Config(String),
}

impl AccrualError {
    /// Error code for logs
    pub fn code(&self) -> &'static str {
        match self {
            AccrualError::Unavailable(_) => "UNAVAILABLE",
            AccrualError::Timeout => "TIMEOUT",
            AccrualError::UnexpectedStatus(_) => "UNEXPECTED_STATUS",
            AccrualError::Decode(_) => "DECODE",
            AccrualError::Config(_) => "CONFIG",
        }
    }
}

impl From<reqwest::Error> for AccrualError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AccrualError::Timeout
        } else if e.is_decode() {
            AccrualError::Decode(e.to_string())
        } else {
            AccrualError::Unavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(AccrualError::Timeout.code(), "TIMEOUT");
        assert_eq!(AccrualError::UnexpectedStatus(418).code(), "UNEXPECTED_STATUS");
        assert_eq!(
            AccrualError::UnexpectedStatus(418).to_string(),
            "Unexpected accrual response status: 418"
        );
    }
}
