//! Error taxonomy for the refresh pipeline.
//!
//! Per-entity problems are not errors (see [`crate::normalize::SkipReason`]);
//! only conditions that fail a whole fetch cycle live here.

use std::time::Duration;

use reqwest::StatusCode;

/// Coarse classification of a [`FetchError`], reported to callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Network,
    Timeout,
    Malformed,
}

/// Failure to obtain a decoded feed from upstream.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("feed responded with status {0}")]
    Status(StatusCode),

    #[error("feed did not respond within {0:?}")]
    Timeout(Duration),

    #[error("feed payload is not a valid GTFS-RT message: {0}")]
    Malformed(#[from] prost::DecodeError),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network(_) | FetchError::Status(_) => FetchErrorKind::Network,
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Malformed(_) => FetchErrorKind::Malformed,
        }
    }
}

/// Why a refresh cycle ended in the `Failed` state.
#[derive(Debug, thiserror::Error)]
pub enum RefreshFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The feed had entities but none of them yielded a usable position.
    #[error("no usable vehicle positions in {entities} feed entities")]
    DataQuality { entities: usize },
}

/// Classification of a failed refresh cycle, as reported in status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    Malformed,
    DataQuality,
}

impl RefreshFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            RefreshFailure::Fetch(e) => match e.kind() {
                FetchErrorKind::Network => FailureKind::Network,
                FetchErrorKind::Timeout => FailureKind::Timeout,
                FetchErrorKind::Malformed => FailureKind::Malformed,
            },
            RefreshFailure::DataQuality { .. } => FailureKind::DataQuality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors_are_network_kind() {
        let err = FetchError::Status(StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind(), FetchErrorKind::Network);
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_timeout_kind_and_message() {
        let err = FetchError::Timeout(Duration::from_secs(5));
        assert_eq!(err.kind(), FetchErrorKind::Timeout);
        assert_eq!(err.to_string(), "feed did not respond within 5s");
    }

    #[test]
    fn test_data_quality_message() {
        let failure = RefreshFailure::DataQuality { entities: 12 };
        assert_eq!(
            failure.to_string(),
            "no usable vehicle positions in 12 feed entities"
        );
        assert_eq!(failure.kind(), FailureKind::DataQuality);
    }

    #[test]
    fn test_fetch_failure_kind_follows_fetch_error() {
        let failure = RefreshFailure::from(FetchError::Timeout(Duration::from_secs(1)));
        assert_eq!(failure.kind(), FailureKind::Timeout);
    }
}
