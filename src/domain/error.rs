//! Error types for region management and fix evaluation

use thiserror::Error;

/// Errors returned by the engine to the caller of the offending operation.
///
/// All variants are local and recoverable; none stops detection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeofenceError {
    /// A region with this id is already registered
    #[error("region already registered: {id}")]
    DuplicateId { id: String },

    /// No region with this id is registered
    #[error("region not found: {id}")]
    NotFound { id: String },

    /// Fix is not newer than the last accepted one
    #[error("stale fix at {timestamp_ms} ms (last accepted {last_accepted_ms} ms)")]
    StaleFix { timestamp_ms: u64, last_accepted_ms: u64 },

    /// Region spec failed validation
    #[error("invalid region {id}: {reason}")]
    InvalidRegion { id: String, reason: String },

    /// Fix coordinates or accuracy are unusable
    #[error("invalid fix: {reason}")]
    InvalidFix { reason: String },

    /// Fix accuracy is worse than the configured limit
    #[error("fix accuracy {accuracy_m:.1} m exceeds limit {limit_m:.1} m")]
    InaccurateFix { accuracy_m: f64, limit_m: f64 },

    /// The engine command loop has stopped
    #[error("engine is not running")]
    EngineClosed,
}

impl GeofenceError {
    /// Short label used for metrics and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceError::DuplicateId { .. } => "duplicate_id",
            GeofenceError::NotFound { .. } => "not_found",
            GeofenceError::StaleFix { .. } => "stale_fix",
            GeofenceError::InvalidRegion { .. } => "invalid_region",
            GeofenceError::InvalidFix { .. } => "invalid_fix",
            GeofenceError::InaccurateFix { .. } => "inaccurate_fix",
            GeofenceError::EngineClosed => "engine_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GeofenceError::StaleFix { timestamp_ms: 10, last_accepted_ms: 20 };
        assert_eq!(err.to_string(), "stale fix at 10 ms (last accepted 20 ms)");
        assert_eq!(err.as_str(), "stale_fix");

        let err = GeofenceError::DuplicateId { id: "home".to_string() };
        assert_eq!(err.to_string(), "region already registered: home");
    }
}
