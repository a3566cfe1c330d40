//! Error types for transformation, densification and density checks.

use crate::densify::DensityCheckReport;
use serde::Serialize;
use thiserror::Error;

/// Result alias used by the engine.
pub type Result<T, E = TransformError> = std::result::Result<T, E>;

/// Errors raised while resolving CRSs or transforming payloads.
///
/// All variants are data-validation failures of a single request; none of
/// them leave shared state behind.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The identifier could not be resolved by the geodetic backend.
    #[error("CRS with id {0} could not be resolved")]
    UnknownCrs(String),

    /// The identifier resolves but is not in the configured list.
    #[error("CRS with id {0} not supported")]
    UnsupportedCrs(String),

    #[error("Transformation not possible between {source_crs} and {target_crs}, {reason}")]
    TransformationNotPossible {
        source_crs: String,
        target_crs: String,
        reason: String,
    },

    /// A horizontal ordinate came back infinite.
    #[error("Out of range float values are not JSON compliant: {0}")]
    InfiniteCoordinate(String),

    #[error("dimension error: {0}")]
    Dimension(String),

    #[error("Unexpected unit in x axis (x, e, lon) of CRS {crs} - expected values: degree, metre, actual value: {unit}")]
    UnsupportedUnit { crs: String, unit: String },

    /// Failure reported by the geodetic backend itself.
    #[error("geodetic backend error: {0}")]
    Backend(String),

    /// Neither the body nor the request carry a CRS.
    #[error("missing {0}")]
    MissingCrs(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Densify(String),

    #[error("Geometries not within bbox {bbox:?} ({crs}), required when max-segment-deviation is set")]
    DeviationOutOfBbox { bbox: [f64; 4], crs: String },

    #[error("{message}")]
    DensityCheckFailed {
        message: String,
        report: Box<DensityCheckReport>,
    },

    #[error("number of coordinates {count} exceeds the limit of {limit}")]
    CoordinateLimitExceeded { count: usize, limit: usize },
}

impl TransformError {
    pub(crate) fn not_possible(
        source: impl ToString,
        target: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        TransformError::TransformationNotPossible {
            source_crs: source.to_string(),
            target_crs: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable problem type identifier.
    pub fn error_type(&self) -> &'static str {
        match self {
            TransformError::UnknownCrs(_) | TransformError::UnsupportedCrs(_) => {
                "nsgi.nl/crs-not-found-error"
            }
            TransformError::TransformationNotPossible { .. } => {
                "nsgi.nl/transformation-not-possible"
            }
            TransformError::DensityCheckFailed { .. } => "nsgi.nl/density-check-failed",
            TransformError::DeviationOutOfBbox { .. } => "nsgi.nl/deviation-data-outside-bbox",
            TransformError::Densify(_) => "nsgi.nl/densification-error",
            _ => "nsgi.nl/data-validation-error",
        }
    }

    /// Human readable problem title.
    pub fn title(&self) -> &'static str {
        match self {
            TransformError::UnknownCrs(_) | TransformError::UnsupportedCrs(_) => {
                "CRS Not Found Error"
            }
            TransformError::TransformationNotPossible { .. } => "Transformation Not Possible",
            TransformError::DensityCheckFailed { .. } => "Density Check Failed",
            TransformError::DeviationOutOfBbox { .. } => {
                "Data Outside Bounding Box when Using Deviation"
            }
            TransformError::Densify(_) => "Error Occured in Densification",
            _ => "Data Validation Error",
        }
    }

    /// Render the error as a problem document.
    pub fn to_problem(&self) -> Problem {
        let report = match self {
            TransformError::DensityCheckFailed { report, .. } => {
                serde_json::to_value(report.as_ref()).ok()
            }
            _ => None,
        };
        Problem {
            kind: self.error_type(),
            title: self.title(),
            detail: self.to_string(),
            report,
        }
    }
}

/// Serializable problem document for reporting errors to callers.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_possible_message() {
        let err = TransformError::not_possible("EPSG:7415", "EPSG:28992", "excluded");
        assert_eq!(
            err.to_string(),
            "Transformation not possible between EPSG:7415 and EPSG:28992, excluded"
        );
        assert_eq!(err.error_type(), "nsgi.nl/transformation-not-possible");
    }

    #[test]
    fn test_problem_document() {
        let problem = TransformError::UnsupportedCrs("EPSG:1234".to_string()).to_problem();
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["type"], "nsgi.nl/crs-not-found-error");
        assert_eq!(json["title"], "CRS Not Found Error");
        assert!(json.get("report").is_none());
    }
}
