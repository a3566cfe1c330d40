//! Geodetic backends.
//!
//! A backend resolves CRS metadata and returns the ranked candidate
//! operations between two CRSs. The engine only applies its own selection
//! policy on top of that ranking; it never does geodetic math itself.

pub mod memory;
#[cfg(feature = "proj")]
pub mod proj;

pub use memory::MemoryBackend;
#[cfg(feature = "proj")]
pub use self::proj::ProjBackend;

use crate::crs::{CrsIdentifier, CrsInfo};
use crate::error::Result;
use serde::Serialize;

/// Position handed to an operation: x, y[, z] plus an optional epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct InputCoord {
    pub ordinates: Vec<f64>,
    pub epoch: Option<f64>,
}

impl InputCoord {
    /// Build the input for a transformation call.
    ///
    /// With an epoch, 2D input is padded with a `0.0` height so the epoch is
    /// never read as a height. Without an epoch the position passes through
    /// unchanged.
    pub fn build(position: &[f64], epoch: Option<f64>) -> Self {
        let mut ordinates = position.to_vec();
        if epoch.is_some() && ordinates.len() == 2 {
            ordinates.push(0.0);
        }
        Self { ordinates, epoch }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Conversion,
    Transformation,
    Concatenated,
    Other,
}

/// One step of a (possibly concatenated) operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStep {
    pub name: String,
    pub kind: StepKind,
    /// Method code in the backend's operation catalogue (e.g. EPSG `1056`).
    pub method_code: Option<String>,
}

impl OperationStep {
    pub fn transformation(name: &str, method_code: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: StepKind::Transformation,
            method_code: Some(method_code.to_string()),
        }
    }

    pub fn conversion(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: StepKind::Conversion,
            method_code: None,
        }
    }
}

/// Source or target CRS of an operation, as seen by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrsSummary {
    /// `None` when the backend cannot name the CRS by authority code.
    pub identifier: Option<CrsIdentifier>,
    pub axis_count: usize,
    pub dynamic_datum: bool,
}

impl CrsSummary {
    pub fn of(info: &CrsInfo) -> Self {
        Self {
            identifier: Some(info.identifier.clone()),
            axis_count: info.axis_count(),
            dynamic_datum: info.dynamic_datum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationMetadata {
    pub name: String,
    pub source: CrsSummary,
    pub target: CrsSummary,
    pub steps: Vec<OperationStep>,
    /// Accuracy in metres, when known.
    pub accuracy: Option<f64>,
}

/// A candidate coordinate operation.
///
/// Operations are not required to be `Send`: backends may hold thread-bound
/// handles. Output is x, y, z in always-xy order; any time ordinate is
/// dropped.
pub trait Operation {
    fn metadata(&self) -> &OperationMetadata;

    fn transform(&self, coord: &InputCoord) -> Result<Vec<f64>>;
}

/// Resolves CRSs and ranks candidate operations between them.
pub trait GeodeticBackend: Send + Sync {
    fn name(&self) -> &str;

    fn resolve_crs(&self, id: &CrsIdentifier) -> Result<CrsInfo>;

    /// Candidate operations, best first.
    fn operations(
        &self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
    ) -> Result<Vec<Box<dyn Operation>>>;
}
