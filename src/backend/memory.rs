//! In-memory geodetic backend.
//!
//! CRSs and operations are registered up front; operations are plain
//! functions. Useful for embedding fixed transformations and for testing the
//! selection policy without a PROJ database.

use super::{CrsSummary, GeodeticBackend, InputCoord, Operation, OperationMetadata, OperationStep};
use crate::crs::{CrsIdentifier, CrsInfo};
use crate::error::{Result, TransformError};
use std::collections::HashMap;
use std::sync::Arc;

type OperationFn = Arc<dyn Fn(&InputCoord) -> Vec<f64> + Send + Sync>;

#[derive(Clone)]
struct Registered {
    metadata: OperationMetadata,
    func: OperationFn,
}

/// Backend holding registered CRSs and operations in rank order.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    crs: HashMap<CrsIdentifier, CrsInfo>,
    operations: HashMap<(CrsIdentifier, CrsIdentifier), Vec<Registered>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_crs(&mut self, info: CrsInfo) -> &mut Self {
        self.crs.insert(info.identifier.clone(), info);
        self
    }

    /// Register a candidate operation; earlier registrations rank higher.
    ///
    /// Source/target summaries default to the registered CRS metadata when
    /// left empty in `metadata`.
    pub fn register_operation<F>(
        &mut self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
        mut metadata: OperationMetadata,
        func: F,
    ) -> &mut Self
    where
        F: Fn(&InputCoord) -> Vec<f64> + Send + Sync + 'static,
    {
        if metadata.source == CrsSummary::default() {
            if let Some(info) = self.crs.get(source) {
                metadata.source = CrsSummary::of(info);
            }
        }
        if metadata.target == CrsSummary::default() {
            if let Some(info) = self.crs.get(target) {
                metadata.target = CrsSummary::of(info);
            }
        }

        self.operations
            .entry((source.clone(), target.clone()))
            .or_default()
            .push(Registered {
                metadata,
                func: Arc::new(func),
            });
        self
    }

    /// Register a single-step operation with default metadata.
    pub fn register_fn<F>(
        &mut self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
        name: &str,
        func: F,
    ) -> &mut Self
    where
        F: Fn(&InputCoord) -> Vec<f64> + Send + Sync + 'static,
    {
        let metadata = OperationMetadata {
            name: name.to_string(),
            source: CrsSummary::default(),
            target: CrsSummary::default(),
            steps: vec![OperationStep::conversion(name)],
            accuracy: None,
        };
        self.register_operation(source, target, metadata, func)
    }

    fn identity(&self, id: &CrsIdentifier) -> Option<Box<dyn Operation>> {
        let info = self.crs.get(id)?;
        let summary = CrsSummary::of(info);
        Some(Box::new(MemoryOperation {
            metadata: OperationMetadata {
                name: format!("Identity {}", id),
                source: summary.clone(),
                target: summary,
                steps: Vec::new(),
                accuracy: Some(0.0),
            },
            func: Arc::new(|coord: &InputCoord| coord.ordinates.clone()),
        }))
    }
}

impl GeodeticBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn resolve_crs(&self, id: &CrsIdentifier) -> Result<CrsInfo> {
        self.crs
            .get(id)
            .cloned()
            .ok_or_else(|| TransformError::UnknownCrs(id.to_string()))
    }

    fn operations(
        &self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
    ) -> Result<Vec<Box<dyn Operation>>> {
        self.resolve_crs(source)?;
        self.resolve_crs(target)?;

        let registered = self
            .operations
            .get(&(source.clone(), target.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default();

        if registered.is_empty() && source == target {
            return Ok(self.identity(source).into_iter().collect());
        }

        Ok(registered
            .iter()
            .map(|r| {
                Box::new(MemoryOperation {
                    metadata: r.metadata.clone(),
                    func: r.func.clone(),
                }) as Box<dyn Operation>
            })
            .collect())
    }
}

struct MemoryOperation {
    metadata: OperationMetadata,
    func: OperationFn,
}

impl Operation for MemoryOperation {
    fn metadata(&self) -> &OperationMetadata {
        &self.metadata
    }

    fn transform(&self, coord: &InputCoord) -> Result<Vec<f64>> {
        if coord.ordinates.len() < 2 {
            return Err(TransformError::Dimension(format!(
                "expected at least 2 ordinates, got {}",
                coord.ordinates.len()
            )));
        }
        Ok((self.func)(coord))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{dutch_backend, id};
    use super::*;
    use crate::crs::codes;

    #[test]
    fn test_resolve_unknown() {
        let backend = dutch_backend();
        assert!(matches!(
            backend.resolve_crs(&id("EPSG:1234")),
            Err(TransformError::UnknownCrs(_))
        ));
    }

    #[test]
    fn test_operations_in_rank_order() {
        let backend = dutch_backend();
        let ops = backend
            .operations(&id(codes::RD_NAP), &id(codes::WEB_MERCATOR))
            .unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].metadata().name, "RD NAP to Pseudo-Mercator (ITRF2014)");
        assert_eq!(ops[1].metadata().name, "RD NAP to Pseudo-Mercator");
        assert_eq!(ops[0].metadata().target.axis_count, 2);
    }

    #[test]
    fn test_identity_for_same_crs() {
        let backend = dutch_backend();
        let ops = backend.operations(&id(codes::NAP), &id(codes::NAP)).unwrap();
        assert_eq!(ops.len(), 1);
        let out = ops[0]
            .transform(&InputCoord::build(&[1.0, 2.0, 3.0], None))
            .unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_no_path() {
        let backend = dutch_backend();
        let ops = backend.operations(&id(codes::NAP), &id(codes::WGS84)).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn test_transform_requires_two_ordinates() {
        let backend = dutch_backend();
        let ops = backend.operations(&id(codes::RD_NEW), &id(codes::WGS84)).unwrap();
        assert!(ops[0].transform(&InputCoord::build(&[1.0], None)).is_err());
    }
}
