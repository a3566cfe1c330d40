//! Transformation path selection.
//!
//! The backend ranks candidates; this module only decides which candidate
//! may be used given the optional epoch:
//!
//! - Without an epoch, the best candidate that is not time-dependent wins.
//!   A time-dependent candidate would silently use a default epoch.
//! - With an epoch, the best candidate wins.

use super::TransformEngine;
use crate::backend::{InputCoord, Operation, OperationMetadata, StepKind};
use crate::crs::CrsIdentifier;
use crate::error::{Result, TransformError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

type SelectionKey = (CrsIdentifier, CrsIdentifier, Option<u64>);

/// A selected operation together with its time-dependence.
pub struct Transformer {
    operation: Box<dyn Operation>,
    time_dependent: bool,
}

impl Transformer {
    pub fn new(operation: Box<dyn Operation>, time_dependent: bool) -> Self {
        Self {
            operation,
            time_dependent,
        }
    }

    pub fn metadata(&self) -> &OperationMetadata {
        self.operation.metadata()
    }

    pub fn is_time_dependent(&self) -> bool {
        self.time_dependent
    }

    /// Number of axes of the operation's target CRS.
    pub fn target_axis_count(&self) -> usize {
        self.operation.metadata().target.axis_count
    }

    /// Apply the operation; the epoch is only passed to time-dependent
    /// operations.
    pub fn transform(&self, position: &[f64], epoch: Option<f64>) -> Result<Vec<f64>> {
        let epoch = epoch.filter(|_| self.time_dependent);
        self.operation.transform(&InputCoord::build(position, epoch))
    }
}

/// Whether an operation needs an epoch to give a correct result.
///
/// True when the target datum is a dynamic reference frame, or when any
/// transformation step uses one of `method_codes`.
pub fn needs_epoch(metadata: &OperationMetadata, method_codes: &[String]) -> bool {
    if metadata.target.dynamic_datum {
        return true;
    }

    metadata.steps.iter().any(|step| {
        step.kind == StepKind::Transformation
            && step
                .method_code
                .as_ref()
                .is_some_and(|code| method_codes.contains(code))
    })
}

/// Selects operations for one request, memoizing by (source, target, epoch).
pub struct TransformerSelector<'a> {
    engine: &'a TransformEngine,
    cache: RefCell<HashMap<SelectionKey, Rc<Transformer>>>,
}

impl<'a> TransformerSelector<'a> {
    pub fn new(engine: &'a TransformEngine) -> Self {
        Self {
            engine,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Select the operation to use from `source` to `target`.
    pub fn select(
        &self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
        epoch: Option<f64>,
    ) -> Result<Rc<Transformer>> {
        let key = (source.clone(), target.clone(), epoch.map(f64::to_bits));

        if let Some(hit) = self.cache.borrow().get(&key) {
            return Ok(hit.clone());
        }

        let transformer = Rc::new(self.select_uncached(source, target, epoch)?);
        self.cache.borrow_mut().insert(key, transformer.clone());
        Ok(transformer)
    }

    fn select_uncached(
        &self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
        epoch: Option<f64>,
    ) -> Result<Transformer> {
        let registry = self.engine.registry();
        let source_info = registry.resolve(source)?;
        let target_info = registry.resolve(target)?;

        if source_info.axis_count() < target_info.axis_count() {
            return Err(TransformError::not_possible(
                source,
                target,
                format!(
                    "number of dimensions source-crs: {}, number of dimensions target-crs: {}",
                    source_info.axis_count(),
                    target_info.axis_count()
                ),
            ));
        }

        if self.engine.exclusions().is_excluded(source, target) {
            return Err(TransformError::not_possible(source, target, "excluded"));
        }

        let candidates = registry.backend().operations(source, target)?;
        if candidates.is_empty() {
            return Err(TransformError::not_possible(
                source,
                target,
                "no transformation path available",
            ));
        }

        tracing::debug!(
            "{} candidate operation(s) from {} to {}",
            candidates.len(),
            source,
            target
        );

        let method_codes = self.engine.time_dependent_method_codes();
        let mut ranked = candidates.into_iter().map(|op| {
            let time_dependent = needs_epoch(op.metadata(), method_codes);
            (op, time_dependent)
        });

        let selected = match epoch {
            None => ranked.find(|(_, time_dependent)| !time_dependent),
            Some(_) => ranked.next(),
        };

        let Some((operation, time_dependent)) = selected else {
            return Err(TransformError::not_possible(
                source,
                target,
                "transformation is not possible without an input epoch",
            ));
        };

        tracing::debug!(
            "Selected '{}' from {} to {} (time-dependent: {})",
            operation.metadata().name,
            source,
            target,
            time_dependent
        );

        Ok(Transformer::new(operation, time_dependent))
    }
}
