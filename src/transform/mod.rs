//! Transformation path selection and per-request transform functions.

mod compound;
mod factory;
mod selector;

pub use compound::CompoundTransformer;
pub use factory::{round_to, TransformFn};
pub use selector::{needs_epoch, Transformer, TransformerSelector};

use crate::config::Config;
use crate::crs::{CrsIdentifier, CrsRegistry, ExclusionTable};
use crate::error::Result;
use std::sync::Arc;

/// Shared, read-only state needed to build transform functions.
///
/// Constructed once at startup and shared between requests through `Arc`.
/// Per-request state (selected operations) lives in the functions it builds.
pub struct TransformEngine {
    registry: Arc<CrsRegistry>,
    exclusions: ExclusionTable,
    time_dependent_method_codes: Vec<String>,
    default_digits: u32,
    height_digits: u32,
}

impl TransformEngine {
    pub fn new(registry: Arc<CrsRegistry>, config: &Config) -> Self {
        Self {
            registry,
            exclusions: ExclusionTable::new(&config.crs.exclude_transformations),
            time_dependent_method_codes: config.crs.time_dependent_method_codes.clone(),
            default_digits: config.precision.default_digits,
            height_digits: config.precision.height_digits,
        }
    }

    pub fn registry(&self) -> &CrsRegistry {
        &self.registry
    }

    pub fn exclusions(&self) -> &ExclusionTable {
        &self.exclusions
    }

    pub fn time_dependent_method_codes(&self) -> &[String] {
        &self.time_dependent_method_codes
    }

    pub fn height_digits(&self) -> u32 {
        self.height_digits
    }

    /// Output decimals for coordinates in `target`.
    pub fn precision_for(&self, target: &CrsIdentifier) -> Result<u32> {
        self.registry.resolve(target)?.precision(self.default_digits)
    }

    /// Selector with a fresh per-request selection cache.
    pub fn selector(&self) -> TransformerSelector<'_> {
        TransformerSelector::new(self)
    }

    /// Build a position transform function from `source` to `target`.
    ///
    /// `precision` of `None` disables rounding altogether.
    pub fn build_transform_fn(
        &self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
        precision: Option<u32>,
        epoch: Option<f64>,
    ) -> Result<TransformFn> {
        factory::build(self, source, target, precision, epoch)
    }
}
