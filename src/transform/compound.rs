//! Horizontal/vertical decomposition for compound target CRSs.

use super::selector::{Transformer, TransformerSelector};
use crate::crs::CrsInfo;
use crate::error::{Result, TransformError};
use std::rc::Rc;
use tracing::warn;

/// Transforms horizontal and vertical components with separate operations.
///
/// Both legs receive the same input position. The vertical leg falls back to
/// the operation selected for the whole pair when no usable vertical
/// operation exists.
pub struct CompoundTransformer {
    horizontal: Rc<Transformer>,
    vertical: Rc<Transformer>,
}

impl CompoundTransformer {
    /// Whether a transform from `source` to `target` goes through the split.
    pub fn applies(source: &CrsInfo, target: &CrsInfo) -> bool {
        target.is_compound() && !source.is_geocentric()
    }

    pub fn new(
        selector: &TransformerSelector<'_>,
        source: &CrsInfo,
        target: &CrsInfo,
        whole: Rc<Transformer>,
        epoch: Option<f64>,
    ) -> Result<Self> {
        let (target_h, target_v) = target.horizontal_vertical();
        let (source_h, source_v) = if source.is_compound() {
            source.horizontal_vertical()
        } else {
            (source.identifier.clone(), source.identifier.clone())
        };

        let horizontal = selector.select(&source_h, &target_h, epoch)?;

        let vertical = match selector.select(&source_v, &target_v, epoch) {
            Ok(v) if v.metadata().source.identifier.is_some() => v,
            Ok(v) => {
                warn!(
                    "Vertical operation '{}' has no source CRS identifier, using {} to {} for heights",
                    v.metadata().name,
                    source.identifier,
                    target.identifier
                );
                whole
            }
            Err(TransformError::TransformationNotPossible { reason, .. }) => {
                warn!(
                    "No vertical operation from {} to {} ({}), using {} to {} for heights",
                    source_v, target_v, reason, source.identifier, target.identifier
                );
                whole
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            "Compound transform {} -> {}: horizontal '{}', vertical '{}'",
            source.identifier,
            target.identifier,
            horizontal.metadata().name,
            vertical.metadata().name
        );

        Ok(Self {
            horizontal,
            vertical,
        })
    }

    /// Horizontal x, y from the first leg plus z from the second, if any.
    pub fn transform(&self, position: &[f64], epoch: Option<f64>) -> Result<Vec<f64>> {
        let h = self.horizontal.transform(position, epoch)?;
        let v = self.vertical.transform(position, epoch)?;

        if h.len() < 2 {
            return Err(TransformError::Dimension(format!(
                "horizontal operation returned {} ordinates",
                h.len()
            )));
        }

        let mut out = vec![h[0], h[1]];
        if let Some(z) = v.get(2) {
            out.push(*z);
        }
        Ok(out)
    }
}
