//! Builds position transform functions for a (source, target, epoch) triple.

use super::compound::CompoundTransformer;
use super::TransformEngine;
use crate::crs::CrsIdentifier;
use crate::error::{Result, TransformError};
use tracing::warn;

/// Transforms one position. Owns its selected operations.
pub type TransformFn = Box<dyn Fn(&[f64]) -> Result<Vec<f64>>>;

/// Round half away from zero to `digits` decimals.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

pub(super) fn build(
    engine: &TransformEngine,
    source: &CrsIdentifier,
    target: &CrsIdentifier,
    precision: Option<u32>,
    epoch: Option<f64>,
) -> Result<TransformFn> {
    let selector = engine.selector();
    let whole = selector.select(source, target, epoch)?;

    let dim = whole.target_axis_count();
    if !(2..=3).contains(&dim) {
        return Err(TransformError::Dimension(format!(
            "target CRS {} has {} axes, expected 2 or 3",
            target, dim
        )));
    }

    let height_digits = precision.map(|_| engine.height_digits());

    let source_info = engine.registry().resolve(source)?;
    let target_info = engine.registry().resolve(target)?;

    if CompoundTransformer::applies(&source_info, &target_info) {
        let compound = CompoundTransformer::new(&selector, &source_info, &target_info, whole, epoch)?;
        return Ok(Box::new(move |position: &[f64]| {
            check_input(position)?;
            let out = compound.transform(position, epoch)?;
            finish(&out, dim, precision, height_digits)
        }));
    }

    Ok(Box::new(move |position: &[f64]| {
        check_input(position)?;
        let out = whole.transform(position, epoch)?;
        finish(&out, dim, precision, height_digits)
    }))
}

fn check_input(position: &[f64]) -> Result<()> {
    if position.len() < 2 {
        return Err(TransformError::Dimension(format!(
            "position needs at least 2 ordinates, got {}",
            position.len()
        )));
    }
    Ok(())
}

/// Truncate to `dim` ordinates, apply the infinity policy and round.
pub(crate) fn finish(
    output: &[f64],
    dim: usize,
    precision: Option<u32>,
    height_digits: Option<u32>,
) -> Result<Vec<f64>> {
    let mut values: Vec<f64> = output.iter().take(dim).copied().collect();

    if values.len() < 2 {
        return Err(TransformError::Dimension(format!(
            "operation returned {} ordinates",
            values.len()
        )));
    }

    if values.len() == 3 && !values[2].is_finite() {
        warn!(
            "Dropping non-finite height for position ({}, {})",
            values[0], values[1]
        );
        values.truncate(2);
    }

    if values[..2].iter().any(|v| !v.is_finite()) {
        return Err(TransformError::InfiniteCoordinate(format!("{:?}", values)));
    }

    if let Some(digits) = precision {
        values[0] = round_to(values[0], digits);
        values[1] = round_to(values[1], digits);
    }
    if let (Some(digits), Some(z)) = (height_digits, values.get_mut(2)) {
        *z = round_to(*z, digits);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::fixtures::{dutch_backend, id};
    use crate::backend::GeodeticBackend;
    use crate::config::Config;
    use crate::crs::{codes, CrsRegistry};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn engine() -> TransformEngine {
        let backend: Arc<dyn GeodeticBackend> = Arc::new(dutch_backend());
        TransformEngine::new(Arc::new(CrsRegistry::new(backend, &[])), &Config::default())
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(3.313687621, 4), 3.3137);
        assert_eq!(round_to(47.974858156, 4), 47.9749);
        assert_eq!(round_to(12.5, 0), 13.0);
    }

    #[test]
    fn test_finish_drops_infinite_height() {
        let out = finish(&[1.0, 2.0, f64::INFINITY], 3, Some(4), Some(4)).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_finish_rejects_infinite_horizontal() {
        let err = finish(&[f64::INFINITY, 2.0, 3.0], 3, Some(4), Some(4)).unwrap_err();
        assert!(matches!(err, TransformError::InfiniteCoordinate(_)));
    }

    #[test]
    fn test_finish_truncates_time_ordinate() {
        let out = finish(&[1.0, 2.0, 3.0, 2020.0], 3, None, None).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
        let out = finish(&[1.0, 2.0, 3.0], 2, None, None).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn test_build_and_round() {
        let engine = engine();
        let target = id(codes::WGS84);
        let precision = engine.precision_for(&target).unwrap();
        assert_eq!(precision, 9);

        let f = engine
            .build_transform_fn(&id(codes::RD_NEW), &target, Some(precision), None)
            .unwrap();
        let out = f(&[10.0, 10.0]).unwrap();
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[0], 3.0001, epsilon = 1e-12);
        assert_relative_eq!(out[1], 47.0001, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip() {
        let engine = engine();
        let forward = engine
            .build_transform_fn(&id(codes::RD_NEW), &id(codes::WGS84), None, None)
            .unwrap();
        let back = engine
            .build_transform_fn(&id(codes::WGS84), &id(codes::RD_NEW), Some(4), None)
            .unwrap();

        let p = [155_000.0, 463_000.0];
        let out = back(&forward(&p).unwrap()).unwrap();
        assert_relative_eq!(out[0], p[0], epsilon = 1e-3);
        assert_relative_eq!(out[1], p[1], epsilon = 1e-3);
    }

    #[test]
    fn test_height_drop_on_compound_target() {
        let engine = engine();
        let f = engine
            .build_transform_fn(&id(codes::ETRF2000_3D), &id(codes::RD_NAP), Some(4), None)
            .unwrap();

        assert_eq!(
            f(&[5.0, 52.0, 50.0]).unwrap(),
            vec![200_000.0, 500_000.0, 7.0]
        );
        // Outside the geoid model: horizontal result only
        assert_eq!(f(&[11.0, 52.0, 50.0]).unwrap(), vec![800_000.0, 500_000.0]);
    }

    #[test]
    fn test_epoch_changes_selected_operation() {
        let engine = engine();
        let source = id(codes::RD_NAP);
        let target = id(codes::WEB_MERCATOR);

        let with_epoch = engine
            .build_transform_fn(&source, &target, Some(4), Some(2013.3))
            .unwrap();
        assert_eq!(with_epoch(&[1000.0, 1000.0]).unwrap(), vec![1001.0, 1001.0]);

        let without_epoch = engine
            .build_transform_fn(&source, &target, Some(4), None)
            .unwrap();
        assert_eq!(without_epoch(&[1000.0, 1000.0]).unwrap(), vec![1002.0, 1002.0]);
    }

    #[test]
    fn test_vertical_target_is_dimension_error() {
        let engine = engine();
        let result = engine.build_transform_fn(&id(codes::ETRF2000_3D), &id(codes::NAP), None, None);
        assert!(matches!(result, Err(TransformError::Dimension(_))));
    }

    #[test]
    fn test_short_position_is_dimension_error() {
        let engine = engine();
        let f = engine
            .build_transform_fn(&id(codes::RD_NEW), &id(codes::WGS84), None, None)
            .unwrap();
        assert!(matches!(f(&[1.0]), Err(TransformError::Dimension(_))));
    }
}
