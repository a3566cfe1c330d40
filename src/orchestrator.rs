//! Request orchestration: CRS precedence, validation, density checks and
//! payload transformation.

use crate::config::{Config, DensifyConfig, LimitsConfig};
use crate::crs::{CrsIdentifier, CrsInfo};
use crate::densify::{
    check_geojson, densify_geojson, ensure_within, failed_segments_collection, DensityCheckReport,
    DensityCheckResult, GeodesicDensifier, SegmentParams,
};
use crate::error::{Result, TransformError};
use crate::geometry::walker::map_positions;
use crate::geometry::{traverse, update_bbox, Body, GeoJson};
use crate::metrics::Metrics;
use crate::transform::TransformEngine;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const ONLY_POINTS: &str = "GeoJSON contains only (Multi)Point geometries";

/// CRS parameters of one request.
///
/// `source_crs`/`target_crs` are explicit parameters; `content_crs` and
/// `accept_crs` are the weaker header-style fallbacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrsParams {
    pub source_crs: Option<CrsIdentifier>,
    pub target_crs: Option<CrsIdentifier>,
    pub content_crs: Option<CrsIdentifier>,
    pub accept_crs: Option<CrsIdentifier>,
    pub epoch: Option<f64>,
}

impl CrsParams {
    pub fn new(source_crs: CrsIdentifier, target_crs: CrsIdentifier) -> Self {
        Self {
            source_crs: Some(source_crs),
            target_crs: Some(target_crs),
            ..Self::default()
        }
    }

    pub fn with_epoch(mut self, epoch: Option<f64>) -> Self {
        self.epoch = epoch;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformOptions {
    /// Run the density check before transforming GeoJSON
    pub density_check: bool,
    pub segment: SegmentParams,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            density_check: true,
            segment: SegmentParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    pub body: Body,
    pub target_crs: CrsIdentifier,
    pub epoch: Option<f64>,
    pub density_check: DensityCheckResult,
}

/// Entry point for transforming, densifying and checking payloads.
///
/// Holds only shared read-only state; every call builds its own transform
/// functions.
pub struct Orchestrator {
    engine: Arc<TransformEngine>,
    densify: DensifyConfig,
    limits: LimitsConfig,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(engine: Arc<TransformEngine>, config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            engine,
            densify: config.densify.clone(),
            limits: config.limits.clone(),
            metrics,
        }
    }

    pub fn engine(&self) -> &TransformEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Body CRS, then explicit source, then content CRS.
    pub fn resolve_source_crs(
        &self,
        declared: Option<CrsIdentifier>,
        params: &CrsParams,
    ) -> Result<CrsIdentifier> {
        declared
            .or_else(|| params.source_crs.clone())
            .or_else(|| params.content_crs.clone())
            .ok_or(TransformError::MissingCrs("source-crs"))
    }

    /// Explicit target, then accept CRS.
    pub fn resolve_target_crs(&self, params: &CrsParams) -> Result<CrsIdentifier> {
        params
            .target_crs
            .clone()
            .or_else(|| params.accept_crs.clone())
            .ok_or(TransformError::MissingCrs("target-crs"))
    }

    /// Supported and resolvable.
    pub fn ensure_supported(&self, id: &CrsIdentifier) -> Result<CrsInfo> {
        let registry = self.engine.registry();
        registry.ensure_supported(id)?;
        registry.resolve(id)
    }

    /// Both CRSs supported and the target has no more axes than the source.
    pub fn validate_pair(
        &self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
    ) -> Result<(CrsInfo, CrsInfo)> {
        let source_info = self.ensure_supported(source)?;
        let target_info = self.ensure_supported(target)?;

        if source_info.axis_count() < target_info.axis_count() {
            return Err(TransformError::InvalidInput(format!(
                "number of dimensions of target-crs should be equal or less then that of the source-crs, \
                 source-crs: {}, dimensions: {}, target-crs: {}, dimensions: {}",
                source,
                source_info.axis_count(),
                target,
                target_info.axis_count()
            )));
        }
        Ok((source_info, target_info))
    }

    /// Transform a single position.
    ///
    /// The number of ordinates must match the source axis count. A height
    /// that comes back non-finite is dropped.
    pub fn transform_coordinates(
        &self,
        coordinates: &[f64],
        source: &CrsIdentifier,
        target: &CrsIdentifier,
        epoch: Option<f64>,
    ) -> Result<Vec<f64>> {
        let (source_info, target_info) = self.validate_pair(source, target)?;
        if coordinates.len() != source_info.axis_count() {
            return Err(TransformError::InvalidInput(format!(
                "number of coordinates must match number of dimensions of source-crs ({}), got {}",
                source_info.axis_count(),
                coordinates.len()
            )));
        }

        let precision = self.engine.precision_for(target)?;
        let transform = self
            .engine
            .build_transform_fn(source, target, Some(precision), epoch)?;

        let start = Instant::now();
        let out = transform(coordinates)?;
        self.metrics.add_transform_time(start.elapsed());
        self.metrics.add_positions_transformed(1);
        if coordinates.len() == 3 && target_info.axis_count() == 3 && out.len() == 2 {
            self.metrics.add_heights_dropped(1);
        }
        Ok(out)
    }

    /// Transform a GeoJSON or CityJSON body.
    ///
    /// GeoJSON is density checked first unless disabled; a failing check
    /// aborts with [`TransformError::DensityCheckFailed`].
    pub fn transform_body(
        &self,
        body: Body,
        params: &CrsParams,
        options: &TransformOptions,
    ) -> Result<TransformOutcome> {
        self.record(self.transform_body_inner(body, params, options))
    }

    fn transform_body_inner(
        &self,
        mut body: Body,
        params: &CrsParams,
        options: &TransformOptions,
    ) -> Result<TransformOutcome> {
        let source = self.resolve_source_crs(body.source_crs()?, params)?;
        let target = self.resolve_target_crs(params)?;
        let (source_info, target_info) = self.validate_pair(&source, &target)?;
        self.check_limit(body.coordinate_count())?;

        let epoch = params.epoch;
        let precision = self.engine.precision_for(&target)?;

        let density_check = match &mut body {
            Body::CityJson(city) => {
                let transform = self
                    .engine
                    .build_transform_fn(&source, &target, Some(precision), epoch)?;
                let start = Instant::now();
                city.crs_transform(&transform, &target, precision, self.engine.height_digits())?;
                self.metrics.add_transform_time(start.elapsed());
                self.metrics
                    .add_positions_transformed(city.vertices.len() as u64);
                DensityCheckResult::NotImplemented
            }
            Body::GeoJson(geojson) => {
                let density_check = if !options.density_check {
                    DensityCheckResult::NotRun
                } else if geojson.contains_only_points() {
                    DensityCheckResult::NotApplicableGeomType
                } else {
                    let report = self.check_density_resolved(geojson, &source, &source_info, &options.segment, epoch)?;
                    if report.check_result == DensityCheckResult::Failed {
                        return Err(TransformError::DensityCheckFailed {
                            message: format!(
                                "density-check failed, with following query parameters: density-check: true, {}",
                                options.segment.describe(&self.densify)
                            ),
                            report: Box::new(report),
                        });
                    }
                    report.check_result
                };

                self.transform_geojson(geojson, &source, &target, &target_info, Some(precision), epoch)?;
                geojson.set_declared_crs(&target);
                density_check
            }
        };

        info!(
            "Transformed payload from {} to {} (density check: {})",
            source, target, density_check
        );

        Ok(TransformOutcome {
            body,
            target_crs: target,
            epoch,
            density_check,
        })
    }

    /// Densify line-like geometries so no segment exceeds the maximum.
    ///
    /// Returns the source CRS the body was densified in.
    pub fn densify_body(
        &self,
        geojson: &mut GeoJson,
        params: &CrsParams,
        segment: &SegmentParams,
    ) -> Result<CrsIdentifier> {
        self.record(self.densify_body_inner(geojson, params, segment))
    }

    fn densify_body_inner(
        &self,
        geojson: &mut GeoJson,
        params: &CrsParams,
        segment: &SegmentParams,
    ) -> Result<CrsIdentifier> {
        let (source, source_info) = self.densify_source(geojson, params)?;

        let start = Instant::now();
        let (mut working, working_crs, max_length) =
            self.to_working_crs(geojson, &source, &source_info, segment, params.epoch)?;
        densify_geojson(&mut working, &GeodesicDensifier, max_length);
        self.metrics.add_densify_time(start.elapsed());

        let precision = self.engine.precision_for(&source)?;
        self.transform_geojson(
            &mut working,
            &working_crs,
            &source,
            &source_info,
            Some(precision),
            params.epoch,
        )?;
        debug!(
            "Densified {} positions to {} via {}",
            geojson.positions().len(),
            working.positions().len(),
            working_crs
        );

        *geojson = working;
        Ok(source)
    }

    /// Report segments longer than the maximum, in the source CRS.
    pub fn check_density_body(
        &self,
        geojson: &GeoJson,
        params: &CrsParams,
        segment: &SegmentParams,
    ) -> Result<DensityCheckReport> {
        let result = self
            .densify_source(geojson, params)
            .and_then(|(source, info)| {
                self.check_density_resolved(geojson, &source, &info, segment, params.epoch)
            });
        self.record(result)
    }

    fn check_density_resolved(
        &self,
        geojson: &GeoJson,
        source: &CrsIdentifier,
        source_info: &CrsInfo,
        segment: &SegmentParams,
        epoch: Option<f64>,
    ) -> Result<DensityCheckReport> {
        let start = Instant::now();
        let (working, working_crs, max_length) =
            self.to_working_crs(geojson, source, source_info, segment, epoch)?;
        let failed = check_geojson(&working, &GeodesicDensifier, max_length);
        self.metrics.add_densify_time(start.elapsed());

        if failed.is_empty() {
            return Ok(DensityCheckReport::new(DensityCheckResult::Success));
        }

        warn!(
            "Density check found {} segment(s) longer than {:.3} m",
            failed.len(),
            max_length
        );
        self.metrics.add_density_check_failed();

        let precision = self.engine.precision_for(source)?;
        let to_source = self
            .engine
            .build_transform_fn(&working_crs, source, Some(precision), epoch)?;
        let collection = failed_segments_collection(&failed, &to_source, segment.is_deviation())?;

        Ok(DensityCheckReport {
            check_result: DensityCheckResult::Failed,
            failed_line_segments: Some(collection),
        })
    }

    /// Source CRS of a densify or check request.
    fn densify_source(&self, geojson: &GeoJson, params: &CrsParams) -> Result<(CrsIdentifier, CrsInfo)> {
        let source = self.resolve_source_crs(geojson.declared_crs()?, params)?;
        let source_info = self.ensure_supported(&source)?;
        self.check_limit(geojson.positions().len())?;
        Ok((source, source_info))
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.metrics.add_payload_processed(),
            Err(_) => self.metrics.add_payload_failed(),
        }
        result
    }

    /// Unrounded copy of `geojson` in the densification CRS, with the
    /// maximum segment length in metres.
    fn to_working_crs(
        &self,
        geojson: &GeoJson,
        source: &CrsIdentifier,
        source_info: &CrsInfo,
        segment: &SegmentParams,
        epoch: Option<f64>,
    ) -> Result<(GeoJson, CrsIdentifier, f64)> {
        let max_length = segment.max_length(&self.densify)?;
        if geojson.contains_only_points() {
            return Err(TransformError::Densify(ONLY_POINTS.to_string()));
        }

        let working_crs = if source_info.axis_count() == 3 {
            self.densify.crs_3d.clone()
        } else {
            self.densify.crs_2d.clone()
        };

        let transform = self
            .engine
            .build_transform_fn(source, &working_crs, None, epoch)?;
        let mut working = geojson.clone();
        map_positions(&mut working, |position| transform(position))?;

        if segment.is_deviation() {
            ensure_within(&working, self.densify.deviation_valid_bbox, &self.densify.crs_2d)?;
        }
        Ok((working, working_crs, max_length))
    }

    /// Transform every position in place and recompute bboxes.
    fn transform_geojson(
        &self,
        geojson: &mut GeoJson,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
        target_info: &CrsInfo,
        precision: Option<u32>,
        epoch: Option<f64>,
    ) -> Result<()> {
        let transform = self
            .engine
            .build_transform_fn(source, target, precision, epoch)?;

        let mut positions = 0u64;
        let mut heights_dropped = 0u64;
        let start = Instant::now();
        traverse(
            geojson,
            &mut |position: &[f64]| {
                let out = transform(position)?;
                positions += 1;
                if position.len() == 3 && target_info.axis_count() == 3 && out.len() == 2 {
                    heights_dropped += 1;
                }
                Ok(out)
            },
            &mut update_bbox,
        )?;

        self.metrics.add_transform_time(start.elapsed());
        self.metrics.add_positions_transformed(positions);
        self.metrics.add_heights_dropped(heights_dropped);
        Ok(())
    }

    fn check_limit(&self, count: usize) -> Result<()> {
        match self.limits.max_coordinates {
            Some(limit) if count > limit => {
                Err(TransformError::CoordinateLimitExceeded { count, limit })
            }
            _ => Ok(()),
        }
    }
}

/// Parse `x,y[,z]`.
pub fn parse_coordinates(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(|part| {
            part.trim().parse::<f64>().map_err(|_| {
                TransformError::InvalidInput(format!("invalid coordinate value '{}'", part.trim()))
            })
        })
        .collect()
}

/// `POINT(x y)` or `POINT Z(x y z)`.
pub fn to_wkt(position: &[f64]) -> String {
    let geom_type = if position.len() == 3 { "POINT Z" } else { "POINT" };
    let ordinates: Vec<String> = position.iter().map(|v| v.to_string()).collect();
    format!("{}({})", geom_type, ordinates.join(" "))
}
