//! Geodesic densification and density checks.
//!
//! Both operate on payloads already transformed into a geographic working
//! CRS (lon/lat in degrees), where segment lengths are measured on the
//! ellipsoid. Only line-like geometries take part; (Multi)Points are left
//! alone.
//!
//! A maximum segment deviation `a` (the gap between a straight segment in
//! the source CRS and the geodesic) is converted to a maximum segment length
//! with `d = sqrt(a / 24.15e-9)`.

use crate::config::DensifyConfig;
use crate::crs::CrsIdentifier;
use crate::error::{Result, TransformError};
use crate::geometry::{
    bbox, Coordinates, Envelope, Feature, FeatureCollection, GeoJson, Geometry, SimpleGeometry,
};
use crate::transform::TransformFn;
use geo::{GeodesicDistance, GeodesicIntermediate, Point};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::fmt;

const DEVIATION_FACTOR: f64 = 24.15e-9;

/// Maximum segment length for a maximum segment deviation, in metres.
pub fn deviation_to_distance(deviation: f64) -> f64 {
    (deviation / DEVIATION_FACTOR).sqrt()
}

/// Segment deviation of a segment of length `distance`, in metres.
pub fn distance_to_deviation(distance: f64) -> f64 {
    DEVIATION_FACTOR * distance * distance
}

/// Requested segment limit. A deviation takes precedence over a length.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegmentParams {
    pub max_segment_length: Option<f64>,
    pub max_segment_deviation: Option<f64>,
}

impl SegmentParams {
    pub fn length(max_segment_length: f64) -> Self {
        Self {
            max_segment_length: Some(max_segment_length),
            max_segment_deviation: None,
        }
    }

    pub fn deviation(max_segment_deviation: f64) -> Self {
        Self {
            max_segment_length: None,
            max_segment_deviation: Some(max_segment_deviation),
        }
    }

    pub fn is_deviation(&self) -> bool {
        self.max_segment_deviation.is_some()
    }

    /// Validated maximum segment length in metres.
    pub fn max_length(&self, config: &DensifyConfig) -> Result<f64> {
        if let Some(deviation) = self.max_segment_deviation {
            if !(deviation >= config.min_max_segment_deviation) {
                return Err(TransformError::InvalidInput(format!(
                    "max-segment-deviation must be at least {}, got {}",
                    config.min_max_segment_deviation, deviation
                )));
            }
            return Ok(deviation_to_distance(deviation));
        }

        let length = self
            .max_segment_length
            .unwrap_or(config.default_max_segment_length);
        if !(length >= config.min_max_segment_length) {
            return Err(TransformError::InvalidInput(format!(
                "max-segment-length must be at least {}, got {}",
                config.min_max_segment_length, length
            )));
        }
        Ok(length)
    }

    /// Query-style description used in density check failures.
    pub fn describe(&self, config: &DensifyConfig) -> String {
        match self.max_segment_deviation {
            Some(deviation) => format!("max-segment-deviation: {}", deviation),
            None => format!(
                "max-segment-length: {}",
                self.max_segment_length
                    .unwrap_or(config.default_max_segment_length)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DensityCheckResult {
    NotRun,
    Success,
    Failed,
    NotApplicableGeomType,
    NotImplemented,
}

impl fmt::Display for DensityCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DensityCheckResult::NotRun => "not-run",
            DensityCheckResult::Success => "success",
            DensityCheckResult::Failed => "failed",
            DensityCheckResult::NotApplicableGeomType => "not-applicable-geom-type",
            DensityCheckResult::NotImplemented => "not-implemented",
        };
        f.write_str(s)
    }
}

/// Segment longer than the allowed maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedSegment {
    /// Feature (or collection member), part, ring and segment indices
    pub path: Vec<usize>,
    /// Geodesic length in metres
    pub length: f64,
    pub start: Vec<f64>,
    pub end: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DensityCheckReport {
    #[serde(rename = "checkResult")]
    pub check_result: DensityCheckResult,
    /// FeatureCollection of the failed segments as LineStrings
    #[serde(rename = "failedLineSegments", skip_serializing_if = "Option::is_none")]
    pub failed_line_segments: Option<GeoJson>,
}

impl DensityCheckReport {
    pub fn new(check_result: DensityCheckResult) -> Self {
        Self {
            check_result,
            failed_line_segments: None,
        }
    }
}

/// Line densification strategy.
pub trait Densifier {
    /// Insert vertices so that no segment is longer than `max_length`.
    fn densify_line(&self, line: &[Vec<f64>], max_length: f64) -> Vec<Vec<f64>>;

    /// `(segment index, length)` of segments longer than `max_length`.
    fn check_line(&self, line: &[Vec<f64>], max_length: f64) -> Vec<(usize, f64)>;
}

/// Densifies along geodesics on the WGS84 ellipsoid.
///
/// The working CRSs are ETRS89 on GRS80; geo's geodesic measures only come
/// on WGS84. The two ellipsoids differ in flattening by about 1.6e-11, which
/// moves segment lengths by well under a millimetre.
///
/// Heights are interpolated linearly along the segment.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeodesicDensifier;

impl GeodesicDensifier {
    pub fn segment_length(a: &[f64], b: &[f64]) -> f64 {
        point(a).geodesic_distance(&point(b))
    }
}

fn point(p: &[f64]) -> Point<f64> {
    Point::new(p[0], p[1])
}

impl Densifier for GeodesicDensifier {
    fn densify_line(&self, line: &[Vec<f64>], max_length: f64) -> Vec<Vec<f64>> {
        let mut out = Vec::with_capacity(line.len());
        for pair in line.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            out.push(a.clone());

            let pieces = (Self::segment_length(a, b) / max_length).ceil() as usize;
            for i in 1..pieces {
                let fraction = i as f64 / pieces as f64;
                let p = point(a).geodesic_intermediate(&point(b), fraction);
                let mut v = vec![p.x(), p.y()];
                if let (Some(za), Some(zb)) = (a.get(2), b.get(2)) {
                    v.push(za + (zb - za) * fraction);
                }
                out.push(v);
            }
        }
        if let Some(last) = line.last() {
            out.push(last.clone());
        }
        out
    }

    fn check_line(&self, line: &[Vec<f64>], max_length: f64) -> Vec<(usize, f64)> {
        line.windows(2)
            .enumerate()
            .filter_map(|(i, pair)| {
                let length = Self::segment_length(&pair[0], &pair[1]);
                (length > max_length).then_some((i, length))
            })
            .collect()
    }
}

/// Densify every line-like geometry in place.
pub fn densify_geojson(geojson: &mut GeoJson, densifier: &dyn Densifier, max_length: f64) {
    match geojson {
        GeoJson::FeatureCollection(fc) => fc
            .features
            .iter_mut()
            .filter_map(|f| f.geometry.as_mut())
            .for_each(|g| densify_geometry(g, densifier, max_length)),
        GeoJson::Feature(f) => {
            if let Some(g) = f.geometry.as_mut() {
                densify_geometry(g, densifier, max_length);
            }
        }
        GeoJson::Geometry(g) => densify_geometry(g, densifier, max_length),
    }
}

fn densify_geometry(geometry: &mut Geometry, densifier: &dyn Densifier, max_length: f64) {
    match geometry {
        Geometry::GeometryCollection(gc) => gc
            .geometries
            .iter_mut()
            .for_each(|g| densify_geometry(g, densifier, max_length)),
        Geometry::Point(_) | Geometry::MultiPoint(_) => {}
        other => {
            let Some(coordinates) = other.coordinates_mut() else {
                return;
            };
            let mut lines = Vec::new();
            lines_mut(coordinates, &mut lines);
            for line in lines {
                let densified = densifier.densify_line(&line_positions(line), max_length);
                *line = densified.into_iter().map(Coordinates::Position).collect();
            }
        }
    }
}

fn lines_mut<'a>(coordinates: &'a mut Coordinates, out: &mut Vec<&'a mut Vec<Coordinates>>) {
    if let Coordinates::Nested(children) = coordinates {
        if children.iter().all(|c| matches!(c, Coordinates::Position(_))) {
            out.push(children);
        } else {
            for child in children.iter_mut() {
                lines_mut(child, out);
            }
        }
    }
}

fn line_positions(line: &[Coordinates]) -> Vec<Vec<f64>> {
    line.iter()
        .filter_map(|c| match c {
            Coordinates::Position(p) if !p.is_empty() => Some(p.clone()),
            _ => None,
        })
        .collect()
}

/// Segments of line-like geometries longer than `max_length`.
pub fn check_geojson(geojson: &GeoJson, densifier: &dyn Densifier, max_length: f64) -> Vec<FailedSegment> {
    let mut failed = Vec::new();
    match geojson {
        GeoJson::FeatureCollection(fc) => {
            for (i, feature) in fc.features.iter().enumerate() {
                if let Some(g) = &feature.geometry {
                    check_geometry(g, vec![i], densifier, max_length, &mut failed);
                }
            }
        }
        GeoJson::Feature(f) => {
            if let Some(g) = &f.geometry {
                check_geometry(g, Vec::new(), densifier, max_length, &mut failed);
            }
        }
        GeoJson::Geometry(g) => check_geometry(g, Vec::new(), densifier, max_length, &mut failed),
    }
    failed
}

fn check_geometry(
    geometry: &Geometry,
    path: Vec<usize>,
    densifier: &dyn Densifier,
    max_length: f64,
    failed: &mut Vec<FailedSegment>,
) {
    match geometry {
        Geometry::GeometryCollection(gc) => {
            for (i, g) in gc.geometries.iter().enumerate() {
                let mut child_path = path.clone();
                child_path.push(i);
                check_geometry(g, child_path, densifier, max_length, failed);
            }
        }
        Geometry::Point(_) | Geometry::MultiPoint(_) => {}
        other => {
            let Some(coordinates) = other.coordinates() else {
                return;
            };
            let mut lines = Vec::new();
            collect_lines(coordinates, path, &mut lines);
            for (line_path, line) in lines {
                for (segment, length) in densifier.check_line(&line, max_length) {
                    let mut segment_path = line_path.clone();
                    segment_path.push(segment);
                    failed.push(FailedSegment {
                        path: segment_path,
                        length,
                        start: line[segment].clone(),
                        end: line[segment + 1].clone(),
                    });
                }
            }
        }
    }
}

fn collect_lines(coordinates: &Coordinates, path: Vec<usize>, out: &mut Vec<(Vec<usize>, Vec<Vec<f64>>)>) {
    if let Coordinates::Nested(children) = coordinates {
        if children.iter().all(|c| matches!(c, Coordinates::Position(_))) {
            out.push((path, line_positions(children)));
        } else {
            for (i, child) in children.iter().enumerate() {
                let mut child_path = path.clone();
                child_path.push(i);
                collect_lines(child, child_path, out);
            }
        }
    }
}

/// Fail unless every position lies inside `valid` (planar part only).
pub fn ensure_within(geojson: &GeoJson, valid: [f64; 4], crs: &CrsIdentifier) -> Result<()> {
    let inside = match bbox(&geojson.positions())? {
        Some(envelope) => Envelope::Planar(valid).contains(&envelope),
        None => true,
    };
    if inside {
        Ok(())
    } else {
        Err(TransformError::DeviationOutOfBbox {
            bbox: valid,
            crs: crs.to_string(),
        })
    }
}

/// FeatureCollection of failed segments.
///
/// `to_source` maps segment end points back to the caller's CRS.
pub fn failed_segments_collection(
    segments: &[FailedSegment],
    to_source: &TransformFn,
    with_deviation: bool,
) -> Result<GeoJson> {
    let features = segments
        .iter()
        .map(|segment| {
            let coordinates = Coordinates::Nested(vec![
                Coordinates::Position(to_source(&segment.start[..])?),
                Coordinates::Position(to_source(&segment.end[..])?),
            ]);
            let mut properties = Map::new();
            properties.insert("segment_length".to_string(), json!(segment.length));
            if with_deviation {
                properties.insert(
                    "segment_deviation".to_string(),
                    json!(distance_to_deviation(segment.length)),
                );
            }
            let geometry = Geometry::LineString(SimpleGeometry {
                coordinates,
                bbox: None,
                foreign_members: Map::new(),
            });
            Ok(Feature::new(geometry, properties))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(GeoJson::FeatureCollection(FeatureCollection::new(features)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn line() -> Vec<Vec<f64>> {
        vec![vec![5.0, 52.0, 0.0], vec![5.01, 52.0, 10.0], vec![5.0101, 52.0, 10.0]]
    }

    #[test]
    fn test_deviation_conversion() {
        let d = deviation_to_distance(0.001);
        assert_relative_eq!(d, 203.489, epsilon = 0.001);
        assert_relative_eq!(distance_to_deviation(d), 0.001, epsilon = 1e-12);
    }

    #[test]
    fn test_segment_params() {
        let config = DensifyConfig::default();
        assert_eq!(SegmentParams::default().max_length(&config).unwrap(), 200.0);
        assert_eq!(SegmentParams::length(500.0).max_length(&config).unwrap(), 500.0);
        assert!(SegmentParams::length(100.0).max_length(&config).is_err());
        assert!(SegmentParams::length(f64::NAN).max_length(&config).is_err());
        assert!(SegmentParams::deviation(0.00001).max_length(&config).is_err());

        let both = SegmentParams {
            max_segment_length: Some(1000.0),
            max_segment_deviation: Some(0.001),
        };
        assert_relative_eq!(both.max_length(&config).unwrap(), 203.489, epsilon = 0.001);
        assert_eq!(both.describe(&config), "max-segment-deviation: 0.001");
        assert_eq!(
            SegmentParams::default().describe(&config),
            "max-segment-length: 200"
        );
    }

    #[test]
    fn test_densified_segments_within_maximum() {
        let densifier = GeodesicDensifier;
        let original = line();
        let densified = densifier.densify_line(&original, 200.0);

        // ~686 m first segment becomes 4 pieces, the short one stays
        assert_eq!(densified.len(), 3 + 3);
        assert_eq!(densified.first(), original.first());
        assert_eq!(densified.last(), original.last());
        for pair in densified.windows(2) {
            assert!(GeodesicDensifier::segment_length(&pair[0], &pair[1]) <= 200.0 + 1e-6);
        }
        assert!(densifier.check_line(&densified, 200.0).is_empty());

        // Heights are interpolated linearly
        assert_relative_eq!(densified[2][2], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_check_line() {
        let failed = GeodesicDensifier.check_line(&line(), 200.0);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, 0);
        assert_relative_eq!(failed[0].1, 686.0, epsilon = 2.0);
    }

    #[test]
    fn test_segment_length_on_grs80_meridian() {
        // GRS80 meridian arc 52N..53N is 111276.8258 m
        let length = GeodesicDensifier::segment_length(&[5.0, 52.0], &[5.0, 53.0]);
        assert_relative_eq!(length, 111_276.8258, epsilon = 1e-3);
    }

    #[test]
    fn test_points_untouched() {
        let mut geojson: GeoJson = serde_json::from_value(json!({
            "type": "MultiPoint",
            "coordinates": [[5.0, 52.0], [6.0, 52.0]]
        }))
        .unwrap();
        let before = geojson.clone();
        densify_geojson(&mut geojson, &GeodesicDensifier, 200.0);
        assert_eq!(geojson, before);
        assert!(check_geojson(&geojson, &GeodesicDensifier, 200.0).is_empty());
    }

    #[test]
    fn test_check_paths() {
        let geojson: GeoJson = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [5.0, 52.0]}},
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [
                            [[5.0, 52.0], [5.0001, 52.0], [5.0001, 52.0001], [5.0, 52.0]],
                            [[5.0, 52.0], [5.01, 52.0], [5.0, 52.0]]
                        ]
                    }
                }
            ]
        }))
        .unwrap();

        let failed = check_geojson(&geojson, &GeodesicDensifier, 200.0);
        let paths: Vec<_> = failed.iter().map(|s| s.path.clone()).collect();
        assert_eq!(paths, vec![vec![1, 1, 0], vec![1, 1, 1]]);
        assert_eq!(failed[0].start, vec![5.0, 52.0]);
    }

    #[test]
    fn test_densify_polygon_rings() {
        let mut geojson: GeoJson = serde_json::from_value(json!({
            "type": "MultiPolygon",
            "coordinates": [[[[5.0, 52.0], [5.01, 52.0], [5.01, 52.01], [5.0, 52.0]]]]
        }))
        .unwrap();
        densify_geojson(&mut geojson, &GeodesicDensifier, 200.0);
        assert!(check_geojson(&geojson, &GeodesicDensifier, 200.0).is_empty());
        assert!(geojson.positions().len() > 4);
    }

    #[test]
    fn test_ensure_within() {
        let crs: CrsIdentifier = "EPSG:9067".parse().unwrap();
        let inside: GeoJson =
            serde_json::from_value(json!({"type": "LineString", "coordinates": [[5.0, 52.0], [6.0, 53.0]]}))
                .unwrap();
        assert!(ensure_within(&inside, [2.0, 50.0, 8.0, 56.0], &crs).is_ok());

        let outside: GeoJson =
            serde_json::from_value(json!({"type": "LineString", "coordinates": [[5.0, 52.0], [9.0, 53.0]]}))
                .unwrap();
        assert!(matches!(
            ensure_within(&outside, [2.0, 50.0, 8.0, 56.0], &crs),
            Err(TransformError::DeviationOutOfBbox { .. })
        ));
    }

    #[test]
    fn test_report_serialization() {
        let segments = vec![FailedSegment {
            path: vec![0, 1],
            length: 686.0,
            start: vec![5.0, 52.0],
            end: vec![5.01, 52.0],
        }];
        let identity: TransformFn = Box::new(|p: &[f64]| Ok(p.to_vec()));
        let collection = failed_segments_collection(&segments, &identity, true).unwrap();
        let report = DensityCheckReport {
            check_result: DensityCheckResult::Failed,
            failed_line_segments: Some(collection),
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["checkResult"], "failed");
        assert_eq!(value["failedLineSegments"]["type"], "FeatureCollection");
        let feature = &value["failedLineSegments"]["features"][0];
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "LineString");
        assert_eq!(feature["properties"]["segment_length"], 686.0);
        assert!(feature["properties"]["segment_deviation"].as_f64().unwrap() > 0.0);

        let not_run = serde_json::to_value(DensityCheckReport::new(DensityCheckResult::NotRun)).unwrap();
        assert_eq!(not_run, json!({"checkResult": "not-run"}));
        assert_eq!(
            DensityCheckResult::NotApplicableGeomType.to_string(),
            "not-applicable-geom-type"
        );
    }
}
