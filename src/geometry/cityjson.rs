//! CityJSON documents with quantized vertices.
//!
//! Only the parts needed for reprojection are modelled: the vertex list,
//! its `transform`, and `metadata`. Everything else (city objects,
//! appearances, extensions) is carried through as raw JSON.

use crate::crs::CrsIdentifier;
use crate::error::{Result, TransformError};
use crate::transform::TransformFn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Vertex quantization: `real = vertex * scale + translate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityTransform {
    pub scale: [f64; 3],
    pub translate: [f64; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityMetadata {
    #[serde(rename = "referenceSystem", default, skip_serializing_if = "Option::is_none")]
    pub reference_system: Option<String>,
    #[serde(rename = "geographicalExtent", default, skip_serializing_if = "Option::is_none")]
    pub geographical_extent: Option<[f64; 6]>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityJson {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub transform: CityTransform,
    #[serde(rename = "CityObjects")]
    pub city_objects: Map<String, Value>,
    pub vertices: Vec<[i64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CityMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CityJson {
    /// CRS from `metadata.referenceSystem`, if set.
    pub fn reference_system(&self) -> Result<Option<CrsIdentifier>> {
        self.metadata
            .as_ref()
            .and_then(|m| m.reference_system.as_deref())
            .map(str::parse::<CrsIdentifier>)
            .transpose()
    }

    /// Real-world vertex coordinates.
    pub fn decompressed_vertices(&self) -> Vec<[f64; 3]> {
        let CityTransform { scale, translate } = &self.transform;
        self.vertices
            .iter()
            .map(|v| {
                [
                    v[0] as f64 * scale[0] + translate[0],
                    v[1] as f64 * scale[1] + translate[1],
                    v[2] as f64 * scale[2] + translate[2],
                ]
            })
            .collect()
    }

    /// Transform all vertices in place and re-quantize them.
    ///
    /// `precision` and `height_digits` set the new scale; the new translate
    /// is the minimum corner. The extent and reference system in `metadata`
    /// are updated to match.
    pub fn crs_transform(
        &mut self,
        transform: &TransformFn,
        target: &CrsIdentifier,
        precision: u32,
        height_digits: u32,
    ) -> Result<()> {
        let transformed = self
            .decompressed_vertices()
            .iter()
            .map(|v| {
                let out = transform(&v[..])?;
                match out.as_slice() {
                    [x, y, z] => Ok([*x, *y, *z]),
                    _ => Err(TransformError::InfiniteCoordinate(format!(
                        "vertex {:?} has no finite height in {}",
                        v, target
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let bounds = extent(&transformed);
        let translate = bounds.map_or([0.0; 3], |e| [e[0], e[1], e[2]]);
        let xy_scale = 10f64.powi(-(precision as i32));
        let scale = [xy_scale, xy_scale, 10f64.powi(-(height_digits as i32))];

        self.vertices = transformed
            .iter()
            .map(|v| {
                [
                    ((v[0] - translate[0]) / scale[0]).round() as i64,
                    ((v[1] - translate[1]) / scale[1]).round() as i64,
                    ((v[2] - translate[2]) / scale[2]).round() as i64,
                ]
            })
            .collect();
        self.transform = CityTransform { scale, translate };

        let metadata = self.metadata.get_or_insert_with(CityMetadata::default);
        metadata.reference_system = Some(reference_system_uri(target));
        if bounds.is_some() {
            metadata.geographical_extent = bounds;
        }

        Ok(())
    }
}

/// `[minx, miny, minz, maxx, maxy, maxz]` of the vertices.
fn extent(vertices: &[[f64; 3]]) -> Option<[f64; 6]> {
    let first = vertices.first()?;
    let mut e = [first[0], first[1], first[2], first[0], first[1], first[2]];
    for v in vertices {
        for axis in 0..3 {
            e[axis] = e[axis].min(v[axis]);
            e[axis + 3] = e[axis + 3].max(v[axis]);
        }
    }
    Some(e)
}

fn reference_system_uri(id: &CrsIdentifier) -> String {
    format!(
        "https://www.opengis.net/def/crs/{}/0/{}",
        id.authority(),
        id.code()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn sample() -> CityJson {
        serde_json::from_value(json!({
            "type": "CityJSON",
            "version": "2.0",
            "transform": {"scale": [0.001, 0.001, 0.001], "translate": [155000.0, 463000.0, 0.0]},
            "CityObjects": {"building-1": {"type": "Building"}},
            "vertices": [[0, 0, 1000], [10000, 20000, 5000]],
            "metadata": {
                "referenceSystem": "https://www.opengis.net/def/crs/EPSG/0/7415",
                "title": "sample"
            },
            "appearance": {}
        }))
        .unwrap()
    }

    #[test]
    fn test_decompress() {
        let city = sample();
        let vertices = city.decompressed_vertices();
        assert_relative_eq!(vertices[1][0], 155010.0, epsilon = 1e-9);
        assert_relative_eq!(vertices[1][1], 463020.0, epsilon = 1e-9);
        assert_relative_eq!(vertices[1][2], 5.0, epsilon = 1e-9);
        assert_eq!(
            city.reference_system().unwrap(),
            Some("EPSG:7415".parse().unwrap())
        );
    }

    #[test]
    fn test_transform_requantizes() {
        let mut city = sample();
        let shift: TransformFn = Box::new(|p: &[f64]| Ok(vec![p[0] + 1.5, p[1] - 2.5, p[2] + 10.0]));
        let target: CrsIdentifier = "EPSG:7931".parse().unwrap();

        city.crs_transform(&shift, &target, 3, 2).unwrap();

        assert_relative_eq!(city.transform.translate[0], 155001.5, epsilon = 1e-9);
        assert_relative_eq!(city.transform.translate[1], 462997.5, epsilon = 1e-9);
        assert_relative_eq!(city.transform.translate[2], 11.0, epsilon = 1e-9);
        assert_relative_eq!(city.transform.scale[2], 0.01, epsilon = 1e-15);
        assert_eq!(city.vertices, vec![[0, 0, 0], [10000, 20000, 400]]);

        let restored = city.decompressed_vertices();
        assert_relative_eq!(restored[1][0], 155011.5, epsilon = 1e-6);
        assert_relative_eq!(restored[1][2], 15.0, epsilon = 1e-6);

        let metadata = city.metadata.as_ref().unwrap();
        assert_eq!(
            metadata.reference_system.as_deref(),
            Some("https://www.opengis.net/def/crs/EPSG/0/7931")
        );
        let extent = metadata.geographical_extent.unwrap();
        assert_relative_eq!(extent[5], 15.0, epsilon = 1e-9);
        assert_eq!(metadata.extra["title"], "sample");

        let value = serde_json::to_value(&city).unwrap();
        assert!(value.get("appearance").is_some());
        assert_eq!(value["CityObjects"]["building-1"]["type"], "Building");
    }

    #[test]
    fn test_missing_height_is_error() {
        let mut city = sample();
        let flat: TransformFn = Box::new(|p: &[f64]| Ok(vec![p[0], p[1]]));
        let result = city.crs_transform(&flat, &"EPSG:28992".parse().unwrap(), 4, 4);
        assert!(matches!(result, Err(TransformError::InfiniteCoordinate(_))));
    }
}
