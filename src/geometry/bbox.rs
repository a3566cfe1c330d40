//! Bounding boxes of GeoJSON nodes.

use super::walker::NodeMut;
use crate::error::{Result, TransformError};

/// Axis-aligned envelope of a set of positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Envelope {
    /// `[minx, miny, maxx, maxy]`
    Planar([f64; 4]),
    /// `[minx, miny, minz, maxx, maxy, maxz]`
    Volumetric([f64; 6]),
}

impl Envelope {
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Envelope::Planar(b) => b.to_vec(),
            Envelope::Volumetric(b) => b.to_vec(),
        }
    }

    /// Horizontal part `[minx, miny, maxx, maxy]`.
    pub fn planar(&self) -> [f64; 4] {
        match *self {
            Envelope::Planar(b) => b,
            Envelope::Volumetric([minx, miny, _, maxx, maxy, _]) => [minx, miny, maxx, maxy],
        }
    }

    pub fn contains(&self, other: &Envelope) -> bool {
        let [ax0, ay0, ax1, ay1] = self.planar();
        let [bx0, by0, bx1, by1] = other.planar();
        ax0 <= bx0 && ay0 <= by0 && bx1 <= ax1 && by1 <= ay1
    }
}

/// Envelope of `positions`, or `None` when there are none.
///
/// The envelope dimension is the smallest position width; widths other
/// than 2 or 3 are a [`TransformError::Dimension`] error.
pub fn bbox(positions: &[&[f64]]) -> Result<Option<Envelope>> {
    let Some(width) = positions.iter().map(|p| p.len()).min() else {
        return Ok(None);
    };

    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for position in positions {
        for axis in 0..width.min(3) {
            min[axis] = min[axis].min(position[axis]);
            max[axis] = max[axis].max(position[axis]);
        }
    }

    match width {
        2 => Ok(Some(Envelope::Planar([min[0], min[1], max[0], max[1]]))),
        3 => Ok(Some(Envelope::Volumetric([
            min[0], min[1], min[2], max[0], max[1], max[2],
        ]))),
        other => Err(TransformError::Dimension(format!(
            "cannot compute bbox of positions with {} ordinates",
            other
        ))),
    }
}

/// Node hook: recompute a present `bbox` member from the node's positions.
///
/// A node without positions loses its bbox; a feature with a null geometry
/// keeps the one it declares.
pub fn update_bbox(node: NodeMut<'_>) -> Result<()> {
    match node {
        NodeMut::Geometry(geometry) => {
            if geometry.bbox_mut().is_some() {
                let envelope = bbox(&geometry.positions())?;
                *geometry.bbox_mut() = envelope.map(|e| e.to_vec());
            }
        }
        NodeMut::Feature(feature) => {
            if feature.bbox.is_some() && feature.geometry.is_some() {
                feature.bbox = bbox(&feature.positions())?.map(|e| e.to_vec());
            }
        }
        NodeMut::FeatureCollection(fc) => {
            if fc.bbox.is_some() {
                fc.bbox = bbox(&fc.positions())?.map(|e| e.to_vec());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::walker::traverse;
    use crate::geometry::GeoJson;
    use serde_json::json;

    #[test]
    fn test_planar_and_volumetric() {
        let planar = bbox(&[&[1.0, 5.0], &[3.0, 2.0]]).unwrap().unwrap();
        assert_eq!(planar, Envelope::Planar([1.0, 2.0, 3.0, 5.0]));

        let volumetric = bbox(&[&[1.0, 5.0, 10.0], &[3.0, 2.0, -1.0]]).unwrap().unwrap();
        assert_eq!(volumetric.to_vec(), vec![1.0, 2.0, -1.0, 3.0, 5.0, 10.0]);
        assert_eq!(volumetric.planar(), [1.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_mixed_width_uses_minimum() {
        let envelope = bbox(&[&[1.0, 5.0, 10.0], &[3.0, 2.0]]).unwrap().unwrap();
        assert_eq!(envelope, Envelope::Planar([1.0, 2.0, 3.0, 5.0]));
    }

    #[test]
    fn test_invalid_width() {
        assert!(bbox(&[&[1.0]]).is_err());
        assert!(bbox(&[&[1.0, 2.0, 3.0, 4.0]]).is_err());
        assert_eq!(bbox(&[]).unwrap(), None);
    }

    #[test]
    fn test_contains() {
        let outer = Envelope::Planar([2.0, 50.0, 8.0, 56.0]);
        assert!(outer.contains(&Envelope::Volumetric([3.0, 51.0, 0.0, 4.0, 52.0, 10.0])));
        assert!(!outer.contains(&Envelope::Planar([1.0, 51.0, 4.0, 52.0])));
    }

    #[test]
    fn test_update_bbox_bottom_up() {
        let mut geojson: GeoJson = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "bbox": [0, 0, 0, 0],
            "features": [
                {
                    "type": "Feature",
                    "bbox": [0, 0, 0, 0],
                    "properties": {},
                    "geometry": {"type": "LineString", "coordinates": [[1, 2], [3, 4]]}
                },
                {"type": "Feature", "bbox": [0, 0, 0, 0], "properties": {}, "geometry": null},
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {"type": "Point", "bbox": [0, 0, 0, 0], "coordinates": [-1, 8]}
                }
            ]
        }))
        .unwrap();

        traverse(&mut geojson, &mut |p: &[f64]| Ok(p.to_vec()), &mut update_bbox).unwrap();

        let value = serde_json::to_value(&geojson).unwrap();
        assert_eq!(value["bbox"], json!([-1.0, 2.0, 3.0, 8.0]));
        assert_eq!(value["features"][0]["bbox"], json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(value["features"][1]["bbox"], json!([0.0, 0.0, 0.0, 0.0]));
        assert!(value["features"][2].get("bbox").is_none());
        assert_eq!(
            value["features"][2]["geometry"]["bbox"],
            json!([-1.0, 8.0, -1.0, 8.0])
        );
    }
}
