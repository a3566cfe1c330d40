//! GeoJSON and CityJSON payload model.
//!
//! See <https://datatracker.ietf.org/doc/html/rfc7946>. Unknown members are
//! kept as foreign members and written back unchanged.

pub mod bbox;
pub mod cityjson;
pub mod walker;

pub use bbox::{bbox, update_bbox, Envelope};
pub use cityjson::CityJson;
pub use walker::{traverse, NodeMut};

use crate::crs::CrsIdentifier;
use crate::error::{Result, TransformError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Nested coordinate arrays of any depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinates {
    Position(Vec<f64>),
    Nested(Vec<Coordinates>),
}

impl Coordinates {
    /// All non-empty positions in document order.
    pub fn positions(&self) -> Vec<&[f64]> {
        let mut out = Vec::new();
        self.collect_positions(&mut out);
        out
    }

    fn collect_positions<'a>(&'a self, out: &mut Vec<&'a [f64]>) {
        match self {
            Coordinates::Position(p) if p.is_empty() => {}
            Coordinates::Position(p) => out.push(p),
            Coordinates::Nested(children) => {
                for child in children {
                    child.collect_positions(out);
                }
            }
        }
    }
}

/// Geometry with a `coordinates` member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleGeometry {
    pub coordinates: Coordinates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(flatten)]
    pub foreign_members: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryCollection {
    pub geometries: Vec<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(flatten)]
    pub foreign_members: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point(SimpleGeometry),
    MultiPoint(SimpleGeometry),
    LineString(SimpleGeometry),
    MultiLineString(SimpleGeometry),
    Polygon(SimpleGeometry),
    MultiPolygon(SimpleGeometry),
    GeometryCollection(GeometryCollection),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
            Geometry::GeometryCollection(_) => "GeometryCollection",
        }
    }

    /// Coordinates of a non-collection geometry.
    pub fn coordinates(&self) -> Option<&Coordinates> {
        self.simple().map(|g| &g.coordinates)
    }

    pub fn coordinates_mut(&mut self) -> Option<&mut Coordinates> {
        self.simple_mut().map(|g| &mut g.coordinates)
    }

    fn simple(&self) -> Option<&SimpleGeometry> {
        match self {
            Geometry::Point(g)
            | Geometry::MultiPoint(g)
            | Geometry::LineString(g)
            | Geometry::MultiLineString(g)
            | Geometry::Polygon(g)
            | Geometry::MultiPolygon(g) => Some(g),
            Geometry::GeometryCollection(_) => None,
        }
    }

    fn simple_mut(&mut self) -> Option<&mut SimpleGeometry> {
        match self {
            Geometry::Point(g)
            | Geometry::MultiPoint(g)
            | Geometry::LineString(g)
            | Geometry::MultiLineString(g)
            | Geometry::Polygon(g)
            | Geometry::MultiPolygon(g) => Some(g),
            Geometry::GeometryCollection(_) => None,
        }
    }

    pub fn bbox_mut(&mut self) -> &mut Option<Vec<f64>> {
        match self {
            Geometry::GeometryCollection(gc) => &mut gc.bbox,
            Geometry::Point(g)
            | Geometry::MultiPoint(g)
            | Geometry::LineString(g)
            | Geometry::MultiLineString(g)
            | Geometry::Polygon(g)
            | Geometry::MultiPolygon(g) => &mut g.bbox,
        }
    }

    /// Point or MultiPoint, or a collection holding only those.
    pub fn is_point_like(&self) -> bool {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => true,
            Geometry::GeometryCollection(gc) => gc.geometries.iter().all(Geometry::is_point_like),
            _ => false,
        }
    }

    pub fn positions(&self) -> Vec<&[f64]> {
        match self {
            Geometry::GeometryCollection(gc) => {
                gc.geometries.iter().flat_map(Geometry::positions).collect()
            }
            _ => self
                .coordinates()
                .map(Coordinates::positions)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(flatten)]
    pub foreign_members: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            id: None,
            geometry: Some(geometry),
            properties: Some(properties),
            bbox: None,
            foreign_members: Map::new(),
        }
    }

    pub fn positions(&self) -> Vec<&[f64]> {
        self.geometry
            .as_ref()
            .map(Geometry::positions)
            .unwrap_or_default()
    }
}

/// Legacy named CRS member of a FeatureCollection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCrs {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: NamedCrsProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCrsProperties {
    pub name: String,
}

impl NamedCrs {
    pub fn new(id: &CrsIdentifier) -> Self {
        Self {
            kind: "name".to_string(),
            properties: NamedCrsProperties { name: id.to_urn() },
        }
    }

    pub fn identifier(&self) -> Result<CrsIdentifier> {
        self.properties.name.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(with = "tagged_features")]
    pub features: Vec<Feature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<NamedCrs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    #[serde(flatten)]
    pub foreign_members: Map<String, Value>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            crs: None,
            bbox: None,
            foreign_members: Map::new(),
        }
    }

    pub fn positions(&self) -> Vec<&[f64]> {
        self.features.iter().flat_map(Feature::positions).collect()
    }
}

/// Features inside a collection carry their own `type` member.
mod tagged_features {
    use super::Feature;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize)]
    #[serde(tag = "type")]
    enum TaggedRef<'a> {
        Feature(&'a Feature),
    }

    #[derive(Deserialize)]
    #[serde(tag = "type")]
    enum Tagged {
        Feature(Feature),
    }

    pub fn serialize<S: Serializer>(features: &[Feature], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(features.iter().map(TaggedRef::Feature))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Feature>, D::Error> {
        let features = Vec::<Tagged>::deserialize(deserializer)?;
        Ok(features
            .into_iter()
            .map(|Tagged::Feature(feature)| feature)
            .collect())
    }
}

/// GeoJSON root object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJson {
    FeatureCollection(FeatureCollection),
    Feature(Feature),
    #[serde(untagged)]
    Geometry(Geometry),
}

impl GeoJson {
    pub fn positions(&self) -> Vec<&[f64]> {
        match self {
            GeoJson::FeatureCollection(fc) => fc.positions(),
            GeoJson::Feature(f) => f.positions(),
            GeoJson::Geometry(g) => g.positions(),
        }
    }

    /// All geometries, descending into collections.
    pub fn geometries(&self) -> Vec<&Geometry> {
        fn collect<'a>(g: &'a Geometry, out: &mut Vec<&'a Geometry>) {
            match g {
                Geometry::GeometryCollection(gc) => {
                    gc.geometries.iter().for_each(|child| collect(child, out))
                }
                _ => out.push(g),
            }
        }

        let mut out = Vec::new();
        match self {
            GeoJson::FeatureCollection(fc) => fc
                .features
                .iter()
                .filter_map(|f| f.geometry.as_ref())
                .for_each(|g| collect(g, &mut out)),
            GeoJson::Feature(f) => f.geometry.iter().for_each(|g| collect(g, &mut out)),
            GeoJson::Geometry(g) => collect(g, &mut out),
        }
        out
    }

    /// True when there are geometries and all of them are (Multi)Points.
    pub fn contains_only_points(&self) -> bool {
        let geometries = self.geometries();
        !geometries.is_empty() && geometries.iter().all(|g| g.is_point_like())
    }

    /// CRS declared by the `crs` member of a FeatureCollection.
    pub fn declared_crs(&self) -> Result<Option<CrsIdentifier>> {
        match self {
            GeoJson::FeatureCollection(FeatureCollection { crs: Some(crs), .. }) => {
                crs.identifier().map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Replace the `crs` member of a FeatureCollection that has one.
    pub fn set_declared_crs(&mut self, id: &CrsIdentifier) {
        if let GeoJson::FeatureCollection(FeatureCollection { crs: Some(crs), .. }) = self {
            *crs = NamedCrs::new(id);
        }
    }
}

/// A request body: GeoJSON or CityJSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Body {
    GeoJson(GeoJson),
    CityJson(CityJson),
}

impl Body {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(s).map_err(|e| TransformError::InvalidInput(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let is_cityjson = value.get("type").and_then(Value::as_str) == Some("CityJSON");
        let body = if is_cityjson {
            Body::CityJson(serde_json::from_value(value).map_err(invalid_body)?)
        } else {
            Body::GeoJson(serde_json::from_value(value).map_err(invalid_body)?)
        };
        Ok(body)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TransformError::InvalidInput(e.to_string()))
    }

    /// CRS declared inside the body, if any.
    pub fn source_crs(&self) -> Result<Option<CrsIdentifier>> {
        match self {
            Body::GeoJson(g) => g.declared_crs(),
            Body::CityJson(c) => c.reference_system(),
        }
    }

    /// Number of positions (GeoJSON) or vertices (CityJSON).
    pub fn coordinate_count(&self) -> usize {
        match self {
            Body::GeoJson(g) => g.positions().len(),
            Body::CityJson(c) => c.vertices.len(),
        }
    }
}

fn invalid_body(e: serde_json::Error) -> TransformError {
    TransformError::InvalidInput(format!("invalid request body: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_feature_collection() {
        let body = json!({
            "type": "FeatureCollection",
            "name": "buildings",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::28992"}},
            "features": [
                {
                    "type": "Feature",
                    "id": 1,
                    "properties": {"height": 3.5},
                    "geometry": {"type": "Point", "coordinates": [155000, 463000]}
                },
                {"type": "Feature", "properties": null, "geometry": null}
            ]
        });

        let geojson: GeoJson = serde_json::from_value(body.clone()).unwrap();
        let GeoJson::FeatureCollection(fc) = &geojson else {
            panic!("expected a FeatureCollection");
        };
        assert_eq!(fc.features.len(), 2);
        assert_eq!(fc.foreign_members["name"], "buildings");
        assert_eq!(
            geojson.declared_crs().unwrap(),
            Some("EPSG:28992".parse().unwrap())
        );
        assert_eq!(geojson.positions(), vec![&[155000.0, 463000.0][..]]);

        // Foreign members and null members survive a round trip
        assert_eq!(serde_json::to_value(&geojson).unwrap(), json!({
            "type": "FeatureCollection",
            "name": "buildings",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::28992"}},
            "features": [
                {
                    "type": "Feature",
                    "id": 1,
                    "properties": {"height": 3.5},
                    "geometry": {"type": "Point", "coordinates": [155000.0, 463000.0]}
                },
                {"type": "Feature", "properties": null, "geometry": null}
            ]
        }));
    }

    #[test]
    fn test_parse_bare_geometry() {
        let geojson: GeoJson = serde_json::from_value(json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [10, 0], [10, 10], [0, 0]]]
        }))
        .unwrap();
        assert!(matches!(geojson, GeoJson::Geometry(Geometry::Polygon(_))));
        assert_eq!(geojson.positions().len(), 4);
        assert!(!geojson.contains_only_points());
    }

    #[test]
    fn test_only_points() {
        let geojson: GeoJson = serde_json::from_value(json!({
            "type": "GeometryCollection",
            "geometries": [
                {"type": "Point", "coordinates": [1, 2]},
                {"type": "MultiPoint", "coordinates": [[1, 2], [3, 4]]}
            ]
        }))
        .unwrap();
        assert!(geojson.contains_only_points());

        let empty: GeoJson =
            serde_json::from_value(json!({"type": "FeatureCollection", "features": []})).unwrap();
        assert!(!empty.contains_only_points());
    }

    #[test]
    fn test_set_declared_crs() {
        let mut geojson: GeoJson = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::28992"}},
            "features": []
        }))
        .unwrap();
        geojson.set_declared_crs(&"EPSG:4326".parse().unwrap());
        assert_eq!(
            geojson.declared_crs().unwrap(),
            Some("EPSG:4326".parse().unwrap())
        );

        // Collections without a crs member are left alone
        let mut plain: GeoJson =
            serde_json::from_value(json!({"type": "FeatureCollection", "features": []})).unwrap();
        plain.set_declared_crs(&"EPSG:4326".parse().unwrap());
        assert_eq!(plain.declared_crs().unwrap(), None);
    }

    #[test]
    fn test_body_detects_cityjson() {
        let body = Body::from_json_str(
            r#"{
                "type": "CityJSON",
                "version": "2.0",
                "transform": {"scale": [0.001, 0.001, 0.001], "translate": [0, 0, 0]},
                "CityObjects": {},
                "vertices": [[1, 2, 3]],
                "metadata": {"referenceSystem": "https://www.opengis.net/def/crs/EPSG/0/7415"}
            }"#,
        )
        .unwrap();
        assert!(matches!(body, Body::CityJson(_)));
        assert_eq!(body.coordinate_count(), 1);
        assert_eq!(body.source_crs().unwrap(), Some("EPSG:7415".parse().unwrap()));
    }

    #[test]
    fn test_invalid_body() {
        assert!(matches!(
            Body::from_json_str(r#"{"type": "Feature", "geometry": {"type": "Point"}}"#),
            Err(TransformError::InvalidInput(_))
        ));
        assert!(Body::from_json_str("not json").is_err());
    }
}
