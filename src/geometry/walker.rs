//! Depth-first traversal of a GeoJSON tree.

use super::{Coordinates, Feature, FeatureCollection, GeoJson, Geometry};
use crate::error::Result;

/// A node whose children have all been visited.
pub enum NodeMut<'a> {
    Geometry(&'a mut Geometry),
    Feature(&'a mut Feature),
    FeatureCollection(&'a mut FeatureCollection),
}

/// Visit every position, then every node bottom-up.
///
/// `on_position` replaces each non-empty position with its result.
/// `on_node_complete` is called for each geometry, feature and collection
/// after its children. The first error aborts the traversal.
pub fn traverse<P, C>(node: &mut GeoJson, on_position: &mut P, on_node_complete: &mut C) -> Result<()>
where
    P: FnMut(&[f64]) -> Result<Vec<f64>>,
    C: FnMut(NodeMut<'_>) -> Result<()>,
{
    match node {
        GeoJson::FeatureCollection(fc) => {
            for feature in &mut fc.features {
                traverse_feature(feature, on_position, on_node_complete)?;
            }
            on_node_complete(NodeMut::FeatureCollection(fc))
        }
        GeoJson::Feature(feature) => traverse_feature(feature, on_position, on_node_complete),
        GeoJson::Geometry(geometry) => traverse_geometry(geometry, on_position, on_node_complete),
    }
}

fn traverse_feature<P, C>(feature: &mut Feature, on_position: &mut P, on_node_complete: &mut C) -> Result<()>
where
    P: FnMut(&[f64]) -> Result<Vec<f64>>,
    C: FnMut(NodeMut<'_>) -> Result<()>,
{
    if let Some(geometry) = &mut feature.geometry {
        traverse_geometry(geometry, on_position, on_node_complete)?;
    }
    on_node_complete(NodeMut::Feature(feature))
}

fn traverse_geometry<P, C>(geometry: &mut Geometry, on_position: &mut P, on_node_complete: &mut C) -> Result<()>
where
    P: FnMut(&[f64]) -> Result<Vec<f64>>,
    C: FnMut(NodeMut<'_>) -> Result<()>,
{
    match &mut *geometry {
        Geometry::GeometryCollection(gc) => {
            for child in &mut gc.geometries {
                traverse_geometry(child, on_position, on_node_complete)?;
            }
        }
        other => {
            if let Some(coordinates) = other.coordinates_mut() {
                visit_positions(coordinates, on_position)?;
            }
        }
    }
    on_node_complete(NodeMut::Geometry(geometry))
}

fn visit_positions<P>(coordinates: &mut Coordinates, on_position: &mut P) -> Result<()>
where
    P: FnMut(&[f64]) -> Result<Vec<f64>>,
{
    match coordinates {
        Coordinates::Position(position) if position.is_empty() => Ok(()),
        Coordinates::Position(position) => {
            *position = on_position(position)?;
            Ok(())
        }
        Coordinates::Nested(children) => children
            .iter_mut()
            .try_for_each(|child| visit_positions(child, on_position)),
    }
}

/// Apply `on_position` to every position, ignoring nodes.
pub fn map_positions<P>(node: &mut GeoJson, mut on_position: P) -> Result<()>
where
    P: FnMut(&[f64]) -> Result<Vec<f64>>,
{
    traverse(node, &mut on_position, &mut |_| Ok(()))
}
