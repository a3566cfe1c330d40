//! Coordinate Reference System identifiers and metadata.
//!
//! ## Identifier forms
//!
//! A CRS is addressed by an `(authority, code)` pair. Three textual forms are
//! accepted and normalized into a [`CrsIdentifier`]:
//!
//! - **Authority code**: `EPSG:28992`
//! - **OGC URI**: `http://www.opengis.net/def/crs/EPSG/0/28992`
//! - **OGC URN**: `urn:ogc:def:crs:EPSG::28992`
//!
//! ## Metadata
//!
//! [`CrsInfo`] carries what the engine needs to know about a CRS: axes with
//! their units, whether it is compound or geocentric, and its sub-CRSs.
//! Metadata is resolved once through the geodetic backend and kept in the
//! read-only [`CrsRegistry`].

/// CRS codes used throughout the engine.
pub mod codes {
    /// Amersfoort / RD New (x/y in metres).
    pub const RD_NEW: &str = "EPSG:28992";

    /// Amersfoort / RD New + NAP height (compound).
    pub const RD_NAP: &str = "EPSG:7415";

    /// NAP height (vertical).
    pub const NAP: &str = "EPSG:5709";

    /// WGS84 geographic coordinate system (lat/lon in degrees).
    pub const WGS84: &str = "EPSG:4326";

    /// WGS 84 / Pseudo-Mercator.
    pub const WEB_MERCATOR: &str = "EPSG:3857";

    /// ETRS89 (ETRF2000) geographic 2D.
    /// Working CRS for densification of 2D payloads.
    pub const ETRF2000_2D: &str = "EPSG:9067";

    /// ETRS89 (ETRF2000) geographic 3D.
    /// Working CRS for densification of 3D payloads.
    pub const ETRF2000_3D: &str = "EPSG:7931";

    /// ETRS89 + NAP height (compound).
    pub const ETRS89_NAP: &str = "EPSG:9286";
}

use crate::backend::GeodeticBackend;
use crate::error::{Result, TransformError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const OGC_URI_PREFIXES: [&str; 2] = [
    "http://www.opengis.net/def/crs/",
    "https://www.opengis.net/def/crs/",
];
const OGC_URN_PREFIX: &str = "urn:ogc:def:crs:";

const HORIZONTAL_AXIS_COUNT: usize = 2;
const VERTICAL_AXIS_COUNT: usize = 1;

/// Authority/code pair identifying a CRS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CrsIdentifier {
    authority: String,
    code: String,
}

impl CrsIdentifier {
    pub fn new(authority: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            authority: authority.into().to_uppercase(),
            code: code.into(),
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    /// OGC URI form, e.g. `http://www.opengis.net/def/crs/EPSG/0/28992`.
    ///
    /// The `0` version segment is a placeholder for the registry version.
    pub fn to_uri(&self) -> String {
        format!("{}{}/0/{}", OGC_URI_PREFIXES[0], self.authority, self.code)
    }

    /// OGC URN form, e.g. `urn:ogc:def:crs:EPSG::28992`.
    pub fn to_urn(&self) -> String {
        format!("{}{}::{}", OGC_URN_PREFIX, self.authority, self.code)
    }

    fn from_parts(authority: &str, code: &str, input: &str) -> Result<Self> {
        let valid = |part: &str| !part.is_empty() && !part.contains([':', '/']);
        if valid(authority) && valid(code) {
            Ok(Self::new(authority, code))
        } else {
            Err(TransformError::InvalidInput(format!(
                "invalid CRS identifier: {}",
                input
            )))
        }
    }
}

impl FromStr for CrsIdentifier {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let invalid = || TransformError::InvalidInput(format!("invalid CRS identifier: {}", s));

        if let Some(rest) = OGC_URI_PREFIXES
            .iter()
            .find_map(|prefix| input.strip_prefix(prefix))
        {
            // {authority}/{version}/{code}
            let parts: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
            return match parts.as_slice() {
                [authority, _version, code] => Self::from_parts(authority, code, s),
                _ => Err(invalid()),
            };
        }

        if let Some(rest) = input.strip_prefix(OGC_URN_PREFIX) {
            // {authority}:{version}:{code}, version is usually empty
            let parts: Vec<&str> = rest.split(':').collect();
            return match parts.as_slice() {
                [authority, _version, code] => Self::from_parts(authority, code, s),
                _ => Err(invalid()),
            };
        }

        let (authority, code) = input.split_once(':').ok_or_else(invalid)?;
        Self::from_parts(authority, code, s)
    }
}

impl TryFrom<String> for CrsIdentifier {
    type Error = TransformError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CrsIdentifier> for String {
    fn from(value: CrsIdentifier) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CrsIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

/// A single coordinate system axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub abbrev: String,
    pub direction: String,
    pub unit_name: String,
}

impl Axis {
    pub fn new(name: &str, abbrev: &str, direction: &str, unit_name: &str) -> Self {
        Self {
            name: name.to_string(),
            abbrev: abbrev.to_string(),
            direction: direction.to_string(),
            unit_name: unit_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrsKind {
    Geographic2D,
    Geographic3D,
    Geocentric,
    Projected,
    Vertical,
    Compound,
    Bound,
    Other,
}

/// Resolved CRS metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrsInfo {
    pub identifier: CrsIdentifier,
    pub name: String,
    pub kind: CrsKind,
    pub axes: Vec<Axis>,
    /// Components of a compound CRS, empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_crs: Vec<CrsInfo>,
    /// Datum is a dynamic geodetic reference frame.
    #[serde(default)]
    pub dynamic_datum: bool,
}

impl CrsInfo {
    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    pub fn is_compound(&self) -> bool {
        self.kind == CrsKind::Compound
    }

    pub fn is_geocentric(&self) -> bool {
        self.kind == CrsKind::Geocentric
    }

    /// Unit of the first horizontal axis (`x`, `e` or `lon`).
    pub fn x_unit(&self) -> Result<&str> {
        let axis = self
            .axes
            .iter()
            .find(|a| matches!(a.abbrev.to_lowercase().as_str(), "x" | "e" | "lon"))
            .ok_or_else(|| {
                TransformError::InvalidInput(format!(
                    "unable to retrieve unit x axis (x, e, lon) CRS {}",
                    self.identifier
                ))
            })?;

        match axis.unit_name.as_str() {
            "degree" | "metre" => Ok(axis.unit_name.as_str()),
            other => Err(TransformError::UnsupportedUnit {
                crs: self.identifier.to_string(),
                unit: other.to_string(),
            }),
        }
    }

    /// Number of decimals for horizontal output in this CRS.
    ///
    /// Degrees need 5 more decimals than metres for comparable resolution.
    pub fn precision(&self, base: u32) -> Result<u32> {
        match self.x_unit()? {
            "degree" => Ok(base + 5),
            _ => Ok(base),
        }
    }

    /// Axis summary such as `x (metre), y (metre), H (metre)`.
    pub fn axis_label(&self) -> String {
        self.axes
            .iter()
            .map(|a| format!("{} ({})", a.abbrev, a.unit_name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Split into horizontal and vertical component identifiers.
    ///
    /// A 2-axis sub-CRS is horizontal, a 1-axis sub-CRS is vertical. Either
    /// side falls back to the CRS itself when no such component exists.
    pub fn horizontal_vertical(&self) -> (CrsIdentifier, CrsIdentifier) {
        let mut horizontal = self.identifier.clone();
        let mut vertical = self.identifier.clone();
        for sub in &self.sub_crs {
            match sub.axis_count() {
                HORIZONTAL_AXIS_COUNT => horizontal = sub.identifier.clone(),
                VERTICAL_AXIS_COUNT => vertical = sub.identifier.clone(),
                _ => {}
            }
        }
        (horizontal, vertical)
    }
}

/// Process-wide CRS metadata.
///
/// Built once from the list of supported CRSs. Identifiers outside that list
/// are resolved through the backend on first use and memoized; failed
/// lookups are not.
pub struct CrsRegistry {
    backend: Arc<dyn GeodeticBackend>,
    entries: HashMap<CrsIdentifier, CrsInfo>,
    order: Vec<CrsIdentifier>,
    resolved: DashMap<CrsIdentifier, CrsInfo>,
}

impl CrsRegistry {
    /// Resolve all supported CRSs through the backend.
    ///
    /// An empty list means every CRS the backend knows is accepted.
    pub fn new(backend: Arc<dyn GeodeticBackend>, supported: &[CrsIdentifier]) -> Self {
        let mut entries = HashMap::with_capacity(supported.len());
        let mut order = Vec::with_capacity(supported.len());

        for id in supported {
            match backend.resolve_crs(id) {
                Ok(info) => {
                    order.push(id.clone());
                    entries.insert(id.clone(), info);
                }
                Err(e) => {
                    tracing::warn!("Skipping supported CRS {}: {}", id, e);
                }
            }
        }

        tracing::debug!(
            "CRS registry: {} of {} supported CRSs resolved by {}",
            entries.len(),
            supported.len(),
            backend.name()
        );

        Self {
            backend,
            entries,
            order,
            resolved: DashMap::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GeodeticBackend> {
        &self.backend
    }

    /// Resolve metadata for any identifier.
    pub fn resolve(&self, id: &CrsIdentifier) -> Result<CrsInfo> {
        if let Some(info) = self.entries.get(id) {
            return Ok(info.clone());
        }
        if let Some(info) = self.resolved.get(id) {
            return Ok(info.value().clone());
        }

        let info = self.backend.resolve_crs(id)?;
        self.resolved.insert(id.clone(), info.clone());
        Ok(info)
    }

    pub fn is_supported(&self, id: &CrsIdentifier) -> bool {
        self.order.is_empty() || self.entries.contains_key(id)
    }

    /// Fail with [`TransformError::UnsupportedCrs`] unless `id` is accepted.
    pub fn ensure_supported(&self, id: &CrsIdentifier) -> Result<()> {
        if self.is_supported(id) {
            Ok(())
        } else {
            Err(TransformError::UnsupportedCrs(id.to_string()))
        }
    }

    /// Supported CRSs in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &CrsInfo> {
        self.order.iter().filter_map(|id| self.entries.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Source/target pairs that must never be transformed directly.
#[derive(Debug, Clone, Default)]
pub struct ExclusionTable {
    pairs: HashMap<CrsIdentifier, HashSet<CrsIdentifier>>,
}

impl ExclusionTable {
    pub fn new(pairs: &BTreeMap<CrsIdentifier, Vec<CrsIdentifier>>) -> Self {
        Self {
            pairs: pairs
                .iter()
                .map(|(source, targets)| (source.clone(), targets.iter().cloned().collect()))
                .collect(),
        }
    }

    pub fn is_excluded(&self, source: &CrsIdentifier, target: &CrsIdentifier) -> bool {
        self.pairs
            .get(source)
            .is_some_and(|targets| targets.contains(target))
    }
}
