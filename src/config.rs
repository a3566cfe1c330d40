//! Configuration for the transformation engine.

use crate::crs::CrsIdentifier;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration. Every section and field has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output rounding
    #[serde(default)]
    pub precision: PrecisionConfig,

    /// Supported CRSs and selection policy
    #[serde(default)]
    pub crs: CrsConfig,

    /// Densification and density check
    #[serde(default)]
    pub densify: DensifyConfig,

    /// Payload limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// PROJ backend settings
    #[serde(default)]
    pub proj: ProjConfig,

    /// Batch processing
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Output rounding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecisionConfig {
    /// Decimals for metre-based horizontal axes; degree axes get 5 more
    #[serde(default = "default_digits")]
    pub default_digits: u32,

    /// Decimals for heights
    #[serde(default = "default_digits")]
    pub height_digits: u32,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            default_digits: default_digits(),
            height_digits: default_digits(),
        }
    }
}

/// CRS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrsConfig {
    /// CRSs accepted as source or target. Empty accepts everything the
    /// backend resolves.
    #[serde(default = "default_supported_crs")]
    pub supported: Vec<CrsIdentifier>,

    /// Source CRS -> target CRSs that must not be transformed directly
    #[serde(default = "default_exclude_transformations")]
    pub exclude_transformations: BTreeMap<CrsIdentifier, Vec<CrsIdentifier>>,

    /// Method codes of transformation steps that need an epoch
    /// (time-dependent 1053, 1054, 1056, 1057; time-specific 1065, 1066)
    #[serde(default = "default_time_dependent_method_codes")]
    pub time_dependent_method_codes: Vec<String>,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self {
            supported: default_supported_crs(),
            exclude_transformations: default_exclude_transformations(),
            time_dependent_method_codes: default_time_dependent_method_codes(),
        }
    }
}

/// Densification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensifyConfig {
    /// Working CRS for 2D payloads
    #[serde(default = "default_densify_crs_2d")]
    pub crs_2d: CrsIdentifier,

    /// Working CRS for 3D payloads
    #[serde(default = "default_densify_crs_3d")]
    pub crs_3d: CrsIdentifier,

    /// Maximum segment length in metres when none is requested
    #[serde(default = "default_max_segment_length")]
    pub default_max_segment_length: f64,

    /// Smallest accepted maximum segment length in metres
    #[serde(default = "default_max_segment_length")]
    pub min_max_segment_length: f64,

    /// Smallest accepted maximum segment deviation in metres
    #[serde(default = "default_min_max_segment_deviation")]
    pub min_max_segment_deviation: f64,

    /// Area [min_lon, min_lat, max_lon, max_lat] in the 2D working CRS where
    /// the deviation approximation holds
    #[serde(default = "default_deviation_valid_bbox")]
    pub deviation_valid_bbox: [f64; 4],
}

impl Default for DensifyConfig {
    fn default() -> Self {
        Self {
            crs_2d: default_densify_crs_2d(),
            crs_3d: default_densify_crs_3d(),
            default_max_segment_length: default_max_segment_length(),
            min_max_segment_length: default_max_segment_length(),
            min_max_segment_deviation: default_min_max_segment_deviation(),
            deviation_valid_bbox: default_deviation_valid_bbox(),
        }
    }
}

/// Payload limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of positions in one payload
    #[serde(default)]
    pub max_coordinates: Option<usize>,
}

/// PROJ backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjConfig {
    /// Extra directories searched for proj.db and grids
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Allow PROJ to download grids from the CDN
    #[serde(default)]
    pub enable_network: bool,

    /// Offer ballpark transformations when no proper one exists
    #[serde(default)]
    pub allow_ballpark: bool,
}

/// Batch processing configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Rayon thread pool size for file processing
    #[serde(default)]
    pub rayon_threads: Option<usize>,

    /// Optional path to save metrics JSON after a run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

const MAX_DIGITS: u32 = 15;

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing {}", path.display()))?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.precision.default_digits > MAX_DIGITS || self.precision.height_digits > MAX_DIGITS {
            anyhow::bail!("Precision digits must be at most {}", MAX_DIGITS);
        }
        if self.crs.time_dependent_method_codes.is_empty() {
            anyhow::bail!("At least one time-dependent method code is required");
        }

        let densify = &self.densify;
        if densify.min_max_segment_length <= 0.0 {
            anyhow::bail!("min_max_segment_length must be > 0");
        }
        if densify.min_max_segment_deviation <= 0.0 {
            anyhow::bail!("min_max_segment_deviation must be > 0");
        }
        if densify.default_max_segment_length < densify.min_max_segment_length {
            anyhow::bail!(
                "default_max_segment_length ({}) is below min_max_segment_length ({})",
                densify.default_max_segment_length,
                densify.min_max_segment_length
            );
        }
        let [min_x, min_y, max_x, max_y] = densify.deviation_valid_bbox;
        if min_x >= max_x || min_y >= max_y {
            anyhow::bail!("deviation_valid_bbox must be [min_x, min_y, max_x, max_y]");
        }

        if self.limits.max_coordinates == Some(0) {
            anyhow::bail!("max_coordinates must be > 0");
        }
        if self.processing.rayon_threads == Some(0) {
            anyhow::bail!("rayon_threads must be > 0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_digits() -> u32 { 4 }
fn default_densify_crs_2d() -> CrsIdentifier { CrsIdentifier::new("EPSG", "9067") }
fn default_densify_crs_3d() -> CrsIdentifier { CrsIdentifier::new("EPSG", "7931") }
fn default_max_segment_length() -> f64 { 200.0 }
fn default_min_max_segment_deviation() -> f64 { 0.0001 }
fn default_deviation_valid_bbox() -> [f64; 4] { [2.0, 50.0, 8.0, 56.0] }

fn default_supported_crs() -> Vec<CrsIdentifier> {
    [
        "28992", "7415", "4258", "4326", "4937", "4979", "3035", "3857", "7931", "9067", "9286",
        "9289", "32631", "32632", "4936", "7789", "9000", "7912", "5709",
    ]
    .into_iter()
    .map(|code| CrsIdentifier::new("EPSG", code))
    .collect()
}

fn default_exclude_transformations() -> BTreeMap<CrsIdentifier, Vec<CrsIdentifier>> {
    BTreeMap::from([(
        CrsIdentifier::new("EPSG", "7415"),
        vec![CrsIdentifier::new("EPSG", "28992")],
    )])
}

fn default_time_dependent_method_codes() -> Vec<String> {
    ["1053", "1054", "1056", "1057", "1065", "1066"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn id(s: &str) -> CrsIdentifier {
        s.parse().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.precision.default_digits, 4);
        assert_eq!(config.precision.height_digits, 4);
        assert!(config.crs.supported.contains(&id("EPSG:28992")));
        assert_eq!(
            config.crs.exclude_transformations.get(&id("EPSG:7415")),
            Some(&vec![id("EPSG:28992")])
        );
        assert_eq!(config.densify.crs_2d, id("EPSG:9067"));
        assert_eq!(config.densify.crs_3d, id("EPSG:7931"));
        assert!(!config.proj.enable_network);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
precision:
  default_digits: 3
crs:
  supported: ["EPSG:28992", "urn:ogc:def:crs:EPSG::4326"]
  exclude_transformations:
    "EPSG:7415": ["EPSG:28992", "EPSG:4326"]
limits:
  max_coordinates: 1000
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.precision.default_digits, 3);
        assert_eq!(config.precision.height_digits, 4);
        assert_eq!(config.crs.supported, vec![id("EPSG:28992"), id("EPSG:4326")]);
        assert_eq!(config.crs.exclude_transformations[&id("EPSG:7415")].len(), 2);
        assert_eq!(config.crs.time_dependent_method_codes.len(), 6);
        assert_eq!(config.limits.max_coordinates, Some(1000));
        assert_eq!(config.densify.default_max_segment_length, 200.0);
    }

    #[test]
    fn test_invalid_crs_in_config() {
        assert!(Config::from_yaml("crs:\n  supported: [\"not a crs\"]\n").is_err());
    }

    #[test]
    fn test_json_and_yaml_round_trip() {
        let config = Config::from_json(r#"{"densify": {"crs_2d": "EPSG:4258"}}"#).unwrap();
        assert_eq!(config.densify.crs_2d, id("EPSG:4258"));

        let yaml = config.to_yaml().unwrap();
        let again = Config::from_yaml(&yaml).unwrap();
        assert_eq!(again.densify.crs_2d, id("EPSG:4258"));
        assert_eq!(again.crs.supported, config.crs.supported);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"precision": {{"height_digits": 2}}}}"#).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.precision.height_digits, 2);

        assert!(Config::from_file(Path::new("/nonexistent/config.yaml")).is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.precision.default_digits = 16;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.crs.time_dependent_method_codes.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.densify.min_max_segment_deviation = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.densify.deviation_valid_bbox = [8.0, 50.0, 2.0, 56.0];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.densify.default_max_segment_length = 100.0;
        assert!(config.validate().is_err());
    }
}
