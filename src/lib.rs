//! Coordinate Transformation
//!
//! CRS transformation, geodesic densification and density checks for
//! GeoJSON and CityJSON payloads.
//!
//! # Architecture
//!
//! - **CRS**: identifiers, resolved metadata and the supported-CRS registry
//! - **Backend**: geodetic backends ranking candidate operations (PROJ, in-memory)
//! - **Transform**: operation selection, compound CRS splitting and
//!   per-request transform functions with rounding
//! - **Geometry**: GeoJSON/CityJSON model, tree walker and bbox aggregation
//! - **Densify**: geodesic densification and density checks
//! - **Orchestrator**: CRS precedence, validation and whole-payload requests
//!
//! # Usage
//!
//! ```no_run
//! use coordinate_transformation::{build_orchestrator, Config, CrsParams, TransformOptions};
//! use coordinate_transformation::geometry::Body;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     # #[cfg(feature = "proj")]
//!     # {
//!     let backend = std::sync::Arc::new(coordinate_transformation::backend::ProjBackend::new(&config.proj)?);
//!     let orchestrator = build_orchestrator(backend, &config);
//!     let body = Body::from_json_str(r#"{"type": "Point", "coordinates": [155000, 463000]}"#)?;
//!     let params = CrsParams::new("EPSG:28992".parse()?, "EPSG:4326".parse()?);
//!     let outcome = orchestrator.transform_body(body, &params, &TransformOptions::default())?;
//!     println!("{}", outcome.body.to_json_string()?);
//!     # }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod crs;
pub mod densify;
pub mod error;
pub mod geometry;
pub mod metrics;
pub mod orchestrator;
pub mod transform;


pub use backend::{GeodeticBackend, MemoryBackend};
pub use config::Config;
pub use crs::{CrsIdentifier, CrsInfo, CrsRegistry};
pub use densify::{DensityCheckReport, DensityCheckResult, SegmentParams};
pub use error::{Problem, TransformError};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::{CrsParams, Orchestrator, TransformOptions, TransformOutcome};
pub use transform::{TransformEngine, TransformFn};

use anyhow::Result;
use std::sync::Arc;

/// Wire registry, engine and orchestrator together for `backend`.
pub fn build_orchestrator(backend: Arc<dyn GeodeticBackend>, config: &Config) -> Orchestrator {
    let registry = Arc::new(CrsRegistry::new(backend, &config.crs.supported));
    tracing::info!("{} supported CRSs resolved", registry.len());

    let engine = Arc::new(TransformEngine::new(registry, config));
    Orchestrator::new(engine, config, Metrics::new())
}

/// Initialize the Rayon thread pool.
pub fn init_rayon(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    Ok(())
}
