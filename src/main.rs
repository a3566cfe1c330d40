//! Coordinate Transformation CLI
//!
//! Transform, densify and density check GeoJSON/CityJSON files.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coordinate_transformation::geometry::{Body, GeoJson};
use coordinate_transformation::orchestrator::{parse_coordinates, to_wkt};
use coordinate_transformation::{
    build_orchestrator, init_rayon, Config, CrsIdentifier, CrsParams, GeodeticBackend,
    Orchestrator, SegmentParams, TransformError, TransformOptions,
};

#[derive(Parser)]
#[command(name = "coordinate-transformation")]
#[command(about = "Transform coordinates between CRSs, densify and density check geometries", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct CrsArgs {
    /// Source CRS, e.g. EPSG:28992 (a CRS declared in the file wins)
    #[arg(long)]
    source_crs: Option<CrsIdentifier>,

    /// Target CRS
    #[arg(long)]
    target_crs: Option<CrsIdentifier>,

    /// Fallback source CRS
    #[arg(long)]
    content_crs: Option<CrsIdentifier>,

    /// Fallback target CRS
    #[arg(long)]
    accept_crs: Option<CrsIdentifier>,

    /// Coordinate epoch as decimal year
    #[arg(long)]
    epoch: Option<f64>,
}

impl CrsArgs {
    fn params(&self) -> CrsParams {
        CrsParams {
            source_crs: self.source_crs.clone(),
            target_crs: self.target_crs.clone(),
            content_crs: self.content_crs.clone(),
            accept_crs: self.accept_crs.clone(),
            epoch: self.epoch,
        }
    }
}

#[derive(Args, Debug, Default)]
struct SegmentArgs {
    /// Maximum segment length in metres
    #[arg(long)]
    max_segment_length: Option<f64>,

    /// Maximum segment deviation in metres (takes precedence over length)
    #[arg(long)]
    max_segment_deviation: Option<f64>,
}

impl SegmentArgs {
    fn params(&self) -> SegmentParams {
        SegmentParams {
            max_segment_length: self.max_segment_length,
            max_segment_deviation: self.max_segment_deviation,
        }
    }
}

#[derive(Args, Debug)]
struct FileArgs {
    #[command(flatten)]
    crs: CrsArgs,

    #[command(flatten)]
    segment: SegmentArgs,

    /// Write results here instead of stdout
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transform a single position
    Transform {
        #[arg(long)]
        source_crs: CrsIdentifier,

        #[arg(long)]
        target_crs: CrsIdentifier,

        #[arg(long)]
        epoch: Option<f64>,

        /// Print WKT instead of a GeoJSON Point
        #[arg(long)]
        wkt: bool,

        /// Comma separated ordinates, e.g. 155000,463000
        #[arg(allow_hyphen_values = true)]
        coordinates: String,
    },

    /// Transform GeoJSON or CityJSON files
    TransformFile {
        /// Skip the density check
        #[arg(long)]
        no_density_check: bool,

        #[command(flatten)]
        args: FileArgs,
    },

    /// Densify line geometries of GeoJSON files
    Densify(FileArgs),

    /// Report line segments longer than the maximum
    CheckDensity(FileArgs),

    /// List supported CRSs
    Crss,

    /// Show metadata of one CRS
    Crs { id: CrsIdentifier },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => validate_command(cli.config.as_deref()),
        Commands::GenerateConfig { output } => generate_config_command(output),
        command => {
            let config = load_config(cli.config.as_deref())?;
            init_rayon(config.processing.rayon_threads)?;
            let orchestrator = build_orchestrator(create_backend(&config)?, &config);

            let result = run_command(&orchestrator, command);

            let snapshot = orchestrator.metrics().snapshot();
            tracing::info!("{}", snapshot);
            if let Some(path) = &config.processing.metrics_output_path {
                snapshot.save_to_file(path)?;
            }
            result
        }
    }
}

fn run_command(orchestrator: &Orchestrator, command: Commands) -> Result<()> {
    match command {
        Commands::Transform {
            source_crs,
            target_crs,
            epoch,
            wkt,
            coordinates,
        } => {
            let position = parse_coordinates(&coordinates)?;
            let out = orchestrator
                .transform_coordinates(&position, &source_crs, &target_crs, epoch)
                .map_err(report)?;
            if wkt {
                println!("{}", to_wkt(&out));
            } else {
                let point = serde_json::json!({"type": "Point", "coordinates": out});
                println!("{}", point);
            }
            Ok(())
        }

        Commands::TransformFile {
            no_density_check,
            args,
        } => {
            let params = args.crs.params();
            let options = TransformOptions {
                density_check: !no_density_check,
                segment: args.segment.params(),
            };
            process_files(&args, |contents| {
                let outcome = orchestrator.transform_body(Body::from_json_str(contents)?, &params, &options)?;
                tracing::info!(
                    "Density check: {}, content CRS: {}",
                    outcome.density_check,
                    outcome.target_crs
                );
                Ok(outcome.body.to_json_string()?)
            })
        }

        Commands::Densify(args) => {
            let (params, segment) = (args.crs.params(), args.segment.params());
            process_files(&args, |contents| {
                let mut geojson = parse_geojson(contents)?;
                orchestrator.densify_body(&mut geojson, &params, &segment)?;
                Ok(serde_json::to_string(&geojson)?)
            })
        }

        Commands::CheckDensity(args) => {
            let (params, segment) = (args.crs.params(), args.segment.params());
            process_files(&args, |contents| {
                let geojson = parse_geojson(contents)?;
                let report = orchestrator.check_density_body(&geojson, &params, &segment)?;
                Ok(serde_json::to_string(&report)?)
            })
        }

        Commands::Crss => {
            for info in orchestrator.engine().registry().iter() {
                println!("{}\t{}\t{}", info.identifier, info.name, info.axis_label());
            }
            Ok(())
        }

        Commands::Crs { id } => {
            let registry = orchestrator.engine().registry();
            registry.ensure_supported(&id).map_err(report)?;
            let info = registry.resolve(&id).map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }

        Commands::Validate | Commands::GenerateConfig { .. } => {
            anyhow::bail!("command does not use a geodetic backend")
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "proj")]
fn create_backend(config: &Config) -> Result<Arc<dyn GeodeticBackend>> {
    let backend = coordinate_transformation::backend::ProjBackend::new(&config.proj)
        .context("initializing PROJ")?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "proj"))]
fn create_backend(_config: &Config) -> Result<Arc<dyn GeodeticBackend>> {
    anyhow::bail!("built without a geodetic backend, rebuild with `--features proj`")
}

fn parse_geojson(contents: &str) -> Result<GeoJson> {
    match Body::from_json_str(contents)? {
        Body::GeoJson(geojson) => Ok(geojson),
        Body::CityJson(_) => Err(TransformError::InvalidInput(
            "CityJSON is not supported by this command".to_string(),
        )
        .into()),
    }
}

/// Print a transformation error as a problem document before propagating it.
fn report(err: TransformError) -> anyhow::Error {
    if let Ok(problem) = serde_json::to_string_pretty(&err.to_problem()) {
        eprintln!("{}", problem);
    }
    err.into()
}

/// Run `op` over every file in parallel, then write results in input order.
fn process_files<F>(args: &FileArgs, op: F) -> Result<()>
where
    F: Fn(&str) -> Result<String> + Sync,
{
    let (files, output_dir) = (&args.files, args.output_dir.as_deref());
    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let results: Vec<(&PathBuf, Result<String>)> = files
        .par_iter()
        .map(|path| {
            let result = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))
                .and_then(|contents| op(&contents));
            (path, result)
        })
        .collect();

    let mut failed = 0;
    for (path, result) in results {
        match result {
            Ok(json) => match output_dir {
                Some(dir) => {
                    let name = path
                        .file_name()
                        .with_context(|| format!("{} has no file name", path.display()))?;
                    let out = dir.join(name);
                    std::fs::write(&out, json)
                        .with_context(|| format!("writing {}", out.display()))?;
                    tracing::info!("Wrote {}", out.display());
                }
                None => println!("{}", json),
            },
            Err(e) => {
                failed += 1;
                match e.downcast_ref::<TransformError>() {
                    Some(err) => {
                        let problem = serde_json::to_string_pretty(&err.to_problem())?;
                        eprintln!("{}: {}", path.display(), problem);
                    }
                    None => tracing::error!("{}: {:#}", path.display(), e),
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", failed, files.len());
    }
    Ok(())
}

fn validate_command(config_path: Option<&Path>) -> Result<()> {
    load_config(config_path)?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Coordinate Transformation Configuration

# === PRECISION: Output rounding ===
precision:
  # Decimals for metre axes; degree axes get 5 more
  default_digits: 4
  # Decimals for heights
  height_digits: 4

# === CRS: Supported CRSs and selection policy ===
crs:
  # Accepted source/target CRSs (empty list = everything PROJ resolves)
  supported: ["EPSG:28992", "EPSG:7415", "EPSG:4258", "EPSG:4326", "EPSG:4937",
    "EPSG:4979", "EPSG:3035", "EPSG:3857", "EPSG:7931", "EPSG:9067", "EPSG:9286",
    "EPSG:9289", "EPSG:32631", "EPSG:32632", "EPSG:4936", "EPSG:7789", "EPSG:9000",
    "EPSG:7912", "EPSG:5709"]

  # Source -> targets that must not be transformed directly
  exclude_transformations:
    "EPSG:7415": ["EPSG:28992"]

  # Transformation methods that need an epoch
  time_dependent_method_codes: ["1053", "1054", "1056", "1057", "1065", "1066"]

# === DENSIFY: Densification and density check ===
densify:
  crs_2d: "EPSG:9067"
  crs_3d: "EPSG:7931"
  default_max_segment_length: 200.0
  min_max_segment_length: 200.0
  min_max_segment_deviation: 0.0001
  # [min_lon, min_lat, max_lon, max_lat] in EPSG:9067
  deviation_valid_bbox: [2.0, 50.0, 8.0, 56.0]

# === LIMITS ===
limits:
  # Maximum positions per payload (null = no limit)
  max_coordinates: null

# === PROJ ===
proj:
  # Extra directories with proj.db and grids
  search_paths: []
  # Download grids from the PROJ CDN
  enable_network: false
  # Accept ballpark transformations
  allow_ballpark: false

# === PROCESSING ===
processing:
  # Rayon thread pool size for file processing (null = num CPUs)
  rayon_threads: null

  # Write a metrics snapshot as JSON after each run
  # metrics_output_path: "metrics.json"
  metrics_output_path: null
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_transform() {
        let cli = Cli::try_parse_from([
            "coordinate-transformation",
            "transform",
            "--source-crs",
            "EPSG:28992",
            "--target-crs",
            "EPSG:4326",
            "--wkt",
            "155000,463000",
        ])
        .unwrap();
        match cli.command {
            Commands::Transform {
                source_crs, wkt, coordinates, ..
            } => {
                assert_eq!(source_crs.code(), "28992");
                assert!(wkt);
                assert_eq!(coordinates, "155000,463000");
            }
            _ => panic!("expected transform"),
        }
    }

    #[test]
    fn test_cli_parse_transform_file() {
        let cli = Cli::try_parse_from([
            "coordinate-transformation",
            "-c",
            "config.yaml",
            "transform-file",
            "--target-crs",
            "EPSG:4326",
            "--no-density-check",
            "--max-segment-deviation",
            "0.001",
            "a.json",
            "b.json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("config.yaml")));
        match cli.command {
            Commands::TransformFile {
                no_density_check,
                args,
            } => {
                assert!(args.crs.source_crs.is_none());
                assert_eq!(args.crs.params().target_crs, Some("EPSG:4326".parse().unwrap()));
                assert!(no_density_check);
                assert!(args.segment.params().is_deviation());
                assert_eq!(args.files.len(), 2);
            }
            _ => panic!("expected transform-file"),
        }
    }

    #[test]
    fn test_cli_parse_check_density() {
        let cli = Cli::try_parse_from([
            "coordinate-transformation",
            "check-density",
            "--content-crs",
            "EPSG:28992",
            "-o",
            "out",
            "a.json",
        ])
        .unwrap();
        match cli.command {
            Commands::CheckDensity(args) => {
                assert_eq!(args.crs.params().content_crs, Some("EPSG:28992".parse().unwrap()));
                assert_eq!(args.output_dir, Some(PathBuf::from("out")));
                assert!(!args.segment.params().is_deviation());
            }
            _ => panic!("expected check-density"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_crs() {
        let cli = Cli::try_parse_from([
            "coordinate-transformation",
            "crs",
            "not-a-crs",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["coordinate-transformation", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        generate_config_command(path.clone()).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.crs.supported.len(), 19);
        assert_eq!(config.limits.max_coordinates, None);
    }

    #[test]
    fn test_parse_geojson_rejects_cityjson() {
        let city = r#"{"type": "CityJSON", "version": "2.0",
            "transform": {"scale": [1, 1, 1], "translate": [0, 0, 0]},
            "CityObjects": {}, "vertices": []}"#;
        assert!(parse_geojson(city).is_err());
        assert!(parse_geojson(r#"{"type": "Point", "coordinates": [1, 2]}"#).is_ok());
    }
}
