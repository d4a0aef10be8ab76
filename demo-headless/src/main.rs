use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use drift_sim_core::behavior::{
    Capability, DepthBand, Diel, DielTrigger, FixedDaylight, Settlement, SettlementKind, SpeedSampling, SunEvent,
};
use drift_sim_core::boundary::{ConstantBathymetry, LandPolygon, PolygonShoreline};
use drift_sim_core::config::{ConfigError, Release};
use drift_sim_core::dataset::regular::axis;
use drift_sim_core::{
    LarvaBehavior, LifeStage, RegularGrid, Simulation, SimulationConfig, TaskOutcome, Transport, Variable,
};
use tracing_subscriber::EnvFilter;

/// Particle drift demo over a synthetic current field
#[derive(Parser, Debug)]
#[command(name = "drift-headless")]
#[command(about = "Lagrangian particle drift demo", long_about = None)]
struct Args {
    /// JSON run configuration; when given, the run flags below are ignored
    /// except --workers
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of particles to release
    #[arg(short, long, default_value_t = 20)]
    particles: usize,

    /// Number of model timesteps
    #[arg(short, long, default_value_t = 48)]
    steps: usize,

    /// Timestep length in seconds
    #[arg(short, long, default_value_t = 3600.0)]
    timestep: f64,

    /// Eastward current in m/s
    #[arg(short, long, default_value_t = 0.1)]
    u: f64,

    /// Northward current in m/s
    #[arg(short, long, default_value_t = 0.05)]
    v: f64,

    /// Horizontal dispersion coefficient in m²/s
    #[arg(long, default_value_t = 1.0)]
    dispersion: f64,

    /// Release scatter radius in meters
    #[arg(long, default_value_t = 200.0)]
    radius: f64,

    /// Release depth in meters (negative below the surface)
    #[arg(long, default_value_t = -5.0)]
    depth: f64,

    /// Flat sea floor depth in meters
    #[arg(long, default_value_t = -120.0)]
    floor: f64,

    /// Place a straight coastline this many degrees east of the release point (0 = none)
    #[arg(long, default_value_t = 0.1)]
    coast: f64,

    /// Give particles a larval life cycle with diel migration and settlement
    #[arg(short, long)]
    larvae: bool,

    /// Worker threads (minimum 2)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
}

fn larval_behavior() -> LarvaBehavior {
    let swim = Capability::new(0.005, 0.001, SpeedSampling::Gaussian);
    let egg = LifeStage::new("egg", 1.0);
    let larva = LifeStage::new("larva", 2.0)
        .with_linear_growth(-0.05, 2.5)
        .with_capability(swim.clone())
        .with_diel(Diel::new(
            DielTrigger::Cycle {
                event: SunEvent::Sunrise,
                offset_hours: 0.0,
            },
            DepthBand::new(-40.0, -60.0),
        ))
        .with_diel(Diel::new(
            DielTrigger::Cycle {
                event: SunEvent::Sunset,
                offset_hours: 0.0,
            },
            DepthBand::new(-5.0, -15.0),
        ));
    let competent = LifeStage::new("competent", 5.0)
        .with_capability(swim)
        .with_settlement(Settlement::new(SettlementKind::Benthic, DepthBand::new(-50.0, -150.0)));
    LarvaBehavior::new(vec![egg, larva, competent], Arc::new(FixedDaylight::default()))
}

/// Run configuration from `--config` when given, otherwise from the flags.
fn build_config(args: &Args) -> Result<SimulationConfig, ConfigError> {
    if let Some(path) = &args.config {
        return SimulationConfig::load(path);
    }
    Ok(SimulationConfig {
        dataset: "synthetic".to_string(),
        release: Release {
            latitude: 60.0,
            longitude: -147.0,
            depth: args.depth,
            start: Utc.with_ymd_and_hms(2014, 1, 2, 0, 0, 0).single(),
            radius: args.radius,
        },
        timestep: args.timestep,
        steps: args.steps,
        particles: args.particles,
        seed: args.seed,
        dispersion: Transport {
            horizontal_dispersion: args.dispersion,
            ..Transport::default()
        },
        ..SimulationConfig::default()
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    println!("=== Drift Simulation Demo ===\n");

    let mut config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Could not load configuration: {e}");
            std::process::exit(2);
        }
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    let Some(start) = config.release.start else {
        eprintln!("Configuration has no release start time");
        std::process::exit(2);
    };

    // Synthetic field: 0.5° box around the release point, hourly for the whole run
    let hours = ((config.steps as f64 * config.timestep) / 3600.0).ceil() as i64 + 2;
    let times = (0..hours).map(|h| start + Duration::hours(h)).collect();
    let lat0 = config.release.latitude - 0.5;
    let lon0 = config.release.longitude - 0.5;
    let (u, v) = (args.u as f32, args.v as f32);
    let dataset = match RegularGrid::new(
        times,
        axis(0.0, -25.0, 8),
        axis(lat0, 0.01, 101),
        axis(lon0, 0.01, 101),
    ) {
        Ok(grid) => grid
            .with_constant(Variable::U, u)
            .with_constant(Variable::V, v)
            .with_fn(Variable::Temperature, |_, k, _, _| 12.0 - k as f32)
            .with_constant(Variable::Salinity, 32.0),
        Err(e) => {
            eprintln!("Could not build synthetic grid: {e}");
            std::process::exit(1);
        }
    };
    println!(
        "Grid: 101x101 cells, 8 levels, {} hourly slices starting {}",
        hours,
        start.format("%Y-%m-%d %H:%M")
    );

    let mut simulation = Simulation::new(config.clone(), Arc::new(dataset))
        .with_bathymetry(Arc::new(ConstantBathymetry(args.floor)));
    if args.coast > 0.0 {
        let west = config.release.longitude + args.coast;
        let coast = PolygonShoreline::new(vec![LandPolygon::rectangle(
            "mainland",
            west,
            lat0,
            west + 1.0,
            lat0 + 1.0,
        )]);
        simulation = simulation.with_shoreline(Arc::new(coast));
        println!("Coastline at longitude {west:.3}");
    }
    if args.larvae {
        simulation = simulation.with_behavior(larval_behavior());
        println!("Larval behavior: egg -> larva -> competent");
    }

    println!(
        "Releasing {} particles at ({:.3}, {:.3}), {} steps of {:.0}s\n",
        config.particles, config.release.latitude, config.release.longitude, config.steps, config.timestep
    );

    let output = match simulation.run() {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Simulation failed: {e}");
            std::process::exit(1);
        }
    };

    println!("  Id |   Latitude |   Longitude |   Depth | State");
    println!("-----|------------|-------------|---------|---------");
    for outcome in &output.outcomes {
        match outcome {
            TaskOutcome::Finished(p) => {
                let state = if p.settled() {
                    "settled"
                } else if p.dead() {
                    "dead"
                } else {
                    "drifting"
                };
                let loc = p.location();
                println!(
                    "{:4} | {:10.5} | {:11.5} | {:7.1} | {}",
                    p.id(),
                    loc.latitude(),
                    loc.longitude(),
                    loc.depth(),
                    state
                );
            }
            TaskOutcome::Failed { id, reason, .. } => println!("{id:4} | failed: {reason}"),
        }
    }

    let report = output.report;
    println!("\n=== Simulation Complete ===");
    println!("Alive: {}", report.alive);
    println!("Settled: {}", report.settled);
    println!("Dead: {}", report.dead);
    println!("Failed: {}", report.failed);
    println!("Cache refills: {}", report.refills);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispersion_flag_builds_default_run() {
        let args = Args::parse_from(["drift-headless", "--dispersion", "3.5"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.dispersion.horizontal_dispersion, 3.5);
        assert_eq!(config.release.longitude, -147.0);
    }

    #[test]
    fn test_config_file_keeps_its_dispersion() {
        let path = std::env::temp_dir().join(format!("drift-headless-{}.json", std::process::id()));
        let mut file_config = SimulationConfig::default();
        file_config.dispersion.horizontal_dispersion = 7.0;
        std::fs::write(&path, file_config.to_json_string().unwrap()).unwrap();

        let args = Args::parse_from(["drift-headless", "--config", path.to_str().unwrap(), "--dispersion", "0.5"]);
        let config = build_config(&args).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.dispersion.horizontal_dispersion, 7.0);
    }
}
