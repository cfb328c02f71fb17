use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};

mod config;
mod controllers;
mod error;
mod fuzzy;
mod output;
mod patient;
mod simulation;

use crate::config::Config;
use crate::controllers::{create_controller, ControllerKind};
use crate::patient::PatientModel;
use crate::simulation::metrics::EpisodeMetrics;
use crate::simulation::Simulator;

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ControllerArg {
    Fuzzy,
    Pid,
    Both,
}

#[derive(Parser)]
#[command(name = "ap_simulation")]
#[command(about = "Closed-loop artificial pancreas simulation program")]
struct Cli {
    /// Configuration file path (tuned defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "results")]
    output: PathBuf,

    /// Controller(s) to simulate
    #[arg(long, value_enum, default_value = "both")]
    controller: ControllerArg,

    /// Random seed for the sensor noise model
    #[arg(short, long)]
    seed: Option<u64>,

    /// CGM sensor noise standard deviation (mg/dL), overriding the config
    #[arg(long)]
    noise_sd: Option<f64>,

    /// Directory of persisted per-controller performance stats to aggregate
    #[arg(long)]
    stats_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let config = match &cli.config {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            info!("Using tuned default configuration");
            Config::default()
        }
    };

    let noise_sd = cli.noise_sd.or(config.simulation.sensor_noise_sd);
    let kinds: Vec<ControllerKind> = match cli.controller {
        ControllerArg::Fuzzy => vec![ControllerKind::Fuzzy],
        ControllerArg::Pid => vec![ControllerKind::Pid],
        ControllerArg::Both => vec![ControllerKind::Fuzzy, ControllerKind::Pid],
    };

    std::fs::create_dir_all(&cli.output)?;

    let mut results = Vec::new();
    for kind in kinds {
        // Each episode gets its own patient, controller and driver so runs
        // cannot interfere through shared state.
        let mut patient = PatientModel::new(
            config.patient.initial_glucose,
            config.patient.initial_insulin,
            config.patient.dt_hours(),
            config.patient.params.clone(),
        )?;
        let mut controller = create_controller(kind, &config)?;
        let mut simulator = Simulator::new(
            config.simulation.meal_schedule(),
            config.simulation.duration_hours,
            noise_sd,
            cli.seed,
        )?;

        let trajectory = simulator.run_episode(&mut patient, controller.as_mut())?;
        let metrics = EpisodeMetrics::from_trajectory(&trajectory);
        output::save_results(controller.name(), &trajectory, &metrics, &cli.output)?;
        results.push((controller.name().to_string(), metrics));
    }

    print_comparison(&results);

    if let Some(stats_dir) = &cli.stats_dir {
        print_persisted_stats(stats_dir)?;
    }

    Ok(())
}

fn print_comparison(results: &[(String, EpisodeMetrics)]) {
    if results.is_empty() {
        return;
    }

    println!();
    println!("PERFORMANCE METRICS");
    println!("{}", "=".repeat(60));

    print!("{:<28}", "Metric");
    for (name, _) in results {
        print!("{:>15}", name);
    }
    println!();
    println!("{}", "-".repeat(28 + 15 * results.len()));

    let rows: Vec<(&str, Box<dyn Fn(&EpisodeMetrics) -> String>)> = vec![
        (
            "Time in Range (80-140) %",
            Box::new(|m| format!("{:.1}", m.time_in_range_80_140)),
        ),
        (
            "Time in Range (70-180) %",
            Box::new(|m| format!("{:.1}", m.time_in_range_70_180)),
        ),
        (
            "Hypoglycemia (<70)",
            Box::new(|m| m.hypo_events.to_string()),
        ),
        (
            "Severe hypo (<54)",
            Box::new(|m| m.severe_hypo_events.to_string()),
        ),
        (
            "Hyperglycemia (>180)",
            Box::new(|m| m.hyper_events.to_string()),
        ),
        (
            "Mean Glucose (mg/dL)",
            Box::new(|m| format!("{:.1}", m.mean_glucose)),
        ),
        (
            "Glucose Std Dev",
            Box::new(|m| format!("{:.1}", m.glucose_sd)),
        ),
        (
            "Glucose CV %",
            Box::new(|m| format!("{:.1}", m.glucose_cv_percent)),
        ),
        (
            "Total Insulin (units)",
            Box::new(|m| format!("{:.2}", m.total_insulin)),
        ),
        ("Cost Function", Box::new(|m| format!("{:.2}", m.cost))),
    ];

    for (label, fmt) in rows {
        print!("{:<28}", label);
        for (_, metrics) in results {
            print!("{:>15}", fmt(metrics));
        }
        println!();
    }
}

/// Discover `<stats_dir>/<controller>/performance_stats.csv` files and
/// print their column-wise averages.
fn print_persisted_stats(stats_dir: &Path) -> anyhow::Result<()> {
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(stats_dir)? {
        let entry = entry?;
        let stats_file = entry.path().join("performance_stats.csv");
        if stats_file.is_file() {
            entries.push((entry.file_name().to_string_lossy().into_owned(), stats_file));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    if entries.is_empty() {
        warn!("No performance_stats.csv files found under {:?}", stats_dir);
        return Ok(());
    }

    let summaries = output::aggregate_performance_stats(&entries);

    println!();
    println!(
        "{:<12} | {:>14} | {:>12} | {:>13} | {:>11}",
        "Controller", "TIR (70-180) %", "Hypo (<70) %", "Hyper (>180) %", "Risk Index"
    );
    println!("{}", "-".repeat(76));
    for summary in summaries {
        println!(
            "{:<12} | {:>14.2} | {:>12.2} | {:>13.2} | {:>11.2}",
            summary.controller,
            summary.time_in_range,
            summary.time_below_70,
            summary.time_above_180,
            summary.risk_index
        );
    }

    Ok(())
}
