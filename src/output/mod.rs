use crate::error::{SimError, SimResult};
use crate::simulation::metrics::EpisodeMetrics;
use crate::simulation::Trajectory;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Metrics report written next to the trajectory CSV.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub controller: String,
    pub generated_at: DateTime<Utc>,
    pub metrics: EpisodeMetrics,
}

pub fn save_results<P: AsRef<Path>>(
    controller_name: &str,
    trajectory: &Trajectory,
    metrics: &EpisodeMetrics,
    output_dir: P,
) -> SimResult<()> {
    let output_path = output_dir.as_ref();

    save_trajectory(
        trajectory,
        output_path.join(format!("trajectory_{}.csv", controller_name)),
    )?;
    save_report(
        controller_name,
        metrics,
        output_path.join(format!("metrics_{}.json", controller_name)),
    )?;

    info!("{} results saved to {:?}", controller_name, output_path);
    Ok(())
}

fn save_trajectory<P: AsRef<Path>>(trajectory: &Trajectory, path: P) -> SimResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(["TIME_HOURS", "GLUCOSE_MG_DL", "INSULIN_DOSE_UNITS"])?;
    for point in trajectory.points() {
        writer.write_record(&[
            point.time_hours.to_string(),
            point.glucose.to_string(),
            point.dose.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_report<P: AsRef<Path>>(
    controller_name: &str,
    metrics: &EpisodeMetrics,
    path: P,
) -> SimResult<()> {
    let report = RunReport {
        controller: controller_name.to_string(),
        generated_at: Utc::now(),
        metrics: metrics.clone(),
    };

    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &report)?;
    Ok(())
}

/// Column-wise averages of a persisted per-episode performance-stats file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub controller: String,
    /// Mean percent of time in 70-180 mg/dL.
    pub time_in_range: f64,
    /// Mean percent of time below 70 mg/dL.
    pub time_below_70: f64,
    /// Mean percent of time above 180 mg/dL.
    pub time_above_180: f64,
    pub risk_index: f64,
    pub episodes: usize,
}

const COL_TIR: &str = "70<=BG<=180";
const COL_HYPO: &str = "BG<70";
const COL_HYPER: &str = "BG>180";
const COL_RISK: &str = "Risk Index";

/// Read one controller's performance-stats CSV and average its columns.
///
/// Rows with a missing or unparseable risk index are skipped individually;
/// a file with no usable rows is an error.
pub fn load_performance_stats<P: AsRef<Path>>(
    controller_name: &str,
    path: P,
) -> SimResult<PerformanceSummary> {
    let mut reader = csv::Reader::from_path(&path)?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| -> SimResult<usize> {
        headers.iter().position(|h| h == name).ok_or_else(|| {
            SimError::Validation(format!(
                "Performance stats for {} missing column '{}'",
                controller_name, name
            ))
        })
    };

    let tir_idx = column(COL_TIR)?;
    let hypo_idx = column(COL_HYPO)?;
    let hyper_idx = column(COL_HYPER)?;
    let risk_idx = column(COL_RISK)?;

    let mut tir = 0.0;
    let mut hypo = 0.0;
    let mut hyper = 0.0;
    let mut risk = 0.0;
    let mut rows = 0usize;

    for (line, record) in reader.records().enumerate() {
        let record = record?;

        let parse = |idx: usize| -> Option<f64> {
            record.get(idx).and_then(|field| field.trim().parse().ok())
        };

        let row = (
            parse(tir_idx),
            parse(hypo_idx),
            parse(hyper_idx),
            parse(risk_idx),
        );

        match row {
            (Some(t), Some(lo), Some(hi), Some(r)) => {
                tir += t;
                hypo += lo;
                hyper += hi;
                risk += r;
                rows += 1;
            }
            _ => {
                debug!(
                    "Skipping malformed stats row {} for {}",
                    line + 1,
                    controller_name
                );
            }
        }
    }

    if rows == 0 {
        return Err(SimError::Validation(format!(
            "Performance stats for {} contain no usable rows",
            controller_name
        )));
    }

    let n = rows as f64;
    Ok(PerformanceSummary {
        controller: controller_name.to_string(),
        time_in_range: tir / n,
        time_below_70: hypo / n,
        time_above_180: hyper / n,
        risk_index: risk / n,
        episodes: rows,
    })
}

/// Aggregate persisted stats for several controllers. An unreadable file is
/// reported and skipped so the remaining controllers still compare.
pub fn aggregate_performance_stats(
    entries: &[(String, std::path::PathBuf)],
) -> Vec<PerformanceSummary> {
    let mut summaries = Vec::new();

    for (name, path) in entries {
        match load_performance_stats(name, path) {
            Ok(summary) => summaries.push(summary),
            Err(err) => error!("Could not read stats for {}: {}", name, err),
        }
    }

    summaries
}
