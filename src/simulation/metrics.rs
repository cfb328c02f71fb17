use super::Trajectory;
use serde::{Deserialize, Serialize};

/// Reference glucose for the control cost (mg/dL).
pub const REFERENCE_GLUCOSE: f64 = 90.0;
/// Below this floor the squared error is penalized tenfold: hypoglycemia
/// costs far more clinically than the same excursion above target.
pub const HYPO_PENALTY_FLOOR: f64 = 80.0;
const HYPO_PENALTY_WEIGHT: f64 = 10.0;

/// Root-mean-square deviation from `reference`, with the squared error of
/// any sample below `floor` weighted tenfold.
pub fn cost(glucose_trace: &[f64], reference: f64, floor: f64) -> f64 {
    if glucose_trace.is_empty() {
        return 0.0;
    }

    let total: f64 = glucose_trace
        .iter()
        .map(|&g| {
            let err = g - reference;
            let squared = err * err;
            if g < floor {
                HYPO_PENALTY_WEIGHT * squared
            } else {
                squared
            }
        })
        .sum();

    (total / glucose_trace.len() as f64).sqrt()
}

/// Summary statistics of one completed episode; pure reductions over the
/// trajectory, no hidden state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    /// Percent of samples in the tight 80-140 mg/dL band.
    pub time_in_range_80_140: f64,
    /// Percent of samples in the clinical 70-180 mg/dL band.
    pub time_in_range_70_180: f64,
    pub hypo_events: usize,
    pub severe_hypo_events: usize,
    pub hyper_events: usize,
    pub mean_glucose: f64,
    pub glucose_sd: f64,
    pub glucose_cv_percent: f64,
    pub total_insulin: f64,
    pub cost: f64,
}

impl EpisodeMetrics {
    pub fn from_trajectory(trajectory: &Trajectory) -> Self {
        if trajectory.is_empty() {
            return Self {
                time_in_range_80_140: 0.0,
                time_in_range_70_180: 0.0,
                hypo_events: 0,
                severe_hypo_events: 0,
                hyper_events: 0,
                mean_glucose: 0.0,
                glucose_sd: 0.0,
                glucose_cv_percent: 0.0,
                total_insulin: 0.0,
                cost: 0.0,
            };
        }

        let glucose = trajectory.glucose_trace();
        let n = glucose.len() as f64;

        let in_tight = glucose.iter().filter(|&&g| (80.0..=140.0).contains(&g)).count();
        let in_wide = glucose.iter().filter(|&&g| (70.0..=180.0).contains(&g)).count();
        let hypo = glucose.iter().filter(|&&g| g < 70.0).count();
        let severe_hypo = glucose.iter().filter(|&&g| g < 54.0).count();
        let hyper = glucose.iter().filter(|&&g| g > 180.0).count();

        let mean = glucose.iter().sum::<f64>() / n;
        let variance = glucose.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n;
        let sd = variance.sqrt();
        let cv = if mean > 0.0 { sd / mean * 100.0 } else { 0.0 };

        let total_insulin = trajectory.doses().iter().sum();

        Self {
            time_in_range_80_140: in_tight as f64 / n * 100.0,
            time_in_range_70_180: in_wide as f64 / n * 100.0,
            hypo_events: hypo,
            severe_hypo_events: severe_hypo,
            hyper_events: hyper,
            mean_glucose: mean,
            glucose_sd: sd,
            glucose_cv_percent: cv,
            total_insulin,
            cost: cost(&glucose, REFERENCE_GLUCOSE, HYPO_PENALTY_FLOOR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::TrajectoryPoint;
    use approx::assert_relative_eq;

    fn trajectory_from(glucose: &[f64]) -> Trajectory {
        let mut trajectory = Trajectory::with_capacity(glucose.len());
        for (i, &g) in glucose.iter().enumerate() {
            trajectory.push(TrajectoryPoint {
                time_hours: i as f64 / 12.0,
                glucose: g,
                dose: 0.5,
            });
        }
        trajectory
    }

    #[test]
    fn test_cost_zero_at_reference() {
        let trace = vec![90.0; 100];
        assert_relative_eq!(cost(&trace, 90.0, 80.0), 0.0);
    }

    #[test]
    fn test_cost_is_rms_above_floor() {
        // Symmetric +-10 around the reference, all above the floor.
        let trace = vec![100.0, 80.0, 100.0, 80.0];
        assert_relative_eq!(cost(&trace, 90.0, 80.0), 10.0);
    }

    #[test]
    fn test_hypo_dip_strictly_increases_cost() {
        let without_dip = vec![90.0, 100.0, 90.0, 100.0];
        // Same absolute deviation, but one sample dips below the floor.
        let with_dip = vec![90.0, 100.0, 90.0, 80.0 - 10.0];

        let base = cost(&without_dip, 90.0, 80.0);
        let penalized = cost(&with_dip, 90.0, 80.0);
        assert!(penalized > base);

        // The penalty multiplies the squared error term by 10.
        let expected = ((0.0 + 100.0 + 0.0 + 10.0 * 400.0) / 4.0_f64).sqrt();
        assert_relative_eq!(penalized, expected);
    }

    #[test]
    fn test_empty_trace_has_zero_cost() {
        assert_relative_eq!(cost(&[], 90.0, 80.0), 0.0);
    }

    #[test]
    fn test_empty_trajectory_yields_zero_metrics() {
        let metrics = EpisodeMetrics::from_trajectory(&Trajectory::default());
        assert_eq!(metrics.hypo_events, 0);
        assert_relative_eq!(metrics.time_in_range_70_180, 0.0);
        assert_relative_eq!(metrics.mean_glucose, 0.0);
        assert_relative_eq!(metrics.total_insulin, 0.0);
        assert_relative_eq!(metrics.cost, 0.0);
    }

    #[test]
    fn test_metrics_counts_and_ranges() {
        let trajectory = trajectory_from(&[60.0, 50.0, 90.0, 120.0, 150.0, 200.0]);
        let metrics = EpisodeMetrics::from_trajectory(&trajectory);

        assert_eq!(metrics.hypo_events, 2);
        assert_eq!(metrics.severe_hypo_events, 1);
        assert_eq!(metrics.hyper_events, 1);
        assert_relative_eq!(metrics.time_in_range_80_140, 100.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.time_in_range_70_180, 50.0, epsilon = 1e-9);
        assert_relative_eq!(metrics.total_insulin, 3.0);
    }

    #[test]
    fn test_metrics_mean_and_variability() {
        let trajectory = trajectory_from(&[80.0, 100.0]);
        let metrics = EpisodeMetrics::from_trajectory(&trajectory);

        assert_relative_eq!(metrics.mean_glucose, 90.0);
        assert_relative_eq!(metrics.glucose_sd, 10.0);
        assert_relative_eq!(metrics.glucose_cv_percent, 10.0 / 90.0 * 100.0);
    }
}
