pub mod metrics;

use crate::controllers::DoseController;
use crate::error::{SimError, SimResult};
use crate::patient::{MealSchedule, PatientModel};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// One recorded step of an episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub time_hours: f64,
    pub glucose: f64,
    pub dose: f64,
}

/// The ordered (time, glucose, dose) record of one simulation run;
/// read-only once the episode completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    points: Vec<TrajectoryPoint>,
}

impl Trajectory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: TrajectoryPoint) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn glucose_trace(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.glucose).collect()
    }

    pub fn doses(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.dose).collect()
    }
}

/// Per-episode trend state: estimates glucose rate and acceleration from
/// consecutive samples by first differences.
///
/// This state is owned by the driver, never by a controller, so parallel
/// episode comparisons cannot interfere through shared fields. The first
/// update of an episode reports rate 0 and acceleration 0.
#[derive(Debug, Clone, Default)]
pub struct TrendEstimator {
    prev_glucose: Option<f64>,
    prev_rate: f64,
}

impl TrendEstimator {
    pub fn reset(&mut self) {
        self.prev_glucose = None;
        self.prev_rate = 0.0;
    }

    /// Feed the next glucose sample; returns (rate, acceleration) in
    /// mg/dL per minute and mg/dL per minute squared.
    pub fn update(&mut self, glucose: f64, step_minutes: f64) -> (f64, f64) {
        let (rate, accel) = match self.prev_glucose {
            Some(prev) => {
                let rate = (glucose - prev) / step_minutes;
                let accel = (rate - self.prev_rate) / step_minutes;
                (rate, accel)
            }
            None => (0.0, 0.0),
        };

        self.prev_glucose = Some(glucose);
        self.prev_rate = rate;
        (rate, accel)
    }
}

/// Closed-loop episode driver: observe glucose, compute a dose, advance the
/// patient, strictly in that order at every step.
pub struct Simulator {
    schedule: MealSchedule,
    duration_hours: f64,
    noise: Option<Normal<f64>>,
    rng: StdRng,
}

impl Simulator {
    pub fn new(
        schedule: MealSchedule,
        duration_hours: f64,
        sensor_noise_sd: Option<f64>,
        seed: Option<u64>,
    ) -> SimResult<Self> {
        schedule.validate()?;

        if !duration_hours.is_finite() || duration_hours <= 0.0 {
            return Err(SimError::Validation(
                "Episode duration must be positive".to_string(),
            ));
        }

        let noise = match sensor_noise_sd {
            Some(sd) if sd > 0.0 => Some(Normal::new(0.0, sd).map_err(|_| SimError::Random)?),
            _ => None,
        };

        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            schedule,
            duration_hours,
            noise,
            rng,
        })
    }

    /// A noiseless 24-hour driver over the given schedule.
    pub fn noiseless(schedule: MealSchedule) -> SimResult<Self> {
        Self::new(schedule, 24.0, None, Some(0))
    }

    fn observe(&mut self, glucose: f64) -> f64 {
        match self.noise {
            Some(noise) => (glucose + self.rng.sample(noise)).max(0.0),
            None => glucose,
        }
    }

    /// Run one episode against a fresh patient and controller.
    ///
    /// The dose at step k is computed from step k-1's realized glucose (the
    /// patient's starting glucose for the first step): the observation is
    /// one step stale, matching CGM-style sampled feedback. Physiology is
    /// advanced only after the dose for the step is known.
    pub fn run_episode(
        &mut self,
        patient: &mut PatientModel,
        controller: &mut dyn DoseController,
    ) -> SimResult<Trajectory> {
        controller.reset();

        let dt_hours = patient.dt_hours();
        let step_minutes = patient.step_minutes();
        let n_steps = (self.duration_hours / dt_hours).round() as usize;

        info!(
            "Running {} episode: {} steps of {:.1} min over {:.1} h",
            controller.name(),
            n_steps,
            step_minutes,
            self.duration_hours
        );

        let mut trend = TrendEstimator::default();
        let mut trajectory = Trajectory::with_capacity(n_steps);
        let mut observed = patient.glucose();

        for i in 0..n_steps {
            let t = i as f64 * dt_hours;
            let meal_rate = self.schedule.glucose_rate_at(t);

            let reading = self.observe(observed);
            let (rate, accel) = trend.update(reading, step_minutes);

            let dose = match controller.compute_dose_with_trend(reading, rate, accel) {
                Some(dose) => dose?,
                None => controller.compute_dose(reading, step_minutes)?,
            };

            let glucose = patient.step(dose, meal_rate)?;
            trajectory.push(TrajectoryPoint {
                time_hours: t,
                glucose,
                dose,
            });

            debug!(
                "step {}: t={:.2}h obs={:.1} rate={:.3} accel={:.4} dose={:.3} -> G={:.1}",
                i, t, reading, rate, accel, dose, glucose
            );
            observed = glucose;
        }

        Ok(trajectory)
    }
}
