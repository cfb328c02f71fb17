use super::DoseController;
use crate::config::PidConfig;
use crate::error::SimResult;
use log::debug;

/// Baseline PID controller: linear response on glucose error with integral
/// and derivative terms, stateful across calls within one episode.
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    target: f64,
    max_dose: f64,
    integral: f64,
    prev_glucose: Option<f64>,
}

impl PidController {
    pub fn new(config: &PidConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
            target: config.target,
            max_dose: config.max_dose,
            integral: 0.0,
            prev_glucose: None,
        })
    }

    pub fn compute(&mut self, glucose: f64, dt_hours: f64) -> f64 {
        let error = glucose - self.target;

        let proportional = self.kp * error;

        self.integral += error * dt_hours;
        let integral = self.ki * self.integral;

        let derivative = match self.prev_glucose {
            Some(prev) => self.kd * (glucose - prev) / dt_hours,
            None => 0.0,
        };

        let raw_dose = proportional + integral + derivative;
        let dose = raw_dose.clamp(0.0, self.max_dose);

        // Back off half the accumulated error when the output saturates so
        // the integral does not wind up against the clamp.
        if raw_dose > self.max_dose || raw_dose < 0.0 {
            self.integral -= error * dt_hours * 0.5;
        }

        debug!(
            "pid: glucose={:.1} P={:.4} I={:.4} D={:.4} dose={:.4}",
            glucose, proportional, integral, derivative, dose
        );

        self.prev_glucose = Some(glucose);
        dose
    }
}

impl DoseController for PidController {
    fn name(&self) -> &str {
        "pid"
    }

    fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_glucose = None;
    }

    fn compute_dose(&mut self, glucose: f64, step_minutes: f64) -> SimResult<f64> {
        Ok(self.compute(glucose, step_minutes / 60.0))
    }
}
