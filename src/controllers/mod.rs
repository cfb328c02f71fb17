pub mod fuzzy;
pub mod pid;

use crate::config::Config;
use crate::error::SimResult;

/// An insulin dose source driven by the closed loop.
///
/// Every controller supports the basic level/step-size contract. Controllers
/// that consume glucose trend estimates additionally implement
/// `compute_dose_with_trend`; the driver prefers that richer contract
/// whenever it is offered. External dose sources (e.g. a clinical
/// basal-bolus controller) plug in through this same trait.
pub trait DoseController {
    fn name(&self) -> &str;

    /// Clear any per-episode accumulators before a new run.
    fn reset(&mut self);

    /// Basic contract: glucose level (mg/dL) and elapsed step (minutes).
    fn compute_dose(&mut self, glucose: f64, step_minutes: f64) -> SimResult<f64>;

    /// Richer contract for trend-aware controllers: glucose level, rate
    /// (mg/dL per minute) and acceleration (mg/dL per minute squared).
    /// Returns None when the controller does not consume trend input.
    fn compute_dose_with_trend(
        &mut self,
        _glucose: f64,
        _rate: f64,
        _accel: f64,
    ) -> Option<SimResult<f64>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Fuzzy,
    Pid,
}

pub fn create_controller(
    kind: ControllerKind,
    config: &Config,
) -> SimResult<Box<dyn DoseController>> {
    match kind {
        ControllerKind::Fuzzy => Ok(Box::new(fuzzy::HierarchicalFuzzyController::new(
            &config.controller,
        )?)),
        ControllerKind::Pid => Ok(Box::new(pid::PidController::new(&config.pid)?)),
    }
}
