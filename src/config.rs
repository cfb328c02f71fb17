use crate::error::{SimError, SimResult};
use crate::fuzzy::{InferenceStage, LinguisticVariable, Rule};
use crate::patient::{MealEvent, MealSchedule, PatientParams};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration. Every section has tuned defaults, so a config
/// file only needs to spell out the sections it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerConfig,
    pub pid: PidConfig,
    pub patient: PatientConfig,
    pub simulation: SimulationConfig,
}

/// Data-driven definition of the two-stage fuzzy controller: membership
/// tables and rule records, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub max_dose: f64,
    pub stage1: StageConfig,
    pub stage2: StageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub inputs: Vec<LinguisticVariable>,
    pub output: LinguisticVariable,
    pub rules: Vec<Rule>,
    pub default_value: f64,
}

impl StageConfig {
    /// Build the runtime inference stage, validating membership breakpoints,
    /// universe bounds and rule cross-references.
    pub fn build(&self) -> SimResult<InferenceStage> {
        InferenceStage::new(
            self.name.clone(),
            self.inputs.clone(),
            self.output.clone(),
            self.rules.clone(),
            self.default_value,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub target: f64,
    pub max_dose: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 0.05,
            ki: 0.002,
            kd: 0.005,
            target: 100.0,
            max_dose: 0.8,
        }
    }
}

impl PidConfig {
    pub fn validate(&self) -> SimResult<()> {
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::InvalidController(format!(
                    "PID gain {} must be non-negative, got {}",
                    name, value
                )));
            }
        }
        if !self.target.is_finite() || self.target <= 0.0 {
            return Err(SimError::InvalidController(
                "PID target glucose must be positive".to_string(),
            ));
        }
        if !self.max_dose.is_finite() || self.max_dose <= 0.0 {
            return Err(SimError::InvalidController(
                "PID max dose must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientConfig {
    pub initial_glucose: f64,
    pub initial_insulin: f64,
    pub step_minutes: f64,
    pub params: PatientParams,
}

impl Default for PatientConfig {
    fn default() -> Self {
        Self {
            initial_glucose: 90.0,
            initial_insulin: 15.0,
            step_minutes: 5.0,
            params: PatientParams::default(),
        }
    }
}

impl PatientConfig {
    pub fn validate(&self) -> SimResult<()> {
        if !self.step_minutes.is_finite() || self.step_minutes <= 0.0 {
            return Err(SimError::InvalidPatient(
                "Patient step size must be positive".to_string(),
            ));
        }
        self.params.validate()
    }

    pub fn dt_hours(&self) -> f64 {
        self.step_minutes / 60.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub duration_hours: f64,
    pub meals: Vec<MealEvent>,
    pub meal_tau_minutes: f64,
    pub glucose_per_gram: f64,
    /// Standard deviation of additive CGM sensor noise (mg/dL); None
    /// disables the noise model.
    pub sensor_noise_sd: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let schedule = MealSchedule::standard_day();
        Self {
            duration_hours: 24.0,
            meals: schedule.events,
            meal_tau_minutes: MealSchedule::DEFAULT_TAU_MINUTES,
            glucose_per_gram: MealSchedule::DEFAULT_GLUCOSE_PER_GRAM,
            sensor_noise_sd: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> SimResult<()> {
        if !self.duration_hours.is_finite() || self.duration_hours <= 0.0 {
            return Err(SimError::Validation(
                "Simulation duration must be positive".to_string(),
            ));
        }
        if let Some(sd) = self.sensor_noise_sd {
            if !sd.is_finite() || sd < 0.0 {
                return Err(SimError::Validation(
                    "Sensor noise SD must be non-negative".to_string(),
                ));
            }
        }
        self.meal_schedule().validate()
    }

    pub fn meal_schedule(&self) -> MealSchedule {
        MealSchedule {
            events: self.meals.clone(),
            tau_minutes: self.meal_tau_minutes,
            glucose_per_gram: self.glucose_per_gram,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        self.controller.validate()?;
        self.pid.validate()?;
        self.patient.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> SimResult<()> {
        if !self.max_dose.is_finite() || self.max_dose <= 0.0 {
            return Err(SimError::InvalidController(
                "Controller max dose must be positive".to_string(),
            ));
        }
        self.stage1.build()?;
        self.stage2.build()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::MembershipFunction;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_default_config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.controller.max_dose, config.controller.max_dose);
        assert_eq!(parsed.simulation.meals.len(), 3);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = serde_json::from_str(r#"{"pid": {"kp": 0.1, "ki": 0.002, "kd": 0.005, "target": 110.0, "max_dose": 0.8}}"#).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.pid.kp, 0.1);
        assert_eq!(parsed.pid.target, 110.0);
        assert_eq!(parsed.simulation.duration_hours, 24.0);
    }

    #[test]
    fn test_non_positive_step_rejected() {
        let mut config = Config::default();
        config.patient.step_minutes = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_breakpoints_rejected() {
        let mut config = Config::default();
        config.controller.stage1.inputs[0].sets[0].function = MembershipFunction::Triangular {
            a: 100.0,
            b: 50.0,
            c: 150.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_meal_carbs_rejected() {
        let mut config = Config::default();
        config.simulation.meals.push(MealEvent {
            time_hours: 10.0,
            carbs_grams: -5.0,
        });
        assert!(config.validate().is_err());
    }
}
