pub mod solver;

use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use solver::SolverOptions;

/// Bergman minimal-model rate constants and basal values.
///
/// Rate constants are authored per minute, the convention of the clinical
/// literature; the dynamics convert to per-hour internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientParams {
    /// Glucose effectiveness (1/min).
    pub p1_per_min: f64,
    /// Remote insulin action decay (1/min).
    pub p2_per_min: f64,
    /// Insulin sensitivity (1/min per mU/L).
    pub p3_per_min: f64,
    /// Plasma insulin clearance (1/min).
    pub n_per_min: f64,
    /// Insulin appearance scaling (mU/L per delivered unit).
    pub gamma_mu_per_unit: f64,
    /// Basal glucose Gb (mg/dL).
    pub basal_glucose: f64,
    /// Basal insulin Ib (mU/L).
    pub basal_insulin: f64,
}

impl Default for PatientParams {
    fn default() -> Self {
        Self {
            p1_per_min: 0.028,
            p2_per_min: 0.025,
            p3_per_min: 5.0e-5,
            n_per_min: 0.2,
            gamma_mu_per_unit: 20.0,
            basal_glucose: 90.0,
            basal_insulin: 15.0,
        }
    }
}

impl PatientParams {
    pub fn validate(&self) -> SimResult<()> {
        let checks = [
            ("p1_per_min", self.p1_per_min),
            ("p2_per_min", self.p2_per_min),
            ("p3_per_min", self.p3_per_min),
            ("n_per_min", self.n_per_min),
            ("gamma_mu_per_unit", self.gamma_mu_per_unit),
            ("basal_glucose", self.basal_glucose),
            ("basal_insulin", self.basal_insulin),
        ];

        for (name, value) in checks {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::InvalidPatient(format!(
                    "Parameter {} must be positive and finite, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// A scheduled meal: time of day and carbohydrate content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MealEvent {
    pub time_hours: f64,
    pub carbs_grams: f64,
}

/// Glucose appearance rate (mg/dL per minute) from one meal at time
/// `t_hours`, via an exponential-decay absorption kernel.
///
/// The kernel integrates over infinite time to `carbs * glucose_per_gram`,
/// so the total glucose contribution of a meal is independent of the
/// simulation step size.
pub fn meal_absorption(
    t_hours: f64,
    meal_time_hours: f64,
    carbs_grams: f64,
    tau_minutes: f64,
    glucose_per_gram: f64,
) -> f64 {
    if t_hours < meal_time_hours {
        return 0.0;
    }

    let elapsed_minutes = (t_hours - meal_time_hours) * 60.0;
    let total_rise = carbs_grams * glucose_per_gram;
    (total_rise / tau_minutes) * (-elapsed_minutes / tau_minutes).exp()
}

/// Static meal schedule; contributions from overlapping meals are additive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealSchedule {
    pub events: Vec<MealEvent>,
    /// Absorption time constant (minutes).
    pub tau_minutes: f64,
    /// Carb-to-glucose conversion (mg/dL per gram).
    pub glucose_per_gram: f64,
}

impl MealSchedule {
    pub const DEFAULT_TAU_MINUTES: f64 = 45.0;
    pub const DEFAULT_GLUCOSE_PER_GRAM: f64 = 3.5;

    pub fn new(events: Vec<MealEvent>) -> Self {
        Self {
            events,
            tau_minutes: Self::DEFAULT_TAU_MINUTES,
            glucose_per_gram: Self::DEFAULT_GLUCOSE_PER_GRAM,
        }
    }

    /// Breakfast, lunch and dinner with typical carbohydrate loads.
    pub fn standard_day() -> Self {
        Self::new(vec![
            MealEvent {
                time_hours: 7.0,
                carbs_grams: 50.0,
            },
            MealEvent {
                time_hours: 12.0,
                carbs_grams: 60.0,
            },
            MealEvent {
                time_hours: 18.0,
                carbs_grams: 70.0,
            },
        ])
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn validate(&self) -> SimResult<()> {
        if !self.tau_minutes.is_finite() || self.tau_minutes <= 0.0 {
            return Err(SimError::Validation(
                "Meal absorption tau must be positive".to_string(),
            ));
        }
        if !self.glucose_per_gram.is_finite() || self.glucose_per_gram <= 0.0 {
            return Err(SimError::Validation(
                "Carb-to-glucose conversion must be positive".to_string(),
            ));
        }
        for meal in &self.events {
            if !meal.time_hours.is_finite() || meal.time_hours < 0.0 {
                return Err(SimError::Validation(format!(
                    "Meal time must be non-negative, got {}",
                    meal.time_hours
                )));
            }
            if !meal.carbs_grams.is_finite() || meal.carbs_grams < 0.0 {
                return Err(SimError::Validation(format!(
                    "Meal carbs must be non-negative, got {}",
                    meal.carbs_grams
                )));
            }
        }
        Ok(())
    }

    /// Total glucose appearance rate (mg/dL per minute) at `t_hours`.
    pub fn glucose_rate_at(&self, t_hours: f64) -> f64 {
        self.events
            .iter()
            .map(|meal| {
                meal_absorption(
                    t_hours,
                    meal.time_hours,
                    meal.carbs_grams,
                    self.tau_minutes,
                    self.glucose_per_gram,
                )
            })
            .sum()
    }
}

/// Three-state Bergman minimal model, advanced one fixed step at a time.
///
/// States: plasma glucose G (mg/dL), remote insulin action X
/// (dimensionless) and plasma insulin I (mU/L). Time is carried in hours;
/// the default step is 5 minutes.
#[derive(Debug, Clone)]
pub struct PatientModel {
    glucose: f64,
    remote_insulin: f64,
    plasma_insulin: f64,
    params: PatientParams,
    dt_hours: f64,
    time_hours: f64,
    solver_options: SolverOptions,
}

impl PatientModel {
    pub const DEFAULT_STEP_MINUTES: f64 = 5.0;

    pub fn new(
        initial_glucose: f64,
        initial_insulin: f64,
        dt_hours: f64,
        params: PatientParams,
    ) -> SimResult<Self> {
        params.validate()?;

        if !initial_glucose.is_finite() || initial_glucose <= 0.0 {
            return Err(SimError::InvalidPatient(format!(
                "Initial glucose must be positive, got {}",
                initial_glucose
            )));
        }
        if !initial_insulin.is_finite() || initial_insulin <= 0.0 {
            return Err(SimError::InvalidPatient(format!(
                "Initial insulin must be positive, got {}",
                initial_insulin
            )));
        }
        if !dt_hours.is_finite() || dt_hours <= 0.0 {
            return Err(SimError::InvalidPatient(format!(
                "Time step must be positive, got {} hours",
                dt_hours
            )));
        }

        let solver_options = SolverOptions::default();
        solver_options.validate()?;

        Ok(Self {
            glucose: initial_glucose,
            remote_insulin: 0.0,
            plasma_insulin: initial_insulin,
            params,
            dt_hours,
            time_hours: 0.0,
            solver_options,
        })
    }

    /// A patient resting at basal glucose and insulin.
    pub fn at_basal() -> Self {
        let params = PatientParams::default();
        Self::new(
            params.basal_glucose,
            params.basal_insulin,
            Self::DEFAULT_STEP_MINUTES / 60.0,
            params,
        )
        .expect("default parameters are valid")
    }

    pub fn glucose(&self) -> f64 {
        self.glucose
    }

    pub fn remote_insulin(&self) -> f64 {
        self.remote_insulin
    }

    pub fn plasma_insulin(&self) -> f64 {
        self.plasma_insulin
    }

    pub fn time_hours(&self) -> f64 {
        self.time_hours
    }

    pub fn dt_hours(&self) -> f64 {
        self.dt_hours
    }

    pub fn step_minutes(&self) -> f64 {
        self.dt_hours * 60.0
    }

    /// Bergman minimal-model right-hand side, all rates per hour.
    ///
    ///   dG/dt = -(p1 + X)·G + p1·Gb + meal
    ///   dX/dt = -p2·X + p3·(I - Ib)
    ///   dI/dt = -n·(I - Ib) + u
    fn derivatives(
        &self,
        state: &[f64; 3],
        insulin_appearance_per_hour: f64,
        meal_rate_per_hour: f64,
    ) -> [f64; 3] {
        let [g, x, i] = *state;
        let p = &self.params;

        let p1 = p.p1_per_min * 60.0;
        let p2 = p.p2_per_min * 60.0;
        let p3 = p.p3_per_min * 60.0;
        let n = p.n_per_min * 60.0;

        [
            -(p1 + x) * g + p1 * p.basal_glucose + meal_rate_per_hour,
            -p2 * x + p3 * (i - p.basal_insulin),
            -n * (i - p.basal_insulin) + insulin_appearance_per_hour,
        ]
    }

    /// Advance the model by one fixed step.
    ///
    /// `dose_units` is the insulin delivered over the step; `meal_rate` is
    /// the glucose appearance rate in mg/dL per minute. Returns the updated
    /// glucose. Solver non-convergence is fatal for the episode.
    pub fn step(&mut self, dose_units: f64, meal_rate: f64) -> SimResult<f64> {
        let step_minutes = self.dt_hours * 60.0;
        let units_per_minute = dose_units / step_minutes;
        let insulin_appearance_per_hour =
            self.params.gamma_mu_per_unit * units_per_minute * 60.0;
        let meal_rate_per_hour = meal_rate * 60.0;

        let state = [self.glucose, self.remote_insulin, self.plasma_insulin];
        let next = solver::integrate(
            |_t, y| self.derivatives(y, insulin_appearance_per_hour, meal_rate_per_hour),
            state,
            0.0,
            self.dt_hours,
            &self.solver_options,
        )?;

        self.glucose = next[0];
        self.remote_insulin = next[1];
        self.plasma_insulin = next[2];
        self.time_hours += self.dt_hours;

        Ok(self.glucose)
    }

    /// Batch mode: run a full episode at the model's fixed step with a
    /// precomputed dose sequence (zero-padded if shorter than the grid).
    /// Returns the glucose and plasma-insulin traces.
    pub fn simulate(
        &mut self,
        doses: &[f64],
        schedule: &MealSchedule,
        duration_hours: f64,
    ) -> SimResult<(Vec<f64>, Vec<f64>)> {
        if !duration_hours.is_finite() || duration_hours <= 0.0 {
            return Err(SimError::Validation(
                "Simulation duration must be positive".to_string(),
            ));
        }

        let n_steps = (duration_hours / self.dt_hours).round() as usize;
        let mut glucose_trace = Vec::with_capacity(n_steps);
        let mut insulin_trace = Vec::with_capacity(n_steps);

        for i in 0..n_steps {
            let t = i as f64 * self.dt_hours;
            let meal_rate = schedule.glucose_rate_at(t);
            let dose = doses.get(i).copied().unwrap_or(0.0);

            self.step(dose, meal_rate)?;
            glucose_trace.push(self.glucose);
            insulin_trace.push(self.plasma_insulin);
        }

        Ok((glucose_trace, insulin_trace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_patient(initial_glucose: f64) -> PatientModel {
        PatientModel::new(
            initial_glucose,
            15.0,
            PatientModel::DEFAULT_STEP_MINUTES / 60.0,
            PatientParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_construction_rejected() {
        let params = PatientParams::default();
        assert!(PatientModel::new(-90.0, 15.0, 5.0 / 60.0, params.clone()).is_err());
        assert!(PatientModel::new(90.0, 15.0, 0.0, params.clone()).is_err());
        assert!(PatientModel::new(f64::NAN, 15.0, 5.0 / 60.0, params.clone()).is_err());

        let mut bad = params;
        bad.n_per_min = -0.2;
        assert!(PatientModel::new(90.0, 15.0, 5.0 / 60.0, bad).is_err());
    }

    #[test]
    fn test_basal_equilibrium_is_stationary() {
        let mut patient = PatientModel::at_basal();
        for _ in 0..50 {
            patient.step(0.0, 0.0).unwrap();
        }
        assert_relative_eq!(patient.glucose(), 90.0, epsilon = 1e-6);
        assert_relative_eq!(patient.plasma_insulin(), 15.0, epsilon = 1e-6);
    }

    #[test]
    fn test_homeostatic_return_to_basal() {
        let mut patient = test_patient(150.0);
        // Two simulated hours of no insulin and no meals.
        for _ in 0..24 {
            patient.step(0.0, 0.0).unwrap();
        }
        assert!(
            (patient.glucose() - 90.0).abs() < 5.0,
            "glucose {} did not return toward basal",
            patient.glucose()
        );
    }

    #[test]
    fn test_insulin_dose_lowers_glucose() {
        let mut dosed = test_patient(180.0);
        let mut untreated = test_patient(180.0);

        for _ in 0..36 {
            dosed.step(1.0, 0.0).unwrap();
            untreated.step(0.0, 0.0).unwrap();
        }

        assert!(dosed.glucose() < untreated.glucose());
        assert!(dosed.plasma_insulin() > untreated.plasma_insulin());
    }

    #[test]
    fn test_meal_raises_glucose() {
        let mut patient = PatientModel::at_basal();
        let schedule = MealSchedule::new(vec![MealEvent {
            time_hours: 0.0,
            carbs_grams: 50.0,
        }]);

        for i in 0..12 {
            let t = i as f64 * patient.dt_hours();
            let meal_rate = schedule.glucose_rate_at(t);
            patient.step(0.0, meal_rate).unwrap();
        }

        assert!(patient.glucose() > 100.0);
    }

    #[test]
    fn test_meal_kernel_integrates_to_total_rise() {
        // Riemann sum of the kernel over 24 hours at 0.1-minute resolution
        // should recover carbs * glucose_per_gram.
        let carbs = 50.0;
        let tau = 45.0;
        let glucose_per_gram = 3.5;

        let dt_minutes = 0.1;
        let mut total = 0.0;
        let mut minutes = 0.0;
        while minutes < 24.0 * 60.0 {
            let t_hours = minutes / 60.0;
            total += meal_absorption(t_hours, 0.0, carbs, tau, glucose_per_gram) * dt_minutes;
            minutes += dt_minutes;
        }

        assert_relative_eq!(total, carbs * glucose_per_gram, max_relative = 1e-2);
    }

    #[test]
    fn test_meal_kernel_zero_before_meal() {
        assert_relative_eq!(meal_absorption(6.9, 7.0, 50.0, 45.0, 3.5), 0.0);
        assert!(meal_absorption(7.0, 7.0, 50.0, 45.0, 3.5) > 0.0);
    }

    #[test]
    fn test_overlapping_meals_are_additive() {
        let schedule = MealSchedule::new(vec![
            MealEvent {
                time_hours: 7.0,
                carbs_grams: 50.0,
            },
            MealEvent {
                time_hours: 7.0,
                carbs_grams: 50.0,
            },
        ]);
        let single = MealSchedule::new(vec![MealEvent {
            time_hours: 7.0,
            carbs_grams: 50.0,
        }]);

        assert_relative_eq!(
            schedule.glucose_rate_at(7.5),
            2.0 * single.glucose_rate_at(7.5)
        );
    }

    #[test]
    fn test_batch_simulate_matches_stepwise() {
        let schedule = MealSchedule::standard_day();
        let doses: Vec<f64> = (0..288).map(|i| if i % 7 == 0 { 0.5 } else { 0.0 }).collect();

        let mut batch = PatientModel::at_basal();
        let (batch_glucose, _) = batch.simulate(&doses, &schedule, 24.0).unwrap();

        let mut stepwise = PatientModel::at_basal();
        let mut trace = Vec::new();
        for i in 0..288 {
            let t = i as f64 * stepwise.dt_hours();
            let meal_rate = schedule.glucose_rate_at(t);
            trace.push(stepwise.step(doses[i], meal_rate).unwrap());
        }

        assert_eq!(batch_glucose.len(), trace.len());
        for (a, b) in batch_glucose.iter().zip(&trace) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_doses_zero_padded() {
        let schedule = MealSchedule::empty();
        let mut patient = PatientModel::at_basal();
        let (glucose, _) = patient.simulate(&[0.0; 10], &schedule, 24.0).unwrap();
        assert_eq!(glucose.len(), 288);
        assert_relative_eq!(glucose[287], 90.0, epsilon = 1e-3);
    }
}
