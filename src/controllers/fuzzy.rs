use super::DoseController;
use crate::config::{ControllerConfig, StageConfig};
use crate::error::{SimError, SimResult};
use crate::fuzzy::{Clause, FuzzySet, InferenceStage, LinguisticVariable, MembershipFunction, Rule};
use log::warn;

/// Two-stage hierarchical fuzzy dosing controller.
///
/// Stage 1 maps glucose level and rate to a preliminary dose; stage 2
/// refines it with the glucose acceleration to damp oscillations. The
/// inference math is stateless across steps; trend estimation belongs to
/// the driver.
pub struct HierarchicalFuzzyController {
    max_dose: f64,
    stage1: InferenceStage,
    stage2: InferenceStage,
}

impl HierarchicalFuzzyController {
    pub fn new(config: &ControllerConfig) -> SimResult<Self> {
        if !config.max_dose.is_finite() || config.max_dose <= 0.0 {
            return Err(SimError::InvalidController(
                "Controller max dose must be positive".to_string(),
            ));
        }

        Ok(Self {
            max_dose: config.max_dose,
            stage1: config.stage1.build()?,
            stage2: config.stage2.build()?,
        })
    }

    pub fn with_default_rules(max_dose: f64) -> SimResult<Self> {
        Self::new(&ControllerConfig::tuned(max_dose))
    }

    pub fn max_dose(&self) -> f64 {
        self.max_dose
    }

    /// Compute an insulin dose from glucose level (mg/dL), rate (mg/dL per
    /// minute) and acceleration (mg/dL per minute squared).
    ///
    /// Out-of-range inputs are clamped to their universes. A stage whose
    /// aggregation envelope is everywhere zero logs a warning and
    /// contributes its default (zero) dose; the episode continues.
    pub fn compute(&mut self, level: f64, rate: f64, accel: f64) -> SimResult<f64> {
        let stage1_out = self.stage1.evaluate(&[level, rate])?;
        if stage1_out.degenerate {
            warn!(
                "{}: no rule fired for level={:.1} rate={:.2}, using default dose",
                self.stage1.name(),
                level,
                rate
            );
        }
        let pre_dose = stage1_out.value.clamp(0.0, self.max_dose);

        let stage2_out = self.stage2.evaluate(&[pre_dose, accel])?;
        if stage2_out.degenerate {
            warn!(
                "{}: no rule fired for pre_dose={:.3} accel={:.3}, using default dose",
                self.stage2.name(),
                pre_dose,
                accel
            );
        }

        Ok(stage2_out.value.clamp(0.0, self.max_dose))
    }
}

impl DoseController for HierarchicalFuzzyController {
    fn name(&self) -> &str {
        "fuzzy"
    }

    fn reset(&mut self) {
        // Inference carries no per-episode state.
    }

    fn compute_dose(&mut self, glucose: f64, _step_minutes: f64) -> SimResult<f64> {
        self.compute(glucose, 0.0, 0.0)
    }

    fn compute_dose_with_trend(
        &mut self,
        glucose: f64,
        rate: f64,
        accel: f64,
    ) -> Option<SimResult<f64>> {
        Some(self.compute(glucose, rate, accel))
    }
}

fn tri(name: &str, a: f64, b: f64, c: f64) -> FuzzySet {
    FuzzySet {
        name: name.to_string(),
        function: MembershipFunction::Triangular { a, b, c },
    }
}

fn trap(name: &str, a: f64, b: f64, c: f64, d: f64) -> FuzzySet {
    FuzzySet {
        name: name.to_string(),
        function: MembershipFunction::Trapezoidal { a, b, c, d },
    }
}

fn rule(antecedent: &[(&str, &[&str])], consequent: &str) -> Rule {
    Rule {
        antecedent: antecedent
            .iter()
            .map(|(variable, sets)| Clause {
                variable: variable.to_string(),
                sets: sets.iter().map(|s| s.to_string()).collect(),
            })
            .collect(),
        consequent: consequent.to_string(),
    }
}

/// The six dose labels shared by both stage outputs, scaled to `max_dose`.
///
/// `Z` is a singleton at zero so that a pure zero-dose verdict defuzzifies
/// to exactly 0.0; the safety rule at very low glucose must not leak a
/// residual dose through the centroid.
fn dose_sets(d: f64) -> Vec<FuzzySet> {
    vec![
        tri("Z", 0.0, 0.0, 0.0),
        tri("VL", 0.0, 0.1 * d, 0.2 * d),
        tri("L", 0.15 * d, 0.3 * d, 0.45 * d),
        tri("M", 0.4 * d, 0.55 * d, 0.7 * d),
        tri("H", 0.6 * d, 0.8 * d, 0.9 * d),
        tri("VH", 0.85 * d, 0.95 * d, d),
    ]
}

impl ControllerConfig {
    /// The hand-tuned hierarchical controller definition.
    ///
    /// Breakpoints and rule wording are a tuning artifact; they live here as
    /// data so alternative tables can be loaded from a config file against
    /// the same inference engine.
    pub fn tuned(max_dose: f64) -> Self {
        let d = max_dose;

        let bg_level = LinguisticVariable {
            name: "bg_level".to_string(),
            min: 0.0,
            max: 400.0,
            resolution: 1.0,
            sets: vec![
                trap("VL", 0.0, 0.0, 50.0, 70.0),
                tri("L", 60.0, 75.0, 90.0),
                tri("N", 85.0, 100.0, 115.0),
                tri("H", 110.0, 130.0, 160.0),
                trap("VH", 150.0, 180.0, 400.0, 400.0),
            ],
        };

        let bg_rate = LinguisticVariable {
            name: "bg_rate".to_string(),
            min: -5.0,
            max: 5.0,
            resolution: 0.1,
            sets: vec![
                trap("N", -5.0, -5.0, -0.5, -0.1),
                tri("Z", -0.15, 0.0, 0.15),
                tri("P", 0.1, 0.4, 0.7),
                trap("VP", 0.6, 1.0, 5.0, 5.0),
            ],
        };

        let pre_dose_out = LinguisticVariable {
            name: "pre_dose".to_string(),
            min: 0.0,
            max: d,
            resolution: 0.01 * d,
            sets: dose_sets(d),
        };

        // Safety first: Very Low glucose always doses zero, and the Low band
        // stays zero unless glucose is rising rapidly.
        let stage1_rules = vec![
            rule(&[("bg_level", &["VL"])], "Z"),
            rule(&[("bg_level", &["L"]), ("bg_rate", &["N", "Z"])], "Z"),
            rule(&[("bg_level", &["L"]), ("bg_rate", &["P"])], "Z"),
            rule(&[("bg_level", &["L"]), ("bg_rate", &["VP"])], "VL"),
            rule(&[("bg_level", &["N"]), ("bg_rate", &["N"])], "Z"),
            rule(&[("bg_level", &["N"]), ("bg_rate", &["Z"])], "VL"),
            rule(&[("bg_level", &["N"]), ("bg_rate", &["P"])], "M"),
            rule(&[("bg_level", &["N"]), ("bg_rate", &["VP"])], "H"),
            rule(&[("bg_level", &["H"]), ("bg_rate", &["N"])], "L"),
            rule(&[("bg_level", &["H"]), ("bg_rate", &["Z"])], "M"),
            rule(&[("bg_level", &["H"]), ("bg_rate", &["P"])], "VH"),
            rule(&[("bg_level", &["H"]), ("bg_rate", &["VP"])], "VH"),
            rule(&[("bg_level", &["VH"]), ("bg_rate", &["N"])], "M"),
            rule(&[("bg_level", &["VH"]), ("bg_rate", &["Z"])], "H"),
            rule(&[("bg_level", &["VH"]), ("bg_rate", &["P", "VP"])], "VH"),
        ];

        // Stage 2 input universe spans 1.5x the deliverable dose; the upper
        // sets are unreachable because stage 1 is clipped to max_dose, but
        // the authored tables are preserved as-is.
        let pre_dose_in = LinguisticVariable {
            name: "pre_dose".to_string(),
            min: 0.0,
            max: 1.5 * d,
            resolution: 0.01 * d,
            sets: vec![
                tri("Z", 0.0, 0.0, 0.05 * d),
                tri("VL", 0.0, 0.2 * d, 0.4 * d),
                tri("L", 0.3 * d, 0.5 * d, 0.7 * d),
                tri("M", 0.6 * d, 0.85 * d, 1.1 * d),
                tri("H", 1.0 * d, 1.2 * d, 1.4 * d),
                tri("VH", 1.3 * d, 1.45 * d, 1.5 * d),
            ],
        };

        let bg_accel = LinguisticVariable {
            name: "bg_accel".to_string(),
            min: -1.0,
            max: 1.0,
            resolution: 0.01,
            sets: vec![
                trap("N", -1.0, -1.0, -0.015, -0.002),
                tri("Z", -0.01, 0.0, 0.01),
                trap("P", 0.002, 0.015, 1.0, 1.0),
            ],
        };

        let insulin_dose_out = LinguisticVariable {
            name: "insulin_dose".to_string(),
            min: 0.0,
            max: d,
            resolution: 0.01 * d,
            sets: dose_sets(d),
        };

        // Zero stays zero; otherwise nudge the dose down on deceleration,
        // hold it on a steady trend and nudge it up on acceleration.
        let stage2_rules = vec![
            rule(&[("pre_dose", &["Z"])], "Z"),
            rule(&[("pre_dose", &["VL"]), ("bg_accel", &["N"])], "Z"),
            rule(&[("pre_dose", &["VL"]), ("bg_accel", &["Z"])], "VL"),
            rule(&[("pre_dose", &["VL"]), ("bg_accel", &["P"])], "L"),
            rule(&[("pre_dose", &["L"]), ("bg_accel", &["N"])], "VL"),
            rule(&[("pre_dose", &["L"]), ("bg_accel", &["Z"])], "L"),
            rule(&[("pre_dose", &["L"]), ("bg_accel", &["P"])], "M"),
            rule(&[("pre_dose", &["M"]), ("bg_accel", &["N"])], "L"),
            rule(&[("pre_dose", &["M"]), ("bg_accel", &["Z"])], "M"),
            rule(&[("pre_dose", &["M"]), ("bg_accel", &["P"])], "H"),
            rule(&[("pre_dose", &["H"]), ("bg_accel", &["N"])], "M"),
            rule(&[("pre_dose", &["H"]), ("bg_accel", &["Z"])], "H"),
            rule(&[("pre_dose", &["H"]), ("bg_accel", &["P"])], "VH"),
            rule(&[("pre_dose", &["VH"]), ("bg_accel", &["N"])], "H"),
            rule(&[("pre_dose", &["VH"]), ("bg_accel", &["Z", "P"])], "VH"),
        ];

        Self {
            max_dose,
            stage1: StageConfig {
                name: "stage1".to_string(),
                inputs: vec![bg_level, bg_rate],
                output: pre_dose_out,
                rules: stage1_rules,
                default_value: 0.0,
            },
            stage2: StageConfig {
                name: "stage2".to_string(),
                inputs: vec![pre_dose_in, bg_accel],
                output: insulin_dose_out,
                rules: stage2_rules,
                default_value: 0.0,
            },
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::tuned(1.0)
    }
}
