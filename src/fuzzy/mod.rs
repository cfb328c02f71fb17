use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};

/// Piecewise-linear membership function over a bounded universe.
///
/// A degenerate ramp (`a == b` or `b == c`) evaluates as a step, so
/// `Triangular { a: 0.0, b: 0.0, c: 0.0 }` is a singleton at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum MembershipFunction {
    Triangular { a: f64, b: f64, c: f64 },
    Trapezoidal { a: f64, b: f64, c: f64, d: f64 },
}

impl MembershipFunction {
    pub fn validate(&self) -> SimResult<()> {
        let breakpoints: Vec<f64> = match self {
            MembershipFunction::Triangular { a, b, c } => vec![*a, *b, *c],
            MembershipFunction::Trapezoidal { a, b, c, d } => vec![*a, *b, *c, *d],
        };

        if breakpoints.iter().any(|v| !v.is_finite()) {
            return Err(SimError::Validation(
                "Membership breakpoints must be finite".to_string(),
            ));
        }

        for pair in breakpoints.windows(2) {
            if pair[0] > pair[1] {
                return Err(SimError::Validation(format!(
                    "Membership breakpoints must be non-decreasing, got {:?}",
                    breakpoints
                )));
            }
        }

        Ok(())
    }

    /// Membership degree at `x`, in [0, 1].
    pub fn evaluate(&self, x: f64) -> f64 {
        match *self {
            MembershipFunction::Triangular { a, b, c } => {
                if x < a || x > c {
                    0.0
                } else if x <= b {
                    if b > a {
                        (x - a) / (b - a)
                    } else {
                        1.0
                    }
                } else if c > b {
                    (c - x) / (c - b)
                } else {
                    1.0
                }
            }
            MembershipFunction::Trapezoidal { a, b, c, d } => {
                if x < a || x > d {
                    0.0
                } else if x < b {
                    if b > a {
                        (x - a) / (b - a)
                    } else {
                        1.0
                    }
                } else if x <= c {
                    1.0
                } else if d > c {
                    (d - x) / (d - c)
                } else {
                    1.0
                }
            }
        }
    }
}

/// A named linguistic label bound to one membership function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzySet {
    pub name: String,
    pub function: MembershipFunction,
}

impl FuzzySet {
    pub fn membership(&self, x: f64) -> f64 {
        self.function.evaluate(x)
    }
}

/// An input or output signal with its discretized universe and labels.
///
/// The universe is the fixed grid `min, min + resolution, ..., max`; the same
/// grid is used when authoring sets and when defuzzifying, so centroids are
/// exactly reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinguisticVariable {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub resolution: f64,
    pub sets: Vec<FuzzySet>,
}

impl LinguisticVariable {
    pub fn validate(&self) -> SimResult<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(SimError::Validation(format!(
                "Variable '{}' has non-monotonic universe bounds [{}, {}]",
                self.name, self.min, self.max
            )));
        }

        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(SimError::Validation(format!(
                "Variable '{}' must have a positive universe resolution",
                self.name
            )));
        }

        if self.sets.is_empty() {
            return Err(SimError::Validation(format!(
                "Variable '{}' has no fuzzy sets",
                self.name
            )));
        }

        for (i, set) in self.sets.iter().enumerate() {
            set.function.validate()?;
            if self.sets[..i].iter().any(|other| other.name == set.name) {
                return Err(SimError::Validation(format!(
                    "Variable '{}' has duplicate set name '{}'",
                    self.name, set.name
                )));
            }
        }

        Ok(())
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.min, self.max)
    }

    pub fn grid_len(&self) -> usize {
        ((self.max - self.min) / self.resolution).round() as usize + 1
    }

    pub fn grid_point(&self, index: usize) -> f64 {
        self.min + index as f64 * self.resolution
    }

    pub fn set(&self, name: &str) -> Option<&FuzzySet> {
        self.sets.iter().find(|s| s.name == name)
    }
}

/// One antecedent clause: membership in any of the listed sets of a variable.
///
/// Listing more than one set expresses a disjunction, combined with maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    pub variable: String,
    pub sets: Vec<String>,
}

/// A rule: conjunction of clauses (minimum) implying one consequent set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub antecedent: Vec<Clause>,
    pub consequent: String,
}

/// Outcome of one stage evaluation. `degenerate` flags an all-zero
/// aggregation envelope, in which case `value` is the stage default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageOutput {
    pub value: f64,
    pub degenerate: bool,
}

/// One Mamdani inference stage: input variables, an output variable and an
/// ordered rule list. Stateless across invocations apart from the cached
/// last inputs/output kept for inspection.
#[derive(Debug, Clone)]
pub struct InferenceStage {
    name: String,
    inputs: Vec<LinguisticVariable>,
    output: LinguisticVariable,
    rules: Vec<Rule>,
    default_value: f64,
    last_inputs: Vec<f64>,
    last_output: Option<StageOutput>,
}

impl InferenceStage {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<LinguisticVariable>,
        output: LinguisticVariable,
        rules: Vec<Rule>,
        default_value: f64,
    ) -> SimResult<Self> {
        let name = name.into();

        if inputs.is_empty() {
            return Err(SimError::InvalidController(format!(
                "Stage '{}' has no input variables",
                name
            )));
        }

        for var in &inputs {
            var.validate()?;
        }
        output.validate()?;

        if !default_value.is_finite() {
            return Err(SimError::InvalidController(format!(
                "Stage '{}' default value must be finite",
                name
            )));
        }

        if rules.is_empty() {
            return Err(SimError::InvalidController(format!(
                "Stage '{}' has no rules",
                name
            )));
        }

        for (i, rule) in rules.iter().enumerate() {
            if rule.antecedent.is_empty() {
                return Err(SimError::InvalidController(format!(
                    "Stage '{}' rule {} has an empty antecedent",
                    name, i
                )));
            }

            for clause in &rule.antecedent {
                let var = inputs
                    .iter()
                    .find(|v| v.name == clause.variable)
                    .ok_or_else(|| {
                        SimError::InvalidController(format!(
                            "Stage '{}' rule {} references unknown variable '{}'",
                            name, i, clause.variable
                        ))
                    })?;

                if clause.sets.is_empty() {
                    return Err(SimError::InvalidController(format!(
                        "Stage '{}' rule {} has a clause with no sets",
                        name, i
                    )));
                }

                for set_name in &clause.sets {
                    if var.set(set_name).is_none() {
                        return Err(SimError::InvalidController(format!(
                            "Stage '{}' rule {} references unknown set '{}' of '{}'",
                            name, i, set_name, var.name
                        )));
                    }
                }
            }

            if output.set(&rule.consequent).is_none() {
                return Err(SimError::InvalidController(format!(
                    "Stage '{}' rule {} has unknown consequent set '{}'",
                    name, i, rule.consequent
                )));
            }
        }

        Ok(Self {
            name,
            inputs,
            output,
            rules,
            default_value,
            last_inputs: Vec::new(),
            last_output: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_inputs(&self) -> &[f64] {
        &self.last_inputs
    }

    pub fn last_output(&self) -> Option<StageOutput> {
        self.last_output
    }

    /// Firing strength of one rule for already-clamped crisp inputs, ordered
    /// as the stage's input variables. Rules are validated against the
    /// stage's variables at construction, so lookups cannot miss.
    fn rule_strength(&self, rule: &Rule, inputs: &[f64]) -> f64 {
        let mut strength = 1.0_f64;

        for clause in &rule.antecedent {
            let idx = self
                .inputs
                .iter()
                .position(|v| v.name == clause.variable)
                .expect("rule validated against stage inputs");
            let x = inputs[idx];

            let clause_membership = clause
                .sets
                .iter()
                .filter_map(|set_name| self.inputs[idx].set(set_name))
                .map(|set| set.membership(x))
                .fold(0.0_f64, f64::max);

            strength = strength.min(clause_membership);
        }

        strength
    }

    /// Run one Mamdani inference pass: clamp inputs, fire every rule, clip
    /// consequents at their firing strengths, take the max envelope over the
    /// output grid and defuzzify by centroid.
    pub fn evaluate(&mut self, raw_inputs: &[f64]) -> SimResult<StageOutput> {
        if raw_inputs.len() != self.inputs.len() {
            return Err(SimError::Validation(format!(
                "Stage '{}' expects {} inputs, got {}",
                self.name,
                self.inputs.len(),
                raw_inputs.len()
            )));
        }

        let inputs: Vec<f64> = raw_inputs
            .iter()
            .zip(&self.inputs)
            .map(|(&x, var)| var.clamp(x))
            .collect();

        let strengths: Vec<f64> = self
            .rules
            .iter()
            .map(|rule| self.rule_strength(rule, &inputs))
            .collect();

        let consequents: Vec<&FuzzySet> = self
            .rules
            .iter()
            .map(|rule| {
                self.output
                    .set(&rule.consequent)
                    .expect("rule validated against stage output")
            })
            .collect();

        let mut weighted_sum = 0.0;
        let mut area = 0.0;

        for i in 0..self.output.grid_len() {
            let x = self.output.grid_point(i);
            let mut envelope = 0.0_f64;

            for (set, &strength) in consequents.iter().zip(&strengths) {
                if strength > 0.0 {
                    envelope = envelope.max(set.membership(x).min(strength));
                }
            }

            weighted_sum += x * envelope;
            area += envelope;
        }

        let result = if area > 0.0 {
            StageOutput {
                value: weighted_sum / area,
                degenerate: false,
            }
        } else {
            StageOutput {
                value: self.default_value,
                degenerate: true,
            }
        };

        self.last_inputs = inputs;
        self.last_output = Some(result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_variable(name: &str, sets: Vec<FuzzySet>) -> LinguisticVariable {
        LinguisticVariable {
            name: name.to_string(),
            min: 0.0,
            max: 1.0,
            resolution: 0.01,
            sets,
        }
    }

    fn triangle(name: &str, a: f64, b: f64, c: f64) -> FuzzySet {
        FuzzySet {
            name: name.to_string(),
            function: MembershipFunction::Triangular { a, b, c },
        }
    }

    #[test]
    fn test_triangular_membership() {
        let f = MembershipFunction::Triangular {
            a: 0.0,
            b: 0.5,
            c: 1.0,
        };

        assert_relative_eq!(f.evaluate(0.5), 1.0);
        assert_relative_eq!(f.evaluate(0.25), 0.5);
        assert_relative_eq!(f.evaluate(0.75), 0.5);
        assert_relative_eq!(f.evaluate(-0.1), 0.0);
        assert_relative_eq!(f.evaluate(1.1), 0.0);
    }

    #[test]
    fn test_membership_bounded() {
        let f = MembershipFunction::Trapezoidal {
            a: 0.1,
            b: 0.3,
            c: 0.6,
            d: 0.9,
        };

        let mut x = 0.0;
        while x <= 1.0 {
            let mu = f.evaluate(x);
            assert!((0.0..=1.0).contains(&mu), "mu({}) = {}", x, mu);
            x += 0.01;
        }
        assert_relative_eq!(f.evaluate(0.45), 1.0);
    }

    #[test]
    fn test_degenerate_ramp_is_step() {
        let step = MembershipFunction::Trapezoidal {
            a: 0.0,
            b: 0.0,
            c: 0.2,
            d: 0.4,
        };
        assert_relative_eq!(step.evaluate(0.0), 1.0);

        let singleton = MembershipFunction::Triangular {
            a: 0.0,
            b: 0.0,
            c: 0.0,
        };
        assert_relative_eq!(singleton.evaluate(0.0), 1.0);
        assert_relative_eq!(singleton.evaluate(0.01), 0.0);
    }

    #[test]
    fn test_non_monotonic_breakpoints_rejected() {
        let f = MembershipFunction::Triangular {
            a: 0.5,
            b: 0.2,
            c: 1.0,
        };
        assert!(f.validate().is_err());
    }

    #[test]
    fn test_duplicate_set_names_rejected() {
        let var = unit_variable(
            "x",
            vec![triangle("A", 0.0, 0.2, 0.4), triangle("A", 0.4, 0.6, 0.8)],
        );
        assert!(var.validate().is_err());
    }

    #[test]
    fn test_rule_strength_min_and_max() {
        let a = unit_variable(
            "a",
            vec![triangle("low", 0.0, 0.0, 1.0), triangle("high", 0.0, 1.0, 1.0)],
        );
        let b = unit_variable("b", vec![triangle("low", 0.0, 0.0, 1.0)]);
        let out = unit_variable("out", vec![triangle("some", 0.0, 0.5, 1.0)]);

        let rule = Rule {
            antecedent: vec![
                Clause {
                    variable: "a".to_string(),
                    sets: vec!["low".to_string(), "high".to_string()],
                },
                Clause {
                    variable: "b".to_string(),
                    sets: vec!["low".to_string()],
                },
            ],
            consequent: "some".to_string(),
        };

        let stage =
            InferenceStage::new("test", vec![a, b], out, vec![rule.clone()], 0.0).unwrap();

        // a = 0.25: low = 0.75, high = 0.25, disjunction = 0.75
        // b = 0.5: low = 0.5, conjunction picks the minimum
        let strength = stage.rule_strength(&rule, &[0.25, 0.5]);
        assert_relative_eq!(strength, 0.5);
    }

    #[test]
    fn test_saturated_rule_returns_consequent_centroid() {
        let input = unit_variable("x", vec![triangle("on", 0.0, 0.0, 2.0)]);
        let output = unit_variable("y", vec![triangle("mid", 0.2, 0.5, 0.8)]);
        let rule = Rule {
            antecedent: vec![Clause {
                variable: "x".to_string(),
                sets: vec!["on".to_string()],
            }],
            consequent: "mid".to_string(),
        };

        let mut stage = InferenceStage::new("test", vec![input], output, vec![rule], 0.0).unwrap();

        // x = 0 fires the rule at full strength; the symmetric consequent
        // defuzzifies to its own centroid.
        let out = stage.evaluate(&[0.0]).unwrap();
        assert!(!out.degenerate);
        assert_relative_eq!(out.value, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_aggregation_returns_default() {
        let input = unit_variable("x", vec![triangle("narrow", 0.0, 0.1, 0.2)]);
        let output = unit_variable("y", vec![triangle("some", 0.0, 0.5, 1.0)]);
        let rule = Rule {
            antecedent: vec![Clause {
                variable: "x".to_string(),
                sets: vec!["narrow".to_string()],
            }],
            consequent: "some".to_string(),
        };

        let mut stage =
            InferenceStage::new("test", vec![input], output, vec![rule], 0.0).unwrap();

        // x = 0.9 is inside the universe but outside every set.
        let out = stage.evaluate(&[0.9]).unwrap();
        assert!(out.degenerate);
        assert_relative_eq!(out.value, 0.0);
        assert_eq!(stage.last_output(), Some(out));
    }

    #[test]
    fn test_inputs_clamped_to_universe() {
        let input = unit_variable("x", vec![triangle("high", 0.0, 1.0, 1.0)]);
        let output = unit_variable("y", vec![triangle("mid", 0.2, 0.5, 0.8)]);
        let rule = Rule {
            antecedent: vec![Clause {
                variable: "x".to_string(),
                sets: vec!["high".to_string()],
            }],
            consequent: "mid".to_string(),
        };

        let mut stage = InferenceStage::new("test", vec![input], output, vec![rule], 0.0).unwrap();

        let clamped = stage.evaluate(&[5.0]).unwrap();
        let at_bound = stage.evaluate(&[1.0]).unwrap();
        assert_relative_eq!(clamped.value, at_bound.value);
        assert_relative_eq!(stage.last_inputs()[0], 1.0);
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let input = unit_variable("x", vec![triangle("on", 0.0, 0.5, 1.0)]);
        let output = unit_variable("y", vec![triangle("mid", 0.2, 0.5, 0.8)]);
        let rule = Rule {
            antecedent: vec![Clause {
                variable: "x".to_string(),
                sets: vec!["on".to_string()],
            }],
            consequent: "mid".to_string(),
        };

        let mut stage = InferenceStage::new("test", vec![input], output, vec![rule], 0.0).unwrap();
        assert!(stage.evaluate(&[0.5, 0.5]).is_err());
    }

    #[test]
    fn test_unknown_consequent_rejected() {
        let input = unit_variable("x", vec![triangle("on", 0.0, 0.5, 1.0)]);
        let output = unit_variable("y", vec![triangle("mid", 0.2, 0.5, 0.8)]);
        let rule = Rule {
            antecedent: vec![Clause {
                variable: "x".to_string(),
                sets: vec!["on".to_string()],
            }],
            consequent: "missing".to_string(),
        };

        assert!(InferenceStage::new("test", vec![input], output, vec![rule], 0.0).is_err());
    }
}
