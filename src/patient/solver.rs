use crate::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};

/// Tolerances and limits for the adaptive integrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_steps: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            rel_tol: 1e-6,
            abs_tol: 1e-8,
            max_steps: 10_000,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> SimResult<()> {
        if !self.rel_tol.is_finite() || self.rel_tol <= 0.0 {
            return Err(SimError::Validation(
                "Solver rel_tol must be positive".to_string(),
            ));
        }
        if !self.abs_tol.is_finite() || self.abs_tol <= 0.0 {
            return Err(SimError::Validation(
                "Solver abs_tol must be positive".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(SimError::Validation(
                "Solver max_steps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// Cash-Karp embedded Runge-Kutta 4(5) tableau.
const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 3.0 / 10.0;
const A42: f64 = -9.0 / 10.0;
const A43: f64 = 6.0 / 5.0;
const A51: f64 = -11.0 / 54.0;
const A52: f64 = 5.0 / 2.0;
const A53: f64 = -70.0 / 27.0;
const A54: f64 = 35.0 / 27.0;
const A61: f64 = 1631.0 / 55296.0;
const A62: f64 = 175.0 / 512.0;
const A63: f64 = 575.0 / 13824.0;
const A64: f64 = 44275.0 / 110592.0;
const A65: f64 = 253.0 / 4096.0;

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 3.0 / 5.0;
const C5: f64 = 1.0;
const C6: f64 = 7.0 / 8.0;

const B1: f64 = 37.0 / 378.0;
const B3: f64 = 250.0 / 621.0;
const B4: f64 = 125.0 / 594.0;
const B6: f64 = 512.0 / 1771.0;

const B1S: f64 = 2825.0 / 27648.0;
const B3S: f64 = 18575.0 / 48384.0;
const B4S: f64 = 13525.0 / 55296.0;
const B5S: f64 = 277.0 / 14336.0;
const B6S: f64 = 1.0 / 4.0;

const SAFETY: f64 = 0.9;
const MIN_SHRINK: f64 = 0.2;
const MAX_GROWTH: f64 = 5.0;

fn axpy(y: &[f64; 3], h: f64, terms: &[(f64, &[f64; 3])]) -> [f64; 3] {
    let mut out = *y;
    for (coeff, k) in terms {
        for i in 0..3 {
            out[i] += h * coeff * k[i];
        }
    }
    out
}

/// Integrate `dy/dt = f(t, y)` from `t0` to `t_end` with an adaptive
/// Cash-Karp RK45 stepper. Returns the state at `t_end`.
///
/// Step-size underflow or exhausting `max_steps` indicates an unrecoverable
/// numeric breakdown and is surfaced as `SimError::Simulation`.
pub fn integrate<F>(
    f: F,
    y0: [f64; 3],
    t0: f64,
    t_end: f64,
    options: &SolverOptions,
) -> SimResult<[f64; 3]>
where
    F: Fn(f64, &[f64; 3]) -> [f64; 3],
{
    let span = t_end - t0;
    if !span.is_finite() || span <= 0.0 {
        return Err(SimError::Validation(
            "Integration interval must be positive".to_string(),
        ));
    }

    let min_step = span * 1e-12;
    let mut t = t0;
    let mut y = y0;
    let mut h = span;

    for _ in 0..options.max_steps {
        if t_end - t <= min_step {
            return Ok(y);
        }
        h = h.min(t_end - t);

        let k1 = f(t, &y);
        let k2 = f(t + C2 * h, &axpy(&y, h, &[(A21, &k1)]));
        let k3 = f(t + C3 * h, &axpy(&y, h, &[(A31, &k1), (A32, &k2)]));
        let k4 = f(
            t + C4 * h,
            &axpy(&y, h, &[(A41, &k1), (A42, &k2), (A43, &k3)]),
        );
        let k5 = f(
            t + C5 * h,
            &axpy(&y, h, &[(A51, &k1), (A52, &k2), (A53, &k3), (A54, &k4)]),
        );
        let k6 = f(
            t + C6 * h,
            &axpy(
                &y,
                h,
                &[(A61, &k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)],
            ),
        );

        let y5 = axpy(&y, h, &[(B1, &k1), (B3, &k3), (B4, &k4), (B6, &k6)]);
        let y4 = axpy(
            &y,
            h,
            &[(B1S, &k1), (B3S, &k3), (B4S, &k4), (B5S, &k5), (B6S, &k6)],
        );

        let mut error_ratio = 0.0_f64;
        for i in 0..3 {
            let scale = options.abs_tol + options.rel_tol * y[i].abs().max(y5[i].abs());
            error_ratio = error_ratio.max((y5[i] - y4[i]).abs() / scale);
        }

        if !error_ratio.is_finite() {
            return Err(SimError::Simulation(format!(
                "ODE solver diverged at t = {}",
                t
            )));
        }

        if error_ratio <= 1.0 {
            t += h;
            y = y5;
            let growth = if error_ratio > 0.0 {
                (SAFETY * error_ratio.powf(-0.2)).min(MAX_GROWTH)
            } else {
                MAX_GROWTH
            };
            h *= growth;
        } else {
            h *= (SAFETY * error_ratio.powf(-0.25)).max(MIN_SHRINK);
            if h < min_step {
                return Err(SimError::Simulation(format!(
                    "ODE solver step size underflow at t = {}",
                    t
                )));
            }
        }
    }

    if t_end - t <= min_step {
        Ok(y)
    } else {
        Err(SimError::Simulation(
            "ODE solver failed to converge within the step budget".to_string(),
        ))
    }
}
