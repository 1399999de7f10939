//! Small numerical optimisers: a derivative-free simplex minimiser and a
//! Levenberg-Marquardt least-squares solver.

use crate::error::{Error, Result};

/// Outcome of an optimisation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    /// Objective value at `x` (sum of squared residuals for least squares).
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Tolerances for [`nelder_mead`]. Defaults mirror scipy's `fmin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplexOptions {
    pub xtol: f64,
    pub ftol: f64,
    /// Iteration and evaluation cap; `None` means `200 * dimensions`.
    pub max_iterations: Option<usize>,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            xtol: 1e-4,
            ftol: 1e-4,
            max_iterations: None,
        }
    }
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;
const NONZERO_STEP: f64 = 0.05;
const ZERO_STEP: f64 = 0.000_25;

/// Minimise `f` starting at `x0` with the Nelder-Mead simplex method.
pub fn nelder_mead<F>(mut f: F, x0: &[f64], options: SimplexOptions) -> Result<Minimum>
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    if n == 0 {
        return Err(Error::Fit("nothing to optimise".to_string()));
    }
    let max_iter = options.max_iterations.unwrap_or(200 * n);

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for k in 0..n {
        let mut y = x0.to_vec();
        y[k] = if y[k] == 0.0 {
            ZERO_STEP
        } else {
            (1.0 + NONZERO_STEP) * y[k]
        };
        simplex.push(y);
    }
    let mut values: Vec<f64> = simplex.iter().map(|x| f(x)).collect();
    let mut evaluations = n + 1;
    sort_simplex(&mut simplex, &mut values);

    let mut iterations = 1;
    let mut converged = false;
    while evaluations < max_iter && iterations < max_iter {
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|x| x.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|v| (v - values[0]).abs())
            .fold(0.0_f64, f64::max);
        if x_spread <= options.xtol && f_spread <= options.ftol {
            converged = true;
            break;
        }

        let centroid = centroid(&simplex[..n]);
        let worst = simplex[n].clone();
        let along = |coef: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| (1.0 + coef) * c - coef * w)
                .collect()
        };

        let reflected = along(REFLECT);
        let f_reflected = f(&reflected);
        evaluations += 1;
        let mut shrink = false;

        if f_reflected < values[0] {
            let expanded = along(REFLECT * EXPAND);
            let f_expanded = f(&expanded);
            evaluations += 1;
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
        } else if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
        } else if f_reflected < values[n] {
            let contracted = along(CONTRACT * REFLECT);
            let f_contracted = f(&contracted);
            evaluations += 1;
            if f_contracted <= f_reflected {
                simplex[n] = contracted;
                values[n] = f_contracted;
            } else {
                shrink = true;
            }
        } else {
            let inside: Vec<f64> = centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| (1.0 - CONTRACT) * c + CONTRACT * w)
                .collect();
            let f_inside = f(&inside);
            evaluations += 1;
            if f_inside < values[n] {
                simplex[n] = inside;
                values[n] = f_inside;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = simplex[0].clone();
            for j in 1..=n {
                let shrunk: Vec<f64> = best
                    .iter()
                    .zip(&simplex[j])
                    .map(|(b, x)| b + SHRINK * (x - b))
                    .collect();
                values[j] = f(&shrunk);
                simplex[j] = shrunk;
                evaluations += 1;
            }
        }

        sort_simplex(&mut simplex, &mut values);
        iterations += 1;
    }

    if !values[0].is_finite() {
        return Err(Error::Fit("objective is not finite".to_string()));
    }
    if !converged {
        log::debug!("Nelder-Mead stopped after {iterations} iterations without converging");
    }
    Ok(Minimum {
        x: simplex.swap_remove(0),
        value: values[0],
        iterations,
        converged,
    })
}

fn centroid(points: &[Vec<f64>]) -> Vec<f64> {
    let n = points.len() as f64;
    let mut sum = vec![0.0; points[0].len()];
    for p in points {
        for (s, v) in sum.iter_mut().zip(p) {
            *s += v;
        }
    }
    sum.into_iter().map(|s| s / n).collect()
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

/// Fit `params` so that `model(params, x_i)` approximates `y_i` in the
/// least-squares sense.
///
/// The Jacobian is approximated with forward differences.
pub fn levenberg_marquardt<M>(model: M, x: &[f64], y: &[f64], initial: &[f64]) -> Result<Minimum>
where
    M: Fn(&[f64], f64) -> f64,
{
    if x.len() != y.len() {
        return Err(Error::Fit(format!(
            "x has {} points but y has {}",
            x.len(),
            y.len()
        )));
    }
    let n = initial.len();
    if x.len() < n {
        return Err(Error::Fit(format!(
            "{} points are not enough for {n} parameters",
            x.len()
        )));
    }

    let residuals = |p: &[f64]| -> Vec<f64> {
        x.iter().zip(y).map(|(xi, yi)| yi - model(p, *xi)).collect()
    };
    let cost = |r: &[f64]| r.iter().map(|v| v * v).sum::<f64>();

    let mut params = initial.to_vec();
    let mut r = residuals(&params);
    let mut current = cost(&r);
    if !current.is_finite() {
        return Err(Error::Fit("initial guess gives non-finite residuals".to_string()));
    }

    let max_iter = 200 * (n + 1);
    let mut lambda = 1e-3;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < max_iter {
        iterations += 1;
        let jac = jacobian(&model, x, &params);

        // J is the model Jacobian and r = y - model, so the damped
        // Gauss-Newton step solves (JᵀJ + λ diag(JᵀJ)) δ = Jᵀr.
        let mut jtj = vec![vec![0.0; n]; n];
        let mut jtr = vec![0.0; n];
        for (row, ri) in jac.iter().zip(&r) {
            for a in 0..n {
                jtr[a] += row[a] * ri;
                for b in 0..n {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }

        let mut improved = false;
        while lambda < 1e16 {
            let mut system = jtj.clone();
            for (k, line) in system.iter_mut().enumerate() {
                let d = line[k];
                line[k] = d + lambda * if d > 0.0 { d } else { 1.0 };
            }
            let Some(step) = solve(system, jtr.clone()) else {
                lambda *= 10.0;
                continue;
            };
            let candidate: Vec<f64> = params.iter().zip(&step).map(|(p, s)| p + s).collect();
            let r_candidate = residuals(&candidate);
            let c_candidate = cost(&r_candidate);
            if c_candidate.is_finite() && c_candidate < current {
                let step_norm = step.iter().map(|s| s * s).sum::<f64>().sqrt();
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                let relative = (current - c_candidate) / current.max(f64::MIN_POSITIVE);
                params = candidate;
                r = r_candidate;
                current = c_candidate;
                lambda = (lambda / 10.0).max(1e-12);
                improved = true;
                if relative < 1e-12 || step_norm <= 1e-10 * (param_norm + 1e-10) {
                    converged = true;
                }
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            // No step reduces the cost: we are at a (local) minimum.
            converged = true;
        }
        if converged || current == 0.0 {
            converged = true;
            break;
        }
    }

    Ok(Minimum {
        x: params,
        value: current,
        iterations,
        converged,
    })
}

fn jacobian<M>(model: &M, x: &[f64], params: &[f64]) -> Vec<Vec<f64>>
where
    M: Fn(&[f64], f64) -> f64,
{
    let eps = f64::EPSILON.sqrt();
    let steps: Vec<f64> = params
        .iter()
        .map(|p| if *p == 0.0 { eps } else { eps * p.abs() })
        .collect();
    let mut shifted = params.to_vec();
    let mut jac = Vec::with_capacity(x.len());
    for xi in x {
        let base = model(params, *xi);
        let mut row = Vec::with_capacity(params.len());
        for k in 0..params.len() {
            shifted[k] = params[k] + steps[k];
            row.push((model(&shifted, *xi) - base) / steps[k]);
            shifted[k] = params[k];
        }
        jac.push(row);
    }
    jac
}

/// Gaussian elimination with partial pivoting. `None` if singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 || !a[pivot][col].is_finite() {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * out[k]).sum();
        out[row] = (b[row] - tail) / a[row][row];
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}
