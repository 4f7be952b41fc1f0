//! Curve smoothing for plot overlays.
//!
//! - LOWESS: locally weighted linear regression with bisquare robustness
//!   iterations, on an explicit x or on elapsed seconds of a time axis
//! - Savitzky-Golay: sliding least-squares polynomial filter
//! - Rolling mean over a row count or a duration
//! - Cubic smoothing spline returned as an evaluable [`Spline`]
//!
//! Methods that need a minimum number of points return their input
//! unchanged when the floor is not met.

use std::str::FromStr;

use chrono::NaiveDateTime;
use log::{debug, warn};
use thiserror::Error;

use crate::config::SmoothingConfig;
use crate::core::time::epoch_seconds;
use crate::processors::reduction::Reduction;
use crate::processors::temporal::{rolling, RollingWindow};

/// Errors from smoothing requests.
#[derive(Error, Debug)]
pub enum SmoothingError {
    #[error("LOWESS fraction must be in (0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("spline smoothing factor must be finite and non-negative, got {0}")]
    InvalidSmoothingFactor(f64),

    #[error("spline fit needs at least {needed} valid points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("smoothing system is not positive definite")]
    Singular,

    #[error("unknown smoothing method '{0}' (expected lowess, savgol, rolling or spline)")]
    UnknownMethod(String),

    #[error(transparent)]
    Window(#[from] crate::processors::reduction::AggregationError),
}

pub type Result<T> = std::result::Result<T, SmoothingError>;

/// Minimum number of valid pairs for LOWESS.
pub const LOWESS_MIN_POINTS: usize = 5;

const LOWESS_ITERATIONS: usize = 3;

fn tricube(u: f64) -> f64 {
    if u <= 0.001 {
        1.0
    } else if u >= 0.999 {
        0.0
    } else {
        (1.0 - u.powi(3)).powi(3)
    }
}

fn bisquare(u: f64) -> f64 {
    if u.abs() >= 1.0 {
        0.0
    } else {
        (1.0 - u * u).powi(2)
    }
}

/// Weighted local linear fit at `x[i]` over rows `left..=right`.
fn local_fit(x: &[f64], y: &[f64], robust: &[f64], i: usize, left: usize, right: usize) -> f64 {
    let xi = x[i];
    let h = (xi - x[left]).max(x[right] - xi);

    let mut sw = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let weights: Vec<f64> = (left..=right)
        .map(|j| {
            let distance = if h > 0.0 { tricube((x[j] - xi).abs() / h) } else { 1.0 };
            let w = distance * robust[j];
            sw += w;
            sx += w * x[j];
            sy += w * y[j];
            w
        })
        .collect();

    if sw <= 0.0 {
        return y[i];
    }
    let xm = sx / sw;
    let ym = sy / sw;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (w, j) in weights.iter().zip(left..=right) {
        sxx += w * (x[j] - xm).powi(2);
        sxy += w * (x[j] - xm) * (y[j] - ym);
    }

    let range = x[x.len() - 1] - x[0];
    if sxx.sqrt() <= 1e-7 * range.max(f64::MIN_POSITIVE) * sw.sqrt() {
        return ym;
    }
    ym + sxy / sxx * (xi - xm)
}

/// LOWESS over points sorted ascending by x.
fn lowess_sorted(x: &[f64], y: &[f64], frac: f64) -> Vec<f64> {
    let n = x.len();
    let k = ((frac * n as f64 + 1e-10) as usize).clamp(2, n);
    let mut robust = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for iteration in 0..=LOWESS_ITERATIONS {
        let mut left = 0;
        for i in 0..n {
            while left + k < n && x[i] - x[left] > x[left + k] - x[i] {
                left += 1;
            }
            fitted[i] = local_fit(x, y, &robust, i, left, left + k - 1);
        }

        if iteration == LOWESS_ITERATIONS {
            break;
        }

        let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| a - b).collect();
        let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
        abs.sort_by(f64::total_cmp);
        let s = abs[n / 2];
        // residuals at rounding level: the fit is already exact
        let scale = y.iter().map(|v| v.abs()).sum::<f64>() / n as f64;
        if s <= 1e-12 * scale.max(1.0) {
            break;
        }
        for (w, r) in robust.iter_mut().zip(&residuals) {
            *w = bisquare(r / (6.0 * s));
        }
    }

    fitted
}

/// LOWESS of `y` against `x`.
///
/// Rows where either value is missing come back as `None` once smoothing
/// applies. With fewer than [`LOWESS_MIN_POINTS`] valid pairs the input `y`
/// is returned unchanged.
pub fn lowess(x: &[Option<f64>], y: &[Option<f64>], frac: f64) -> Result<Vec<Option<f64>>> {
    if !(frac > 0.0 && frac <= 1.0) {
        return Err(SmoothingError::InvalidFraction(frac));
    }

    let mut valid: Vec<(usize, f64, f64)> = x
        .iter()
        .zip(y)
        .enumerate()
        .filter_map(|(i, (a, b))| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((i, *a, *b)),
            _ => None,
        })
        .collect();

    if valid.len() < LOWESS_MIN_POINTS {
        debug!("LOWESS skipped: {} valid points", valid.len());
        return Ok(y.to_vec());
    }

    valid.sort_by(|a, b| a.1.total_cmp(&b.1));
    let xs: Vec<f64> = valid.iter().map(|v| v.1).collect();
    let ys: Vec<f64> = valid.iter().map(|v| v.2).collect();
    let fitted = lowess_sorted(&xs, &ys, frac);

    let mut out = vec![None; y.len()];
    for ((row, _, _), value) in valid.iter().zip(fitted) {
        out[*row] = Some(value);
    }
    Ok(out)
}

/// LOWESS against a time axis, using elapsed seconds as x.
pub fn lowess_series(
    timestamps: &[NaiveDateTime],
    values: &[Option<f64>],
    frac: f64,
) -> Result<Vec<Option<f64>>> {
    let x: Vec<Option<f64>> = timestamps.iter().map(|&t| Some(epoch_seconds(t))).collect();
    lowess(&x, values, frac)
}

/// Fill gaps: linear by position inside, nearest value at the ends.
fn fill_gaps(values: &[Option<f64>]) -> Vec<f64> {
    let known: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_some()).collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return Vec::new();
    };
    let at = |i: usize| values[i].unwrap_or(f64::NAN);

    let mut out = vec![0.0; values.len()];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = if i <= first {
            at(first)
        } else if i >= last {
            at(last)
        } else if let Some(v) = values[i] {
            v
        } else {
            let next = known.partition_point(|&k| k < i);
            let (lo, hi) = (known[next - 1], known[next]);
            let w = (i - lo) as f64 / (hi - lo) as f64;
            at(lo) + (at(hi) - at(lo)) * w
        };
    }
    out
}

/// Least-squares polynomial coefficients (lowest order first).
fn polyfit(xs: &[f64], ys: &[f64], order: usize) -> Option<Vec<f64>> {
    let m = order + 1;
    let mut a = vec![vec![0.0; m + 1]; m];
    for (&x, &y) in xs.iter().zip(ys) {
        let powers: Vec<f64> = (0..2 * m).map(|p| x.powi(p as i32)).collect();
        for r in 0..m {
            for c in 0..m {
                a[r][c] += powers[r + c];
            }
            a[r][m] += powers[r] * y;
        }
    }

    // Gaussian elimination with partial pivoting
    for col in 0..m {
        let pivot = (col..m).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        for row in col + 1..m {
            let factor = a[row][col] / a[col][col];
            for c in col..=m {
                a[row][c] -= factor * a[col][c];
            }
        }
    }

    let mut coef = vec![0.0; m];
    for r in (0..m).rev() {
        let tail: f64 = (r + 1..m).map(|c| a[r][c] * coef[c]).sum();
        coef[r] = (a[r][m] - tail) / a[r][r];
    }
    Some(coef)
}

fn polyval(coef: &[f64], x: f64) -> f64 {
    coef.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Savitzky-Golay filter.
///
/// The window is made odd and shrunk to the number of valid samples; if
/// that leaves fewer than 3 points (or no room for `polyorder`) the input
/// is returned unchanged. Gaps are filled before filtering and the edges
/// are fitted with one polynomial over the first and last window.
pub fn savgol(values: &[Option<f64>], window: usize, polyorder: usize) -> Vec<Option<f64>> {
    let valid = values.iter().filter(|v| v.is_some()).count() as i64;
    let odd_window = if window % 2 == 1 { window } else { window + 1 };
    let w = (odd_window as i64).min(valid - (valid + 1) % 2);
    if w < 3 {
        debug!("Savitzky-Golay skipped: {} valid points", valid);
        return values.to_vec();
    }
    let w = w as usize;
    if polyorder >= w {
        warn!("Savitzky-Golay polyorder {} does not fit window {}", polyorder, w);
        return values.to_vec();
    }

    let filled = fill_gaps(values);
    let n = filled.len();
    let half = w / 2;
    let offsets: Vec<f64> = (0..w).map(|j| j as f64 - half as f64).collect();

    let fit = |start: usize| polyfit(&offsets, &filled[start..start + w], polyorder);

    let mut out = filled.clone();
    for (i, slot) in out.iter_mut().enumerate().take(n - half).skip(half) {
        if let Some(coef) = fit(i - half) {
            *slot = coef[0];
        }
    }
    if let Some(coef) = fit(0) {
        for (i, slot) in out.iter_mut().enumerate().take(half) {
            *slot = polyval(&coef, offsets[i]);
        }
    }
    if let Some(coef) = fit(n - w) {
        for (j, slot) in out.iter_mut().enumerate().skip(n - half) {
            *slot = polyval(&coef, offsets[j - (n - w)]);
        }
    }

    out.into_iter().map(Some).collect()
}

/// Rolling mean, aligned with the input rows.
pub fn rolling_average(
    timestamps: &[NaiveDateTime],
    values: &[Option<f64>],
    window: RollingWindow,
) -> Vec<Option<f64>> {
    rolling(timestamps, values, window, Reduction::Mean, false)
}

/// Cubic smoothing spline.
///
/// Minimises `sum (y_i - s(x_i))^2 + lambda * integral s''(t)^2 dt`.
/// `lambda = 0` gives the natural interpolating spline; larger values tend
/// toward the least-squares line. Outside the knot range the spline
/// continues linearly.
#[derive(Debug, Clone)]
pub struct Spline {
    knots: Vec<f64>,
    values: Vec<f64>,
    /// Second derivatives at the knots (zero at both ends)
    curvature: Vec<f64>,
}

impl Spline {
    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Evaluate the spline at `t`.
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.knots.len();
        let (x, g, c) = (&self.knots, &self.values, &self.curvature);
        if n == 1 {
            return g[0];
        }

        if t <= x[0] {
            let h = x[1] - x[0];
            let slope = (g[1] - g[0]) / h - h * (2.0 * c[0] + c[1]) / 6.0;
            return g[0] + slope * (t - x[0]);
        }
        if t >= x[n - 1] {
            let h = x[n - 1] - x[n - 2];
            let slope = (g[n - 1] - g[n - 2]) / h + h * (c[n - 2] + 2.0 * c[n - 1]) / 6.0;
            return g[n - 1] + slope * (t - x[n - 1]);
        }

        let i = x.partition_point(|&k| k <= t).saturating_sub(1).min(n - 2);
        let h = x[i + 1] - x[i];
        let a = t - x[i];
        let b = x[i + 1] - t;
        (a * g[i + 1] + b * g[i]) / h
            - a * b / 6.0 * ((1.0 + a / h) * c[i + 1] + (1.0 + b / h) * c[i])
    }

    pub fn eval_many(&self, ts: &[f64]) -> Vec<f64> {
        ts.iter().map(|&t| self.eval(t)).collect()
    }
}

/// Column `j` (interior knot) of the second-difference matrix Q.
fn q_column(h: &[f64], j: usize) -> [(usize, f64); 3] {
    [
        (j - 1, 1.0 / h[j - 1]),
        (j, -1.0 / h[j - 1] - 1.0 / h[j]),
        (j + 1, 1.0 / h[j]),
    ]
}

fn q_dot(a: &[(usize, f64); 3], b: &[(usize, f64); 3]) -> f64 {
    a.iter()
        .flat_map(|(ra, va)| b.iter().filter(move |(rb, _)| rb == ra).map(move |(_, vb)| va * vb))
        .sum()
}

/// Solve a symmetric positive definite system with bandwidth 2.
///
/// `band[i] = [A(i,i), A(i,i+1), A(i,i+2)]`.
fn solve_banded(band: &[[f64; 3]], rhs: &[f64]) -> Option<Vec<f64>> {
    let m = band.len();
    let a = |i: usize, j: usize| -> f64 {
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        match hi - lo {
            d @ 0..=2 => band[lo][d],
            _ => 0.0,
        }
    };

    // l[i][d] = L(i, i - d)
    let mut l = vec![[0.0f64; 3]; m];
    let get = |l: &Vec<[f64; 3]>, i: usize, j: usize| if i >= j && i - j <= 2 { l[i][i - j] } else { 0.0 };

    for i in 0..m {
        for j in i.saturating_sub(2)..=i {
            let mut sum = a(i, j);
            for k in i.saturating_sub(2)..j {
                sum -= get(&l, i, k) * get(&l, j, k);
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i][0] = sum.sqrt();
            } else {
                l[i][i - j] = sum / l[j][0];
            }
        }
    }

    let mut z = vec![0.0; m];
    for i in 0..m {
        let mut sum = rhs[i];
        for k in i.saturating_sub(2)..i {
            sum -= get(&l, i, k) * z[k];
        }
        z[i] = sum / l[i][0];
    }
    let mut out = vec![0.0; m];
    for i in (0..m).rev() {
        let mut sum = z[i];
        for k in i + 1..(i + 3).min(m) {
            sum -= get(&l, k, i) * out[k];
        }
        out[i] = sum / l[i][0];
    }
    Some(out)
}

/// Fit a cubic smoothing spline to the valid `(x, y)` pairs.
///
/// Pairs with a missing member are ignored and duplicate x values are
/// averaged. `smoothing` of `None` interpolates.
pub fn fit_spline(x: &[Option<f64>], y: &[Option<f64>], smoothing: Option<f64>) -> Result<Spline> {
    let lambda = smoothing.unwrap_or(0.0);
    if !(lambda.is_finite() && lambda >= 0.0) {
        return Err(SmoothingError::InvalidSmoothingFactor(lambda));
    }

    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .collect();
    if pairs.is_empty() {
        return Err(SmoothingError::InsufficientData { needed: 1, got: 0 });
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut knots: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut ys: Vec<f64> = Vec::with_capacity(pairs.len());
    let mut run = 0usize;
    for (px, py) in pairs {
        match knots.last() {
            Some(&last) if last == px => {
                run += 1;
                if let Some(v) = ys.last_mut() {
                    *v += (py - *v) / run as f64;
                }
            }
            _ => {
                knots.push(px);
                ys.push(py);
                run = 1;
            }
        }
    }

    let n = knots.len();
    if n < 3 {
        return Ok(Spline {
            curvature: vec![0.0; n],
            knots,
            values: ys,
        });
    }

    let h: Vec<f64> = knots.windows(2).map(|w| w[1] - w[0]).collect();
    let m = n - 2;
    let columns: Vec<[(usize, f64); 3]> = (1..=m).map(|j| q_column(&h, j)).collect();

    let band: Vec<[f64; 3]> = (0..m)
        .map(|c| {
            let j = c + 1;
            let mut row = [0.0; 3];
            row[0] = (h[j - 1] + h[j]) / 3.0 + lambda * q_dot(&columns[c], &columns[c]);
            if c + 1 < m {
                row[1] = h[j] / 3.0 + lambda * q_dot(&columns[c], &columns[c + 1]);
            }
            if c + 2 < m {
                row[2] = lambda * q_dot(&columns[c], &columns[c + 2]);
            }
            row
        })
        .collect();
    let rhs: Vec<f64> = columns
        .iter()
        .map(|col| col.iter().map(|(r, v)| v * ys[*r]).sum())
        .collect();

    let gamma = solve_banded(&band, &rhs).ok_or(SmoothingError::Singular)?;

    let mut values = ys;
    if lambda > 0.0 {
        for (col, g) in columns.iter().zip(&gamma) {
            for (r, v) in col {
                values[*r] -= lambda * v * g;
            }
        }
    }

    let mut curvature = vec![0.0; n];
    curvature[1..=m].copy_from_slice(&gamma);

    Ok(Spline {
        knots,
        values,
        curvature,
    })
}

/// Smoothing overlay selected by name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SmoothingMethod {
    Lowess { frac: f64 },
    SavitzkyGolay { window: usize, polyorder: usize },
    Rolling(RollingWindow),
    Spline { smoothing: Option<f64> },
}

impl SmoothingMethod {
    /// Resolve a method name with parameters taken from the configuration.
    pub fn from_name(name: &str, config: &SmoothingConfig) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "lowess" | "loess" => Ok(SmoothingMethod::Lowess {
                frac: config.lowess_frac,
            }),
            "savgol" | "savitzky-golay" | "savitzky_golay" => Ok(SmoothingMethod::SavitzkyGolay {
                window: config.savgol_window,
                polyorder: config.savgol_polyorder,
            }),
            "rolling" | "rolling_mean" | "moving_average" => Ok(SmoothingMethod::Rolling(
                RollingWindow::from_str(&config.rolling_window)?,
            )),
            "spline" => Ok(SmoothingMethod::Spline { smoothing: None }),
            _ => Err(SmoothingError::UnknownMethod(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SmoothingMethod::Lowess { .. } => "lowess",
            SmoothingMethod::SavitzkyGolay { .. } => "savgol",
            SmoothingMethod::Rolling(_) => "rolling",
            SmoothingMethod::Spline { .. } => "spline",
        }
    }
}

/// Smooth a time series with the chosen method.
pub fn smooth_series(
    timestamps: &[NaiveDateTime],
    values: &[Option<f64>],
    method: SmoothingMethod,
) -> Result<Vec<Option<f64>>> {
    match method {
        SmoothingMethod::Lowess { frac } => lowess_series(timestamps, values, frac),
        SmoothingMethod::SavitzkyGolay { window, polyorder } => Ok(savgol(values, window, polyorder)),
        SmoothingMethod::Rolling(window) => Ok(rolling_average(timestamps, values, window)),
        SmoothingMethod::Spline { smoothing } => {
            let x: Vec<Option<f64>> = timestamps.iter().map(|&t| Some(epoch_seconds(t))).collect();
            let spline = fit_spline(&x, values, smoothing)?;
            Ok(x.iter().map(|t| t.map(|t| spline.eval(t))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn opt(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|&v| Some(v)).collect()
    }

    fn near(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_lowess_below_floor_is_identity() {
        let x = opt(&[1.0, 2.0, 3.0, 4.0]);
        let y = opt(&[10.0, -3.0, 7.0, 0.5]);
        assert_eq!(lowess(&x, &y, 0.5).unwrap(), y);

        // five rows but only four valid pairs
        let x = vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0)];
        let y = opt(&[1.0, 9.0, 2.0, 8.0, 3.0]);
        assert_eq!(lowess(&x, &y, 0.5).unwrap(), y);
    }

    #[test]
    fn test_lowess_reproduces_line() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v - 1.0).collect();
        let out = lowess(&opt(&x), &opt(&y), 0.3).unwrap();
        for (o, e) in out.iter().zip(&y) {
            assert!(near(o.unwrap(), *e, 1e-8));
        }
    }

    #[test]
    fn test_lowess_restores_row_order() {
        let x = [5.0, 1.0, 3.0, 0.0, 4.0, 2.0, 6.0];
        let y: Vec<f64> = x.iter().map(|v| 0.5 * v).collect();
        let out = lowess(&opt(&x), &opt(&y), 0.8).unwrap();
        for (o, e) in out.iter().zip(&y) {
            assert!(near(o.unwrap(), *e, 1e-8));
        }
    }

    #[test]
    fn test_lowess_follows_noisy_line() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 2.0 * v + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let out = lowess(&opt(&x), &opt(&y), 0.3).unwrap();
        for (o, v) in out.iter().zip(&x) {
            assert!(near(o.unwrap(), 2.0 * v, 0.5));
        }
    }

    #[test]
    fn test_lowess_invalid_rows_are_missing() {
        let x = opt(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let y = vec![Some(0.0), Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)];
        let out = lowess(&x, &y, 1.0).unwrap();
        assert_eq!(out[2], None);
        assert!(out[3].is_some());
    }

    #[test]
    fn test_lowess_rejects_bad_fraction() {
        assert!(lowess(&[], &[], 0.0).is_err());
        assert!(lowess(&[], &[], 1.5).is_err());
    }

    #[test]
    fn test_lowess_series_uses_time() {
        let t0 = NaiveDate::from_ymd_opt(2023, 10, 23)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        // uneven spacing: a line in time, not in row index
        let offsets = [0, 1, 2, 10, 11, 30, 31, 32];
        let times: Vec<NaiveDateTime> = offsets.iter().map(|&s| t0 + Duration::seconds(s)).collect();
        let values: Vec<Option<f64>> = offsets.iter().map(|&s| Some(s as f64 * 3.0)).collect();
        let out = lowess_series(&times, &values, 0.9).unwrap();
        for (o, v) in out.iter().zip(&values) {
            assert!(near(o.unwrap(), v.unwrap(), 1e-6));
        }
    }

    #[test]
    fn test_savgol_preserves_quadratic() {
        let y: Vec<f64> = (0..15).map(|i| (i as f64).powi(2) * 0.5 - i as f64).collect();
        let out = savgol(&opt(&y), 5, 2);
        for (o, e) in out.iter().zip(&y) {
            assert!(near(o.unwrap(), *e, 1e-8));
        }
    }

    #[test]
    fn test_savgol_smooths_noise() {
        let y: Vec<f64> = (0..21).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let out = savgol(&opt(&y), 7, 1);
        assert!(out[10].unwrap().abs() < 0.5);
    }

    #[test]
    fn test_savgol_too_few_points() {
        let y = vec![Some(1.0), None, Some(2.0), None];
        assert_eq!(savgol(&y, 11, 2), y);
        assert_eq!(savgol(&[], 5, 2), Vec::<Option<f64>>::new());
    }

    #[test]
    fn test_savgol_fills_gaps() {
        let y = vec![None, Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), None];
        let out = savgol(&y, 3, 1);
        assert!(out.iter().all(|v| v.is_some()));
        assert!(near(out[3].unwrap(), 3.0, 1e-9));
    }

    #[test]
    fn test_spline_interpolates() {
        let x = opt(&[0.0, 1.0, 2.5, 3.0, 4.0]);
        let y = opt(&[1.0, -2.0, 0.5, 4.0, 3.0]);
        let spline = fit_spline(&x, &y, None).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert!(near(spline.eval(xi.unwrap()), yi.unwrap(), 1e-9));
        }
    }

    #[test]
    fn test_spline_line_is_exact_and_extrapolates() {
        let x: Vec<f64> = (0..8).map(|i| i as f64 * 1.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 4.0 - 0.5 * v).collect();
        let spline = fit_spline(&opt(&x), &opt(&y), Some(10.0)).unwrap();
        assert!(near(spline.eval(2.0), 3.0, 1e-9));
        assert!(near(spline.eval(-2.0), 5.0, 1e-9));
        assert!(near(spline.eval(20.0), -6.0, 1e-9));
    }

    #[test]
    fn test_spline_smoothing_reduces_roughness() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| v + if (v as i64) % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let spline = fit_spline(&opt(&x), &opt(&y), Some(100.0)).unwrap();
        let max_dev = x
            .iter()
            .map(|&v| (spline.eval(v) - v).abs())
            .fold(0.0, f64::max);
        assert!(max_dev < 0.9);
    }

    #[test]
    fn test_spline_skips_missing_and_averages_duplicates() {
        let x = vec![Some(0.0), Some(1.0), Some(1.0), None, Some(2.0)];
        let y = vec![Some(0.0), Some(1.0), Some(3.0), Some(50.0), Some(4.0)];
        let spline = fit_spline(&x, &y, None).unwrap();
        assert_eq!(spline.knots(), &[0.0, 1.0, 2.0]);
        assert!(near(spline.eval(1.0), 2.0, 1e-9));
        assert!(fit_spline(&[None], &[Some(1.0)], None).is_err());
    }

    #[test]
    fn test_method_from_name() {
        let config = SmoothingConfig::default();
        assert_eq!(
            SmoothingMethod::from_name("LOWESS", &config).unwrap(),
            SmoothingMethod::Lowess { frac: 0.1 }
        );
        assert!(matches!(
            SmoothingMethod::from_name("rolling", &config).unwrap(),
            SmoothingMethod::Rolling(RollingWindow::Duration(_))
        ));
        assert!(SmoothingMethod::from_name("kalman", &config).is_err());
    }
}
