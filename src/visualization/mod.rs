//! PNG rendering of time series, scatter plots and hex maps.
//!
//! Plots are drawn with `plotters` onto a bitmap backend. Missing values
//! break lines rather than being drawn as zero.

use std::path::Path;

use chrono::NaiveDateTime;
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::time::elapsed_hours;
use crate::processors::spatial::{hex_boundary, HexAggregation};

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Nothing to plot: no valid values")]
    EmptyData,

    #[error("Column '{0}' is not part of the aggregation")]
    MissingColumn(String),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1600;

/// Default plot height in pixels.
const DEFAULT_HEIGHT: u32 = 900;

/// Maximum number of markers drawn by a scatter plot.
const MAX_SCATTER_POINTS: usize = 50_000;

const SERIES_COLOR: RGBColor = RGBColor(55, 126, 184);
const OVERLAY_COLOR: RGBColor = RGBColor(228, 26, 28);

fn plot_err<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

/// Padded `(x_min, x_max, y_min, y_max)` over finite points.
fn compute_bounds<'a, I>(points: I) -> Option<(f64, f64, f64, f64)>
where
    I: IntoIterator<Item = &'a (f64, f64)>,
{
    let mut bounds: Option<(f64, f64, f64, f64)> = None;
    for &(x, y) in points {
        if !(x.is_finite() && y.is_finite()) {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, x, y, y),
            Some((x0, x1, y0, y1)) => (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
        });
    }

    bounds.map(|(mut x0, mut x1, mut y0, mut y1)| {
        if (x1 - x0).abs() < f64::EPSILON {
            x0 -= 1.0;
            x1 += 1.0;
        }
        if (y1 - y0).abs() < f64::EPSILON {
            y0 -= 1.0;
            y1 += 1.0;
        }
        let (px, py) = ((x1 - x0) * 0.05, (y1 - y0) * 0.05);
        (x0 - px, x1 + px, y0 - py, y1 + py)
    })
}

/// Split a series into runs of consecutive present values.
fn segments(x: &[f64], y: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut out: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();
    for (&xv, yv) in x.iter().zip(y) {
        match yv {
            Some(v) if v.is_finite() => current.push((xv, *v)),
            _ => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Plot a time series, optionally with an overlay (e.g. a smoothed curve).
///
/// The x axis is hours since the first timestamp.
pub fn plot_time_series(
    output_path: &Path,
    timestamps: &[NaiveDateTime],
    values: &[Option<f64>],
    overlay: Option<&[Option<f64>]>,
) -> Result<()> {
    let mut order: Vec<usize> = (0..timestamps.len()).collect();
    order.sort_by_key(|&i| timestamps[i]);
    let hours = elapsed_hours(timestamps);
    let x: Vec<f64> = order.iter().map(|&i| hours[i]).collect();
    let y: Vec<Option<f64>> = order.iter().map(|&i| values.get(i).copied().flatten()).collect();

    let main = segments(&x, &y);
    let extra = overlay
        .map(|o| {
            let oy: Vec<Option<f64>> = order.iter().map(|&i| o.get(i).copied().flatten()).collect();
            segments(&x, &oy)
        })
        .unwrap_or_default();

    let (x_min, x_max, y_min, y_max) =
        compute_bounds(main.iter().chain(&extra).flatten()).ok_or(VisualizationError::EmptyData)?;

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(plot_err)?;

    for segment in &main {
        chart
            .draw_series(LineSeries::new(segment.iter().copied(), SERIES_COLOR.stroke_width(1)))
            .map_err(plot_err)?;
    }
    for segment in &extra {
        chart
            .draw_series(LineSeries::new(segment.iter().copied(), OVERLAY_COLOR.stroke_width(2)))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Scatter plot of `y` against `x`, optionally with an overlay line drawn
/// through `(x, overlay)` in x order.
pub fn plot_scatter(
    output_path: &Path,
    x: &[Option<f64>],
    y: &[Option<f64>],
    overlay: Option<&[Option<f64>]>,
) -> Result<()> {
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .collect();

    let mut line: Vec<(f64, f64)> = overlay
        .map(|o| {
            x.iter()
                .zip(o)
                .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
                .collect()
        })
        .unwrap_or_default();
    line.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (x_min, x_max, y_min, y_max) =
        compute_bounds(points.iter().chain(&line)).ok_or(VisualizationError::EmptyData)?;

    let step = (points.len() / MAX_SCATTER_POINTS).max(1);

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            points
                .iter()
                .step_by(step)
                .map(|&(a, b)| Circle::new((a, b), 2, SERIES_COLOR.mix(0.6).filled())),
        )
        .map_err(plot_err)?;

    if line.len() > 1 {
        chart
            .draw_series(LineSeries::new(line, OVERLAY_COLOR.stroke_width(2)))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Blue-to-red ramp for `t` in [0, 1].
fn ramp(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(lerp(49, 215), lerp(54, 48), lerp(149, 39))
}

/// Fill each cell of a hex aggregation, coloured by `column`, on a lon/lat
/// plane. Cells without a value are drawn in grey.
pub fn plot_hex_map(output_path: &Path, aggregation: &HexAggregation, column: &str) -> Result<()> {
    let values = aggregation
        .column_values(column)
        .ok_or_else(|| VisualizationError::MissingColumn(column.to_string()))?;

    let rings: Vec<Vec<(f64, f64)>> = aggregation.keys().map(|&cell| hex_boundary(cell)).collect();
    let (x_min, x_max, y_min, y_max) =
        compute_bounds(rings.iter().flatten()).ok_or(VisualizationError::EmptyData)?;

    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    let lo = present.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(rings.iter().zip(&values).map(|(ring, value)| {
            let color = match value {
                Some(v) => ramp((v - lo) / span),
                None => RGBColor(180, 180, 180),
            };
            Polygon::new(ring.clone(), color.mix(0.8).filled())
        }))
        .map_err(plot_err)?;

    chart
        .draw_series(
            rings
                .iter()
                .map(|ring| PathElement::new(ring.clone(), BLACK.mix(0.4).stroke_width(1))),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}
