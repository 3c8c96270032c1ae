use std::sync::Once;

use chrono::NaiveDateTime;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder};
use plotters::prelude::*;
use plotters::style::{FontStyle, register_font};

use crate::error::MlError;
use crate::services::predictor::PredictionPoint;

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 600;

static FONTS: Once = Once::new();

// The bitmap backend starts with no font faces; register the bundled one
// under the family name the chart styles reference.
fn ensure_fonts() {
    FONTS.call_once(|| {
        if register_font(
            "sans-serif",
            FontStyle::Normal,
            include_bytes!("../../assets/DejaVuSans.ttf"),
        )
        .is_err()
        {
            tracing::warn!("Failed to register bundled chart font");
        }
    });
}

fn chart_err<E: std::fmt::Display>(e: E) -> MlError {
    MlError::ArtifactIo(format!("chart rendering failed: {e}"))
}

/// Render the actual-vs-predicted training chart as PNG bytes.
pub fn render_training_chart(
    title: &str,
    times: &[NaiveDateTime],
    actual: &[f64],
    predicted: &[f64],
) -> Result<Vec<u8>, MlError> {
    ensure_fonts();
    let xs: Vec<f64> = times.iter().map(|t| t.and_utc().timestamp() as f64).collect();
    let (x_min, x_max) = padded_bounds(xs.iter().copied());
    let (y_min, y_max) = padded_bounds(actual.iter().chain(predicted.iter()).copied());

    let mut rgb = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut rgb, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 24))
            .margin(20)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc("Price")
            .x_label_formatter(&|ts| format_date(*ts))
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(actual.iter().copied()),
                &BLUE,
            ))
            .map_err(chart_err)?
            .label("Actual Price")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(predicted.iter().copied()),
                &RED,
            ))
            .map_err(chart_err)?
            .label("Predicted Price")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
    }
    encode_png(&rgb)
}

/// Render a predicted-only chart for a future date range as PNG bytes.
pub fn render_prediction_chart(
    title: &str,
    points: &[PredictionPoint],
) -> Result<Vec<u8>, MlError> {
    ensure_fonts();
    let xs: Vec<f64> = points
        .iter()
        .map(|p| {
            p.date
                .and_time(chrono::NaiveTime::MIN)
                .and_utc()
                .timestamp() as f64
        })
        .collect();
    let (x_min, x_max) = padded_bounds(xs.iter().copied());
    let (y_min, y_max) = padded_bounds(points.iter().map(|p| p.price));

    let mut rgb = vec![0u8; (WIDTH * HEIGHT * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut rgb, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(title, ("sans-serif", 24))
            .margin(20)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc("Predicted Price")
            .x_label_formatter(&|ts| format_date(*ts))
            .draw()
            .map_err(chart_err)?;

        chart
            .draw_series(LineSeries::new(
                xs.iter().copied().zip(points.iter().map(|p| p.price)),
                &RED,
            ))
            .map_err(chart_err)?
            .label("Predicted Price")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
    }
    encode_png(&rgb)
}

fn padded_bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for value in values {
        min = min.min(value);
        max = max.max(value);
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 1.0, max + 1.0);
    }
    let pad = (max - min) * 0.05;
    (min - pad, max + pad)
}

fn format_date(timestamp: f64) -> String {
    chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn encode_png(rgb: &[u8]) -> Result<Vec<u8>, MlError> {
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(rgb, WIDTH, HEIGHT, ColorType::Rgb8)
        .map_err(|e| MlError::ArtifactIo(format!("failed to encode chart PNG: {e}")))?;
    Ok(png)
}
