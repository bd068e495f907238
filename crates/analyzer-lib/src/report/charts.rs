//! SVG chart rendering
//!
//! Charts are plain SVG documents written into a `String`; no plotting
//! backend is involved. Two charts exist:
//! - forecast per target: observed history, predicted values, interval band
//! - latency history with anomaly markers coloured by category

use crate::models::{AnomalyCategory, AnomalyEvent, ForecastResult, MetricSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

const WIDTH: f64 = 900.0;
const HEIGHT: f64 = 420.0;
const MARGIN: f64 = 56.0;

const HISTORY_COLOR: &str = "#1f77b4";
const FORECAST_COLOR: &str = "#ff7f0e";
const BAND_COLOR: &str = "#ffbb78";

/// Media type of every chart this module renders
pub const CHART_MEDIA_TYPE: &str = "image/svg+xml";

/// One rendered chart artifact
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub file_name: String,
    pub svg: String,
}

/// Chart entry listed in the run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartArtifact {
    pub file_name: String,
    pub media_type: String,
}

impl Chart {
    pub fn artifact(&self) -> ChartArtifact {
        ChartArtifact {
            file_name: self.file_name.clone(),
            media_type: CHART_MEDIA_TYPE.to_string(),
        }
    }
}

fn category_color(category: AnomalyCategory) -> &'static str {
    match category {
        AnomalyCategory::Performance => "#d62728",
        AnomalyCategory::ResourceConsumption => "#9467bd",
        AnomalyCategory::GrowthRate => "#2ca02c",
        AnomalyCategory::UsagePattern => "#7f7f7f",
    }
}

/// Linear mapping from data space into the plot area
struct Plot {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

impl Plot {
    fn new(xs: &[f64], ys: &[f64]) -> Self {
        let (x_min, x_max) = bounds(xs);
        let (mut y_min, mut y_max) = bounds(ys);
        if y_min >= 0.0 && y_min < (y_max - y_min) {
            y_min = 0.0;
        }
        let pad = ((y_max - y_min) * 0.05).max(1e-9);
        y_max += pad;
        if y_min > 0.0 {
            y_min = (y_min - pad).max(0.0);
        }
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    fn x(&self, v: f64) -> f64 {
        let span = (self.x_max - self.x_min).max(1e-9);
        MARGIN + (v - self.x_min) / span * (WIDTH - 2.0 * MARGIN)
    }

    fn y(&self, v: f64) -> f64 {
        let span = (self.y_max - self.y_min).max(1e-9);
        HEIGHT - MARGIN - (v - self.y_min) / span * (HEIGHT - 2.0 * MARGIN)
    }

    fn points(&self, xs: &[f64], ys: &[f64]) -> String {
        xs.iter()
            .zip(ys)
            .map(|(x, y)| format!("{:.1},{:.1}", self.x(*x), self.y(*y)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn bounds(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < 1e-9 {
        return (min - 0.5, max + 0.5);
    }
    (min, max)
}

fn days_since(origin: DateTime<Utc>, ts: DateTime<Utc>) -> f64 {
    (ts - origin).num_seconds() as f64 / 86_400.0
}

fn open_svg(svg: &mut String, title: &str) {
    writeln!(
        svg,
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = WIDTH,
        h = HEIGHT
    )
    .ok();
    writeln!(
        svg,
        r#"<style>
    .axis {{ stroke: #333; stroke-width: 1; }}
    .label {{ font-family: sans-serif; font-size: 12px; fill: #333; }}
    .title {{ font-family: sans-serif; font-size: 16px; fill: #111; }}
</style>"#
    )
    .ok();
    writeln!(
        svg,
        r#"<rect width="100%" height="100%" fill="white"/>
<text class="title" x="{}" y="28">{}</text>"#,
        MARGIN, title
    )
    .ok();
}

fn axes(svg: &mut String, plot: &Plot, y_label: &str, x_label: &str) {
    let x0 = MARGIN;
    let x1 = WIDTH - MARGIN;
    let y0 = HEIGHT - MARGIN;
    let y1 = MARGIN;
    writeln!(
        svg,
        r#"<line class="axis" x1="{x0}" y1="{y0}" x2="{x1}" y2="{y0}"/>
<line class="axis" x1="{x0}" y1="{y0}" x2="{x0}" y2="{y1}"/>"#
    )
    .ok();
    for value in [plot.y_min, (plot.y_min + plot.y_max) / 2.0, plot.y_max] {
        writeln!(
            svg,
            r#"<text class="label" x="4" y="{:.1}">{:.1}</text>"#,
            plot.y(value) + 4.0,
            value
        )
        .ok();
    }
    writeln!(
        svg,
        r#"<text class="label" x="{:.1}" y="{:.1}">{}</text>
<text class="label" x="{:.1}" y="{:.1}">{}</text>"#,
        x0,
        y1 - 8.0,
        y_label,
        x1 - 120.0,
        HEIGHT - 16.0,
        x_label
    )
    .ok();
}

/// Observed history of the target, then the forecast with its interval band
pub fn forecast_chart(history: &[MetricSample], forecast: &ForecastResult, stamp: &str) -> Chart {
    let metric = forecast.target_metric;
    let origin = history
        .first()
        .map(|s| s.timestamp)
        .unwrap_or(forecast.generated_at);
    let origin_date = origin.date_naive();

    let hist_x: Vec<f64> = history
        .iter()
        .map(|s| days_since(origin, s.timestamp))
        .collect();
    let hist_y: Vec<f64> = history.iter().map(|s| s.value_of(metric)).collect();

    let points = &forecast.predicted_series;
    let fc_x: Vec<f64> = points
        .iter()
        .map(|p| (p.date - origin_date).num_days() as f64)
        .collect();
    let fc_y: Vec<f64> = points.iter().map(|p| p.value).collect();

    let all_x: Vec<f64> = hist_x.iter().chain(&fc_x).copied().collect();
    let mut all_y = hist_y.clone();
    all_y.extend(points.iter().flat_map(|p| [p.lower, p.upper]));
    let plot = Plot::new(&all_x, &all_y);

    let mut svg = String::new();
    open_svg(
        &mut svg,
        &format!(
            "{} forecast: {} over {} days (accuracy {:.2})",
            metric, forecast.trend_direction, forecast.horizon_days, forecast.model_accuracy
        ),
    );
    axes(&mut svg, &plot, metric.as_str(), "days since window start");

    if !points.is_empty() {
        let upper: Vec<String> = points
            .iter()
            .zip(&fc_x)
            .map(|(p, x)| format!("{:.1},{:.1}", plot.x(*x), plot.y(p.upper)))
            .collect();
        let lower: Vec<String> = points
            .iter()
            .zip(&fc_x)
            .rev()
            .map(|(p, x)| format!("{:.1},{:.1}", plot.x(*x), plot.y(p.lower)))
            .collect();
        writeln!(
            svg,
            r#"<polygon points="{} {}" fill="{}" fill-opacity="0.4" stroke="none"/>"#,
            upper.join(" "),
            lower.join(" "),
            BAND_COLOR
        )
        .ok();
    }

    if !hist_x.is_empty() {
        writeln!(
            svg,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            plot.points(&hist_x, &hist_y),
            HISTORY_COLOR
        )
        .ok();
    }
    if !fc_x.is_empty() {
        writeln!(
            svg,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2" stroke-dasharray="6 4"/>"#,
            plot.points(&fc_x, &fc_y),
            FORECAST_COLOR
        )
        .ok();
    }

    writeln!(svg, "</svg>").ok();
    Chart {
        file_name: format!("forecast_{}_{}.svg", metric, stamp),
        svg,
    }
}

/// API latency over the window with one marker per anomaly
pub fn anomaly_chart(history: &[MetricSample], anomalies: &[AnomalyEvent], stamp: &str) -> Chart {
    let origin = history
        .first()
        .map(|s| s.timestamp)
        .or_else(|| anomalies.first().map(|e| e.source_sample_timestamp))
        .unwrap_or_default();

    let xs: Vec<f64> = history
        .iter()
        .map(|s| days_since(origin, s.timestamp))
        .collect();
    let ys: Vec<f64> = history.iter().map(|s| s.api_response_time_ms).collect();
    let marker_ys: Vec<f64> = anomalies
        .iter()
        .map(|e| e.raw_values.api_response_time_ms)
        .collect();
    let all_y: Vec<f64> = ys.iter().chain(&marker_ys).copied().collect();
    let plot = Plot::new(&xs, &all_y);

    let mut svg = String::new();
    open_svg(
        &mut svg,
        &format!("API latency with {} anomalies", anomalies.len()),
    );
    axes(&mut svg, &plot, "api_response_time_ms", "days since window start");

    if !xs.is_empty() {
        writeln!(
            svg,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="1.5"/>"#,
            plot.points(&xs, &ys),
            HISTORY_COLOR
        )
        .ok();
    }

    for event in anomalies {
        let x = days_since(origin, event.source_sample_timestamp);
        writeln!(
            svg,
            r#"<circle cx="{:.1}" cy="{:.1}" r="4" fill="{}"><title>{} ({:.3})</title></circle>"#,
            plot.x(x),
            plot.y(event.raw_values.api_response_time_ms),
            category_color(event.category),
            event.category,
            event.anomaly_score
        )
        .ok();
    }

    writeln!(svg, "</svg>").ok();
    Chart {
        file_name: format!("anomalies_{}.svg", stamp),
        svg,
    }
}
