//! Analysis run commands

use analyzer_lib::{Analyzer, ReportDocument, RunMode, RunOutcome};
use anyhow::Result;
use serde_json::json;
use tabled::Tabled;

use crate::output::{
    color_accuracy, color_health, color_level, format_ratio, print_header, print_info,
    print_json, print_success, print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "Stage")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Trend")]
    trend: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Horizon")]
    horizon: String,
    #[tabled(rename = "Final value")]
    final_value: String,
    #[tabled(rename = "Interval")]
    interval: String,
}

#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "Sample time")]
    sample_time: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Latency ms")]
    latency: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Mem")]
    memory: String,
    #[tabled(rename = "Disk")]
    disk: String,
}

#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Impact")]
    impact: String,
    #[tabled(rename = "Effort")]
    effort: String,
    #[tabled(rename = "Recommendation")]
    text: String,
}

/// Run the analysis in `mode` and print its section
pub async fn run_analysis(analyzer: &Analyzer, mode: RunMode, format: OutputFormat) -> Result<()> {
    let outcome = analyzer.run(mode).await?;

    match format {
        OutputFormat::Json => print_json(&json_section(mode, &outcome)),
        OutputFormat::Table => {
            print_table_section(mode, &outcome);
            Ok(())
        }
    }
}

fn json_section(mode: RunMode, outcome: &RunOutcome) -> serde_json::Value {
    let report = &outcome.report;
    match mode {
        RunMode::Comprehensive => json!({
            "report": report,
            "report_path": outcome.report_path,
            "charts": outcome.chart_paths,
        }),
        RunMode::Trends => json!({
            "run_id": report.run_id,
            "stages": report.stages,
            "forecasts": report.forecasts,
        }),
        RunMode::Anomalies => json!({
            "run_id": report.run_id,
            "stages": report.stages,
            "anomaly_summary": report.anomaly_summary,
            "anomalies": report.anomalies,
        }),
        RunMode::Recommendations => json!({
            "run_id": report.run_id,
            "stages": report.stages,
            "health": report.health,
            "previous_health": report.previous_health,
            "recommendations": report.recommendations,
        }),
        RunMode::Charts => json!({
            "run_id": report.run_id,
            "stages": report.stages,
            "charts": outcome.chart_paths,
        }),
    }
}

fn print_table_section(mode: RunMode, outcome: &RunOutcome) {
    let report = &outcome.report;
    print_info(&format!(
        "Run {} analysed {} samples ({} to {})",
        report.run_id,
        report.samples_analyzed,
        report.window.since.format("%Y-%m-%d %H:%M"),
        report.window.until.format("%Y-%m-%d %H:%M"),
    ));
    print_stages(report);

    if matches!(mode, RunMode::Comprehensive | RunMode::Trends) {
        print_forecasts(report);
    }
    if matches!(mode, RunMode::Comprehensive | RunMode::Anomalies) {
        print_anomalies(report);
    }
    if matches!(mode, RunMode::Comprehensive | RunMode::Recommendations) {
        print_health(report);
        print_recommendations(report);
    }

    for chart in &outcome.chart_paths {
        print_success(&format!("Chart written to {}", chart.display()));
    }
    if let Some(path) = &outcome.report_path {
        print_success(&format!("Report written to {}", path.display()));
    }
}

fn print_stages(report: &ReportDocument) {
    if !report.is_partial() {
        return;
    }
    print_warning("Some stages were skipped; results are partial");
    let rows: Vec<StageRow> = report
        .stages
        .iter()
        .map(|s| StageRow {
            name: s.name.clone(),
            status: if s.is_skipped() { "skipped".into() } else { "completed".into() },
            duration: format!("{}ms", s.duration_ms),
            reason: s.reason.clone().unwrap_or_default(),
        })
        .collect();
    print_table(&rows, "No stages ran");
}

fn print_forecasts(report: &ReportDocument) {
    print_header("Forecasts");
    let rows: Vec<ForecastRow> = report
        .forecasts
        .iter()
        .map(|f| {
            let last = f.predicted_series.last();
            ForecastRow {
                target: f.target_metric.to_string(),
                trend: f.trend_direction.to_string(),
                accuracy: color_accuracy(f.model_accuracy),
                horizon: format!("{}d", f.horizon_days),
                final_value: last.map(|p| format!("{:.1}", p.value)).unwrap_or_default(),
                interval: last
                    .map(|p| format!("{:.1} .. {:.1}", p.lower, p.upper))
                    .unwrap_or_default(),
            }
        })
        .collect();
    print_table(&rows, "No forecasts produced");
}

fn print_anomalies(report: &ReportDocument) {
    print_header("Anomalies");
    if !report.anomaly_summary.is_empty() {
        let summary: Vec<String> = report
            .anomaly_summary
            .iter()
            .map(|(category, count)| format!("{}={}", category, count))
            .collect();
        print_info(&summary.join(", "));
    }
    let rows: Vec<AnomalyRow> = report
        .anomalies
        .iter()
        .map(|a| AnomalyRow {
            sample_time: a.source_sample_timestamp.format("%Y-%m-%d %H:%M").to_string(),
            category: a.category.to_string(),
            score: format!("{:.3}", a.anomaly_score),
            latency: format!("{:.1}", a.raw_values.api_response_time_ms),
            cpu: format!("{:.1}%", a.raw_values.cpu_percent),
            memory: format!("{:.1}%", a.raw_values.memory_percent),
            disk: format!("{:.1}%", a.raw_values.disk_percent),
        })
        .collect();
    print_table(&rows, "No anomalies detected");
}

fn print_health(report: &ReportDocument) {
    print_header("Health");
    let Some(health) = &report.health else {
        print_warning("Health score unavailable");
        return;
    };
    let mut line = format!(
        "Score {:.2} ({})",
        health.score,
        color_health(health.status)
    );
    if let Some(previous) = &report.previous_health {
        line.push_str(&format!(", previous {:.2} ({})", previous.score, previous.status));
    }
    println!("{}", line);
    for (factor, value) in &health.contributing_factors {
        println!("  {:<20} {}", factor, format_ratio(*value));
    }
}

fn print_recommendations(report: &ReportDocument) {
    print_header("Recommendations");
    let rows: Vec<RecommendationRow> = report
        .recommendations
        .iter()
        .map(|r| RecommendationRow {
            priority: color_level(r.priority),
            category: r.category.clone(),
            impact: format!("{:.2}", r.impact_score),
            effort: r.implementation_effort.to_string(),
            text: r.text.clone(),
        })
        .collect();
    print_table(&rows, "No recommendations");
}
