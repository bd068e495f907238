//! Rule-based recommendation generation
//!
//! Each rule maps a condition on the health score, anomaly counts or
//! forecasts to a templated recommendation with a fixed impact score and
//! implementation effort. Output is deduplicated and ranked.

use crate::config::{AnalysisConfig, RecommendationConfig};
use crate::health::RESOURCE_HEADROOM;
use crate::models::{
    AnomalyCategory, AnomalyEvent, ForecastResult, HealthScore, HealthStatus, Level,
    Recommendation, TrendDirection,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

pub const SYSTEM_HEALTH: &str = "system_health";
pub const RESOURCE_OPTIMIZATION: &str = "resource_optimization";
pub const PERFORMANCE: &str = "performance";
pub const CAPACITY_PLANNING: &str = "capacity_planning";
pub const USAGE_MONITORING: &str = "usage_monitoring";
pub const FORECAST_QUALITY: &str = "forecast_quality";

fn recommendation(
    category: &str,
    priority: Level,
    text: String,
    impact_score: f64,
    implementation_effort: Level,
) -> Recommendation {
    Recommendation {
        category: category.to_string(),
        priority,
        text,
        impact_score,
        implementation_effort,
    }
}

pub struct RecommendationGenerator {
    rules: RecommendationConfig,
    headroom_weight: f64,
}

impl RecommendationGenerator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            rules: config.recommendations.clone(),
            headroom_weight: config.health.weights.resource_headroom,
        }
    }

    /// Apply every rule; the result is deduplicated and ranked.
    pub fn generate(
        &self,
        health: &HealthScore,
        anomalies: &[AnomalyEvent],
        forecasts: &[ForecastResult],
    ) -> Vec<Recommendation> {
        let mut out = Vec::new();
        self.health_rules(health, &mut out);
        self.anomaly_rules(anomalies, &mut out);
        for forecast in forecasts {
            self.forecast_rules(forecast, &mut out);
        }
        rank_and_dedup(out)
    }

    fn health_rules(&self, health: &HealthScore, out: &mut Vec<Recommendation>) {
        match health.status {
            HealthStatus::Critical => out.push(recommendation(
                SYSTEM_HEALTH,
                Level::High,
                format!(
                    "System health is critical ({:.2}); investigate resource pressure and recent anomalies immediately",
                    health.score
                ),
                1.0,
                Level::High,
            )),
            HealthStatus::Warning => out.push(recommendation(
                SYSTEM_HEALTH,
                Level::Medium,
                format!(
                    "System health is degraded ({:.2}); review the contributing factors before they become critical",
                    health.score
                ),
                0.7,
                Level::Medium,
            )),
            HealthStatus::Healthy => {}
        }

        if self.headroom_weight > f64::EPSILON {
            if let Some(contribution) = health.contributing_factors.get(RESOURCE_HEADROOM) {
                let headroom = contribution / self.headroom_weight;
                if headroom < self.rules.low_headroom {
                    out.push(recommendation(
                        RESOURCE_OPTIMIZATION,
                        Level::High,
                        "Resource headroom is low; scale up the host or reduce CPU, memory and disk load"
                            .to_string(),
                        0.85,
                        Level::Medium,
                    ));
                }
            }
        }
    }

    fn anomaly_rules(&self, anomalies: &[AnomalyEvent], out: &mut Vec<Recommendation>) {
        let mut counts: BTreeMap<AnomalyCategory, usize> = BTreeMap::new();
        for event in anomalies {
            *counts.entry(event.category).or_default() += 1;
        }
        let count = |c: AnomalyCategory| counts.get(&c).copied().unwrap_or(0);

        let resource = count(AnomalyCategory::ResourceConsumption);
        if resource >= self.rules.resource_anomaly_min_count.max(1) {
            out.push(recommendation(
                RESOURCE_OPTIMIZATION,
                Level::High,
                format!(
                    "{} resource consumption anomalies detected; optimize resource usage or provision more capacity",
                    resource
                ),
                0.8,
                Level::Medium,
            ));
        }

        let performance = count(AnomalyCategory::Performance);
        if performance >= self.rules.performance_anomaly_min_count.max(1) {
            out.push(recommendation(
                PERFORMANCE,
                Level::High,
                format!(
                    "{} API latency anomalies detected; profile slow endpoints and add caching or indexing",
                    performance
                ),
                0.9,
                Level::Medium,
            ));
        }

        let growth = count(AnomalyCategory::GrowthRate);
        if growth >= self.rules.growth_anomaly_min_count.max(1) {
            out.push(recommendation(
                CAPACITY_PLANNING,
                Level::Medium,
                format!(
                    "{} abrupt growth-rate changes detected; verify ingestion sources and plan for bursts",
                    growth
                ),
                0.6,
                Level::Low,
            ));
        }

        let usage = count(AnomalyCategory::UsagePattern);
        if usage >= self.rules.usage_anomaly_min_count.max(1) {
            out.push(recommendation(
                USAGE_MONITORING,
                Level::Low,
                format!(
                    "{} unusual usage patterns detected; review access patterns and monitoring coverage",
                    usage
                ),
                0.4,
                Level::Low,
            ));
        }
    }

    fn forecast_rules(&self, forecast: &ForecastResult, out: &mut Vec<Recommendation>) {
        let metric = forecast.target_metric;

        if forecast.trend_direction == TrendDirection::Increasing {
            if let Some(ratio) = forecast.projected_growth_ratio() {
                if ratio > self.rules.capacity_growth_ratio {
                    out.push(recommendation(
                        CAPACITY_PLANNING,
                        Level::Medium,
                        format!(
                            "{} is projected to grow {:.0}% over the next {} days; plan storage and compute capacity",
                            metric,
                            ratio * 100.0,
                            forecast.horizon_days
                        ),
                        0.65,
                        Level::Medium,
                    ));
                }
            }
        }

        if metric.higher_is_better() && forecast.trend_direction == TrendDirection::Decreasing {
            out.push(recommendation(
                USAGE_MONITORING,
                Level::Medium,
                format!(
                    "{} is trending down; check for failed writes or reduced adoption",
                    metric
                ),
                0.5,
                Level::Low,
            ));
        }

        if forecast.model_accuracy < self.rules.low_accuracy {
            out.push(recommendation(
                FORECAST_QUALITY,
                Level::Low,
                format!(
                    "Forecast accuracy for {} is low ({:.2}); collect more history before acting on projections",
                    metric, forecast.model_accuracy
                ),
                0.3,
                Level::Low,
            ));
        }

        let dominant = forecast
            .feature_importances
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)));
        if let Some((feature, weight)) = dominant {
            if *weight > self.rules.dominant_feature_weight {
                out.push(recommendation(
                    FORECAST_QUALITY,
                    Level::Low,
                    format!(
                        "{} forecast is driven mostly by {} ({:.0}%); monitor it closely",
                        metric,
                        feature,
                        weight * 100.0
                    ),
                    0.35,
                    Level::Low,
                ));
            }
        }
    }
}

/// Drop repeated (category, text) pairs and sort by priority desc, impact desc.
///
/// Remaining ties are ordered by text so output is stable.
pub fn rank_and_dedup(recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
    let mut seen = HashSet::new();
    let mut unique: Vec<Recommendation> = recommendations
        .into_iter()
        .filter(|r| seen.insert((r.category.clone(), r.text.clone())))
        .collect();

    unique.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| {
                b.impact_score
                    .partial_cmp(&a.impact_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.text.cmp(&b.text))
    });
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ANOMALY_PRESSURE, FORECAST_TREND};
    use crate::models::{ForecastPoint, MetricName, MetricSnapshot};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn health(score: f64, headroom_term: f64) -> HealthScore {
        HealthScore {
            score,
            contributing_factors: BTreeMap::from([
                (RESOURCE_HEADROOM.to_string(), 0.4 * headroom_term),
                (ANOMALY_PRESSURE.to_string(), 0.0),
                (FORECAST_TREND.to_string(), 0.0),
            ]),
            status: HealthStatus::from_score(score),
        }
    }

    fn events(category: AnomalyCategory, n: usize) -> Vec<AnomalyEvent> {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|_| AnomalyEvent {
                detected_at: at,
                source_sample_timestamp: at,
                category,
                anomaly_score: 0.8,
                raw_values: MetricSnapshot {
                    memory_count: 1,
                    api_response_time_ms: 1.0,
                    cpu_percent: 1.0,
                    memory_percent: 1.0,
                    disk_percent: 1.0,
                },
            })
            .collect()
    }

    fn forecast(first: f64, last: f64, direction: TrendDirection, accuracy: f64) -> ForecastResult {
        let date = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let point = |value: f64| ForecastPoint {
            date,
            value,
            lower: value,
            upper: value,
        };
        ForecastResult {
            target_metric: MetricName::MemoryCount,
            horizon_days: 2,
            predicted_series: vec![point(first), point(last)],
            model_accuracy: accuracy,
            trend_direction: direction,
            feature_importances: BTreeMap::from([
                ("memory_count".to_string(), 0.25),
                ("rolling_avg_7".to_string(), 0.25),
                ("hour".to_string(), 0.5),
            ]),
            ensemble_weights: BTreeMap::new(),
            generated_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_healthy_quiet_system_has_no_recommendations() {
        let generator = RecommendationGenerator::new(&AnalysisConfig::default());
        let recs = generator.generate(&health(0.95, 1.0), &[], &[]);
        assert!(recs.is_empty());
    }

    #[test]
    fn test_anomaly_count_rules() {
        let generator = RecommendationGenerator::new(&AnalysisConfig::default());
        let mut anomalies = events(AnomalyCategory::ResourceConsumption, 2);
        anomalies.extend(events(AnomalyCategory::UsagePattern, 3));
        let recs = generator.generate(&health(0.9, 1.0), &anomalies, &[]);
        // Two resource anomalies stay below the rule's minimum of three
        assert!(recs.iter().all(|r| r.category != RESOURCE_OPTIMIZATION));
        assert!(recs.iter().any(|r| r.category == USAGE_MONITORING));

        anomalies.extend(events(AnomalyCategory::ResourceConsumption, 1));
        anomalies.extend(events(AnomalyCategory::Performance, 1));
        let recs = generator.generate(&health(0.9, 1.0), &anomalies, &[]);
        assert_eq!(recs[0].category, PERFORMANCE);
        assert_eq!(recs[1].category, RESOURCE_OPTIMIZATION);
    }

    #[test]
    fn test_critical_health_and_low_headroom() {
        let generator = RecommendationGenerator::new(&AnalysisConfig::default());
        let recs = generator.generate(&health(0.3, 0.2), &[], &[]);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].category, SYSTEM_HEALTH);
        assert_eq!(recs[0].priority, Level::High);
        assert_eq!(recs[0].impact_score, 1.0);
        assert_eq!(recs[1].category, RESOURCE_OPTIMIZATION);
    }

    #[test]
    fn test_forecast_rules() {
        let generator = RecommendationGenerator::new(&AnalysisConfig::default());
        let f = forecast(100.0, 200.0, TrendDirection::Increasing, 0.3);
        let recs = generator.generate(&health(0.9, 1.0), &[], &[f]);
        assert!(recs.iter().any(|r| r.category == CAPACITY_PLANNING));
        assert!(recs.iter().any(|r| r.text.starts_with("Forecast accuracy")));
        assert!(recs.iter().any(|r| r.text.contains("driven mostly by hour")));

        let f = forecast(200.0, 150.0, TrendDirection::Decreasing, 0.9);
        let recs = generator.generate(&health(0.9, 1.0), &[], &[f]);
        assert!(recs.iter().any(|r| r.text.contains("trending down")));
    }

    #[test]
    fn test_rank_and_dedup() {
        let a = recommendation(PERFORMANCE, Level::Medium, "a".into(), 0.5, Level::Low);
        let b = recommendation(PERFORMANCE, Level::High, "b".into(), 0.2, Level::Low);
        let c = recommendation(PERFORMANCE, Level::High, "c".into(), 0.9, Level::Low);
        let ranked = rank_and_dedup(vec![a.clone(), b.clone(), a.clone(), c.clone(), b.clone()]);
        assert_eq!(ranked, vec![c, b, a]);
    }

    #[test]
    fn test_duplicates_from_multiple_forecasts_collapse() {
        let generator = RecommendationGenerator::new(&AnalysisConfig::default());
        let f = forecast(100.0, 100.5, TrendDirection::Stable, 0.2);
        let recs = generator.generate(&health(0.9, 1.0), &[], &[f.clone(), f]);
        let low_accuracy = recs
            .iter()
            .filter(|r| r.text.starts_with("Forecast accuracy"))
            .count();
        assert_eq!(low_accuracy, 1);
    }
}
