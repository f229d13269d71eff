use crate::pipeline::StageTimings;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

pub struct Metrics {
    request_counter: IntCounterVec,
    stage_duration: HistogramVec,
    model_load_duration: Gauge,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_counter = IntCounterVec::new(
            Opts::new("requests_total", "Total number of classification requests"),
            &["route", "status"],
        )?;

        let boundaries = latency_buckets_ms(1.0, 5000.0);

        let stage_duration = HistogramVec::new(
            HistogramOpts::new(
                "stage_duration_ms",
                "Duration of fetch, preprocess and inference stages in milliseconds",
            )
            .buckets(boundaries),
            &["stage"],
        )?;

        let model_load_duration = Gauge::new(
            "model_load_seconds",
            "Time spent loading the model bundle at warm-up",
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(stage_duration.clone()))?;
        registry.register(Box::new(model_load_duration.clone()))?;

        Ok(Metrics {
            request_counter,
            stage_duration,
            model_load_duration,
            registry,
        })
    }

    pub fn record_request(&self, route: &str, status: u16) {
        let status = status.to_string();
        self.request_counter
            .with_label_values(&[route, status.as_str()])
            .inc();
    }

    pub fn record_stage_durations(&self, timings: &StageTimings) {
        for (stage, duration) in [
            ("fetch", timings.fetch),
            ("preprocess", timings.preprocess),
            ("inference", timings.inference),
        ] {
            self.stage_duration
                .with_label_values(&[stage])
                .observe(duration.as_secs_f64() * 1000.);
        }
    }

    pub fn record_model_load(&self, duration: Duration) {
        self.model_load_duration.set(duration.as_secs_f64());
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// 1-2-5 series of millisecond boundaries from `floor` up to `ceiling`.
fn latency_buckets_ms(floor: f64, ceiling: f64) -> Vec<f64> {
    let mut buckets = Vec::new();
    let mut decade = floor;
    while decade > 0.0 && decade <= ceiling {
        buckets.extend(
            [1.0, 2.0, 5.0]
                .iter()
                .map(|step| decade * step)
                .filter(|bound| *bound <= ceiling),
        );
        decade *= 10.0;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_follow_one_two_five() {
        assert_eq!(
            latency_buckets_ms(1.0, 5000.0),
            vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0]
        );
        assert_eq!(latency_buckets_ms(10.0, 30.0), vec![10.0, 20.0]);
        assert!(latency_buckets_ms(0.0, 100.0).is_empty());
    }

    #[test]
    fn test_render_exposes_recorded_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/predict", 200);
        metrics.record_stage_durations(&StageTimings {
            fetch: Duration::from_millis(40),
            preprocess: Duration::from_millis(12),
            inference: Duration::from_millis(85),
        });
        metrics.record_model_load(Duration::from_secs(3));

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"requests_total{route="/predict",status="200"} 1"#));
        assert!(text.contains(r#"stage_duration_ms_count{stage="inference"} 1"#));
        assert!(text.contains("model_load_seconds 3"));
    }
}
