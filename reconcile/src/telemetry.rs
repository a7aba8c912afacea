use crate::model::ActionKind;
use metrics::{counter, histogram};
use std::time::Instant;

pub struct Telemetry;

impl Telemetry {
    pub fn record_run(outcome: &str) {
        counter!("reconcile_runs_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_actions(kind: ActionKind, count: usize, success: bool) {
        let status = if success { "success" } else { "failure" };
        counter!(
            "reconcile_actions_total",
            "kind" => kind.as_str(),
            "status" => status
        )
        .increment(count as u64);
    }

    pub fn record_guard_rejection() {
        counter!("reconcile_guard_rejections_total").increment(1);
    }

    pub fn record_duration(duration_ms: f64) {
        histogram!("reconcile_run_duration_ms").record(duration_ms);
    }
}

pub struct RunTimer {
    start: Instant
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now()
        }
    }

    pub fn finish(self) {
        Telemetry::record_duration(self.start.elapsed().as_millis() as f64);
    }
}
