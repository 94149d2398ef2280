use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;

use crate::RaterError;

/// How an admission check ended, as recorded in the `decisions` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Allowed,
    Limited,
    Bypass,
    Error,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Limited => "limited",
            Self::Bypass => "bypass",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct GateMetrics {
    decisions: Counter<u64>,
    backend_failures: Counter<u64>,
}

impl GateMetrics {
    pub(crate) fn new() -> Self {
        let meter = global::meter("rate_limit_gate");
        Self {
            decisions: meter.u64_counter("decisions").build(),
            backend_failures: meter.u64_counter("backend_failures").build(),
        }
    }

    pub(crate) fn decision(&self, outcome: Outcome) {
        self.decisions
            .add(1, &[KeyValue::new("outcome", outcome.as_str())]);
    }

    pub(crate) fn failure(&self, err: &RaterError) {
        if err.is_backend_failure() {
            self.backend_failures
                .add(1, &[KeyValue::new("kind", err.kind())]);
        }
    }
}
