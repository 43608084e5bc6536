//! Prometheus-style counters exposed by the service shell (§4.10).

use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub block_number: IntGauge,
    pub event_index: IntGauge,
    pub transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let block_number = IntGauge::new("block_number", "last processed block number")?;
        let event_index = IntGauge::new("event_index", "last processed log index")?;
        let transitions = IntCounterVec::new(
            Opts::new("transitions", "state machine transitions by result"),
            &["result"],
        )?;

        registry.register(Box::new(block_number.clone()))?;
        registry.register(Box::new(event_index.clone()))?;
        registry.register(Box::new(transitions.clone()))?;

        Ok(Self { registry, block_number, event_index, transitions })
    }

    pub fn record_transition(&self, result: &str) {
        self.transitions.with_label_values(&[result]).inc();
    }
}
