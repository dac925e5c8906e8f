// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use prometheus::core::{AtomicF64, GenericCounter, GenericGauge};
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

/// A struct definition for collecting metrics in the relayer.
///
/// Every instance owns its own [`Registry`], so several relayers (or tests)
/// can live in the same process.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Events recorded as pending by the chain monitors
    pub pending_recorded: GenericCounter<AtomicF64>,
    /// Proofs accepted by the destination chain
    pub proofs_submitted: GenericCounter<AtomicF64>,
    /// Items moved into the retry set
    pub retries_enqueued: GenericCounter<AtomicF64>,
    /// Items dropped after a permanent failure
    pub items_abandoned: GenericCounter<AtomicF64>,
    /// Heimdall spans written to the store
    pub spans_recorded: GenericCounter<AtomicF64>,
    /// Monitor back off metric
    pub monitor_back_off: GenericCounter<AtomicF64>,
    /// Total amount of data stored metric
    pub total_amount_of_data_stored: GenericGauge<AtomicF64>,
    cursor_height: IntGaugeVec,
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also creates a registry for the counters and
    /// registers the counters
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let pending_recorded = counter(
            &registry,
            "pending_recorded",
            "The total number of events recorded as pending proofs",
        )?;
        let proofs_submitted = counter(
            &registry,
            "proofs_submitted",
            "The total number of proofs submitted to the destination chain",
        )?;
        let retries_enqueued = counter(
            &registry,
            "retries_enqueued",
            "How many times an item was moved into the retry set",
        )?;
        let items_abandoned = counter(
            &registry,
            "items_abandoned",
            "The total number of items dropped after a permanent failure",
        )?;
        let spans_recorded = counter(
            &registry,
            "spans_recorded",
            "The total number of heimdall spans recorded",
        )?;
        let monitor_back_off = counter(
            &registry,
            "monitor_back_off",
            "specifies how many times a monitor backed off",
        )?;

        let total_amount_of_data_stored = GenericGauge::with_opts(Opts::new(
            "total_amount_of_data_stored",
            "The Total number of data stored",
        ))?;
        registry.register(Box::new(total_amount_of_data_stored.clone()))?;

        let cursor_height = IntGaugeVec::new(
            Opts::new("cursor_height", "Last fully processed height per cursor"),
            &["cursor"],
        )?;
        registry.register(Box::new(cursor_height.clone()))?;

        Ok(Self {
            registry,
            pending_recorded,
            proofs_submitted,
            retries_enqueued,
            items_abandoned,
            spans_recorded,
            monitor_back_off,
            total_amount_of_data_stored,
            cursor_height,
        })
    }

    /// Records the value a cursor was advanced to.
    pub fn set_cursor(&self, cursor: &str, height: u64) {
        let height = i64::try_from(height).unwrap_or(i64::MAX);
        self.cursor_height.with_label_values(&[cursor]).set(height);
    }

    /// Gathers the whole relayer metrics, in the prometheus text format.
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<GenericCounter<AtomicF64>, prometheus::Error> {
    let counter = GenericCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_do_not_clash() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.proofs_submitted.inc();
        a.set_cursor("eth_height", 42);
        assert_eq!(b.proofs_submitted.get() as u64, 0);

        let text = a.gather_metrics();
        assert!(text.contains("proofs_submitted 1"));
        assert!(text.contains("cursor_height{cursor=\"eth_height\"} 42"));
    }
}
