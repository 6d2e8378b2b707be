// self
use crate::obs::{FlowKind, FlowOutcome};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"fleetkey_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Counts an identity evicted by a background sweep (when enabled).
///
/// An eviction means a refresh token stopped working without any user action.
pub fn record_eviction(kind: FlowKind) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("fleetkey_evictions_total", "flow" => kind.as_str()).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = kind;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn sweep_counters_are_noops_without_metrics() {
		for kind in [FlowKind::HealthSweep, FlowKind::BulkRefresh] {
			record_flow_outcome(kind, FlowOutcome::Attempt);
			record_flow_outcome(kind, FlowOutcome::Failure);
		}

		record_eviction(FlowKind::HealthSweep);
	}
}
