//! Background maintenance: the health-check sweep and the bulk refresh sweep.
//!
//! Both sweeps run as plain Tokio tasks owned by a [`Sweeper`]. Shutdown is
//! cooperative: cancelling the shared token stops the loops at the next await
//! point and [`Sweeper::shutdown`] waits for both tasks to finish, so no sweep
//! outlives the registry it maintains.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{task::JoinHandle, time::MissedTickBehavior};
// self
use crate::{
	_prelude::*,
	http::TokenTransport,
	obs::{self, FlowKind, FlowOutcome},
	registry::SessionRegistry,
};

/// Default cadence of the health-check sweep.
pub const DEFAULT_HEALTH_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);
/// Default cadence of the bulk refresh sweep.
pub const DEFAULT_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(45 * 60);
/// Default age beyond which untouched session records are pruned.
pub const DEFAULT_SESSION_MAX_AGE: Duration = Duration::days(30);

/// Tunable knobs for both background sweeps.
#[derive(Clone, Debug)]
pub struct SweepConfig {
	/// Cadence of the health-check sweep.
	pub health_interval: StdDuration,
	/// Cadence of the bulk refresh sweep.
	pub refresh_interval: StdDuration,
	/// Session records untouched for longer than this get pruned.
	pub session_max_age: Duration,
	/// Whether evicting an unrecoverable identity also purges its vaulted
	/// secrets. Off by default so a transient provider outage never costs the
	/// user a stored refresh token.
	pub purge_on_eviction: bool,
}
impl Default for SweepConfig {
	fn default() -> Self {
		Self {
			health_interval: DEFAULT_HEALTH_INTERVAL,
			refresh_interval: DEFAULT_REFRESH_INTERVAL,
			session_max_age: DEFAULT_SESSION_MAX_AGE,
			purge_on_eviction: false,
		}
	}
}

/// Owner of both background sweep tasks.
#[derive(Debug)]
pub struct Sweeper {
	cancel: CancellationToken,
	handles: Vec<JoinHandle<()>>,
}
impl Sweeper {
	/// Spawns the health-check and bulk refresh sweeps over the registry.
	///
	/// Each sweep waits one full interval before its first pass; startup never
	/// triggers an immediate burst of remote calls.
	pub fn start<T>(registry: SessionRegistry<T>, config: SweepConfig) -> Self
	where
		T: ?Sized + TokenTransport,
	{
		let cancel = CancellationToken::new();
		let handles = vec![
			tokio::spawn(run_health_sweep(registry.clone(), config.clone(), cancel.child_token())),
			tokio::spawn(run_refresh_sweep(registry, config, cancel.child_token())),
		];

		Self { cancel, handles }
	}

	/// Requests shutdown and waits for both sweeps to finish.
	pub async fn shutdown(mut self) {
		self.cancel.cancel();

		for handle in self.handles.drain(..) {
			let _ = handle.await;
		}
	}
}
impl Drop for Sweeper {
	fn drop(&mut self) {
		// A dropped sweeper still stops its tasks, just without waiting.
		self.cancel.cancel();
	}
}

async fn run_health_sweep<T>(
	registry: SessionRegistry<T>,
	config: SweepConfig,
	cancel: CancellationToken,
) where
	T: ?Sized + TokenTransport,
{
	let mut ticker = tokio::time::interval(config.health_interval);

	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// The first tick resolves immediately; consume it so the first pass lands
	// one full interval after startup.
	ticker.tick().await;

	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {},
		}

		health_pass(&registry, &config, &cancel).await;
	}
}

/// One health-check pass: probe every identity, refresh the ones whose token
/// no longer validates, and evict the ones that cannot be recovered. Finishes
/// by pruning stale session records.
async fn health_pass<T>(
	registry: &SessionRegistry<T>,
	config: &SweepConfig,
	cancel: &CancellationToken,
) where
	T: ?Sized + TokenTransport,
{
	obs::record_flow_outcome(FlowKind::HealthSweep, FlowOutcome::Attempt);

	for credential in registry.credentials() {
		if cancel.is_cancelled() {
			return;
		}

		let id = credential.id;
		// A credential inside the safety margin needs a refresh outright;
		// otherwise a probe decides whether the token still works.
		let needs_refresh = if credential.is_usable() {
			match registry.validate_identity(id, cancel).await {
				Ok(valid) => !valid,
				// The identity was removed between the snapshot and the probe.
				Err(Error::IdentityNotFound { .. }) => continue,
				Err(_) => return,
			}
		} else {
			true
		};

		if needs_refresh && registry.refresh_identity(id, cancel).await.is_err() {
			registry.evict(id, config.purge_on_eviction).await;
			obs::record_eviction(FlowKind::HealthSweep);
		}
	}

	let cutoff = OffsetDateTime::now_utc() - config.session_max_age;

	if let Err(e) = registry.prune_sessions(cutoff).await {
		log_sweep_failure("prune", &e);
	}

	obs::record_flow_outcome(FlowKind::HealthSweep, FlowOutcome::Success);
}

async fn run_refresh_sweep<T>(
	registry: SessionRegistry<T>,
	config: SweepConfig,
	cancel: CancellationToken,
) where
	T: ?Sized + TokenTransport,
{
	let mut ticker = tokio::time::interval(config.refresh_interval);

	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	ticker.tick().await;

	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ticker.tick() => {},
		}

		let report = registry.bulk_refresh(&cancel).await;

		#[cfg(feature = "tracing")]
		tracing::info!(
			target: "fleetkey.sweep",
			succeeded = report.succeeded,
			failed = report.failed(),
			"bulk refresh pass finished",
		);
		#[cfg(not(feature = "tracing"))]
		let _ = report;
	}
}

fn log_sweep_failure(stage: &str, error: &Error) {
	#[cfg(feature = "tracing")]
	tracing::warn!(target: "fleetkey.sweep", stage, error = %error, "sweep step failed");
	#[cfg(not(feature = "tracing"))]
	let _ = (stage, error);
}
