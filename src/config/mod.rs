use crate::model::{ConnectionParameters, ProfileId, WorklistProfile};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub connection: ConnectionParameters,
	pub scheduler: SchedulerConfig,
	pub worklist: WorklistConfig,
}

impl AppConfig {
	/// Loads the embedded defaults, then `config.toml` (optional), then `MWL_SYNC_*` variables.
	/// Nested keys are separated by a double underscore, e.g. `MWL_SYNC_CONNECTION__PORT=104`.
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let s = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(
				config::Environment::with_prefix("MWL_SYNC")
					.prefix_separator("_")
					.separator("__"),
			)
			.build()?;

		s.try_deserialize()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	// Default level directive. RUST_LOG takes precedence.
	pub level: String,
	/// Sentry DSN. Absent or empty disables Sentry.
	pub sentry: Option<String>,
}

/// Timings of the orchestrator. All values are milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
	/// How often a worklist query cycle is requested.
	pub find_interval: u64,
	/// Deadline for each network step of prepare, echo and find.
	pub request_timeout: u64,
	/// Deadline for a single PDU exchange on the association.
	pub message_timeout: u64,
	/// How long stopping waits for the worker before abandoning it.
	pub shutdown_timeout: u64,
}

impl SchedulerConfig {
	pub const fn find_interval(&self) -> Duration {
		Duration::from_millis(self.find_interval)
	}

	pub const fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout)
	}

	pub const fn message_timeout(&self) -> Duration {
		Duration::from_millis(self.message_timeout)
	}

	pub const fn shutdown_timeout(&self) -> Duration {
		Duration::from_millis(self.shutdown_timeout)
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorklistConfig {
	/// Used when no profile is selected explicitly. Falls back to the first profile.
	pub default_profile: Option<ProfileId>,
	/// Seeds the in-memory store.
	#[serde(default)]
	pub profiles: Vec<WorklistProfile>,
}
