use mwl_sync::config::AppConfig;
use mwl_sync::events::{Notifier, WorklistEvent};
use mwl_sync::scheduler::Orchestrator;
use mwl_sync::session::DimseTransportFactory;
use mwl_sync::store::MemoryStore;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logger(level: tracing::Level) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(level).into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	}

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::new()?;
	let level = tracing::Level::from_str(&config.telemetry.level)?;
	init_logger(level);

	// The Sentry client has to exist before the Tokio runtime, so #[tokio::main] is not an option.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let _sentry = init_sentry(&config);

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(async move {
			if let Err(error) = run(config).await {
				error!("Failed to start worklist synchronization: {error}");
			}
		});
	Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
	let store = Arc::new(MemoryStore::new(config.worklist.profiles));
	let transports = Arc::new(DimseTransportFactory {
		message_timeout: config.scheduler.message_timeout(),
	});
	let notifier = Notifier::new();

	let mut events = notifier.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(event) => log_event(&event),
				Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped worklist events"),
				Err(RecvError::Closed) => break,
			}
		}
	});

	let mut orchestrator = Orchestrator::new(
		store,
		transports,
		config.connection,
		config.scheduler,
		config.worklist.default_profile,
		notifier,
	);
	orchestrator.set_active_profile(None).await?;
	orchestrator.start()?;

	shutdown_signal().await;
	info!("Shutting down");
	orchestrator.shutdown().await;
	Ok(())
}

fn log_event(event: &WorklistEvent) {
	match event {
		WorklistEvent::EntryCreated { profile_id, entry } => {
			info!(profile_id, entry_id = ?entry.id, "Worklist entry created");
		}
		WorklistEvent::EntrySkipped { profile_id, reason } => {
			info!(profile_id, "Worklist entry skipped: {reason}");
		}
		WorklistEvent::EntryFailed {
			profile_id,
			failure,
		}
		| WorklistEvent::QueryCycleFailed {
			profile_id,
			failure,
		}
		| WorklistEvent::EchoFailed {
			profile_id,
			failure,
		} => warn!(profile_id, "{failure}"),
	}
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = signal::ctrl_c().await {
			error!("Failed to install Ctrl+C handler: {err}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(err) => {
				error!("Failed to install signal handler: {err}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
}
