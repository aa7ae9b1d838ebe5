//! Drives the sync cycles: timers, the worker owning the protocol session, single-flight
//! protection and the start/stop lifecycle.
//!
//! The orchestrator never touches the session itself. Requests travel to the worker on one
//! channel, results come back on another and are reconciled by the control loop.

pub mod worker;

use crate::config::SchedulerConfig;
use crate::events::{Failure, FailureKind, Notifier, WorklistEvent};
use crate::model::{ConnectionParameters, DicomTag, ProfileId, WorklistEntry, WorklistProfile};
use crate::query::QueryTemplate;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::session::transport::TransportFactory;
use crate::session::ProtocolSession;
use crate::store::{StoreError, WorklistStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use worker::{WorkerEvent, WorkerRequest};

/// Interval of the liveness probe.
pub const ECHO_INTERVAL: Duration = Duration::from_secs(30);

const CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigurationError {
	#[error("No worklist profile is configured")]
	NoProfile,
	#[error("Worklist profile {0} does not exist")]
	UnknownProfile(ProfileId),
	#[error("Worklist profile {0} has no tags")]
	NoTags(ProfileId),
	#[error("Worklist profile {0} has no active tags")]
	NoActiveTags(ProfileId),
	#[error("No active worklist profile has been set")]
	NoActiveProfile,
	#[error("Failed to resolve worklist profile: {0}")]
	Store(#[from] StoreError),
}

/// Result of requesting work from the worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Dispatch {
	Dispatched,
	/// A query cycle is outstanding. Nothing was sent.
	AlreadyInFlight,
	/// The worker is stopped or its queue is full. Nothing was sent.
	WorkerUnavailable,
}

/// Hands requests to the worker, guarding query cycles with the in-flight flag.
#[derive(Debug, Clone)]
pub struct Dispatcher {
	in_flight: Arc<AtomicBool>,
	requests: mpsc::Sender<WorkerRequest>,
	template: Arc<QueryTemplate>,
}

impl Dispatcher {
	pub const fn new(
		in_flight: Arc<AtomicBool>,
		requests: mpsc::Sender<WorkerRequest>,
		template: Arc<QueryTemplate>,
	) -> Self {
		Self {
			in_flight,
			requests,
			template,
		}
	}

	/// Starts one query cycle unless one is already in flight.
	pub fn perform_worklist_query(&self) -> Dispatch {
		if self
			.in_flight
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			info!("Skipping worklist query, previous cycle is still in flight");
			return Dispatch::AlreadyInFlight;
		}

		let request = WorkerRequest::Find {
			template: Arc::clone(&self.template),
		};
		match self.requests.try_send(request) {
			Ok(()) => {
				debug!("Dispatched worklist query");
				Dispatch::Dispatched
			}
			Err(err) => {
				self.in_flight.store(false, Ordering::Release);
				warn!("Failed to dispatch worklist query: {}", describe(&err));
				Dispatch::WorkerUnavailable
			}
		}
	}

	/// Requests a liveness probe. Skipped while a query cycle holds the session.
	pub fn request_echo(&self) -> Dispatch {
		if self.in_flight.load(Ordering::Acquire) {
			debug!("Skipping C-ECHO, worklist query in flight");
			return Dispatch::AlreadyInFlight;
		}
		match self.requests.try_send(WorkerRequest::Echo) {
			Ok(()) => Dispatch::Dispatched,
			Err(err) => {
				debug!("Skipping C-ECHO: {}", describe(&err));
				Dispatch::WorkerUnavailable
			}
		}
	}
}

const fn describe<T>(err: &TrySendError<T>) -> &'static str {
	match err {
		TrySendError::Full(_) => "worker is busy",
		TrySendError::Closed(_) => "worker has stopped",
	}
}

/// A resolved profile together with the query it produces.
#[derive(Debug)]
struct ActiveProfile {
	profile: WorklistProfile,
	tags: Vec<DicomTag>,
	template: Arc<QueryTemplate>,
}

struct Running {
	cancel: CancellationToken,
	dispatcher: Dispatcher,
	control: JoinHandle<()>,
	worker: JoinHandle<()>,
}

pub struct Orchestrator<S: WorklistStore + ?Sized + 'static> {
	store: Arc<S>,
	transports: Arc<dyn TransportFactory>,
	connection: ConnectionParameters,
	config: SchedulerConfig,
	default_profile: Option<ProfileId>,
	notifier: Notifier,
	in_flight: Arc<AtomicBool>,
	active: Option<Arc<ActiveProfile>>,
	running: Option<Running>,
}

impl<S: WorklistStore + ?Sized + 'static> Orchestrator<S> {
	pub fn new(
		store: Arc<S>,
		transports: Arc<dyn TransportFactory>,
		connection: ConnectionParameters,
		config: SchedulerConfig,
		default_profile: Option<ProfileId>,
		notifier: Notifier,
	) -> Self {
		Self {
			store,
			transports,
			connection,
			config,
			default_profile,
			notifier,
			in_flight: Arc::new(AtomicBool::new(false)),
			active: None,
			running: None,
		}
	}

	pub const fn is_running(&self) -> bool {
		self.running.is_some()
	}

	pub fn in_flight(&self) -> bool {
		self.in_flight.load(Ordering::Acquire)
	}

	pub fn active_profile(&self) -> Option<&WorklistProfile> {
		self.active.as_deref().map(|active| &active.profile)
	}

	/// Resolves the profile and its tags. Without an explicit id the configured default is
	/// used, then the first profile of the store. A running orchestrator is restarted with a
	/// new session and worker. On error the previous profile stays in place.
	pub async fn set_active_profile(
		&mut self,
		profile_id: Option<ProfileId>,
	) -> Result<(), ConfigurationError> {
		let active = match self.resolve_profile(profile_id).await {
			Ok(active) => active,
			Err(err) => {
				error!("Configuration error: {err}");
				return Err(err);
			}
		};
		info!(
			profile_id = active.profile.id,
			tags = active.tags.len(),
			"Activated worklist profile '{}'",
			active.profile.name
		);

		let was_running = self.is_running();
		self.stop().await;
		self.active = Some(Arc::new(active));
		if was_running {
			self.start()?;
		}
		Ok(())
	}

	async fn resolve_profile(
		&self,
		profile_id: Option<ProfileId>,
	) -> Result<ActiveProfile, ConfigurationError> {
		let profiles = self.store.get_profiles().await?;
		let profile = match profile_id.or(self.default_profile) {
			Some(id) => profiles
				.into_iter()
				.find(|profile| profile.id == id)
				.ok_or(ConfigurationError::UnknownProfile(id))?,
			None => profiles
				.into_iter()
				.next()
				.ok_or(ConfigurationError::NoProfile)?,
		};

		let tags = self.store.get_tags_by_profile(profile.id).await?;
		if tags.is_empty() {
			return Err(ConfigurationError::NoTags(profile.id));
		}
		let tags: Vec<DicomTag> = tags.into_iter().filter(|tag| tag.is_active).collect();
		let template = QueryTemplate::build(&tags);
		if template.is_empty() {
			return Err(ConfigurationError::NoActiveTags(profile.id));
		}

		Ok(ActiveProfile {
			profile,
			tags,
			template: Arc::new(template),
		})
	}

	/// Builds a fresh session and worker and starts both timers. The first query cycle runs
	/// once the worker reports readiness. Starting twice is a no-op.
	pub fn start(&mut self) -> Result<(), ConfigurationError> {
		if self.is_running() {
			debug!("Orchestrator is already running");
			return Ok(());
		}
		let Some(active) = self.active.clone() else {
			error!("Configuration error: {}", ConfigurationError::NoActiveProfile);
			return Err(ConfigurationError::NoActiveProfile);
		};

		let cancel = CancellationToken::new();
		let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
		let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
		self.in_flight.store(false, Ordering::Release);

		let session = ProtocolSession::new(
			self.transports.create(&self.connection),
			&active.profile,
			active.tags.clone(),
		);
		let worker = worker::spawn(
			session,
			request_rx,
			event_tx,
			self.config.request_timeout(),
			cancel.clone(),
		);

		let dispatcher = Dispatcher::new(
			Arc::clone(&self.in_flight),
			request_tx,
			Arc::clone(&active.template),
		);
		let span = tracing::info_span!("orchestrator", profile_id = active.profile.id);
		let control = tokio::spawn(
			ControlLoop {
				reconciler: Reconciler::new(Arc::clone(&self.store)),
				notifier: self.notifier.clone(),
				dispatcher: dispatcher.clone(),
				in_flight: Arc::clone(&self.in_flight),
				active,
				events: event_rx,
				find_interval: self.config.find_interval(),
				cancel: cancel.clone(),
			}
			.run()
			.instrument(span),
		);

		self.running = Some(Running {
			cancel,
			dispatcher,
			control,
			worker,
		});
		info!(
			find_interval = ?self.config.find_interval(),
			called_aet = %self.connection.called_aet,
			"Started worklist synchronization"
		);
		Ok(())
	}

	/// Requests a query cycle outside the timer.
	pub fn perform_worklist_query(&self) -> Dispatch {
		self.running.as_ref().map_or_else(
			|| {
				debug!("Orchestrator is not running");
				Dispatch::WorkerUnavailable
			},
			|running| running.dispatcher.perform_worklist_query(),
		)
	}

	/// Stops both timers, cancels the worker and waits for it to release the session, bounded
	/// by the shutdown timeout. Safe to call repeatedly and before [`Self::start`].
	pub async fn stop(&mut self) {
		let Some(running) = self.running.take() else {
			return;
		};
		running.cancel.cancel();

		if let Err(err) = running.control.await {
			warn!("Control loop terminated abnormally: {err}");
		}

		let abort = running.worker.abort_handle();
		match tokio::time::timeout(self.config.shutdown_timeout(), running.worker).await {
			Ok(Ok(())) => {}
			Ok(Err(err)) => warn!("Worker terminated abnormally: {err}"),
			Err(_) => {
				warn!(
					"Worker did not stop within {:?}, abandoning it",
					self.config.shutdown_timeout()
				);
				abort.abort();
			}
		}

		self.in_flight.store(false, Ordering::Release);
		info!("Stopped worklist synchronization");
	}

	/// Application shutdown hook. Safe to invoke even if the orchestrator was never started.
	pub async fn shutdown(mut self) {
		self.stop().await;
		self.active = None;
		debug!("Orchestrator shut down");
	}
}

struct ControlLoop<S: WorklistStore + ?Sized> {
	reconciler: Reconciler<S>,
	notifier: Notifier,
	dispatcher: Dispatcher,
	in_flight: Arc<AtomicBool>,
	active: Arc<ActiveProfile>,
	events: mpsc::Receiver<WorkerEvent>,
	find_interval: Duration,
	cancel: CancellationToken,
}

impl<S: WorklistStore + ?Sized> ControlLoop<S> {
	async fn run(mut self) {
		let mut find_timer = interval_at(Instant::now() + self.find_interval, self.find_interval);
		find_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
		let mut echo_timer = interval_at(Instant::now() + ECHO_INTERVAL, ECHO_INTERVAL);
		echo_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

		loop {
			tokio::select! {
				biased;
				() = self.cancel.cancelled() => break,
				Some(event) = self.events.recv() => self.handle(event).await,
				_ = find_timer.tick() => {
					self.dispatcher.perform_worklist_query();
				}
				_ = echo_timer.tick() => {
					self.dispatcher.request_echo();
				}
			}
		}
		debug!("Control loop stopped");
	}

	async fn handle(&self, event: WorkerEvent) {
		let profile_id = self.active.profile.id;
		match event {
			WorkerEvent::Ready => {
				debug!("Worker is ready");
				self.dispatcher.perform_worklist_query();
			}
			WorkerEvent::QueryCompleted(result) => {
				self.in_flight.store(false, Ordering::Release);
				match result {
					Ok(entries) => self.reconcile(entries).await,
					Err(err) => {
						warn!("Worklist query failed: {err}");
						self.notifier.publish(WorklistEvent::QueryCycleFailed {
							profile_id,
							failure: Failure::new(FailureKind::Transport, err),
						});
					}
				}
			}
			WorkerEvent::EchoCompleted(Ok(())) => debug!("C-ECHO succeeded"),
			WorkerEvent::EchoCompleted(Err(err)) => {
				warn!("C-ECHO failed: {err}");
				self.notifier.publish(WorklistEvent::EchoFailed {
					profile_id,
					failure: Failure::new(FailureKind::Transport, err),
				});
			}
		}
	}

	async fn reconcile(&self, entries: Vec<WorklistEntry>) {
		let profile_id = self.active.profile.id;
		let received = entries.len();
		let outcomes = match self.reconciler.reconcile(entries, &self.active.profile).await {
			Ok(outcomes) => outcomes,
			Err(err) => {
				warn!("Reconciliation failed: {err}");
				self.notifier.publish(WorklistEvent::QueryCycleFailed {
					profile_id,
					failure: Failure::new(FailureKind::Persistence, err),
				});
				return;
			}
		};

		let mut created = 0;
		for outcome in outcomes {
			let event = match outcome {
				ReconcileOutcome::Created(entry) => {
					created += 1;
					WorklistEvent::EntryCreated { profile_id, entry }
				}
				ReconcileOutcome::Skipped(reason) => WorklistEvent::EntrySkipped { profile_id, reason },
				ReconcileOutcome::Failed(err) => WorklistEvent::EntryFailed {
					profile_id,
					failure: Failure::new(FailureKind::Persistence, err),
				},
			};
			self.notifier.publish(event);
		}
		info!(received, created, "Worklist query cycle completed");
	}
}
