//! One DICOM association to the worklist provider and its lifecycle.
//!
//! ```text
//! Idle -> NetworkReady -> AssociationNegotiated -> Live
//!   ^__________________________|____________________|  (failure: release)
//! ```

mod dimse;
pub mod transport;

pub use dimse::{DimseTransport, DimseTransportFactory};

use crate::model::{DicomTag, ProfileId, WorklistEntry, WorklistProfile};
use crate::parser::parse_responses;
use crate::query::QueryTemplate;
use crate::types::{ServiceClass, UI};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use transport::{Transport, TransportError};
use uuid::Uuid;

/// Upper bound for releasing an association, independent of the caller's deadline.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
	Idle,
	NetworkReady,
	AssociationNegotiated,
	/// Negotiated and verified with a C-ECHO.
	Live,
}

/// Presentation context ids as returned when the contexts were proposed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NegotiatedContexts {
	pub verification: u8,
	pub worklist: u8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
	InitNetwork,
	Negotiation,
	Verification,
	Echo,
	Find,
}

impl Display for Step {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::InitNetwork => write!(f, "Network initialization"),
			Self::Negotiation => write!(f, "Association negotiation"),
			Self::Verification => write!(f, "Post-negotiation C-ECHO"),
			Self::Echo => write!(f, "C-ECHO"),
			Self::Find => write!(f, "C-FIND"),
		}
	}
}

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("Failed to add presentation context for {service}: {source}")]
	PresentationContext {
		service: ServiceClass,
		source: TransportError,
	},
	#[error("{step} failed: {source}")]
	Transport { step: Step, source: TransportError },
	#[error("{step} timed out after {timeout:?}")]
	Timeout { step: Step, timeout: Duration },
	#[error("Session is not live")]
	NotLive,
}

pub struct ProtocolSession {
	id: Uuid,
	transport: Box<dyn Transport>,
	profile_id: ProfileId,
	transfer_syntax: UI,
	tags: Vec<DicomTag>,
	state: SessionState,
	contexts: Option<NegotiatedContexts>,
}

impl ProtocolSession {
	pub fn new(transport: Box<dyn Transport>, profile: &WorklistProfile, tags: Vec<DicomTag>) -> Self {
		Self {
			id: Uuid::new_v4(),
			transport,
			profile_id: profile.id,
			transfer_syntax: profile.presentation_context.transfer_syntax_uid.clone(),
			tags,
			state: SessionState::Idle,
			contexts: None,
		}
	}

	pub const fn id(&self) -> &Uuid {
		&self.id
	}

	pub const fn state(&self) -> SessionState {
		self.state
	}

	pub fn is_live(&self) -> bool {
		self.state == SessionState::Live
	}

	pub const fn contexts(&self) -> Option<NegotiatedContexts> {
		self.contexts
	}

	/// Brings the session into the [`SessionState::Live`] state, starting from a clean slate.
	/// Each network step is bounded by `timeout`. On failure the session is released again.
	#[instrument(skip_all, fields(session_id = %self.id, profile_id = self.profile_id))]
	pub async fn prepare(&mut self, timeout: Duration) -> Result<(), SessionError> {
		self.release().await;

		match self.establish(timeout).await {
			Ok(()) => {
				self.state = SessionState::Live;
				info!("Session is live");
				Ok(())
			}
			Err(err) => {
				warn!("Failed to prepare session: {err}");
				self.release().await;
				Err(err)
			}
		}
	}

	async fn establish(&mut self, timeout: Duration) -> Result<(), SessionError> {
		let verification = self.propose(ServiceClass::Verification)?;
		let worklist = self.propose(ServiceClass::Worklist)?;

		bounded(Step::InitNetwork, timeout, self.transport.init_network()).await?;
		self.state = SessionState::NetworkReady;
		debug!("Network layer initialized");

		bounded(Step::Negotiation, timeout, self.transport.negotiate_association()).await?;
		self.state = SessionState::AssociationNegotiated;
		self.contexts = Some(NegotiatedContexts {
			verification,
			worklist,
		});
		debug!(verification, worklist, "Association negotiated");

		bounded(
			Step::Verification,
			timeout,
			self.transport.send_echo(verification),
		)
		.await
	}

	fn propose(&mut self, service: ServiceClass) -> Result<u8, SessionError> {
		self.transport
			.add_presentation_context(service, &self.transfer_syntax)
			.map_err(|source| SessionError::PresentationContext { service, source })
	}

	/// Sends a C-ECHO over the live association. A session that is not live is prepared
	/// first, which already includes a C-ECHO.
	#[instrument(skip_all, fields(session_id = %self.id, profile_id = self.profile_id))]
	pub async fn echo(&mut self, timeout: Duration) -> Result<(), SessionError> {
		let contexts = match (self.state, self.contexts) {
			(SessionState::Live, Some(contexts)) => contexts,
			_ => return self.prepare(timeout).await,
		};

		let result = bounded(
			Step::Echo,
			timeout,
			self.transport.send_echo(contexts.verification),
		)
		.await;
		if result.is_err() {
			self.release().await;
		}
		result
	}

	/// Queries the worklist and parses every success or pending response into an entry.
	/// Either all entries are returned or none.
	#[instrument(skip_all, fields(session_id = %self.id, profile_id = self.profile_id))]
	pub async fn find(
		&mut self,
		template: &QueryTemplate,
		timeout: Duration,
	) -> Result<Vec<WorklistEntry>, SessionError> {
		let contexts = match (self.state, self.contexts) {
			(SessionState::Live, Some(contexts)) => contexts,
			_ => return Err(SessionError::NotLive),
		};

		match bounded(
			Step::Find,
			timeout,
			self.transport.send_find(contexts.worklist, template),
		)
		.await
		{
			Ok(responses) => {
				let entries = parse_responses(&responses, &self.tags, self.profile_id);
				debug!(
					responses = responses.len(),
					entries = entries.len(),
					"C-FIND completed"
				);
				Ok(entries)
			}
			Err(err) => {
				self.release().await;
				Err(err)
			}
		}
	}

	/// Tears down the association. Safe to call in any state; failures are only logged.
	pub async fn release(&mut self) {
		let was = self.state;
		self.state = SessionState::Idle;
		self.contexts = None;

		match tokio::time::timeout(RELEASE_TIMEOUT, self.transport.release_association()).await {
			Ok(Ok(())) => {
				if was != SessionState::Idle {
					debug!(session_id = %self.id, "Released session (was {was:?})");
				}
			}
			Ok(Err(err)) => debug!(session_id = %self.id, "Nothing to release: {err}"),
			Err(_) => warn!(session_id = %self.id, "Release timed out after {RELEASE_TIMEOUT:?}"),
		}
	}
}

async fn bounded<T>(
	step: Step,
	timeout: Duration,
	operation: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, SessionError> {
	tokio::time::timeout(timeout, operation)
		.await
		.map_err(|_| SessionError::Timeout { step, timeout })?
		.map_err(|source| SessionError::Transport { step, source })
}
