//! Notifications about the outcome of sync cycles, fanned out over a broadcast channel.

use crate::model::{EntryId, ProfileId, WorklistEntry};
use crate::reconcile::SkipReason;
use std::fmt::{Display, Formatter};
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
	Configuration,
	Transport,
	Persistence,
}

impl Display for FailureKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Configuration => write!(f, "configuration"),
			Self::Transport => write!(f, "transport"),
			Self::Persistence => write!(f, "persistence"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
	pub kind: FailureKind,
	pub message: String,
}

impl Failure {
	pub fn new(kind: FailureKind, message: impl Display) -> Self {
		Self {
			kind,
			message: message.to_string(),
		}
	}
}

impl Display for Failure {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} failure: {}", self.kind, self.message)
	}
}

#[derive(Debug, Clone)]
pub enum WorklistEvent {
	EntryCreated {
		profile_id: ProfileId,
		entry: WorklistEntry,
	},
	EntrySkipped {
		profile_id: ProfileId,
		reason: SkipReason,
	},
	EntryFailed {
		profile_id: ProfileId,
		failure: Failure,
	},
	QueryCycleFailed {
		profile_id: ProfileId,
		failure: Failure,
	},
	EchoFailed {
		profile_id: ProfileId,
		failure: Failure,
	},
}

impl WorklistEvent {
	pub const fn profile_id(&self) -> ProfileId {
		match self {
			Self::EntryCreated { profile_id, .. }
			| Self::EntrySkipped { profile_id, .. }
			| Self::EntryFailed { profile_id, .. }
			| Self::QueryCycleFailed { profile_id, .. }
			| Self::EchoFailed { profile_id, .. } => *profile_id,
		}
	}

	/// The id of the persisted entry this event refers to, if any.
	pub fn entry_id(&self) -> Option<EntryId> {
		match self {
			Self::EntryCreated { entry, .. } => entry.id,
			Self::EntrySkipped {
				reason: SkipReason::AlreadyPresent { entry_id },
				..
			} => Some(*entry_id),
			_ => None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct Notifier {
	sender: broadcast::Sender<WorklistEvent>,
}

impl Default for Notifier {
	fn default() -> Self {
		Self::new()
	}
}

impl Notifier {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<WorklistEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Events without subscribers are dropped.
	pub fn publish(&self, event: WorklistEvent) {
		if self.sender.send(event).is_err() {
			trace!("No subscribers for worklist event");
		}
	}
}
