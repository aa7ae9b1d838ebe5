//! Decides for every parsed entry whether it is new or already known to the store.

use crate::model::{DicomTag, EntryId, WorklistEntry, WorklistProfile};
use crate::store::{MatchKey, StoreError, WorklistStore};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
	/// None of the active identifier tags is present, the entry cannot be deduplicated.
	NoIdentifier,
	MissingMandatoryIdentifier { tag: String },
	/// An entry with the same identifiers exists. It is left untouched.
	AlreadyPresent { entry_id: EntryId },
}

impl Display for SkipReason {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::NoIdentifier => write!(f, "no active identifier present"),
			Self::MissingMandatoryIdentifier { tag } => {
				write!(f, "mandatory identifier {tag} is missing")
			}
			Self::AlreadyPresent { entry_id } => write!(f, "already present as {entry_id}"),
		}
	}
}

#[derive(Debug)]
pub enum ReconcileOutcome {
	Created(WorklistEntry),
	Skipped(SkipReason),
	/// Persisting this entry failed. Other entries of the batch are unaffected.
	Failed(StoreError),
}

pub struct Reconciler<S: WorklistStore + ?Sized> {
	store: Arc<S>,
}

impl<S: WorklistStore + ?Sized> Reconciler<S> {
	pub const fn new(store: Arc<S>) -> Self {
		Self { store }
	}

	/// Reconciles a batch of parsed entries, producing one outcome per entry in input order.
	///
	/// Fails as a whole only if the identifier tags of the profile cannot be loaded.
	#[instrument(skip_all, fields(profile_id = profile.id, entries = entries.len()))]
	pub async fn reconcile(
		&self,
		entries: Vec<WorklistEntry>,
		profile: &WorklistProfile,
	) -> Result<Vec<ReconcileOutcome>, StoreError> {
		let identifiers: Vec<DicomTag> = self
			.store
			.get_active_identifier_tags(profile.id)
			.await?
			.into_iter()
			.filter(|tag| tag.is_active)
			.collect();
		let mandatory: Vec<&DicomTag> = profile
			.tags
			.iter()
			.filter(|tag| tag.is_mandatory_identifier && tag.tag.is_active)
			.map(|tag| &tag.tag)
			.collect();

		let mut outcomes = Vec::with_capacity(entries.len());
		for entry in entries {
			let outcome = self.reconcile_entry(entry, profile, &identifiers, &mandatory).await;
			match &outcome {
				ReconcileOutcome::Created(entry) => {
					info!(entry_id = ?entry.id, "Created worklist entry");
				}
				ReconcileOutcome::Skipped(reason) => warn!("Skipped worklist entry: {reason}"),
				ReconcileOutcome::Failed(err) => warn!("Failed to persist worklist entry: {err}"),
			}
			outcomes.push(outcome);
		}
		Ok(outcomes)
	}

	async fn reconcile_entry(
		&self,
		entry: WorklistEntry,
		profile: &WorklistProfile,
		identifiers: &[DicomTag],
		mandatory: &[&DicomTag],
	) -> ReconcileOutcome {
		let key = match_key(&entry, identifiers);
		if key.is_empty() {
			return ReconcileOutcome::Skipped(SkipReason::NoIdentifier);
		}

		if let Some(tag) = mandatory.iter().find(|tag| entry.value_of(tag).is_none()) {
			return ReconcileOutcome::Skipped(SkipReason::MissingMandatoryIdentifier {
				tag: tag.to_string(),
			});
		}

		match self.store.find_entry_by_identifiers(profile.id, &key).await {
			Ok(Some(entry_id)) => ReconcileOutcome::Skipped(SkipReason::AlreadyPresent { entry_id }),
			Ok(None) => {
				let new_entry = WorklistEntry::remote(profile.id, entry.attributes);
				match self.store.create_entry(new_entry).await {
					Ok(created) => ReconcileOutcome::Created(created),
					Err(err) => ReconcileOutcome::Failed(err),
				}
			}
			Err(err) => ReconcileOutcome::Failed(err),
		}
	}
}

/// The attributes of the entry restricted to the identifier tags, keyed by tag id.
fn match_key(entry: &WorklistEntry, identifiers: &[DicomTag]) -> MatchKey {
	identifiers
		.iter()
		.filter_map(|tag| {
			entry
				.value_of(tag)
				.map(|value| (tag.id, value.to_owned()))
		})
		.collect()
}
