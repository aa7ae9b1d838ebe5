//! The persistence seam of the engine. The store owns the canonical copy of every entry;
//! the engine only holds transient copies during one reconciliation pass.

mod memory;

pub use memory::MemoryStore;

use crate::model::{DicomTag, EntryId, ProfileId, TagId, WorklistEntry, WorklistProfile};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Identifier tag ids mapped to the values an existing entry must carry.
pub type MatchKey = BTreeMap<TagId, String>;

#[async_trait]
pub trait WorklistStore: Send + Sync {
	async fn get_profiles(&self) -> Result<Vec<WorklistProfile>, StoreError>;

	async fn get_tags_by_profile(&self, profile_id: ProfileId) -> Result<Vec<DicomTag>, StoreError>;

	/// Tags flagged as active identifiers of the profile.
	async fn get_active_identifier_tags(
		&self,
		profile_id: ProfileId,
	) -> Result<Vec<DicomTag>, StoreError>;

	/// Looks up an entry of the profile whose attributes satisfy every pair of the key.
	/// Values are compared case-insensitively.
	async fn find_entry_by_identifiers(
		&self,
		profile_id: ProfileId,
		key: &MatchKey,
	) -> Result<Option<EntryId>, StoreError>;

	/// Persists the entry and returns it with its assigned id.
	async fn create_entry(&self, entry: WorklistEntry) -> Result<WorklistEntry, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("Unknown profile {0}")]
	UnknownProfile(ProfileId),
	#[error("Refusing to persist an entry without attributes")]
	EmptyEntry,
}
