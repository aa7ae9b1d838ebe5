use super::{MatchKey, StoreError, WorklistStore};
use crate::model::{DicomTag, EntryId, ProfileId, WorklistEntry, WorklistProfile};
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Thread-safe in-memory store, seeded with the configured profiles.
#[derive(Debug, Default)]
pub struct MemoryStore {
	profiles: Vec<WorklistProfile>,
	entries: RwLock<Vec<WorklistEntry>>,
}

impl MemoryStore {
	pub fn new(profiles: Vec<WorklistProfile>) -> Self {
		Self {
			profiles,
			entries: RwLock::new(Vec::new()),
		}
	}

	/// A snapshot of all persisted entries.
	pub fn entries(&self) -> Vec<WorklistEntry> {
		self.entries
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	fn profile(&self, profile_id: ProfileId) -> Result<&WorklistProfile, StoreError> {
		self.profiles
			.iter()
			.find(|profile| profile.id == profile_id)
			.ok_or(StoreError::UnknownProfile(profile_id))
	}
}

fn matches_key(entry: &WorklistEntry, key: &MatchKey) -> bool {
	key.iter().all(|(tag_id, expected)| {
		entry.attributes.iter().any(|attribute| {
			attribute.tag.id == *tag_id && attribute.value.to_lowercase() == expected.to_lowercase()
		})
	})
}

#[async_trait]
impl WorklistStore for MemoryStore {
	async fn get_profiles(&self) -> Result<Vec<WorklistProfile>, StoreError> {
		Ok(self.profiles.clone())
	}

	async fn get_tags_by_profile(&self, profile_id: ProfileId) -> Result<Vec<DicomTag>, StoreError> {
		let profile = self.profile(profile_id)?;
		Ok(profile.tags.iter().map(|tag| tag.tag.clone()).collect())
	}

	async fn get_active_identifier_tags(
		&self,
		profile_id: ProfileId,
	) -> Result<Vec<DicomTag>, StoreError> {
		let profile = self.profile(profile_id)?;
		Ok(profile
			.tags
			.iter()
			.filter(|tag| tag.is_identifier && tag.tag.is_active)
			.map(|tag| tag.tag.clone())
			.collect())
	}

	async fn find_entry_by_identifiers(
		&self,
		profile_id: ProfileId,
		key: &MatchKey,
	) -> Result<Option<EntryId>, StoreError> {
		if key.is_empty() {
			return Ok(None);
		}
		let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
		Ok(entries
			.iter()
			.filter(|entry| entry.profile_id == profile_id)
			.find(|entry| matches_key(entry, key))
			.and_then(|entry| entry.id))
	}

	async fn create_entry(&self, mut entry: WorklistEntry) -> Result<WorklistEntry, StoreError> {
		self.profile(entry.profile_id)?;
		if entry.attributes.is_empty() {
			return Err(StoreError::EmptyEntry);
		}

		let id = Uuid::new_v4();
		entry.id = Some(id);
		for attribute in &mut entry.attributes {
			attribute.entry_id = Some(id);
		}

		self.entries
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.push(entry.clone());
		debug!(entry_id = id.to_string(), "Stored worklist entry");
		Ok(entry)
	}
}
