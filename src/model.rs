//! Domain types shared by the query builder, response parser, reconciliation and store.

use crate::types::{AE, UI};
use chrono::{DateTime, Utc};
use dicom::core::Tag;
use dicom::dictionary_std::uids;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

pub type TagId = i64;
pub type ProfileId = i64;
pub type EntryId = Uuid;

/// A queryable DICOM attribute as configured in the store.
///
/// A parent pair of `(0,0)` marks a top-level attribute. Any other pair names the sequence the
/// attribute is nested in (usually the Scheduled Procedure Step Sequence).
///
/// Two tags are equal if they address the same attribute at the same nesting position; the
/// descriptive fields and flags are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct DicomTag {
	pub id: TagId,
	pub name: String,
	#[serde(default)]
	pub display_name: String,
	pub group: u16,
	pub element: u16,
	#[serde(default)]
	pub parent_group: u16,
	#[serde(default)]
	pub parent_element: u16,
	#[serde(default = "default_true")]
	pub is_active: bool,
	#[serde(default)]
	pub is_retired: bool,
}

const fn default_true() -> bool {
	true
}

impl DicomTag {
	pub const fn tag(&self) -> Tag {
		Tag(self.group, self.element)
	}

	/// The sequence this tag is nested in, if any.
	pub const fn parent(&self) -> Option<Tag> {
		if self.is_top_level() {
			None
		} else {
			Some(Tag(self.parent_group, self.parent_element))
		}
	}

	pub const fn is_top_level(&self) -> bool {
		self.parent_group == 0 && self.parent_element == 0
	}
}

impl PartialEq for DicomTag {
	fn eq(&self, other: &Self) -> bool {
		(self.group, self.element, self.parent_group, self.parent_element)
			== (
				other.group,
				other.element,
				other.parent_group,
				other.parent_element,
			)
	}
}

impl Eq for DicomTag {}

impl Hash for DicomTag {
	fn hash<H: Hasher>(&self, state: &mut H) {
		(self.group, self.element).hash(state);
		(self.parent_group, self.parent_element).hash(state);
	}
}

impl Display for DicomTag {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self.parent() {
			Some(parent) => write!(f, "{} {parent}.{}", self.name, self.tag()),
			None => write!(f, "{} {}", self.name, self.tag()),
		}
	}
}

/// One resolved (tag, value) pair, parsed from a response or persisted with an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorklistAttribute {
	pub entry_id: Option<EntryId>,
	pub tag: DicomTag,
	pub value: String,
}

/// A tag as it is used by one profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileTag {
	#[serde(flatten)]
	pub tag: DicomTag,
	#[serde(default)]
	pub is_identifier: bool,
	#[serde(default)]
	pub is_mandatory_identifier: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresentationContext {
	pub transfer_syntax_uid: UI,
}

impl Default for PresentationContext {
	fn default() -> Self {
		Self {
			transfer_syntax_uid: UI::from(uids::IMPLICIT_VR_LITTLE_ENDIAN),
		}
	}
}

/// Defines which tags are queried and which subset acts as natural key.
#[derive(Debug, Clone, Deserialize)]
pub struct WorklistProfile {
	pub id: ProfileId,
	pub name: String,
	#[serde(default)]
	pub presentation_context: PresentationContext,
	#[serde(default)]
	pub tags: Vec<ProfileTag>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntrySource {
	Local,
	Remote,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryStatus {
	Pending,
	InProgress,
	Completed,
	Discontinued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorklistEntry {
	pub id: Option<EntryId>,
	pub source: EntrySource,
	pub profile_id: ProfileId,
	pub status: EntryStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub attributes: Vec<WorklistAttribute>,
}

impl WorklistEntry {
	/// A not yet persisted entry received from the remote information system.
	pub fn remote(profile_id: ProfileId, attributes: Vec<WorklistAttribute>) -> Self {
		let now = Utc::now();
		Self {
			id: None,
			source: EntrySource::Remote,
			profile_id,
			status: EntryStatus::Pending,
			created_at: now,
			updated_at: now,
			attributes,
		}
	}

	pub fn value_of(&self, tag: &DicomTag) -> Option<&str> {
		self.attributes
			.iter()
			.find(|attribute| attribute.tag.id == tag.id)
			.map(|attribute| attribute.value.as_str())
	}
}

/// Peer addressing for one protocol session. Changing it requires a new session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionParameters {
	pub calling_aet: AE,
	pub called_aet: AE,
	pub host: String,
	pub port: u16,
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	fn tag(id: TagId, group: u16, element: u16, parent: (u16, u16)) -> DicomTag {
		DicomTag {
			id,
			name: format!("Tag{id}"),
			display_name: String::new(),
			group,
			element,
			parent_group: parent.0,
			parent_element: parent.1,
			is_active: true,
			is_retired: false,
		}
	}

	#[test]
	fn equality_ignores_descriptive_fields() {
		let mut a = tag(1, 0x0010, 0x0020, (0, 0));
		let b = tag(2, 0x0010, 0x0020, (0, 0));
		a.is_active = false;
		a.display_name = String::from("Patient ID");
		assert_eq!(a, b);

		let set: HashSet<DicomTag> = [a, b].into_iter().collect();
		assert_eq!(set.len(), 1);
	}

	#[test]
	fn nesting_position_is_part_of_identity() {
		let top = tag(1, 0x0008, 0x0060, (0, 0));
		let nested = tag(2, 0x0008, 0x0060, (0x0040, 0x0100));
		assert_ne!(top, nested);
		assert_eq!(top.parent(), None);
		assert_eq!(nested.parent(), Some(Tag(0x0040, 0x0100)));
	}
}
