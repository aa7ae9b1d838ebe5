//! Builds the C-FIND identifier for a modality worklist query from the configured tags.

use crate::model::DicomTag;
use dicom::core::ops::{ApplyOp, AttributeAction, AttributeOp, AttributeSelector};
use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::InMemDicomObject;
use tracing::warn;

/// The single item of one sequence in the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceItem {
	pub sequence: Tag,
	pub attributes: Vec<Tag>,
}

/// Return keys of a worklist query: flat attributes plus at most one item per sequence.
/// All keys use universal matching (empty value).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTemplate {
	attributes: Vec<Tag>,
	sequences: Vec<SequenceItem>,
}

impl QueryTemplate {
	/// Builds the template from an ordered set of tags. Inactive tags are skipped.
	///
	/// Children of the same sequence always share one item. A top-level tag that names a sequence
	/// which also has active children is represented by that sequence's item only.
	pub fn build<'a>(tags: impl IntoIterator<Item = &'a DicomTag>) -> Self {
		let mut template = Self::default();

		for tag in tags.into_iter().filter(|tag| tag.is_active) {
			match tag.parent() {
				None => {
					if !template.attributes.contains(&tag.tag()) {
						template.attributes.push(tag.tag());
					}
				}
				Some(parent) => {
					let position = template
						.sequences
						.iter()
						.position(|item| item.sequence == parent)
						.unwrap_or_else(|| {
							template.sequences.push(SequenceItem {
								sequence: parent,
								attributes: Vec::new(),
							});
							template.sequences.len() - 1
						});
					let item = &mut template.sequences[position];
					if !item.attributes.contains(&tag.tag()) {
						item.attributes.push(tag.tag());
					}
				}
			}
		}

		let sequences = &template.sequences;
		template
			.attributes
			.retain(|tag| !sequences.iter().any(|item| item.sequence == *tag));
		template
	}

	pub fn attributes(&self) -> &[Tag] {
		&self.attributes
	}

	pub fn sequences(&self) -> &[SequenceItem] {
		&self.sequences
	}

	pub fn sequence(&self, tag: Tag) -> Option<&SequenceItem> {
		self.sequences.iter().find(|item| item.sequence == tag)
	}

	pub fn is_empty(&self) -> bool {
		self.attributes.is_empty() && self.sequences.is_empty()
	}

	/// Converts the template into the identifier data set sent with the C-FIND-RQ.
	pub fn to_identifier(&self) -> InMemDicomObject {
		let mut identifier = InMemDicomObject::new_empty();
		for tag in &self.attributes {
			set_empty(&mut identifier, *tag);
		}

		for item in &self.sequences {
			let mut nested = InMemDicomObject::new_empty();
			for tag in &item.attributes {
				set_empty(&mut nested, *tag);
			}
			identifier.put(DataElement::new(
				item.sequence,
				VR::SQ,
				DataSetSequence::from(vec![nested]),
			));
		}
		identifier
	}
}

fn set_empty(object: &mut InMemDicomObject, tag: Tag) {
	if let Err(err) = object.apply(AttributeOp::new(
		AttributeSelector::from(tag),
		AttributeAction::Set(PrimitiveValue::Empty),
	)) {
		warn!("Skipped attribute operation for {tag}: {err}");
	}
}
