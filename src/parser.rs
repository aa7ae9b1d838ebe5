//! Turns C-FIND-RSP identifiers into worklist entries.

use crate::dimse::cfind::CompositeFindResponse;
use crate::dimse::StatusType;
use crate::model::{DicomTag, ProfileId, WorklistAttribute, WorklistEntry};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use tracing::{debug, trace};

/// The nested item consulted when an attribute is missing at the top level.
const FALLBACK_SEQUENCE: Tag = tags::SCHEDULED_PROCEDURE_STEP_SEQUENCE;

/// Parses one response data set into an entry.
///
/// Each requested tag is read from the top level first and from the first Scheduled Procedure
/// Step item second. Tags found in neither place are omitted. Empty values count as missing.
pub fn parse_response(
	dataset: &InMemDicomObject,
	requested: &[DicomTag],
	profile_id: ProfileId,
) -> WorklistEntry {
	let scheduled_step = dataset
		.get(FALLBACK_SEQUENCE)
		.and_then(|element| element.items())
		.and_then(|items| items.first());

	let attributes = requested
		.iter()
		.filter_map(|tag| {
			let value = read_value(dataset, tag.tag())
				.or_else(|| scheduled_step.and_then(|item| read_value(item, tag.tag())));
			if value.is_none() {
				trace!(tag = %tag, "Attribute missing in response");
			}
			value.map(|value| WorklistAttribute {
				entry_id: None,
				tag: tag.clone(),
				value,
			})
		})
		.collect();

	WorklistEntry::remote(profile_id, attributes)
}

/// Parses all responses of one query. Only responses with a success or pending status that
/// carry an identifier produce entries; everything else marks the end of the result set.
pub fn parse_responses(
	responses: &[CompositeFindResponse],
	requested: &[DicomTag],
	profile_id: ProfileId,
) -> Vec<WorklistEntry> {
	responses
		.iter()
		.filter_map(|response| match response.status_type() {
			StatusType::Success | StatusType::Pending => response.data.as_ref(),
			status_type => {
				debug!(
					status = response.status,
					"Discarded C-FIND-RSP ({status_type:?})"
				);
				None
			}
		})
		.map(|dataset| parse_response(dataset, requested, profile_id))
		.collect()
}

fn read_value(object: &InMemDicomObject, tag: Tag) -> Option<String> {
	let element = object.get(tag)?;
	let value = element.to_str().ok()?;
	let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
	if value.is_empty() {
		None
	} else {
		Some(value.to_owned())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::core::value::DataSetSequence;
	use dicom::core::{DataElement, VR};
	use dicom::dicom_value;

	fn tag(id: i64, tag: Tag) -> DicomTag {
		DicomTag {
			id,
			name: format!("{tag}"),
			display_name: String::new(),
			group: tag.group(),
			element: tag.element(),
			parent_group: 0,
			parent_element: 0,
			is_active: true,
			is_retired: false,
		}
	}

	fn dataset() -> InMemDicomObject {
		let mut item = InMemDicomObject::new_empty();
		item.put(DataElement::new(tags::MODALITY, VR::CS, dicom_value!(Str, "CT")));
		item.put(DataElement::new(
			tags::SCHEDULED_STATION_AE_TITLE,
			VR::AE,
			dicom_value!(Str, "CT01"),
		));

		let mut dataset = InMemDicomObject::new_empty();
		dataset.put(DataElement::new(tags::PATIENT_ID, VR::LO, dicom_value!(Str, "12345")));
		dataset.put(DataElement::new(tags::ACCESSION_NUMBER, VR::SH, dicom_value!(Str, "")));
		dataset.put(DataElement::new(
			tags::SCHEDULED_PROCEDURE_STEP_SEQUENCE,
			VR::SQ,
			DataSetSequence::from(vec![item]),
		));
		dataset
	}

	#[test]
	fn reads_top_level_attributes() {
		let requested = [tag(1, tags::PATIENT_ID)];
		let entry = parse_response(&dataset(), &requested, 9);

		assert_eq!(entry.profile_id, 9);
		assert_eq!(entry.attributes.len(), 1);
		assert_eq!(entry.value_of(&requested[0]), Some("12345"));
	}

	#[test]
	fn falls_back_to_scheduled_procedure_step_item() {
		let requested = [tag(1, tags::MODALITY), tag(2, tags::SCHEDULED_STATION_AE_TITLE)];
		let entry = parse_response(&dataset(), &requested, 1);

		assert_eq!(entry.value_of(&requested[0]), Some("CT"));
		assert_eq!(entry.value_of(&requested[1]), Some("CT01"));
	}

	#[test]
	fn omits_missing_and_empty_attributes() {
		let requested = [
			tag(1, tags::PATIENT_ID),
			tag(2, tags::ACCESSION_NUMBER),
			tag(3, tags::PATIENT_NAME),
		];
		let entry = parse_response(&dataset(), &requested, 1);

		assert_eq!(entry.attributes.len(), 1);
		assert_eq!(entry.value_of(&requested[1]), None);
		assert_eq!(entry.value_of(&requested[2]), None);
	}

	#[test]
	fn only_success_and_pending_responses_produce_entries() {
		let responses = vec![
			CompositeFindResponse {
				status: 0xFF00,
				data: Some(dataset()),
			},
			CompositeFindResponse {
				status: 0xFF01,
				data: Some(dataset()),
			},
			CompositeFindResponse {
				status: 0xA700,
				data: Some(dataset()),
			},
			CompositeFindResponse {
				status: 0x0000,
				data: None,
			},
		];
		let requested = [tag(1, tags::PATIENT_ID)];

		let entries = parse_responses(&responses, &requested, 1);
		assert_eq!(entries.len(), 2);
	}
}
