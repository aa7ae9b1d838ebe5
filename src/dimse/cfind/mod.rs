use crate::dimse::{DicomMessage, ReadError, StatusType, DATA_SET_EXISTS};
use crate::types::{UI, US};
use dicom::core::{DataElement, VR};
use dicom::dicom_value;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;

pub mod findscu;

// Magic numbers defined by the DICOM specification.
pub const COMMAND_FIELD_COMPOSITE_FIND_REQUEST: US = 0x0020;

/// C-FIND-RQ
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/chapter_9.html#table_9.1-2>
pub struct CompositeFindRequest {
	pub message_id: US,
	pub priority: US,
	pub affected_sop_class_uid: UI,
	pub identifier: InMemDicomObject,
}

impl From<CompositeFindRequest> for DicomMessage {
	#[rustfmt::skip]
	fn from(request: CompositeFindRequest) -> Self {
		let command = InMemDicomObject::command_from_element_iter([
			DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, request.affected_sop_class_uid)),
			DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [COMMAND_FIELD_COMPOSITE_FIND_REQUEST])),
			DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [request.message_id])),
			DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [request.priority])),
			DataElement::new(tags::COMMAND_DATA_SET_TYPE, VR::US, dicom_value!(U16, [DATA_SET_EXISTS])),
		]);

		Self {
			command,
			data: Some(request.identifier),
			presentation_context_id: None,
		}
	}
}

/// C-FIND-RSP
#[derive(Debug, Clone)]
pub struct CompositeFindResponse {
	pub status: US,
	pub data: Option<InMemDicomObject>,
}

impl CompositeFindResponse {
	pub fn status_type(&self) -> StatusType {
		StatusType::classify(self.status)
	}
}

impl TryFrom<DicomMessage> for CompositeFindResponse {
	type Error = ReadError;

	fn try_from(message: DicomMessage) -> Result<Self, Self::Error> {
		Ok(Self {
			status: message.status()?,
			data: message.data,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::dictionary_std::uids;

	#[test]
	fn find_request_carries_identifier() {
		let mut identifier = InMemDicomObject::new_empty();
		identifier.put(DataElement::new(tags::PATIENT_ID, VR::LO, dicom_value!(Str, "")));

		let message = DicomMessage::from(CompositeFindRequest {
			message_id: 3,
			priority: 0,
			affected_sop_class_uid: UI::from(uids::MODALITY_WORKLIST_INFORMATION_MODEL_FIND),
			identifier,
		});

		let sop_class = message
			.command
			.get(tags::AFFECTED_SOP_CLASS_UID)
			.map(|element| element.to_str().map(|value| value.to_string()))
			.and_then(Result::ok);
		assert_eq!(
			sop_class.as_deref().map(|uid| uid.trim_end_matches('\0')),
			Some(uids::MODALITY_WORKLIST_INFORMATION_MODEL_FIND)
		);
		assert!(message.data.unwrap().get(tags::PATIENT_ID).is_some());
	}

	#[test]
	fn find_response_keeps_status_and_data() {
		let command = InMemDicomObject::command_from_element_iter([DataElement::new(
			tags::STATUS,
			VR::US,
			dicom_value!(U16, [0xFF00]),
		)]);
		let message = DicomMessage {
			command,
			data: Some(InMemDicomObject::new_empty()),
			presentation_context_id: Some(3),
		};

		let response = CompositeFindResponse::try_from(message).unwrap();
		assert_eq!(response.status, 0xFF00);
		assert_eq!(response.status_type(), StatusType::Pending);
		assert!(response.data.is_some());
	}
}
