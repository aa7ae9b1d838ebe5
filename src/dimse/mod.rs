//! DIMSE messaging for the worklist client.
//! - The liveness probe is a verification service class user (C-ECHO service).
//! - The worklist query is a find service class user (C-FIND service).
//!
//! Both exchange [`DicomMessage`]s over a [`ClientAssociation`](association::client::ClientAssociation),
//! which owns the blocking dicom-ul association on a dedicated thread.

pub mod association;
pub mod cecho;
pub mod cfind;

use crate::types::{UI, US};
use association::{Association, AssociationError};
use dicom::dictionary_std::tags;
use dicom::encoding::transfer_syntax::TransferSyntax;
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::mem::InMemElement;
use dicom::object::{InMemDicomObject, Tag};
use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use dicom::ul::pdu::{PDataValue, PDataValueType, PresentationContextNegotiated};
use dicom::ul::Pdu;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{instrument, trace};

/// Value of Command Data Set Type (0000,0800) announcing a data set.
/// Peers may use any other non-null value, so readers compare against [`DATA_SET_MISSING`].
pub const DATA_SET_EXISTS: US = 0x0102;
/// Value of Command Data Set Type (0000,0800) for messages without a data set.
pub const DATA_SET_MISSING: US = 0x0101;

/// A command set followed by an optional data set.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/sect_6.3.html>
pub struct DicomMessage {
	pub command: InMemDicomObject,
	pub data: Option<InMemDicomObject>,
	/// The presentation context the message was received on.
	pub presentation_context_id: Option<u8>,
}

impl Debug for DicomMessage {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DicomMessage")
			.field("has_data", &self.data.is_some())
			.field("presentation_context_id", &self.presentation_context_id)
			.finish_non_exhaustive()
	}
}

impl DicomMessage {
	/// Reads the Status (0000,0900) attribute of a response command set.
	pub fn status(&self) -> Result<US, ReadError> {
		read_us(&self.command, tags::STATUS).ok_or(ReadError::MissingAttribute(tags::STATUS))
	}
}

fn read_us(object: &InMemDicomObject, tag: Tag) -> Option<US> {
	object
		.get(tag)
		.map(InMemElement::to_int::<US>)
		.and_then(Result::ok)
}

/// Status types of the DIMSE services.
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/chapter_C.html>
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusType {
	Success,
	Warning,
	Failure,
	Cancel,
	Pending,
}

impl TryFrom<u16> for StatusType {
	type Error = u16;

	fn try_from(value: u16) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Self::Success),
			1 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => Ok(Self::Warning),
			0xA000..=0xAFFF | 0x0100..=0x01FF | 0x0200..=0x02FF => Ok(Self::Failure),
			0xFE00 => Ok(Self::Cancel),
			0xFF00 | 0xFF01 => Ok(Self::Pending),
			_ => Err(value),
		}
	}
}

impl StatusType {
	/// Classifies a raw status code. Unknown codes are treated as failures.
	pub fn classify(status: US) -> Self {
		Self::try_from(status).unwrap_or(Self::Failure)
	}
}

pub trait DicomMessageReader {
	async fn read_message(&self, timeout: Duration) -> Result<DicomMessage, ReadError>;
}

pub trait DicomMessageWriter {
	async fn write_message(
		&self,
		message: impl Into<DicomMessage>,
		presentation_context_id: u8,
		timeout: Duration,
	) -> Result<(), WriteError>;
}

/// Looks up a negotiated presentation context and the transfer syntax agreed for it.
fn negotiated(
	contexts: &[PresentationContextNegotiated],
	id: u8,
) -> Result<&'static TransferSyntax, NegotiationError> {
	let context = contexts
		.iter()
		.find(|context| context.id == id)
		.ok_or(NegotiationError::NoPresentationContext(id))?;
	TransferSyntaxRegistry
		.get(&context.transfer_syntax)
		.ok_or_else(|| NegotiationError::UnknownTransferSyntax(UI::from(&context.transfer_syntax)))
}

/// Wraps an encoded command or data set into a single, final P-DATA fragment.
fn p_data(value_type: PDataValueType, presentation_context_id: u8, data: Vec<u8>) -> Pdu {
	Pdu::PData {
		data: vec![PDataValue {
			value_type,
			presentation_context_id,
			is_last: true,
			data,
		}],
	}
}

impl<A: Association> DicomMessageWriter for A {
	#[instrument(skip_all, fields(presentation_context_id = presentation_context_id))]
	async fn write_message(
		&self,
		message: impl Into<DicomMessage>,
		presentation_context_id: u8,
		timeout: Duration,
	) -> Result<(), WriteError> {
		let message: DicomMessage = message.into();
		let transfer_syntax = negotiated(self.presentation_contexts(), presentation_context_id)?;

		// Command sets are always implicit VR little endian
		let mut command = Vec::new();
		message
			.command
			.write_dataset_with_ts(&mut command, &IMPLICIT_VR_LITTLE_ENDIAN.erased())?;
		self.send(
			p_data(PDataValueType::Command, presentation_context_id, command),
			timeout,
		)
		.await?;

		if let Some(data_set) = message.data {
			let mut data = Vec::new();
			data_set.write_dataset_with_ts(&mut data, transfer_syntax)?;
			self.send(
				p_data(PDataValueType::Data, presentation_context_id, data),
				timeout,
			)
			.await?;
		}

		Ok(())
	}
}

/// Collects P-DATA fragments until one message is complete.
#[derive(Default)]
struct MessageAssembler {
	command_fragments: Vec<u8>,
	data_fragments: Vec<u8>,
	command: Option<InMemDicomObject>,
}

impl MessageAssembler {
	/// Consumes one fragment and returns the message once its last fragment has arrived.
	fn push(
		&mut self,
		mut pdv: PDataValue,
		contexts: &[PresentationContextNegotiated],
	) -> Result<Option<DicomMessage>, ReadError> {
		let presentation_context_id = Some(pdv.presentation_context_id);
		match pdv.value_type {
			PDataValueType::Command => {
				trace!("Received command fragment (last={})", pdv.is_last);
				// A second command set within one message is a protocol violation
				if self.command.is_some() {
					return Err(ReadError::OutOfOrder);
				}
				self.command_fragments.append(&mut pdv.data);
				if !pdv.is_last {
					return Ok(None);
				}

				let command = InMemDicomObject::read_dataset_with_ts(
					self.command_fragments.as_slice(),
					&IMPLICIT_VR_LITTLE_ENDIAN.erased(),
				)?;
				let has_data_set = read_us(&command, tags::COMMAND_DATA_SET_TYPE)
					.is_some_and(|value| value != DATA_SET_MISSING);
				if has_data_set {
					self.command = Some(command);
					Ok(None)
				} else {
					Ok(Some(DicomMessage {
						command,
						data: None,
						presentation_context_id,
					}))
				}
			}
			PDataValueType::Data => {
				trace!("Received data fragment (last={})", pdv.is_last);
				if self.command.is_none() {
					return Err(ReadError::OutOfOrder);
				}
				self.data_fragments.append(&mut pdv.data);
				if !pdv.is_last {
					return Ok(None);
				}

				let transfer_syntax = negotiated(contexts, pdv.presentation_context_id)?;
				let data = InMemDicomObject::read_dataset_with_ts(
					self.data_fragments.as_slice(),
					transfer_syntax,
				)?;
				let command = self.command.take().ok_or(ReadError::OutOfOrder)?;
				Ok(Some(DicomMessage {
					command,
					data: Some(data),
					presentation_context_id,
				}))
			}
		}
	}
}

impl<A: Association> DicomMessageReader for A {
	#[instrument(skip_all)]
	async fn read_message(&self, timeout: Duration) -> Result<DicomMessage, ReadError> {
		let mut assembler = MessageAssembler::default();
		loop {
			match self.receive(timeout).await? {
				Pdu::PData { data } => {
					for pdv in data {
						if let Some(message) = assembler.push(pdv, self.presentation_contexts())? {
							return Ok(message);
						}
					}
				}
				pdu => return Err(ReadError::UnexpectedPdu(Box::new(pdu))),
			}
		}
	}
}

#[derive(Debug, Error)]
pub enum ReadError {
	#[error("Failed to read DICOM object: {0}")]
	Reader(#[from] dicom::object::ReadError),
	#[error("Received unexpected PDU {0:?}")]
	UnexpectedPdu(Box<Pdu>),
	#[error("Received fragments out of order")]
	OutOfOrder,
	#[error("Failed to receive PDU: {0}")]
	Association(#[from] AssociationError),
	#[error(transparent)]
	Negotiation(#[from] NegotiationError),
	#[error("Mandatory attribute {0} is missing")]
	MissingAttribute(Tag),
}

#[derive(Debug, Error)]
pub enum WriteError {
	#[error("Failed to write DICOM object: {0}")]
	Writer(#[from] dicom::object::WriteError),
	#[error("Failed to send PDU: {0}")]
	Association(#[from] AssociationError),
	#[error(transparent)]
	Negotiation(#[from] NegotiationError),
}

#[derive(Debug, Error)]
pub enum NegotiationError {
	#[error("Unknown transfer syntax with UID '{0}'")]
	UnknownTransferSyntax(UI),
	#[error("Presentation context {0} was not negotiated")]
	NoPresentationContext(u8),
}

/// Returns the next message id of this process.
pub fn next_message_id() -> US {
	static CURRENT_MSG_ID: AtomicU16 = AtomicU16::new(1);
	CURRENT_MSG_ID.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
	use super::*;
	use dicom::core::{DataElement, VR};
	use dicom::dicom_value;

	fn encoded_command(data_set_type: US) -> Vec<u8> {
		let command = InMemDicomObject::command_from_element_iter([
			DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [5])),
			DataElement::new(
				tags::COMMAND_DATA_SET_TYPE,
				VR::US,
				dicom_value!(U16, [data_set_type]),
			),
		]);
		let mut buffer = Vec::new();
		command
			.write_dataset_with_ts(&mut buffer, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
			.unwrap();
		buffer
	}

	fn fragment(value_type: PDataValueType, is_last: bool, data: Vec<u8>) -> PDataValue {
		PDataValue {
			value_type,
			presentation_context_id: 1,
			is_last,
			data,
		}
	}

	#[test]
	fn classify_status_codes() {
		assert_eq!(StatusType::classify(0x0000), StatusType::Success);
		assert_eq!(StatusType::classify(0xFF00), StatusType::Pending);
		assert_eq!(StatusType::classify(0xFF01), StatusType::Pending);
		assert_eq!(StatusType::classify(0xFE00), StatusType::Cancel);
		assert_eq!(StatusType::classify(0xA700), StatusType::Failure);
		assert_eq!(StatusType::classify(0xB000), StatusType::Warning);
		// Unknown status codes are treated as failures
		assert_eq!(StatusType::classify(0xC123), StatusType::Failure);
	}

	#[test]
	fn assembles_command_split_over_fragments() {
		let mut encoded = encoded_command(DATA_SET_MISSING);
		let tail = encoded.split_off(encoded.len() / 2);
		let mut assembler = MessageAssembler::default();

		let first = assembler
			.push(fragment(PDataValueType::Command, false, encoded), &[])
			.unwrap();
		assert!(first.is_none());

		let message = assembler
			.push(fragment(PDataValueType::Command, true, tail), &[])
			.unwrap()
			.unwrap();
		assert!(message.data.is_none());
		assert_eq!(message.presentation_context_id, Some(1));
		assert_eq!(read_us(&message.command, tags::MESSAGE_ID), Some(5));
	}

	#[test]
	fn command_announcing_data_set_waits_for_data() {
		let mut assembler = MessageAssembler::default();

		let message = assembler
			.push(
				fragment(PDataValueType::Command, true, encoded_command(DATA_SET_EXISTS)),
				&[],
			)
			.unwrap();

		assert!(message.is_none());
	}

	#[test]
	fn data_before_command_is_rejected() {
		let mut assembler = MessageAssembler::default();

		let result = assembler.push(fragment(PDataValueType::Data, true, Vec::new()), &[]);

		assert!(matches!(result, Err(ReadError::OutOfOrder)));
	}

	#[test]
	fn data_on_unknown_context_is_rejected() {
		let mut assembler = MessageAssembler::default();
		assembler
			.push(
				fragment(PDataValueType::Command, true, encoded_command(DATA_SET_EXISTS)),
				&[],
			)
			.unwrap();

		let result = assembler.push(fragment(PDataValueType::Data, true, Vec::new()), &[]);

		assert!(matches!(
			result,
			Err(ReadError::Negotiation(NegotiationError::NoPresentationContext(1)))
		));
	}

	#[test]
	fn message_ids_increase() {
		let first = next_message_id();
		let second = next_message_id();
		assert!(second > first || first == US::MAX);
	}
}
