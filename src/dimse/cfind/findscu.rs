use crate::dimse::association::client::ClientAssociation;
use crate::dimse::cfind::{CompositeFindRequest, CompositeFindResponse};
use crate::dimse::{DicomMessageReader, DicomMessageWriter, ReadError, StatusType, WriteError};
use crate::types::{Priority, ServiceClass, UI, US};
use async_stream::try_stream;
use dicom::object::InMemDicomObject;
use futures::Stream;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Service class user for the Modality Worklist Information Model - FIND SOP class.
pub struct FindServiceClassUser<'a> {
	association: &'a ClientAssociation,
	presentation_context_id: u8,
	timeout: Duration,
}

pub struct FindServiceClassUserOptions {
	pub identifier: InMemDicomObject,
	pub message_id: US,
	pub priority: Priority,
}

impl From<FindServiceClassUserOptions> for CompositeFindRequest {
	fn from(options: FindServiceClassUserOptions) -> Self {
		Self {
			identifier: options.identifier,
			message_id: options.message_id,
			priority: options.priority as US,
			affected_sop_class_uid: UI::from(ServiceClass::Worklist.as_sop_class()),
		}
	}
}

impl<'a> FindServiceClassUser<'a> {
	pub const fn new(
		association: &'a ClientAssociation,
		presentation_context_id: u8,
		timeout: Duration,
	) -> Self {
		Self {
			association,
			presentation_context_id,
			timeout,
		}
	}

	/// Sends the C-FIND-RQ and yields every C-FIND-RSP until a non-pending status arrives.
	/// The final response is yielded as well, so callers can inspect its status.
	pub fn invoke(
		&self,
		options: FindServiceClassUserOptions,
	) -> impl Stream<Item = Result<CompositeFindResponse, FindError>> + '_ {
		try_stream! {
			let request = CompositeFindRequest::from(options);
			self.association
				.write_message(request, self.presentation_context_id, self.timeout)
				.await?;
			trace!("Sent C-FIND-RQ");

			loop {
				let response = self.association.read_message(self.timeout).await?;
				let response = CompositeFindResponse::try_from(response)?;
				trace!(status = response.status, "Received C-FIND-RSP");

				let status_type = response.status_type();
				yield response;

				if status_type != StatusType::Pending {
					break;
				}
			}
		}
	}
}

#[derive(Debug, Error)]
pub enum FindError {
	#[error(transparent)]
	Read(#[from] ReadError),
	#[error(transparent)]
	Write(#[from] WriteError),
}
