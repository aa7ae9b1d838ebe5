use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, trace};

use super::{CompositeEchoRequest, CompositeEchoResponse};
use crate::dimse::association::client::ClientAssociation;
use crate::dimse::{
	next_message_id, DicomMessageReader, DicomMessageWriter, ReadError, StatusType, WriteError,
};

/// Service class user for the Verification SOP class.
/// It simply sends a C-ECHO-RQ and waits for a C-ECHO-RSP.
/// The response contains the Status attribute that indicates the current connection status.
pub struct EchoServiceClassUser<'a> {
	association: &'a ClientAssociation,
	presentation_context_id: u8,
}

impl<'a> EchoServiceClassUser<'a> {
	pub const fn new(association: &'a ClientAssociation, presentation_context_id: u8) -> Self {
		Self {
			association,
			presentation_context_id,
		}
	}

	/// Initiates the C-ECHO protocol and returns the raw status of the response.
	#[instrument(skip_all)]
	pub async fn echo(&self, timeout: Duration) -> Result<StatusType, EchoError> {
		trace!("Initiated C-ECHO protocol");
		let request = CompositeEchoRequest {
			message_id: next_message_id(),
		};
		self.association
			.write_message(request, self.presentation_context_id, timeout)
			.await?;

		let response = self.association.read_message(timeout).await?;
		let response = CompositeEchoResponse::try_from(response)?;

		let status_type = StatusType::classify(response.status);

		debug!(
			status = response.status,
			"Received C-ECHO-RSP ({status_type:?})"
		);
		Ok(status_type)
	}
}

/// Errors that can occur for the echoscu.
#[derive(Debug, Error)]
pub enum EchoError {
	#[error(transparent)]
	Write(#[from] WriteError),
	#[error(transparent)]
	Read(#[from] ReadError),
}
