//! The transport seam: DICOM association primitives as consumed by [`ProtocolSession`].
//!
//! [`ProtocolSession`]: super::ProtocolSession

use crate::dimse::association::AssociationError;
use crate::dimse::cecho::EchoError;
use crate::dimse::cfind::findscu::FindError;
use crate::dimse::cfind::CompositeFindResponse;
use crate::dimse::StatusType;
use crate::model::ConnectionParameters;
use crate::query::QueryTemplate;
use crate::types::{ServiceClass, UI};
use async_trait::async_trait;
use thiserror::Error;

#[async_trait]
pub trait Transport: Send {
	async fn init_network(&mut self) -> Result<(), TransportError>;

	/// Proposes a presentation context and returns the context id it will be negotiated under.
	fn add_presentation_context(
		&mut self,
		service: ServiceClass,
		transfer_syntax: &str,
	) -> Result<u8, TransportError>;

	async fn negotiate_association(&mut self) -> Result<(), TransportError>;

	async fn send_echo(&mut self, context_id: u8) -> Result<(), TransportError>;

	/// Sends the query and returns every response, including the final one.
	async fn send_find(
		&mut self,
		context_id: u8,
		template: &QueryTemplate,
	) -> Result<Vec<CompositeFindResponse>, TransportError>;

	/// Releases the association and forgets all proposed contexts.
	/// Succeeds if there is nothing to release.
	async fn release_association(&mut self) -> Result<(), TransportError>;
}

/// Builds one transport per protocol session.
pub trait TransportFactory: Send + Sync {
	fn create(&self, connection: &ConnectionParameters) -> Box<dyn Transport>;
}

#[derive(Debug, Error)]
pub enum TransportError {
	#[error("Failed to resolve {host}:{port}: {reason}")]
	Resolve {
		host: String,
		port: u16,
		reason: String,
	},
	#[error("Network layer is not initialized")]
	NetworkNotInitialized,
	#[error("No association has been negotiated")]
	NotAssociated,
	#[error("Cannot propose presentation contexts on a negotiated association")]
	AlreadyNegotiated,
	#[error("Unknown transfer syntax with UID '{0}'")]
	UnknownTransferSyntax(UI),
	#[error("Too many presentation contexts")]
	TooManyContexts,
	#[error("Presentation context {id} for {service} was rejected by the peer")]
	ContextRejected { id: u8, service: ServiceClass },
	#[error("Peer answered with a {0:?} status")]
	Status(StatusType),
	#[error(transparent)]
	Association(#[from] AssociationError),
	#[error(transparent)]
	Echo(#[from] EchoError),
	#[error(transparent)]
	Find(#[from] FindError),
}
