use super::transport::{Transport, TransportError, TransportFactory};
use crate::dimse::association::client::{
	ClientAssociation, ClientAssociationOptions, ProposedContext,
};
use crate::dimse::association::Association;
use crate::dimse::cecho::EchoServiceClassUser;
use crate::dimse::cfind::findscu::{FindServiceClassUser, FindServiceClassUserOptions};
use crate::dimse::cfind::CompositeFindResponse;
use crate::dimse::{next_message_id, StatusType};
use crate::model::ConnectionParameters;
use crate::query::QueryTemplate;
use crate::types::{Priority, ServiceClass, UI};
use async_trait::async_trait;
use dicom::encoding::TransferSyntaxIndex;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use futures::TryStreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Proposal {
	id: u8,
	service: ServiceClass,
	transfer_syntax: UI,
}

/// [`Transport`] on top of a dicom-ul client association.
pub struct DimseTransport {
	connection: ConnectionParameters,
	message_timeout: Duration,
	address: Option<SocketAddr>,
	proposals: Vec<Proposal>,
	association: Option<ClientAssociation>,
}

impl DimseTransport {
	pub const fn new(connection: ConnectionParameters, message_timeout: Duration) -> Self {
		Self {
			connection,
			message_timeout,
			address: None,
			proposals: Vec::new(),
			association: None,
		}
	}

	fn association(&self) -> Result<&ClientAssociation, TransportError> {
		self.association
			.as_ref()
			.ok_or(TransportError::NotAssociated)
	}
}

#[async_trait]
impl Transport for DimseTransport {
	async fn init_network(&mut self) -> Result<(), TransportError> {
		let host = self.connection.host.as_str();
		let port = self.connection.port;
		let resolve_error = |reason: String| TransportError::Resolve {
			host: host.to_owned(),
			port,
			reason,
		};

		let address = tokio::net::lookup_host((host, port))
			.await
			.map_err(|err| resolve_error(err.to_string()))?
			.next()
			.ok_or_else(|| resolve_error(String::from("no address found")))?;

		debug!(%address, "Resolved peer address");
		self.address = Some(address);
		Ok(())
	}

	fn add_presentation_context(
		&mut self,
		service: ServiceClass,
		transfer_syntax: &str,
	) -> Result<u8, TransportError> {
		if self.association.is_some() {
			return Err(TransportError::AlreadyNegotiated);
		}
		if TransferSyntaxRegistry.get(transfer_syntax).is_none() {
			return Err(TransportError::UnknownTransferSyntax(UI::from(
				transfer_syntax,
			)));
		}

		// Presentation context ids are odd numbers, assigned in proposal order
		let id = u8::try_from(self.proposals.len() * 2 + 1)
			.map_err(|_| TransportError::TooManyContexts)?;
		self.proposals.push(Proposal {
			id,
			service,
			transfer_syntax: UI::from(transfer_syntax),
		});
		Ok(id)
	}

	async fn negotiate_association(&mut self) -> Result<(), TransportError> {
		let address = self.address.ok_or(TransportError::NetworkNotInitialized)?;
		let options = ClientAssociationOptions {
			calling_aet: self.connection.calling_aet.clone(),
			called_aet: self.connection.called_aet.clone(),
			presentation_contexts: self
				.proposals
				.iter()
				.map(|proposal| ProposedContext {
					abstract_syntax: String::from(proposal.service.as_sop_class()),
					transfer_syntaxes: vec![proposal.transfer_syntax.clone()],
				})
				.collect(),
			address,
		};

		let association = ClientAssociation::new(options).await?;
		for proposal in &self.proposals {
			let accepted = association
				.presentation_contexts()
				.iter()
				.any(|pctx| pctx.id == proposal.id);
			if !accepted {
				return Err(TransportError::ContextRejected {
					id: proposal.id,
					service: proposal.service,
				});
			}
		}

		info!(
			backend_uuid = association.uuid().to_string(),
			called_aet = %self.connection.called_aet,
			"Negotiated association with {address}"
		);
		self.association = Some(association);
		Ok(())
	}

	async fn send_echo(&mut self, context_id: u8) -> Result<(), TransportError> {
		let association = self.association()?;
		let status_type = EchoServiceClassUser::new(association, context_id)
			.echo(self.message_timeout)
			.await?;

		match status_type {
			StatusType::Success => Ok(()),
			status_type => Err(TransportError::Status(status_type)),
		}
	}

	async fn send_find(
		&mut self,
		context_id: u8,
		template: &QueryTemplate,
	) -> Result<Vec<CompositeFindResponse>, TransportError> {
		let association = self.association()?;
		let findscu = FindServiceClassUser::new(association, context_id, self.message_timeout);
		let options = FindServiceClassUserOptions {
			identifier: template.to_identifier(),
			message_id: next_message_id(),
			priority: Priority::Medium,
		};

		let responses: Vec<CompositeFindResponse> = findscu.invoke(options).try_collect().await?;
		if let Some(last) = responses.last() {
			if !matches!(
				last.status_type(),
				StatusType::Success | StatusType::Pending
			) {
				warn!(
					status = last.status,
					"C-FIND ended with {:?} status",
					last.status_type()
				);
			}
		}
		Ok(responses)
	}

	async fn release_association(&mut self) -> Result<(), TransportError> {
		self.proposals.clear();
		self.address = None;
		if let Some(association) = self.association.take() {
			association.release(self.message_timeout).await?;
		}
		Ok(())
	}
}

/// Creates a [`DimseTransport`] for every new session.
pub struct DimseTransportFactory {
	pub message_timeout: Duration,
}

impl TransportFactory for DimseTransportFactory {
	fn create(&self, connection: &ConnectionParameters) -> Box<dyn Transport> {
		Box::new(DimseTransport::new(
			connection.clone(),
			self.message_timeout,
		))
	}
}
