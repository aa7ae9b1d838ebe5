use dicom::ul::pdu::PresentationContextNegotiated;
use dicom::ul::Pdu;
use std::convert::identity;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{AskPattern, Association, AssociationError, ChannelError, Command};

/// A client association whose blocking dicom-ul state lives on a dedicated thread.
/// The async side only exchanges [`Command`]s with that thread.
pub struct ClientAssociation {
	channel: Sender<Command>,
	uuid: Uuid,
	tcp_stream: TcpStream,
	presentation_contexts: Vec<PresentationContextNegotiated>,
}

/// One presentation context proposed by the requestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedContext {
	pub abstract_syntax: String,
	pub transfer_syntaxes: Vec<String>,
}

pub struct ClientAssociationOptions {
	pub calling_aet: String,
	pub called_aet: String,
	/// Proposed in order, so the n-th context receives the id `2n + 1`.
	pub presentation_contexts: Vec<ProposedContext>,
	pub address: SocketAddr,
}

impl ClientAssociation {
	pub async fn new(options: ClientAssociationOptions) -> Result<Self, AssociationError> {
		let uuid = Uuid::new_v4();
		let (tx, mut rx) = tokio::sync::mpsc::channel::<Command>(1);
		let (connect_tx, connect_result) = oneshot::channel::<Result<_, AssociationError>>();

		let address = options.address;
		let thread_name = format!("{}-client", options.calling_aet);
		let mut ul_options = dicom::ul::ClientAssociationOptions::new()
			.calling_ae_title(options.calling_aet)
			.called_ae_title(options.called_aet);
		for context in options.presentation_contexts {
			ul_options =
				ul_options.with_presentation_context(context.abstract_syntax, context.transfer_syntaxes);
		}

		let _handle = thread::Builder::new()
			.name(thread_name)
			.spawn(move || {
				let span =
					tracing::info_span!("ClientAssociation", association_id = uuid.to_string());
				let _enter = span.enter();

				let mut association = match ul_options.establish(address) {
					Ok(mut association) => {
						let presentation_contexts = association.presentation_contexts().to_vec();
						let stream = match association.inner_stream().try_clone() {
							Ok(stream) => stream,
							Err(err) => {
								error!("Failed to clone TcpStream: {err}");
								connect_tx
									.send(Err(AssociationError::OsThread(err)))
									.map_err(|_| ())?;
								return Err(());
							}
						};

						connect_tx
							.send(Ok((stream, presentation_contexts)))
							.map_err(|_| ())?;

						association
					}
					Err(e) => {
						error!("Failed to connect: {e}");
						connect_tx.send(Err(e.into())).map_err(|_| ())?;
						return Err(());
					}
				};

				let mut release = None;
				while let Some(command) = rx.blocking_recv() {
					let result = match command {
						Command::Send(pdu, reply_to) => {
							let send_result = association
								.send(&pdu)
								.map_err(AssociationError::Association);
							reply_to.send(send_result).map_err(|_| ChannelError::Closed)
						}
						Command::Receive(reply_to) => {
							let receive_result =
								association.receive().map_err(AssociationError::Association);
							reply_to
								.send(receive_result)
								.map_err(|_| ChannelError::Closed)
						}
						Command::Release(reply_to) => {
							release = Some(reply_to);
							break;
						}
					};
					if let Some(err) = result.err() {
						error!("Error in ClientAssociation backend: {err}");
						return Err(());
					}
				}

				rx.close();

				if let Some(reply_to) = release {
					let release_result = association
						.release()
						.map_err(AssociationError::Association);
					if release_result.is_ok() {
						info!("Released client association");
					}
					reply_to.send(release_result).map_err(|_| ())?;
				} else if let Err(err) = association.abort() {
					debug!("Failed to abort ClientAssociation: {err}");
				}

				Ok(())
			})
			.map_err(AssociationError::OsThread)?;

		let (tcp_stream, presentation_contexts) = connect_result
			.await
			.map_err(|_| AssociationError::Channel(ChannelError::Closed))??;

		Ok(Self {
			channel: tx,
			uuid,
			tcp_stream,
			presentation_contexts,
		})
	}

	pub const fn uuid(&self) -> &Uuid {
		&self.uuid
	}

	/// Performs an orderly A-RELEASE. The backend thread terminates afterwards.
	pub async fn release(&self, timeout: Duration) -> Result<(), AssociationError> {
		self.channel
			.ask(Command::Release, timeout)
			.await
			.map_err(AssociationError::Channel)
			.and_then(identity)
	}
}

impl Drop for ClientAssociation {
	fn drop(&mut self) {
		self.close();
	}
}

impl Association for ClientAssociation {
	async fn receive(&self, timeout: Duration) -> Result<Pdu, AssociationError> {
		self.channel
			.ask(Command::Receive, timeout)
			.await
			.map_err(AssociationError::Channel)
			.and_then(identity)
	}

	async fn send(&self, pdu: Pdu, timeout: Duration) -> Result<(), AssociationError> {
		self.channel
			.ask(|reply_to| Command::Send(pdu, reply_to), timeout)
			.await
			.map_err(AssociationError::Channel)
			.and_then(identity)
	}

	fn close(&mut self) {
		if let Err(err) = self.tcp_stream.shutdown(std::net::Shutdown::Both) {
			debug!(
				backend_uuid = self.uuid.to_string(),
				"Failed to shutdown TcpStream: {err}"
			);
		}
	}

	fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
		&self.presentation_contexts
	}
}
