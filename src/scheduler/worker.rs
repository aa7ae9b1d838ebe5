use crate::model::WorklistEntry;
use crate::query::QueryTemplate;
use crate::session::{ProtocolSession, SessionError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug)]
pub enum WorkerRequest {
	Find { template: Arc<QueryTemplate> },
	Echo,
}

#[derive(Debug)]
pub enum WorkerEvent {
	/// The initial prepare attempt has finished, successfully or not.
	Ready,
	QueryCompleted(Result<Vec<WorklistEntry>, SessionError>),
	EchoCompleted(Result<(), SessionError>),
}

/// Spawns the task that exclusively owns the session until it is cancelled or the request
/// channel is closed. The session is released before the task ends.
pub fn spawn(
	session: ProtocolSession,
	requests: mpsc::Receiver<WorkerRequest>,
	events: mpsc::Sender<WorkerEvent>,
	timeout: Duration,
	cancel: CancellationToken,
) -> JoinHandle<()> {
	let span = tracing::info_span!("worker", session_id = %session.id());
	tokio::spawn(
		Worker {
			session,
			requests,
			events,
			timeout,
			cancel,
		}
		.run()
		.instrument(span),
	)
}

struct Worker {
	session: ProtocolSession,
	requests: mpsc::Receiver<WorkerRequest>,
	events: mpsc::Sender<WorkerEvent>,
	timeout: Duration,
	cancel: CancellationToken,
}

impl Worker {
	async fn run(mut self) {
		if self.serve().await.is_none() {
			debug!("Worker interrupted");
		}
		self.session.release().await;
		info!("Worker stopped");
	}

	/// Returns `None` once the worker has to stop.
	async fn serve(&mut self) -> Option<()> {
		let timeout = self.timeout;
		let prepared = tokio::select! {
			biased;
			() = self.cancel.cancelled() => return None,
			result = self.session.prepare(timeout) => result,
		};
		if let Err(err) = prepared {
			warn!("Initial prepare failed, retrying with the first query: {err}");
		}
		self.events.send(WorkerEvent::Ready).await.ok()?;

		loop {
			let request = tokio::select! {
				biased;
				() = self.cancel.cancelled() => return None,
				request = self.requests.recv() => request?,
			};

			let event = match request {
				WorkerRequest::Find { template } => {
					let result = tokio::select! {
						biased;
						() = self.cancel.cancelled() => return None,
						result = query(&mut self.session, &template, timeout) => result,
					};
					WorkerEvent::QueryCompleted(result)
				}
				WorkerRequest::Echo => {
					let result = tokio::select! {
						biased;
						() = self.cancel.cancelled() => return None,
						result = self.session.echo(timeout) => result,
					};
					WorkerEvent::EchoCompleted(result)
				}
			};

			self.events.send(event).await.ok()?;
		}
	}
}

/// One query cycle on the worker: prepare unless live, then find.
async fn query(
	session: &mut ProtocolSession,
	template: &QueryTemplate,
	timeout: Duration,
) -> Result<Vec<WorklistEntry>, SessionError> {
	if !session.is_live() {
		session.prepare(timeout).await?;
	}
	session.find(template, timeout).await
}
