//! Test doubles shared by the unit tests of the session and scheduler modules.

use crate::dimse::cfind::CompositeFindResponse;
use crate::dimse::StatusType;
use crate::model::{
	ConnectionParameters, DicomTag, PresentationContext, ProfileTag, WorklistProfile,
};
use crate::query::QueryTemplate;
use crate::session::transport::{Transport, TransportError, TransportFactory};
use crate::types::ServiceClass;
use async_trait::async_trait;
use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, Tag, VR};
use dicom::dicom_value;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	InitNetwork,
	AddContext(ServiceClass),
	Negotiate,
	Echo(u8),
	Find(u8),
	Release,
}

#[derive(Debug, Default)]
struct Script {
	calls: Vec<Call>,
	first_context_id: u8,
	fail_init: bool,
	fail_negotiate: bool,
	reject_context: Option<ServiceClass>,
	failing_echoes: usize,
	fail_find: bool,
	find_delay: Option<Duration>,
	responses: Vec<CompositeFindResponse>,
	next_context_id: u8,
}

/// A scripted [`Transport`] recording every call. Clones share their script.
#[derive(Debug, Clone)]
pub struct MockTransport {
	script: Arc<Mutex<Script>>,
}

impl Default for MockTransport {
	fn default() -> Self {
		Self::new(1)
	}
}

impl MockTransport {
	pub fn new(first_context_id: u8) -> Self {
		Self {
			script: Arc::new(Mutex::new(Script {
				first_context_id,
				next_context_id: first_context_id,
				..Script::default()
			})),
		}
	}

	fn script(&self) -> MutexGuard<'_, Script> {
		self.script.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn calls(&self) -> Vec<Call> {
		self.script().calls.clone()
	}

	pub fn count(&self, call: &Call) -> usize {
		self.script().calls.iter().filter(|c| *c == call).count()
	}

	pub fn finds(&self) -> usize {
		self.script()
			.calls
			.iter()
			.filter(|call| matches!(call, Call::Find(_)))
			.count()
	}

	pub fn echoes(&self) -> usize {
		self.script()
			.calls
			.iter()
			.filter(|call| matches!(call, Call::Echo(_)))
			.count()
	}

	pub fn clear_calls(&self) {
		self.script().calls.clear();
	}

	pub fn fail_init(&self, fail: bool) {
		self.script().fail_init = fail;
	}

	pub fn fail_negotiate(&self, fail: bool) {
		self.script().fail_negotiate = fail;
	}

	pub fn reject_context(&self, service: ServiceClass) {
		self.script().reject_context = Some(service);
	}

	pub fn fail_next_echoes(&self, count: usize) {
		self.script().failing_echoes = count;
	}

	pub fn fail_find(&self, fail: bool) {
		self.script().fail_find = fail;
	}

	pub fn delay_find(&self, delay: Duration) {
		self.script().find_delay = Some(delay);
	}

	pub fn respond_with(&self, responses: Vec<CompositeFindResponse>) {
		self.script().responses = responses;
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn init_network(&mut self) -> Result<(), TransportError> {
		let mut script = self.script();
		script.calls.push(Call::InitNetwork);
		if script.fail_init {
			return Err(TransportError::Resolve {
				host: String::from("mock"),
				port: 0,
				reason: String::from("scripted failure"),
			});
		}
		Ok(())
	}

	fn add_presentation_context(
		&mut self,
		service: ServiceClass,
		_transfer_syntax: &str,
	) -> Result<u8, TransportError> {
		let mut script = self.script();
		script.calls.push(Call::AddContext(service));
		if script.reject_context == Some(service) {
			return Err(TransportError::TooManyContexts);
		}
		let id = script.next_context_id;
		script.next_context_id += 2;
		Ok(id)
	}

	async fn negotiate_association(&mut self) -> Result<(), TransportError> {
		let mut script = self.script();
		script.calls.push(Call::Negotiate);
		if script.fail_negotiate {
			return Err(TransportError::NotAssociated);
		}
		Ok(())
	}

	async fn send_echo(&mut self, context_id: u8) -> Result<(), TransportError> {
		let mut script = self.script();
		script.calls.push(Call::Echo(context_id));
		if script.failing_echoes > 0 {
			script.failing_echoes -= 1;
			return Err(TransportError::Status(StatusType::Failure));
		}
		Ok(())
	}

	async fn send_find(
		&mut self,
		context_id: u8,
		_template: &QueryTemplate,
	) -> Result<Vec<CompositeFindResponse>, TransportError> {
		let delay = {
			let mut script = self.script();
			script.calls.push(Call::Find(context_id));
			script.find_delay
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let script = self.script();
		if script.fail_find {
			return Err(TransportError::Status(StatusType::Failure));
		}
		Ok(script.responses.clone())
	}

	async fn release_association(&mut self) -> Result<(), TransportError> {
		let mut script = self.script();
		script.calls.push(Call::Release);
		script.next_context_id = script.first_context_id;
		Ok(())
	}
}

impl TransportFactory for MockTransport {
	fn create(&self, _connection: &ConnectionParameters) -> Box<dyn Transport> {
		Box::new(self.clone())
	}
}

pub fn connection() -> ConnectionParameters {
	ConnectionParameters {
		calling_aet: String::from("MWL-SYNC"),
		called_aet: String::from("RIS"),
		host: String::from("127.0.0.1"),
		port: 11112,
	}
}

pub fn dicom_tag(id: i64, tag: Tag, parent: Option<Tag>) -> DicomTag {
	let parent = parent.unwrap_or(Tag(0, 0));
	DicomTag {
		id,
		name: format!("{tag}"),
		display_name: String::new(),
		group: tag.group(),
		element: tag.element(),
		parent_group: parent.group(),
		parent_element: parent.element(),
		is_active: true,
		is_retired: false,
	}
}

pub const PATIENT_ID: i64 = 1;
pub const ACCESSION_NUMBER: i64 = 2;
pub const PATIENT_NAME: i64 = 3;
pub const MODALITY: i64 = 4;

/// Profile 1: PatientID and AccessionNumber identify an entry.
pub fn profile() -> WorklistProfile {
	let sps = tags::SCHEDULED_PROCEDURE_STEP_SEQUENCE;
	let identifier = |tag: DicomTag| ProfileTag {
		tag,
		is_identifier: true,
		is_mandatory_identifier: false,
	};
	let plain = |tag: DicomTag| ProfileTag {
		tag,
		is_identifier: false,
		is_mandatory_identifier: false,
	};
	WorklistProfile {
		id: 1,
		name: String::from("CT"),
		presentation_context: PresentationContext::default(),
		tags: vec![
			identifier(dicom_tag(PATIENT_ID, tags::PATIENT_ID, None)),
			identifier(dicom_tag(ACCESSION_NUMBER, tags::ACCESSION_NUMBER, None)),
			plain(dicom_tag(PATIENT_NAME, tags::PATIENT_NAME, None)),
			plain(dicom_tag(MODALITY, tags::MODALITY, Some(sps))),
		],
	}
}

pub fn profile_tags() -> Vec<DicomTag> {
	profile().tags.into_iter().map(|tag| tag.tag).collect()
}

/// A pending C-FIND-RSP carrying a worklist item.
pub fn pending_response(patient_id: &str, accession_number: &str) -> CompositeFindResponse {
	let mut step = InMemDicomObject::new_empty();
	step.put(DataElement::new(tags::MODALITY, VR::CS, dicom_value!(Str, "CT")));

	let mut data = InMemDicomObject::new_empty();
	data.put(DataElement::new(
		tags::PATIENT_ID,
		VR::LO,
		dicom_value!(Str, patient_id),
	));
	data.put(DataElement::new(
		tags::ACCESSION_NUMBER,
		VR::SH,
		dicom_value!(Str, accession_number),
	));
	data.put(DataElement::new(
		tags::SCHEDULED_PROCEDURE_STEP_SEQUENCE,
		VR::SQ,
		DataSetSequence::from(vec![step]),
	));

	CompositeFindResponse {
		status: 0xFF00,
		data: Some(data),
	}
}

pub const fn final_response() -> CompositeFindResponse {
	CompositeFindResponse {
		status: 0x0000,
		data: None,
	}
}
