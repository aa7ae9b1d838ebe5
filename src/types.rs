use dicom::dictionary_std::uids;

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// US (Unsigned Short) value representation.
pub type US = u16;

/// AE (Application Entity) value representation.
pub type AE = String;

/// Priority (0000,0700) values for DIMSE operations.
#[derive(Debug, Copy, Clone, Default)]
pub enum Priority {
	Low = 0x0002,
	#[default]
	Medium = 0x0000,
	High = 0x0001,
}

/// The services this engine negotiates presentation contexts for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ServiceClass {
	/// C-ECHO, used as liveness probe.
	Verification,
	/// C-FIND on the Modality Worklist Information Model.
	Worklist,
}

impl ServiceClass {
	pub const fn as_sop_class(&self) -> &str {
		match self {
			Self::Verification => uids::VERIFICATION,
			Self::Worklist => uids::MODALITY_WORKLIST_INFORMATION_MODEL_FIND,
		}
	}
}

impl std::fmt::Display for ServiceClass {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Verification => write!(f, "Verification"),
			Self::Worklist => write!(f, "Modality Worklist FIND"),
		}
	}
}
