use std::fmt;

use ahash::RandomState;
use encoding::EncodingRef;
use hashbrown::HashSet;

use crate::guid::Guid;

/// Shape of the formatted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// `timestamp,threadId,processId,eventId,activityId,relatedActivityId,level,task,opcode,keywords,type,text`
    #[default]
    Default,
    /// `timestamp,level,threadId,processId,{task}.{type},text`
    LegacyTaskName,
    /// Like [`OutputFormat::LegacyTaskName`], with the provider name in place of the task.
    LegacyEventSource,
}

/// How a provider is treated by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// First-party provider: symbol names are split and context correlation is enabled.
    WellKnown,
    /// EventSource provider whose manifest is embedded in its own event stream.
    Dynamic,
    Other,
}

/// The two provider sets that unlock provider-specific behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderAllowlist {
    well_known: HashSet<Guid, RandomState>,
    dynamic: HashSet<Guid, RandomState>,
}

// Microsoft-ServiceFabric, Microsoft-ServiceFabric-Lease
const SERVICE_FABRIC_WELL_KNOWN: [Guid; 2] = [
    Guid::new(
        0xcbd9_3bc2,
        0x71e5,
        0x4566,
        [0xb3, 0xa7, 0x59, 0x5d, 0x8e, 0xec, 0xa6, 0xe8],
    ),
    Guid::new(
        0x3f68_b79e,
        0xa1cf,
        0x4b10,
        [0x8c, 0xfd, 0x3d, 0xfe, 0x32, 0x2f, 0x07, 0xcb],
    ),
];

// Microsoft-ServiceFabric-Actors, Microsoft-ServiceFabric-Services
const SERVICE_FABRIC_DYNAMIC: [Guid; 2] = [
    Guid::new(
        0xe2f2_656b,
        0x985e,
        0x5c5b,
        [0x5b, 0xa3, 0xbb, 0xe8, 0xa8, 0x51, 0xe1, 0xd7],
    ),
    Guid::new(
        0x27b7_a543,
        0x7280,
        0x5c2a,
        [0xb0, 0x53, 0xf2, 0xf7, 0x98, 0xe2, 0xcb, 0xb7],
    ),
];

impl ProviderAllowlist {
    pub fn new() -> Self {
        ProviderAllowlist::default()
    }

    /// The first-party Service Fabric providers.
    pub fn service_fabric() -> Self {
        let mut allowlist = ProviderAllowlist::new();
        allowlist.well_known.extend(SERVICE_FABRIC_WELL_KNOWN);
        allowlist.dynamic.extend(SERVICE_FABRIC_DYNAMIC);
        allowlist
    }

    pub fn well_known(mut self, guid: Guid) -> Self {
        self.well_known.insert(guid);
        self
    }

    pub fn dynamic(mut self, guid: Guid) -> Self {
        self.dynamic.insert(guid);
        self
    }

    pub fn is_well_known(&self, guid: &Guid) -> bool {
        self.well_known.contains(guid)
    }

    pub fn is_dynamic(&self, guid: &Guid) -> bool {
        self.dynamic.contains(guid)
    }

    pub fn kind(&self, guid: &Guid) -> ProviderKind {
        if self.is_well_known(guid) {
            ProviderKind::WellKnown
        } else if self.is_dynamic(guid) {
            ProviderKind::Dynamic
        } else {
            ProviderKind::Other
        }
    }
}

#[derive(Clone)]
pub struct FormatterSettings {
    output_format: OutputFormat,
    ansi_codec: EncodingRef,
    flatten_newlines: bool,
    providers: ProviderAllowlist,
}

impl fmt::Debug for FormatterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatterSettings")
            .field("output_format", &self.output_format)
            .field("ansi_codec", &self.ansi_codec.name())
            .field("flatten_newlines", &self.flatten_newlines)
            .field("providers", &self.providers)
            .finish()
    }
}

impl PartialEq for FormatterSettings {
    fn eq(&self, other: &Self) -> bool {
        self.output_format == other.output_format
            && self.ansi_codec.name() == other.ansi_codec.name()
            && self.flatten_newlines == other.flatten_newlines
            && self.providers == other.providers
    }
}

impl Default for FormatterSettings {
    fn default() -> Self {
        FormatterSettings {
            output_format: OutputFormat::Default,
            ansi_codec: encoding::all::WINDOWS_1252,
            flatten_newlines: true,
            providers: ProviderAllowlist::default(),
        }
    }
}

impl FormatterSettings {
    pub fn new() -> Self {
        FormatterSettings::default()
    }

    pub fn output_format(mut self, output_format: OutputFormat) -> Self {
        self.output_format = output_format;
        self
    }

    /// Sets the codec used to decode `win:AnsiString` fields.
    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    /// Replace line breaks in the rendered text with a tab, keeping one line per event.
    pub fn flatten_newlines(mut self, flatten_newlines: bool) -> Self {
        self.flatten_newlines = flatten_newlines;
        self
    }

    pub fn providers(mut self, providers: ProviderAllowlist) -> Self {
        self.providers = providers;
        self
    }

    pub fn get_output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }

    pub fn should_flatten_newlines(&self) -> bool {
        self.flatten_newlines
    }

    pub fn get_providers(&self) -> &ProviderAllowlist {
        &self.providers
    }
}
