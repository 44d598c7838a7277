use crate::guid::Guid;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormatError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;

/// Errors raised while walking an event payload.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("invalid utf-16 string for {what} at offset {offset}")]
    InvalidUtf16 { what: &'static str, offset: u64 },

    #[error("odd byte length for utf-16 {what} at offset {offset}")]
    OddLength { what: &'static str, offset: u64 },
}

impl DeserializationError {
    /// True for the out-of-bounds family of errors, which field decoding recovers from locally.
    pub fn is_truncation(&self) -> bool {
        matches!(self, DeserializationError::Truncated { .. })
    }
}

/// Fatal errors raised while turning a manifest into schemas.
///
/// Any of these stops the manifest from loading.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest XML at position {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("manifest is not valid UTF-8: {source}")]
    NotUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("<{element}> is missing required attribute `{attribute}`")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("<{element}> has an invalid `{attribute}` value `{value}`")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },

    #[error("invalid provider GUID `{value}`")]
    InvalidGuid { value: String },

    #[error("string reference `{reference}` could not be resolved in provider `{provider}`")]
    UnresolvedString { provider: String, reference: String },

    #[error("event {event_id} of provider {provider} references unknown template `{template}`")]
    UnknownTemplate {
        provider: Guid,
        event_id: u16,
        template: String,
    },

    #[error(
        "message of event {event_id} in provider {provider} references %{index}, but the event only has {field_count} data items"
    )]
    TemplateFieldOutOfRange {
        provider: Guid,
        event_id: u16,
        index: usize,
        field_count: usize,
    },

    #[error("event id {event_id} is declared twice in provider {provider}")]
    DuplicateEvent { provider: Guid, event_id: u16 },

    #[error("provider {guid} (`{name}`) is already registered")]
    DuplicateProvider { guid: Guid, name: String },
}

/// Errors surfaced by [`crate::ManifestRegistry::format_event`].
#[derive(Debug, Error)]
pub enum FormatError {
    #[error(
        "failed to decode event {task}.{event} (id {id}) of provider {provider}, caused by:\n\t {source}"
    )]
    FailedToDecodeEvent {
        provider: Guid,
        task: String,
        event: String,
        id: u16,
        #[source]
        source: DeserializationError,
    },

    #[error("embedded manifest for provider {provider} could not be loaded: {source}")]
    EmbeddedManifest {
        provider: Guid,
        #[source]
        source: ManifestError,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}
