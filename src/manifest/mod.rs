//! The parsed form of an instrumentation manifest.
//!
//! These types mirror the XML closely and carry no decoding logic. They are turned into the
//! schema model by [`crate::schema::ProviderSchema::build`].

mod chunks;
mod parse;

pub use self::chunks::{
    MANIFEST_CHUNK_HEADER_SIZE, MANIFEST_CHUNK_MAGIC, ManifestChunkHeader,
    ManifestChunkReassembler,
};

use ahash::RandomState;
use hashbrown::HashMap;

use crate::err::ManifestError;
use crate::guid::Guid;

#[derive(Debug, Clone, Default)]
pub struct ManifestDocument {
    pub providers: Vec<ProviderElement>,
    /// `stringTable` entries, keyed by id. References are already resolved in the tree.
    pub strings: HashMap<String, String, RandomState>,
}

impl ManifestDocument {
    pub fn parse_str(xml: &str) -> Result<Self, ManifestError> {
        parse::parse_document(xml.trim_start_matches('\u{feff}'))
    }

    /// Parse manifest bytes, as carried by embedded manifest events (UTF-8, optional BOM).
    pub fn parse_bytes(xml: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(xml).map_err(|source| ManifestError::NotUtf8 { source })?;
        Self::parse_str(text.trim_end_matches('\0'))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderElement {
    pub guid: Guid,
    pub name: String,
    pub events: Vec<EventElement>,
    pub templates: Vec<TemplateElement>,
    pub maps: Vec<MapElement>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventElement {
    pub value: u16,
    pub version: u8,
    pub level: Option<String>,
    pub task: Option<String>,
    pub symbol: Option<String>,
    pub opcode: Option<String>,
    pub keywords: Option<String>,
    pub template: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateElement {
    pub tid: String,
    pub data: Vec<DataElement>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataElement {
    pub name: String,
    pub in_type: String,
    pub length: Option<String>,
    pub map: Option<String>,
    pub omit_if_zero: bool,
    pub skip_formatting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Value,
    Bit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapElement {
    pub name: String,
    pub kind: MapKind,
    pub entries: Vec<(u64, String)>,
}

/// Parse an integer attribute written in decimal or `0x` hex.
pub(crate) fn parse_manifest_int(value: &str) -> Option<u64> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
