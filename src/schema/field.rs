use std::fmt;

use encoding::EncodingRef;
use log::trace;

use crate::err::DeserializationResult;
use crate::schema::value_map::ValueMaps;
use crate::utils::{FieldReader, format_timestamp};

/// Field names carrying correlation data in first-party providers.
pub(crate) const CONTEXT_ID_FIELD: &str = "id";
pub(crate) const CONTEXT_FIELD_PREFIX: &str = "contextSequenceId";

/// The encoding of one field on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireType {
    UnicodeString,
    CountedUnicodeString,
    AnsiString,
    Boolean,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    FileTime,
    Guid,
    HexInt32,
    HexInt64,
    Binary(usize),
    /// Two 64-bit words (high, low) declared as two consecutive data items.
    LargeInteger,
    /// An `inType` this decoder does not understand, kept verbatim for diagnostics.
    Unknown(String),
}

impl WireType {
    /// Map a manifest `inType` (with or without the `win:` prefix).
    ///
    /// `length` is the `length` attribute of the data item, used by fixed-size binary blobs.
    pub fn from_in_type(in_type: &str, length: Option<&str>) -> WireType {
        let name = in_type.strip_prefix("win:").unwrap_or(in_type);
        match name {
            "UnicodeString" => WireType::UnicodeString,
            "CountedUnicodeString" | "CountedString" => WireType::CountedUnicodeString,
            "AnsiString" => WireType::AnsiString,
            "Boolean" => WireType::Boolean,
            "Int8" => WireType::Int8,
            "UInt8" => WireType::UInt8,
            "Int16" => WireType::Int16,
            "UInt16" => WireType::UInt16,
            "Int32" => WireType::Int32,
            "UInt32" => WireType::UInt32,
            "Int64" => WireType::Int64,
            "UInt64" => WireType::UInt64,
            "Float" => WireType::Float,
            "Double" => WireType::Double,
            "FILETIME" => WireType::FileTime,
            "GUID" => WireType::Guid,
            "HexInt32" => WireType::HexInt32,
            "HexInt64" | "Pointer" => WireType::HexInt64,
            "Binary" => match length.and_then(|l| l.trim().parse::<usize>().ok()) {
                Some(len) => WireType::Binary(len),
                None => WireType::Unknown(in_type.to_string()),
            },
            _ => WireType::Unknown(in_type.to_string()),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            WireType::Int8
                | WireType::UInt8
                | WireType::Int16
                | WireType::UInt16
                | WireType::Int32
                | WireType::UInt32
                | WireType::Int64
                | WireType::UInt64
                | WireType::HexInt32
                | WireType::HexInt64
        )
    }

    /// Number of manifest data slots the type occupies.
    pub fn encoded_width(&self) -> usize {
        match self {
            WireType::LargeInteger => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireType::UnicodeString => "UnicodeString",
            WireType::CountedUnicodeString => "CountedUnicodeString",
            WireType::AnsiString => "AnsiString",
            WireType::Boolean => "Boolean",
            WireType::Int8 => "Int8",
            WireType::UInt8 => "UInt8",
            WireType::Int16 => "Int16",
            WireType::UInt16 => "UInt16",
            WireType::Int32 => "Int32",
            WireType::UInt32 => "UInt32",
            WireType::Int64 => "Int64",
            WireType::UInt64 => "UInt64",
            WireType::Float => "Float",
            WireType::Double => "Double",
            WireType::FileTime => "FileTime",
            WireType::Guid => "Guid",
            WireType::HexInt32 => "HexInt32",
            WireType::HexInt64 => "HexInt64",
            WireType::Binary(_) => "Binary",
            WireType::LargeInteger => "LargeInteger",
            WireType::Unknown(name) => name,
        };
        f.write_str(name)
    }
}

/// One decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub text: String,
    /// The raw wire value of integer fields, `None` for everything else and for placeholders.
    pub number: Option<u64>,
}

impl FieldValue {
    fn plain(text: impl Into<String>) -> Self {
        FieldValue {
            text: text.into(),
            number: None,
        }
    }

    fn integer(text: String, number: u64) -> Self {
        FieldValue {
            text,
            number: Some(number),
        }
    }
}

/// Layout and rendering rules of one event field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub wire_type: WireType,
    pub map_name: Option<String>,
    /// Carries a correlation key consumed from the context stack (parent events).
    pub is_context_field: bool,
    /// The leading `id` field of a child event, i.e. the key its text is pushed under.
    pub is_context_id: bool,
    /// Manifest data slots consumed by this field, at least 1.
    pub encoded_width: usize,
    pub omit_if_zero: bool,
    pub skip_formatting: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, wire_type: WireType) -> Self {
        let encoded_width = wire_type.encoded_width();
        FieldSchema {
            name: name.into(),
            wire_type,
            map_name: None,
            is_context_field: false,
            is_context_id: false,
            encoded_width,
            omit_if_zero: false,
            skip_formatting: false,
        }
    }

    pub fn with_map(mut self, map_name: impl Into<String>) -> Self {
        self.map_name = Some(map_name.into());
        self
    }

    pub fn omit_if_zero(mut self, value: bool) -> Self {
        self.omit_if_zero = value;
        self
    }

    pub fn skip_formatting(mut self, value: bool) -> Self {
        self.skip_formatting = value;
        self
    }

    /// Apply the first-party naming conventions for correlation fields.
    ///
    /// Only providers on the well-known list follow them, everything else never correlates.
    pub(crate) fn classify_context(&mut self, well_known: bool, is_first: bool) {
        let integer = self.wire_type.is_integer();
        self.is_context_id = well_known && is_first && integer && self.name == CONTEXT_ID_FIELD;
        self.is_context_field =
            well_known && integer && self.name.starts_with(CONTEXT_FIELD_PREFIX);
    }

    /// Decode this field at the reader's cursor and render it as text.
    ///
    /// Reads that run past the end of the payload render as `<unknown {type} value>` instead of
    /// failing the event. Only malformed (not truncated) data is returned as an error.
    pub fn decode(
        &self,
        reader: &mut FieldReader<'_>,
        maps: &ValueMaps,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<String> {
        self.decode_value(reader, maps, ansi_codec).map(|value| value.text)
    }

    /// Like [`FieldSchema::decode`], but keeps the raw value of integer fields next to the text.
    pub fn decode_value(
        &self,
        reader: &mut FieldReader<'_>,
        maps: &ValueMaps,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<FieldValue> {
        match self.read_value(reader, maps, ansi_codec) {
            Ok(value) if self.skip_formatting => Ok(FieldValue {
                text: String::new(),
                ..value
            }),
            Ok(value) => Ok(value),
            Err(e) if e.is_truncation() => {
                trace!("field `{}` overflowed the payload: {}", self.name, e);
                Ok(FieldValue::plain(format!("<unknown {} value>", self.wire_type)))
            }
            Err(e) => Err(e),
        }
    }

    fn read_value(
        &self,
        reader: &mut FieldReader<'_>,
        maps: &ValueMaps,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<FieldValue> {
        let value = match &self.wire_type {
            WireType::UnicodeString => FieldValue::plain(reader.utf16_string_z()?),
            WireType::CountedUnicodeString => FieldValue::plain(reader.len_prefixed_utf16_string()?),
            WireType::AnsiString => FieldValue::plain(reader.ansi_string_z(ansi_codec)?),
            WireType::Boolean => {
                if reader.boolean()? {
                    FieldValue::plain("True")
                } else {
                    FieldValue::plain("False")
                }
            }
            WireType::Int8 => {
                let v = reader.i8()?;
                FieldValue::integer(v.to_string(), v as u64)
            }
            WireType::UInt8 => self.mapped(maps, u64::from(reader.u8()?)),
            WireType::Int16 => {
                let v = reader.i16()?;
                FieldValue::integer(v.to_string(), v as u64)
            }
            WireType::UInt16 => self.mapped(maps, u64::from(reader.u16()?)),
            WireType::Int32 => {
                let v = reader.i32()?;
                FieldValue::integer(v.to_string(), v as u64)
            }
            WireType::UInt32 => self.mapped(maps, u64::from(reader.u32()?)),
            WireType::Int64 => {
                let v = reader.i64()?;
                FieldValue::integer(v.to_string(), v as u64)
            }
            WireType::UInt64 => {
                let v = reader.u64()?;
                FieldValue::integer(self.omitted_or(v, || v.to_string()), v)
            }
            WireType::Float => FieldValue::plain(reader.f32()?.to_string()),
            WireType::Double => FieldValue::plain(reader.f64()?.to_string()),
            WireType::FileTime => FieldValue::plain(format_timestamp(reader.filetime()?)),
            WireType::Guid => FieldValue::plain(reader.guid()?.to_string()),
            WireType::HexInt32 => {
                let v = reader.u32()?;
                FieldValue::integer(format!("{:x}", v), u64::from(v))
            }
            WireType::HexInt64 => {
                let v = reader.u64()?;
                FieldValue::integer(self.omitted_or(v, || format!("{:x}", v)), v)
            }
            WireType::Binary(len) => FieldValue::plain(
                reader
                    .bytes(*len)?
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<String>(),
            ),
            WireType::LargeInteger => {
                let high = reader.u64()?;
                let low = reader.u64()?;
                if high == 0 {
                    FieldValue::plain(format!("{:x}", low))
                } else {
                    FieldValue::plain(format!("{:x}{:016x}", high, low))
                }
            }
            WireType::Unknown(name) => FieldValue::plain(format!("<unknown type {}>", name)),
        };
        Ok(value)
    }

    fn mapped(&self, maps: &ValueMaps, key: u64) -> FieldValue {
        let text = match self.map_name.as_deref().filter(|m| !m.is_empty()) {
            Some(map) => maps.lookup(map, key).unwrap_or_else(|| key.to_string()),
            None => key.to_string(),
        };
        FieldValue::integer(text, key)
    }

    fn omitted_or(&self, value: u64, render: impl FnOnce() -> String) -> String {
        if self.omit_if_zero && value == 0 {
            String::new()
        } else {
            render()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::value_map::MapDefinition;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn decode_all(fields: &[FieldSchema], payload: &[u8], maps: &ValueMaps) -> Vec<String> {
        let mut reader = FieldReader::new(payload);
        fields
            .iter()
            .map(|f| {
                f.decode(&mut reader, maps, encoding::all::WINDOWS_1252)
                    .unwrap()
            })
            .collect()
    }

    fn state_maps() -> ValueMaps {
        let mut maps = ValueMaps::new();
        maps.insert(
            "StateMap",
            MapDefinition::Enumeration(BTreeMap::from([(5, "Ready".to_string())])),
        );
        maps
    }

    #[test]
    fn test_mapped_uint32_hit_and_miss() {
        let field = FieldSchema::new("state", WireType::UInt32).with_map("StateMap");
        let mut payload = 5u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&9u32.to_le_bytes());
        let values = decode_all(&[field.clone(), field], &payload, &state_maps());
        assert_eq!(values, vec!["Ready".to_string(), "9".to_string()]);
    }

    #[test]
    fn test_hex_types_have_no_prefix() {
        let fields = [
            FieldSchema::new("a", WireType::HexInt32),
            FieldSchema::new("b", WireType::HexInt64),
        ];
        let mut payload = 0xABCu32.to_le_bytes().to_vec();
        payload.extend_from_slice(&0xDEAD_BEEF_0000u64.to_le_bytes());
        assert_eq!(
            decode_all(&fields, &payload, &ValueMaps::new()),
            vec!["abc".to_string(), "deadbeef0000".to_string()]
        );
    }

    #[test]
    fn test_integer_fields_keep_their_raw_value() {
        let fields = [
            FieldSchema::new("a", WireType::HexInt64).omit_if_zero(true),
            FieldSchema::new("b", WireType::UInt32).with_map("StateMap"),
            FieldSchema::new("c", WireType::Int16),
            FieldSchema::new("d", WireType::UnicodeString),
            FieldSchema::new("e", WireType::HexInt32),
        ];
        let mut payload = 0x1au64.to_le_bytes().to_vec();
        payload.extend_from_slice(&5u32.to_le_bytes());
        payload.extend_from_slice(&(-1i16).to_le_bytes());
        payload.extend_from_slice(&[b'x', 0, 0, 0]);

        let maps = state_maps();
        let mut reader = FieldReader::new(&payload);
        let values: Vec<FieldValue> = fields
            .iter()
            .map(|f| {
                f.decode_value(&mut reader, &maps, encoding::all::WINDOWS_1252)
                    .unwrap()
            })
            .collect();

        assert_eq!(values[0].text, "1a");
        assert_eq!(values[0].number, Some(0x1a));
        assert_eq!(values[1].text, "Ready");
        assert_eq!(values[1].number, Some(5));
        assert_eq!(values[2].number, Some(u64::MAX));
        assert_eq!(values[3].number, None);
        assert_eq!(values[4].text, "<unknown HexInt32 value>");
        assert_eq!(values[4].number, None);
    }

    #[test]
    fn test_omit_if_zero() {
        let fields = [
            FieldSchema::new("a", WireType::UInt64).omit_if_zero(true),
            FieldSchema::new("b", WireType::HexInt64).omit_if_zero(true),
            FieldSchema::new("c", WireType::UInt64),
        ];
        let payload = [0u8; 24];
        assert_eq!(
            decode_all(&fields, &payload, &ValueMaps::new()),
            vec![String::new(), String::new(), "0".to_string()]
        );
    }

    #[test]
    fn test_large_integer() {
        let field = FieldSchema::new("big", WireType::LargeInteger);
        assert_eq!(field.encoded_width, 2);

        let mut low_only = 0u64.to_le_bytes().to_vec();
        low_only.extend_from_slice(&0xFFu64.to_le_bytes());
        assert_eq!(
            decode_all(&[field.clone()], &low_only, &ValueMaps::new()),
            vec!["ff".to_string()]
        );

        let mut both = 0x1u64.to_le_bytes().to_vec();
        both.extend_from_slice(&0xFFu64.to_le_bytes());
        assert_eq!(
            decode_all(&[field], &both, &ValueMaps::new()),
            vec!["100000000000000ff".to_string()]
        );
    }

    #[test]
    fn test_strings_booleans_and_guids() {
        let fields = [
            FieldSchema::new("s", WireType::UnicodeString),
            FieldSchema::new("b", WireType::Boolean),
            FieldSchema::new("g", WireType::Guid),
            FieldSchema::new("a", WireType::AnsiString),
        ];
        let mut payload = vec![b'h', 0, b'i', 0, 0, 0];
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&[
            0xc2, 0x3b, 0xd9, 0xcb, 0xe5, 0x71, 0x66, 0x45, 0xb3, 0xa7, 0x59, 0x5d, 0x8e, 0xec,
            0xa6, 0xe8,
        ]);
        payload.extend_from_slice(b"ok\0");
        assert_eq!(
            decode_all(&fields, &payload, &ValueMaps::new()),
            vec![
                "hi".to_string(),
                "True".to_string(),
                "cbd93bc2-71e5-4566-b3a7-595d8eeca6e8".to_string(),
                "ok".to_string(),
            ]
        );
    }

    #[test]
    fn test_truncated_field_renders_placeholder_and_later_fields_continue() {
        let fields = [
            FieldSchema::new("a", WireType::UInt16),
            FieldSchema::new("b", WireType::UInt64),
            FieldSchema::new("c", WireType::UInt16),
        ];
        let payload = [1u8, 0, 2, 0];
        assert_eq!(
            decode_all(&fields, &payload, &ValueMaps::new()),
            vec![
                "1".to_string(),
                "<unknown UInt64 value>".to_string(),
                "2".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_type_is_a_placeholder() {
        let field = FieldSchema::new("x", WireType::from_in_type("win:SID", None));
        assert_eq!(
            decode_all(&[field], &[], &ValueMaps::new()),
            vec!["<unknown type win:SID>".to_string()]
        );
    }

    #[test]
    fn test_skip_formatting_consumes_wire_bytes() {
        let fields = [
            FieldSchema::new("hidden", WireType::UInt32).skip_formatting(true),
            FieldSchema::new("shown", WireType::UInt32),
        ];
        let mut payload = 7u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&8u32.to_le_bytes());
        assert_eq!(
            decode_all(&fields, &payload, &ValueMaps::new()),
            vec![String::new(), "8".to_string()]
        );
    }

    #[test]
    fn test_in_type_mapping() {
        assert_eq!(WireType::from_in_type("win:FILETIME", None), WireType::FileTime);
        assert_eq!(WireType::from_in_type("win:Pointer", None), WireType::HexInt64);
        assert_eq!(WireType::from_in_type("win:Binary", Some("4")), WireType::Binary(4));
        assert_eq!(
            WireType::from_in_type("win:Binary", Some("len")),
            WireType::Unknown("win:Binary".to_string())
        );
    }

    #[test]
    fn test_context_classification_needs_well_known_provider() {
        let mut id = FieldSchema::new("id", WireType::UInt64);
        id.classify_context(true, true);
        assert!(id.is_context_id);
        id.classify_context(false, true);
        assert!(!id.is_context_id);

        let mut named_id = FieldSchema::new("id", WireType::UnicodeString);
        named_id.classify_context(true, true);
        assert!(!named_id.is_context_id);

        let mut ctx = FieldSchema::new("contextSequenceId_0", WireType::UInt64);
        ctx.classify_context(true, false);
        assert!(ctx.is_context_field);
    }
}
