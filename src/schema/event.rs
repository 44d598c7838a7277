use encoding::EncodingRef;
use log::debug;

use crate::correlation::{CONTEXT_NOT_FOUND_MARKER, CorrelationStack};
use crate::err::{DeserializationResult, ManifestError};
use crate::guid::Guid;
use crate::manifest::{DataElement, EventElement, TemplateElement};
use crate::record::RawEventRecord;
use crate::schema::field::{CONTEXT_ID_FIELD, FieldSchema, FieldValue, WireType};
use crate::schema::template::MessageTemplate;
use crate::schema::value_map::ValueMaps;
use crate::utils::FieldReader;

/// Field whose value replaces the event type in the output of first-party providers.
const TYPE_FIELD: &str = "type";

/// The result of running an event through its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    /// A child event: the text went onto the correlation stack and there is nothing to show yet.
    Deferred,
    Rendered { event_type: String, text: String },
}

/// Names derived for an event from its manifest declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNames {
    pub task_name: String,
    pub event_name: String,
    pub table_info: Option<String>,
}

impl EventNames {
    /// First-party symbols encode the task in the symbol: `Task_Event`, or `_Table_Event` for
    /// events that also feed a table.
    pub fn well_known(symbol: &str, task: Option<&str>) -> EventNames {
        if let Some(rest) = symbol.strip_prefix('_') {
            let (table, event) = rest.split_once('_').unwrap_or((rest, rest));
            return EventNames {
                task_name: task.unwrap_or(table).to_string(),
                event_name: event.to_string(),
                table_info: Some(table.to_string()),
            };
        }

        match symbol.split_once('_') {
            Some((task, event)) => EventNames {
                task_name: task.to_string(),
                event_name: event.to_string(),
                table_info: None,
            },
            None => EventNames {
                task_name: task.unwrap_or(symbol).to_string(),
                event_name: symbol.to_string(),
                table_info: None,
            },
        }
    }

    pub fn other(event: &EventElement, provider_name: &str) -> EventNames {
        let event_name = event
            .symbol
            .clone()
            .or_else(|| {
                event
                    .opcode
                    .as_deref()
                    .map(|op| op.strip_prefix("win:").unwrap_or(op).to_string())
            })
            .unwrap_or_else(|| format!("EventId{}", event.value));

        EventNames {
            task_name: event
                .task
                .clone()
                .unwrap_or_else(|| provider_name.to_string()),
            event_name,
            table_info: None,
        }
    }
}

/// Decoding rules for one event id of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    pub id: u16,
    pub version: u8,
    pub event_name: String,
    pub task_name: String,
    pub table_info: Option<String>,
    pub level: Option<String>,
    pub opcode: Option<String>,
    pub keywords: Option<String>,
    pub fields: Vec<FieldSchema>,
    pub template: MessageTemplate,
    pub is_child_event: bool,
    pub is_parent_event: bool,
    pub first_context_field_index: Option<usize>,
    pub type_field_index: Option<usize>,
    pub id_field_index: Option<usize>,
}

/// `{base}.high` + `{base}.low` (both `win:UInt64`) declare one 128-bit integer.
fn large_integer_base<'a>(data: &'a [DataElement], index: usize) -> Option<&'a str> {
    let high = data.get(index)?;
    let low = data.get(index + 1)?;
    let base = high.name.strip_suffix(".high")?;
    let is_u64 = |d: &DataElement| WireType::from_in_type(&d.in_type, None) == WireType::UInt64;

    (is_u64(high) && is_u64(low) && low.name.strip_suffix(".low") == Some(base)).then_some(base)
}

/// Build field schemas from template data items.
///
/// Returns the fields and, for every manifest data slot, the index of the field owning it.
fn build_fields(data: &[DataElement], well_known: bool) -> (Vec<FieldSchema>, Vec<usize>) {
    let mut fields: Vec<FieldSchema> = Vec::with_capacity(data.len());
    let mut slot_to_field = Vec::with_capacity(data.len());

    let mut i = 0;
    while i < data.len() {
        let item = &data[i];
        let field = match large_integer_base(data, i) {
            Some(base) => FieldSchema::new(base, WireType::LargeInteger),
            None => {
                let wire_type = WireType::from_in_type(&item.in_type, item.length.as_deref());
                let field = FieldSchema::new(&item.name, wire_type);
                match item.map.as_deref() {
                    Some(map) => field.with_map(map),
                    None => field,
                }
            }
        }
        .omit_if_zero(item.omit_if_zero)
        .skip_formatting(item.skip_formatting);

        slot_to_field.extend(std::iter::repeat_n(fields.len(), field.encoded_width));
        i += field.encoded_width;
        fields.push(field);
    }

    for (index, field) in fields.iter_mut().enumerate() {
        field.classify_context(well_known, index == 0);
    }

    (fields, slot_to_field)
}

impl EventSchema {
    /// Build the schema of `event`, with `template` being the template it references (if any).
    pub fn build(
        provider_guid: Guid,
        provider_name: &str,
        event: &EventElement,
        template: Option<&TemplateElement>,
        well_known: bool,
    ) -> Result<EventSchema, ManifestError> {
        let names = match event.symbol.as_deref() {
            Some(symbol) if well_known => EventNames::well_known(symbol, event.task.as_deref()),
            _ => EventNames::other(event, provider_name),
        };

        let data = template.map_or(&[][..], |t| t.data.as_slice());
        let (fields, slot_to_field) = build_fields(data, well_known);

        let template = match event.message.as_deref() {
            Some(message) => MessageTemplate::parse(message, &slot_to_field).map_err(|e| {
                ManifestError::TemplateFieldOutOfRange {
                    provider: provider_guid,
                    event_id: event.value,
                    index: e.index,
                    field_count: e.slot_count,
                }
            })?,
            None => MessageTemplate::positional(fields.len()),
        };

        let is_child_event = fields.first().is_some_and(|f| f.is_context_id);
        let first_context_field_index = if is_child_event {
            None
        } else {
            fields.iter().position(|f| f.is_context_field)
        };
        let type_field_index = if well_known {
            fields.iter().position(|f| f.name == TYPE_FIELD)
        } else {
            None
        };
        let id_field_index = fields
            .first()
            .filter(|f| !is_child_event && f.name == CONTEXT_ID_FIELD)
            .map(|_| 0);

        Ok(EventSchema {
            id: event.value,
            version: event.version,
            event_name: names.event_name,
            task_name: names.task_name,
            table_info: names.table_info,
            level: event.level.clone(),
            opcode: event.opcode.clone(),
            keywords: event.keywords.clone(),
            fields,
            template,
            is_child_event,
            is_parent_event: first_context_field_index.is_some(),
            first_context_field_index,
            type_field_index,
            id_field_index,
        })
    }

    /// Decode `record` and render its message.
    ///
    /// Parent events consume pending child contexts from `stack`, child events push onto it and
    /// yield [`EventBody::Deferred`]. The stack is only touched once every field decoded.
    pub fn format(
        &self,
        record: &RawEventRecord<'_>,
        maps: &ValueMaps,
        stack: &mut CorrelationStack,
        ansi_codec: EncodingRef,
    ) -> DeserializationResult<EventBody> {
        let mut reader = FieldReader::new(record.payload);
        let (mut values, keys): (Vec<String>, Vec<Option<u64>>) = self
            .fields
            .iter()
            .map(|field| field.decode_value(&mut reader, maps, ansi_codec))
            .collect::<DeserializationResult<Vec<FieldValue>>>()?
            .into_iter()
            .map(|value| (value.text, value.number))
            .unzip();

        if reader.remaining() > 0 {
            debug!(
                "event {} ({}) left {} payload bytes undecoded",
                self.id,
                self.event_name,
                reader.remaining()
            );
        }

        let (pid, tid) = (record.process_id, record.thread_id);

        if self.is_parent_event {
            for (index, field) in self.fields.iter().enumerate().rev() {
                if !field.is_context_field {
                    continue;
                }
                // A truncated key has no context to pop.
                let Some(key) = keys[index] else {
                    values[index] = String::new();
                    continue;
                };
                let clear_remainder = self.first_context_field_index == Some(index);
                values[index] = stack
                    .pop(pid, tid, key, clear_remainder)
                    .unwrap_or_else(|| CONTEXT_NOT_FOUND_MARKER.to_string());
            }
        }

        let mut event_type = match self.type_field_index {
            Some(index) => values[index].clone(),
            None => self.event_name.clone(),
        };

        let text = self.template.render(&values);

        if self.is_child_event {
            match keys[0] {
                Some(key) => stack.push(pid, tid, key, &text),
                None => debug!("child event {} has no context key, dropped", self.id),
            }
            return Ok(EventBody::Deferred);
        }

        if let Some(index) = self.id_field_index {
            event_type = format!("{}@{}", event_type, values[index]);
        }

        Ok(EventBody::Rendered { event_type, text })
    }
}
