use ahash::RandomState;
use hashbrown::HashMap;
use log::trace;

use crate::correlation::CorrelationStack;
use crate::err::{FormatError, ManifestError, Result};
use crate::guid::Guid;
use crate::manifest::{MapKind, ProviderElement};
use crate::output::{DecodedEvent, FormatOutcome, render_line};
use crate::record::RawEventRecord;
use crate::schema::event::{EventBody, EventSchema};
use crate::schema::value_map::{MapDefinition, ValueMaps};
use crate::settings::{FormatterSettings, ProviderKind};

/// Every event schema of one provider, plus the correlation state its events share.
#[derive(Debug)]
pub struct ProviderSchema {
    pub guid: Guid,
    pub name: String,
    pub kind: ProviderKind,
    events: HashMap<u16, EventSchema, RandomState>,
    maps: ValueMaps,
    correlation: CorrelationStack,
}

impl ProviderSchema {
    pub fn new(guid: Guid, name: impl Into<String>, kind: ProviderKind) -> Self {
        ProviderSchema {
            guid,
            name: name.into(),
            kind,
            events: HashMap::default(),
            maps: ValueMaps::new(),
            correlation: CorrelationStack::new(),
        }
    }

    /// Turn a parsed `<provider>` element into a schema.
    ///
    /// Fails on the first event that references an unknown template, declares a message that does
    /// not fit its template, or reuses an event id.
    pub fn build(
        element: &ProviderElement,
        kind: ProviderKind,
    ) -> std::result::Result<Self, ManifestError> {
        let mut provider = ProviderSchema::new(element.guid, element.name.clone(), kind);
        let well_known = kind == ProviderKind::WellKnown;

        for map in &element.maps {
            let definition = match map.kind {
                MapKind::Value => MapDefinition::Enumeration(map.entries.iter().cloned().collect()),
                MapKind::Bit => MapDefinition::Bits(map.entries.clone()),
            };
            provider.maps.insert(map.name.clone(), definition);
        }

        for event in &element.events {
            let template = match event.template.as_deref() {
                Some(tid) => Some(element.templates.iter().find(|t| t.tid == tid).ok_or_else(
                    || ManifestError::UnknownTemplate {
                        provider: element.guid,
                        event_id: event.value,
                        template: tid.to_string(),
                    },
                )?),
                None => None,
            };

            let schema =
                EventSchema::build(element.guid, &element.name, event, template, well_known)?;
            provider.add_event(schema)?;
        }

        trace!(
            "built provider `{}` {} with {} events and {} maps",
            provider.name,
            provider.guid,
            provider.events.len(),
            provider.maps.len()
        );
        Ok(provider)
    }

    pub fn add_event(&mut self, event: EventSchema) -> std::result::Result<(), ManifestError> {
        if self.events.contains_key(&event.id) {
            return Err(ManifestError::DuplicateEvent {
                provider: self.guid,
                event_id: event.id,
            });
        }
        self.events.insert(event.id, event);
        Ok(())
    }

    pub fn insert_map(&mut self, name: impl Into<String>, map: MapDefinition) {
        self.maps.insert(name, map);
    }

    pub fn event(&self, id: u16) -> Option<&EventSchema> {
        self.events.get(&id)
    }

    pub fn events(&self) -> impl Iterator<Item = &EventSchema> {
        self.events.values()
    }

    pub fn maps(&self) -> &ValueMaps {
        &self.maps
    }

    pub fn correlation(&self) -> &CorrelationStack {
        &self.correlation
    }

    pub fn clear_correlation(&mut self) {
        self.correlation.clear();
    }

    /// Format `record` with the schema of its event id.
    pub fn format_event(
        &mut self,
        record: &RawEventRecord<'_>,
        settings: &FormatterSettings,
    ) -> Result<FormatOutcome> {
        let Some(event) = self.events.get(&record.descriptor.id) else {
            return Ok(FormatOutcome::Unrecognized);
        };

        let body = event
            .format(
                record,
                &self.maps,
                &mut self.correlation,
                settings.get_ansi_codec(),
            )
            .map_err(|source| FormatError::FailedToDecodeEvent {
                provider: self.guid,
                task: event.task_name.clone(),
                event: event.event_name.clone(),
                id: event.id,
                source,
            })?;

        match body {
            EventBody::Deferred => Ok(FormatOutcome::Deferred),
            EventBody::Rendered { event_type, text } => {
                let line = render_line(
                    settings,
                    record,
                    &self.name,
                    &event.task_name,
                    &event_type,
                    &text,
                );
                Ok(FormatOutcome::Line(DecodedEvent {
                    line,
                    task_name: event.task_name.clone(),
                    event_type,
                    text,
                    table_info: event.table_info.clone(),
                }))
            }
        }
    }
}
