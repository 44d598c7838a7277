use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use log::{debug, info, warn};

use crate::err::{DeserializationError, FormatError, ManifestError, Result};
use crate::guid::Guid;
use crate::manifest::{ManifestChunkReassembler, ManifestDocument};
use crate::output::{DecodedEvent, EventSink, FormatOutcome, render_line};
use crate::record::RawEventRecord;
use crate::schema::ProviderSchema;
use crate::settings::{FormatterSettings, ProviderKind};
use crate::utils::decode_utf16le_bytes_z;

/// Reserved descriptor of the events that carry an EventSource manifest.
const MANIFEST_EVENT_ID: u16 = 0xFFFE;
const MANIFEST_EVENT_OPCODE: u8 = 0xFE;
const MANIFEST_EVENT_TASK: u16 = 0xFFFE;

const STRING_EVENT_TYPE: &str = "String";

/// All loaded providers, and the entry point for formatting events.
///
/// Formatting mutates per-provider state (correlation stacks, manifest reassembly), so calls are
/// expected to be serialized by the caller.
#[derive(Debug)]
pub struct ManifestRegistry {
    settings: FormatterSettings,
    providers: HashMap<Guid, ProviderSchema, RandomState>,
    reassemblers: HashMap<Guid, ManifestChunkReassembler, RandomState>,
}

impl Default for ManifestRegistry {
    fn default() -> Self {
        ManifestRegistry::new(FormatterSettings::default())
    }
}

impl ManifestRegistry {
    pub fn new(settings: FormatterSettings) -> Self {
        ManifestRegistry {
            settings,
            providers: HashMap::default(),
            reassemblers: HashMap::default(),
        }
    }

    pub fn settings(&self) -> &FormatterSettings {
        &self.settings
    }

    /// Parse and register every provider of a manifest. Returns the number of providers added.
    pub fn load_manifest_str(&mut self, xml: &str) -> std::result::Result<usize, ManifestError> {
        let document = ManifestDocument::parse_str(xml)?;
        self.load_manifest(&document)
    }

    pub fn load_manifest_bytes(&mut self, xml: &[u8]) -> std::result::Result<usize, ManifestError> {
        let document = ManifestDocument::parse_bytes(xml)?;
        self.load_manifest(&document)
    }

    /// Register every provider of `document`.
    ///
    /// Either all providers are registered or none: a provider that fails to build, or whose
    /// GUID is already registered, rejects the whole manifest.
    pub fn load_manifest(
        &mut self,
        document: &ManifestDocument,
    ) -> std::result::Result<usize, ManifestError> {
        let schemas = self.build_providers(document)?;

        let mut seen: HashSet<Guid, RandomState> = HashSet::default();
        for schema in &schemas {
            if self.providers.contains_key(&schema.guid) || !seen.insert(schema.guid) {
                return Err(ManifestError::DuplicateProvider {
                    guid: schema.guid,
                    name: schema.name.clone(),
                });
            }
        }

        let count = schemas.len();
        for schema in schemas {
            debug!("registered provider `{}` {}", schema.name, schema.guid);
            self.providers.insert(schema.guid, schema);
        }
        Ok(count)
    }

    /// Register a schema built by hand.
    pub fn add_provider(&mut self, schema: ProviderSchema) -> std::result::Result<(), ManifestError> {
        if self.providers.contains_key(&schema.guid) {
            return Err(ManifestError::DuplicateProvider {
                guid: schema.guid,
                name: schema.name,
            });
        }
        self.providers.insert(schema.guid, schema);
        Ok(())
    }

    fn build_providers(
        &self,
        document: &ManifestDocument,
    ) -> std::result::Result<Vec<ProviderSchema>, ManifestError> {
        document
            .providers
            .iter()
            .map(|element| {
                let kind = self.settings.get_providers().kind(&element.guid);
                ProviderSchema::build(element, kind)
            })
            .collect()
    }

    pub fn provider(&self, guid: &Guid) -> Option<&ProviderSchema> {
        self.providers.get(guid)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderSchema> {
        self.providers.values()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Format one event.
    ///
    /// Unknown providers and event ids are reported as [`FormatOutcome::Unrecognized`]. Errors are
    /// returned only for events whose payload could not be decoded, or for an embedded manifest
    /// that was fully received but could not be loaded.
    pub fn format_event(&mut self, record: &RawEventRecord<'_>) -> Result<FormatOutcome> {
        let guid = record.provider_id;

        if self.settings.get_providers().is_dynamic(&guid) && is_manifest_event(record) {
            return self.consume_manifest_chunk(record);
        }

        if record.is_string_only() {
            return self.format_string_event(record);
        }

        match self.providers.get_mut(&guid) {
            Some(provider) => provider.format_event(record, &self.settings),
            None => Ok(FormatOutcome::Unrecognized),
        }
    }

    /// Format every record, handing lines to `sink` and errors to [`EventSink::on_error`].
    ///
    /// Returns the number of lines written.
    pub fn format_events<'a, I, S>(&mut self, records: I, sink: &mut S) -> std::io::Result<usize>
    where
        I: IntoIterator<Item = RawEventRecord<'a>>,
        S: EventSink + ?Sized,
    {
        let mut written = 0;
        for record in records {
            match self.format_event(&record) {
                Ok(FormatOutcome::Line(event)) => {
                    sink.write_line(&event.line)?;
                    written += 1;
                }
                Ok(_) => {}
                Err(e) => sink.on_error(e),
            }
        }
        Ok(written)
    }

    fn consume_manifest_chunk(&mut self, record: &RawEventRecord<'_>) -> Result<FormatOutcome> {
        let guid = record.provider_id;
        let reassembler = self.reassemblers.entry(guid).or_default();
        let Some(manifest) = reassembler.push(record.payload) else {
            return Ok(FormatOutcome::ManifestChunk { registered: false });
        };

        info!(
            "assembled embedded manifest of provider {} ({} bytes)",
            guid,
            manifest.len()
        );

        let schemas = ManifestDocument::parse_bytes(&manifest)
            .and_then(|document| self.build_providers(&document))
            .map_err(|source| {
                warn!("embedded manifest of provider {} failed to load: {}", guid, source);
                FormatError::EmbeddedManifest {
                    provider: guid,
                    source,
                }
            })?;

        let mut registered = false;
        for schema in schemas {
            if schema.guid != guid {
                debug!(
                    "ignoring provider {} declared in the embedded manifest of {}",
                    schema.guid, guid
                );
                continue;
            }
            // EventSource providers resend their manifest, the latest one wins.
            info!("registered embedded provider `{}` {}", schema.name, guid);
            self.providers.insert(guid, schema);
            registered = true;
        }

        if !registered {
            warn!("embedded manifest of provider {} does not declare it", guid);
        }
        Ok(FormatOutcome::ManifestChunk { registered })
    }

    fn format_string_event(&self, record: &RawEventRecord<'_>) -> Result<FormatOutcome> {
        let guid = record.provider_id;
        let provider_name = self
            .providers
            .get(&guid)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| guid.to_string());

        let even = record.payload.len() & !1;
        let text = decode_utf16le_bytes_z(&record.payload[..even]).map_err(|_| {
            FormatError::FailedToDecodeEvent {
                provider: guid,
                task: provider_name.clone(),
                event: STRING_EVENT_TYPE.to_string(),
                id: record.descriptor.id,
                source: DeserializationError::InvalidUtf16 {
                    what: "string-only payload",
                    offset: 0,
                },
            }
        })?;

        let line = render_line(
            &self.settings,
            record,
            &provider_name,
            &provider_name,
            STRING_EVENT_TYPE,
            &text,
        );
        Ok(FormatOutcome::Line(DecodedEvent {
            line,
            task_name: provider_name,
            event_type: STRING_EVENT_TYPE.to_string(),
            text,
            table_info: None,
        }))
    }

    /// Drop all pending correlation contexts and partially received manifests.
    pub fn reset_state(&mut self) {
        for provider in self.providers.values_mut() {
            provider.clear_correlation();
        }
        self.reassemblers.clear();
    }

    pub fn provider_kind(&self, guid: &Guid) -> ProviderKind {
        self.settings.get_providers().kind(guid)
    }
}

fn is_manifest_event(record: &RawEventRecord<'_>) -> bool {
    let d = &record.descriptor;
    d.id == MANIFEST_EVENT_ID && d.opcode == MANIFEST_EVENT_OPCODE && d.task == MANIFEST_EVENT_TASK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensure_env_logger_initialized;
    use crate::record::EventDescriptor;
    use crate::settings::ProviderAllowlist;
    use pretty_assertions::assert_eq;

    const GUID: Guid = Guid::new(0x0102_0304, 5, 6, [7; 8]);

    fn manifest(guid: Guid) -> String {
        format!(
            r#"<instrumentationManifest><instrumentation><events>
                 <provider name="P" guid="{}">
                   <events><event value="1" symbol="E" message="hello"/></events>
                 </provider>
               </events></instrumentation></instrumentationManifest>"#,
            guid
        )
    }

    fn utf16z(s: &str) -> Vec<u8> {
        s.encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(|u| u.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_duplicate_provider_rejects_the_whole_manifest() {
        let mut registry = ManifestRegistry::default();
        assert_eq!(registry.load_manifest_str(&manifest(GUID)).unwrap(), 1);

        let other = Guid::new(9, 9, 9, [9; 8]);
        let both = manifest(other).replace(
            "</events></instrumentation>",
            &format!(
                r#"<provider name="Q" guid="{}"><events/></provider></events></instrumentation>"#,
                GUID
            ),
        );
        assert!(matches!(
            registry.load_manifest_str(&both),
            Err(ManifestError::DuplicateProvider { guid, .. }) if guid == GUID
        ));
        assert!(registry.provider(&other).is_none());
        assert_eq!(registry.provider_count(), 1);
    }

    #[test]
    fn test_unknown_provider_is_unrecognized() {
        let mut registry = ManifestRegistry::default();
        let record = RawEventRecord::new(GUID, EventDescriptor::default(), &[]);
        assert_eq!(
            registry.format_event(&record).unwrap(),
            FormatOutcome::Unrecognized
        );
    }

    #[test]
    fn test_string_only_event() {
        let mut registry = ManifestRegistry::new(
            FormatterSettings::new().output_format(crate::OutputFormat::LegacyTaskName),
        );
        registry.load_manifest_str(&manifest(GUID)).unwrap();

        let payload = utf16z("free text");
        let mut record = RawEventRecord::new(GUID, EventDescriptor::default(), &payload);
        record.flags = crate::record::EVENT_HEADER_FLAG_STRING_ONLY;

        let event = registry.format_event(&record).unwrap().into_line().unwrap();
        assert_eq!(event.text, "free text");
        assert_eq!(event.line, "1601-1-1 00:00:00.000,0,0,0,P.String,free text");
    }

    #[test]
    fn test_embedded_manifest_registers_dynamic_provider() {
        ensure_env_logger_initialized();
        let settings =
            FormatterSettings::new().providers(ProviderAllowlist::new().dynamic(GUID));
        let mut registry = ManifestRegistry::new(settings);

        let xml = manifest(GUID).into_bytes();
        let (first, second) = xml.split_at(xml.len() / 2);
        let chunk = |number: u16, data: &[u8]| {
            let mut buf = vec![1, 1, 0, crate::manifest::MANIFEST_CHUNK_MAGIC];
            buf.extend_from_slice(&2u16.to_le_bytes());
            buf.extend_from_slice(&number.to_le_bytes());
            buf.extend_from_slice(data);
            buf
        };
        let descriptor = EventDescriptor {
            id: MANIFEST_EVENT_ID,
            opcode: MANIFEST_EVENT_OPCODE,
            task: MANIFEST_EVENT_TASK,
            ..EventDescriptor::default()
        };

        let c0 = chunk(0, first);
        let c1 = chunk(1, second);
        assert_eq!(
            registry
                .format_event(&RawEventRecord::new(GUID, descriptor, &c0))
                .unwrap(),
            FormatOutcome::ManifestChunk { registered: false }
        );
        assert_eq!(
            registry
                .format_event(&RawEventRecord::new(GUID, descriptor, &c1))
                .unwrap(),
            FormatOutcome::ManifestChunk { registered: true }
        );
        assert_eq!(registry.provider_count(), 1);

        let record = RawEventRecord::new(
            GUID,
            EventDescriptor {
                id: 1,
                ..EventDescriptor::default()
            },
            &[],
        );
        assert_eq!(
            registry.format_event(&record).unwrap().into_line().unwrap().text,
            "hello"
        );

        // A resent manifest replaces the provider instead of failing as a duplicate.
        let whole = {
            let mut buf = vec![1, 1, 0, crate::manifest::MANIFEST_CHUNK_MAGIC];
            buf.extend_from_slice(&1u16.to_le_bytes());
            buf.extend_from_slice(&0u16.to_le_bytes());
            buf.extend_from_slice(&xml);
            buf
        };
        assert_eq!(
            registry
                .format_event(&RawEventRecord::new(GUID, descriptor, &whole))
                .unwrap(),
            FormatOutcome::ManifestChunk { registered: true }
        );
    }

    #[test]
    fn test_broken_embedded_manifest_is_an_error() {
        let settings =
            FormatterSettings::new().providers(ProviderAllowlist::new().dynamic(GUID));
        let mut registry = ManifestRegistry::new(settings);

        let mut payload = vec![1, 1, 0, crate::manifest::MANIFEST_CHUNK_MAGIC];
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(b"<a></b>");
        let descriptor = EventDescriptor {
            id: MANIFEST_EVENT_ID,
            opcode: MANIFEST_EVENT_OPCODE,
            task: MANIFEST_EVENT_TASK,
            ..EventDescriptor::default()
        };

        assert!(matches!(
            registry.format_event(&RawEventRecord::new(GUID, descriptor, &payload)),
            Err(FormatError::EmbeddedManifest { provider, .. }) if provider == GUID
        ));
    }

    #[test]
    fn test_format_events_reports_errors_and_continues() {
        ensure_env_logger_initialized();
        struct Collect {
            lines: Vec<String>,
            errors: usize,
        }
        impl EventSink for Collect {
            fn write_line(&mut self, line: &str) -> std::io::Result<()> {
                self.lines.push(line.to_string());
                Ok(())
            }
            fn on_error(&mut self, _error: FormatError) {
                self.errors += 1;
            }
        }

        let mut registry = ManifestRegistry::default();
        registry.load_manifest_str(&manifest(GUID)).unwrap();

        let bad = [0x00u8, 0xDC, 0, 0];
        let mut string_only = RawEventRecord::new(GUID, EventDescriptor::default(), &bad);
        string_only.flags = crate::record::EVENT_HEADER_FLAG_STRING_ONLY;
        let good = RawEventRecord::new(
            GUID,
            EventDescriptor {
                id: 1,
                ..EventDescriptor::default()
            },
            &[],
        );

        let mut sink = Collect {
            lines: Vec::new(),
            errors: 0,
        };
        let written = registry
            .format_events([string_only, good], &mut sink)
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(sink.errors, 1);
        assert!(sink.lines[0].ends_with(",E,hello"));
    }
}
