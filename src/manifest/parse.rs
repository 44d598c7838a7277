use std::borrow::Cow;
use std::str::FromStr;

use log::trace;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::err::ManifestError;
use crate::guid::Guid;
use crate::manifest::{
    DataElement, EventElement, ManifestDocument, MapElement, MapKind, ProviderElement,
    TemplateElement, parse_manifest_int,
};

/// Attributes of one element, keyed by local name.
struct Attributes(Vec<(String, String)>);

impl Attributes {
    fn read(start: &BytesStart<'_>, position: u64) -> Result<Self, ManifestError> {
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| xml_error(position, e.into()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| xml_error(position, e))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Attributes(attrs))
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn owned(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }

    fn required(&self, element: &'static str, name: &'static str) -> Result<&str, ManifestError> {
        self.get(name).ok_or(ManifestError::MissingAttribute {
            element,
            attribute: name,
        })
    }

    fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some("true") | Some("1"))
    }

    fn int(&self, element: &'static str, name: &'static str) -> Result<Option<u64>, ManifestError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => parse_manifest_int(value).map(Some).ok_or_else(|| {
                ManifestError::InvalidAttribute {
                    element,
                    attribute: name,
                    value: value.to_string(),
                }
            }),
        }
    }
}

fn xml_error(position: u64, source: quick_xml::Error) -> ManifestError {
    ManifestError::Xml { position, source }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Builds the document while the reader walks the element tree.
#[derive(Default)]
struct DocumentBuilder {
    path: Vec<String>,
    document: ManifestDocument,
    provider: Option<ProviderElement>,
    template: Option<TemplateElement>,
    map: Option<MapElement>,
}

impl DocumentBuilder {
    fn open(&mut self, name: &str, attrs: &Attributes) -> Result<(), ManifestError> {
        let parent = self.path.last().cloned();
        match (name, parent.as_deref()) {
            ("provider", _) => {
                let raw_guid = attrs.required("provider", "guid")?;
                let guid = Guid::from_str(raw_guid).map_err(|_| ManifestError::InvalidGuid {
                    value: raw_guid.to_string(),
                })?;
                self.provider = Some(ProviderElement {
                    guid,
                    name: attrs.required("provider", "name")?.to_string(),
                    events: Vec::new(),
                    templates: Vec::new(),
                    maps: Vec::new(),
                });
            }
            ("event", Some("events")) => {
                let event = read_event(attrs)?;
                if let Some(provider) = self.provider.as_mut() {
                    provider.events.push(event);
                }
            }
            ("template", Some("templates")) => {
                self.template = Some(TemplateElement {
                    tid: attrs.required("template", "tid")?.to_string(),
                    data: Vec::new(),
                });
            }
            ("data", Some("template")) => {
                if let Some(template) = self.template.as_mut() {
                    template.data.push(DataElement {
                        name: attrs.required("data", "name")?.to_string(),
                        in_type: attrs.required("data", "inType")?.to_string(),
                        length: attrs.owned("length"),
                        map: attrs.owned("map"),
                        omit_if_zero: attrs.flag("omitIfZero"),
                        skip_formatting: attrs.flag("skipFormatting"),
                    });
                }
            }
            ("valueMap", _) | ("bitMap", _) => {
                let kind = if name == "bitMap" {
                    MapKind::Bit
                } else {
                    MapKind::Value
                };
                self.map = Some(MapElement {
                    name: attrs.required("map", "name")?.to_string(),
                    kind,
                    entries: Vec::new(),
                });
            }
            ("map", Some("valueMap")) | ("map", Some("bitMap")) => {
                let value = attrs.int("map", "value")?.ok_or(ManifestError::MissingAttribute {
                    element: "map",
                    attribute: "value",
                })?;
                let message = attrs.required("map", "message")?.to_string();
                if let Some(map) = self.map.as_mut() {
                    map.entries.push((value, message));
                }
            }
            ("string", Some("stringTable")) => {
                let id = attrs.required("string", "id")?.to_string();
                let value = attrs.required("string", "value")?.to_string();
                // Several cultures may be present; the first one wins.
                self.document.strings.entry(id).or_insert(value);
            }
            _ => {}
        }

        self.path.push(name.to_string());
        Ok(())
    }

    fn close(&mut self, name: &str) {
        self.path.pop();

        match name {
            "provider" => {
                if let Some(provider) = self.provider.take() {
                    trace!(
                        "parsed provider `{}` ({} events, {} templates, {} maps)",
                        provider.name,
                        provider.events.len(),
                        provider.templates.len(),
                        provider.maps.len()
                    );
                    self.document.providers.push(provider);
                }
            }
            "template" => {
                if let (Some(template), Some(provider)) =
                    (self.template.take(), self.provider.as_mut())
                {
                    provider.templates.push(template);
                }
            }
            "valueMap" | "bitMap" => {
                if let (Some(map), Some(provider)) = (self.map.take(), self.provider.as_mut()) {
                    provider.maps.push(map);
                }
            }
            _ => {}
        }
    }

    /// Resolve every `$(string.ID)` reference against the string table.
    fn finish(mut self) -> Result<ManifestDocument, ManifestError> {
        let strings = &self.document.strings;
        for provider in self.document.providers.iter_mut() {
            let provider_name = provider.name.as_str();
            for event in provider.events.iter_mut() {
                if let Some(message) = event.message.as_mut() {
                    *message = resolve_string(strings, provider_name, message)?.into_owned();
                }
            }
            for map in provider.maps.iter_mut() {
                for (_, label) in map.entries.iter_mut() {
                    *label = resolve_string(strings, provider_name, label)?.into_owned();
                }
            }
        }
        Ok(self.document)
    }
}

fn read_event(attrs: &Attributes) -> Result<EventElement, ManifestError> {
    let value = attrs
        .int("event", "value")?
        .ok_or(ManifestError::MissingAttribute {
            element: "event",
            attribute: "value",
        })?;
    let invalid = |attribute: &'static str, value: u64| ManifestError::InvalidAttribute {
        element: "event",
        attribute,
        value: value.to_string(),
    };

    let version = attrs.int("event", "version")?.unwrap_or(0);
    Ok(EventElement {
        value: u16::try_from(value).map_err(|_| invalid("value", value))?,
        version: u8::try_from(version).map_err(|_| invalid("version", version))?,
        level: attrs.owned("level"),
        task: attrs.owned("task"),
        symbol: attrs.owned("symbol"),
        opcode: attrs.owned("opcode"),
        keywords: attrs.owned("keywords"),
        template: attrs.owned("template"),
        message: attrs.owned("message"),
    })
}

fn resolve_string<'a>(
    strings: &hashbrown::HashMap<String, String, ahash::RandomState>,
    provider: &str,
    text: &'a str,
) -> Result<Cow<'a, str>, ManifestError> {
    match text
        .strip_prefix("$(string.")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(id) => strings
            .get(id)
            .map(|s| Cow::Owned(s.clone()))
            .ok_or_else(|| ManifestError::UnresolvedString {
                provider: provider.to_string(),
                reference: text.to_string(),
            }),
        None => Ok(Cow::Borrowed(text)),
    }
}

pub(crate) fn parse_document(xml: &str) -> Result<ManifestDocument, ManifestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut builder = DocumentBuilder::default();
    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event()
            .map_err(|e| xml_error(reader.buffer_position() as u64, e))?;

        match event {
            Event::Start(start) => {
                let attrs = Attributes::read(&start, position)?;
                builder.open(&local_name(&start), &attrs)?;
            }
            Event::Empty(start) => {
                let name = local_name(&start);
                let attrs = Attributes::read(&start, position)?;
                builder.open(&name, &attrs)?;
                builder.close(&name);
            }
            Event::End(end) => {
                builder.close(&String::from_utf8_lossy(end.local_name().as_ref()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <instrumentationManifest xmlns="http://schemas.microsoft.com/win/2004/08/events">
          <instrumentation>
            <events>
              <provider name="Test-Provider" guid="{11111111-2222-3333-4444-555555555555}">
                <events>
                  <event value="0x10" version="1" level="win:Informational" task="Node"
                         symbol="Node_Up" template="T1" message="$(string.Msg1)"/>
                  <event value="17" symbol="NoTemplate"/>
                </events>
                <templates>
                  <template tid="T1">
                    <data name="state" inType="win:UInt32" map="StateMap"/>
                    <data name="hidden" inType="win:UInt64" skipFormatting="true" omitIfZero="1"/>
                  </template>
                </templates>
                <maps>
                  <valueMap name="StateMap">
                    <map value="5" message="$(string.Ready)"/>
                  </valueMap>
                  <bitMap name="Flags">
                    <map value="0x1" message="A"/>
                    <map value="0x2" message="B"/>
                  </bitMap>
                </maps>
              </provider>
            </events>
          </instrumentation>
          <localization>
            <resources culture="en-US">
              <stringTable>
                <string id="Msg1" value="State=%1"/>
                <string id="Ready" value="Ready"/>
              </stringTable>
            </resources>
          </localization>
        </instrumentationManifest>
    "#};

    #[test]
    fn test_parses_provider_tree() {
        let doc = ManifestDocument::parse_str(MANIFEST).unwrap();
        assert_eq!(doc.providers.len(), 1);
        let provider = &doc.providers[0];
        assert_eq!(provider.name, "Test-Provider");
        assert_eq!(
            provider.guid.to_string(),
            "11111111-2222-3333-4444-555555555555"
        );

        assert_eq!(provider.events.len(), 2);
        let event = &provider.events[0];
        assert_eq!(event.value, 16);
        assert_eq!(event.version, 1);
        assert_eq!(event.symbol.as_deref(), Some("Node_Up"));
        assert_eq!(event.message.as_deref(), Some("State=%1"));
        assert_eq!(provider.events[1].template, None);

        let template = &provider.templates[0];
        assert_eq!(template.tid, "T1");
        assert_eq!(template.data.len(), 2);
        assert_eq!(template.data[0].map.as_deref(), Some("StateMap"));
        assert!(template.data[1].skip_formatting);
        assert!(template.data[1].omit_if_zero);

        assert_eq!(provider.maps.len(), 2);
        assert_eq!(provider.maps[0].kind, MapKind::Value);
        assert_eq!(provider.maps[0].entries, vec![(5, "Ready".to_string())]);
        assert_eq!(provider.maps[1].kind, MapKind::Bit);
        assert_eq!(provider.maps[1].entries.len(), 2);
    }

    #[test]
    fn test_unresolved_string_is_fatal() {
        let xml = MANIFEST.replace("$(string.Ready)", "$(string.Missing)");
        match ManifestDocument::parse_str(&xml) {
            Err(ManifestError::UnresolvedString { provider, reference }) => {
                assert_eq!(provider, "Test-Provider");
                assert_eq!(reference, "$(string.Missing)");
            }
            other => panic!("expected an unresolved string error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_guid_and_missing_attribute() {
        let xml = MANIFEST.replace("{11111111-2222-3333-4444-555555555555}", "not-a-guid");
        assert!(matches!(
            ManifestDocument::parse_str(&xml),
            Err(ManifestError::InvalidGuid { .. })
        ));

        let xml = MANIFEST.replace("inType=\"win:UInt32\"", "");
        assert!(matches!(
            ManifestDocument::parse_str(&xml),
            Err(ManifestError::MissingAttribute {
                element: "data",
                attribute: "inType"
            })
        ));
    }

    #[test]
    fn test_malformed_xml_reports_position() {
        let xml = "<instrumentationManifest><provider></instrumentationManifest>";
        assert!(matches!(
            ManifestDocument::parse_str(xml),
            Err(ManifestError::MissingAttribute { .. }) | Err(ManifestError::Xml { .. })
        ));
        assert!(matches!(
            ManifestDocument::parse_str("<a></b>"),
            Err(ManifestError::Xml { .. })
        ));
    }

    #[test]
    fn test_parse_bytes_strips_bom_and_rejects_invalid_utf8() {
        let mut bytes = "\u{feff}".as_bytes().to_vec();
        bytes.extend_from_slice(MANIFEST.as_bytes());
        bytes.push(0);
        assert_eq!(ManifestDocument::parse_bytes(&bytes).unwrap().providers.len(), 1);

        assert!(matches!(
            ManifestDocument::parse_bytes(&[0xff, 0xfe, 0x00]),
            Err(ManifestError::NotUtf8 { .. })
        ));
    }
}
