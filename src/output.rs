use std::borrow::Cow;
use std::io::{self, Write};

use log::warn;
use serde::Serialize;

use crate::err::FormatError;
use crate::record::RawEventRecord;
use crate::settings::{FormatterSettings, OutputFormat};
use crate::utils::format_filetime;

/// A fully formatted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedEvent {
    pub line: String,
    pub task_name: String,
    /// The event type, including an `@{id}` suffix when the event carries an `id` field.
    pub event_type: String,
    pub text: String,
    pub table_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatOutcome {
    Line(DecodedEvent),
    /// A child context event was stored and will surface through its parent.
    Deferred,
    /// No schema is loaded for the provider or event id.
    Unrecognized,
    /// An embedded manifest chunk was consumed; `registered` is set once it completed a manifest.
    ManifestChunk { registered: bool },
}

impl FormatOutcome {
    pub fn line(&self) -> Option<&DecodedEvent> {
        match self {
            FormatOutcome::Line(event) => Some(event),
            _ => None,
        }
    }

    pub fn into_line(self) -> Option<DecodedEvent> {
        match self {
            FormatOutcome::Line(event) => Some(event),
            _ => None,
        }
    }
}

pub fn level_name(level: u8) -> Cow<'static, str> {
    match level {
        1 => Cow::Borrowed("Critical"),
        2 => Cow::Borrowed("Error"),
        3 => Cow::Borrowed("Warning"),
        4 => Cow::Borrowed("Informational"),
        5 => Cow::Borrowed("Verbose"),
        other => Cow::Owned(other.to_string()),
    }
}

fn flatten_newlines(text: &str) -> Cow<'_, str> {
    if !text.contains(['\r', '\n']) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\t").replace(['\r', '\n'], "\t"))
}

/// Assemble the output line of one event.
pub(crate) fn render_line(
    settings: &FormatterSettings,
    record: &RawEventRecord<'_>,
    provider_name: &str,
    task_name: &str,
    event_type: &str,
    text: &str,
) -> String {
    let text = if settings.should_flatten_newlines() {
        flatten_newlines(text)
    } else {
        Cow::Borrowed(text)
    };
    let timestamp = format_filetime(record.timestamp);
    let level = level_name(record.descriptor.level);

    match settings.get_output_format() {
        OutputFormat::Default => format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            timestamp,
            record.thread_id,
            record.process_id,
            record.descriptor.id,
            record.activity_id,
            record.related_activity_id().unwrap_or_default(),
            level,
            task_name,
            record.descriptor.opcode,
            record.descriptor.keywords,
            event_type,
            text
        ),
        OutputFormat::LegacyTaskName | OutputFormat::LegacyEventSource => {
            let source = if settings.get_output_format() == OutputFormat::LegacyEventSource {
                provider_name
            } else {
                task_name
            };
            format!(
                "{},{},{},{},{}.{},{}",
                timestamp, level, record.thread_id, record.process_id, source, event_type, text
            )
        }
    }
}

/// Receives formatted lines from [`crate::ManifestRegistry::format_events`].
pub trait EventSink {
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Called for every event that failed to format. Processing continues afterwards.
    fn on_error(&mut self, error: FormatError) {
        warn!("{}", error);
    }
}

impl EventSink for Vec<String> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.push(line.to_string());
        Ok(())
    }
}

/// Writes one line per event to an [`io::Write`].
pub struct WriteSink<W: Write> {
    writer: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(writer: W) -> Self {
        WriteSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for WriteSink<W> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::Guid;
    use crate::record::{EXT_TYPE_RELATED_ACTIVITYID, EventDescriptor, ExtendedDataItem};
    use pretty_assertions::assert_eq;

    fn sample_record<'a>(extended: &'a [ExtendedDataItem<'a>]) -> RawEventRecord<'a> {
        let descriptor = EventDescriptor {
            id: 7,
            level: 4,
            opcode: 1,
            keywords: 0x8000_0000_0000_0001,
            ..EventDescriptor::default()
        };
        let mut record = RawEventRecord::new(Guid::nil(), descriptor, &[]);
        record.process_id = 100;
        record.thread_id = 200;
        record.timestamp = 130_961_774_456_780_000;
        record.activity_id = Guid::new(1, 2, 3, [4, 5, 6, 7, 8, 9, 10, 11]);
        record.extended_data = extended;
        record
    }

    #[test]
    fn test_default_line() {
        let line = render_line(
            &FormatterSettings::new(),
            &sample_record(&[]),
            "Provider",
            "Node",
            "Up",
            "line one\r\nline two",
        );
        assert_eq!(
            line,
            "2016-1-2 03:04:05.678,200,100,7,00000001-0002-0003-0405-060708090a0b,\
             00000000-0000-0000-0000-000000000000,Informational,Node,1,9223372036854775809,Up,\
             line one\tline two"
        );
    }

    #[test]
    fn test_related_activity_id_is_rendered() {
        let related = Guid::new(0xaa, 0xbb, 0xcc, [0; 8]).to_bytes_le();
        let items = [ExtendedDataItem {
            ext_type: EXT_TYPE_RELATED_ACTIVITYID,
            data: &related,
        }];
        let line = render_line(&FormatterSettings::new(), &sample_record(&items), "P", "T", "E", "x");
        assert!(line.contains(",000000aa-00bb-00cc-0000-000000000000,"));
    }

    #[test]
    fn test_legacy_lines() {
        let record = sample_record(&[]);
        let legacy = FormatterSettings::new().output_format(OutputFormat::LegacyTaskName);
        assert_eq!(
            render_line(&legacy, &record, "Provider", "Node", "Up", "text"),
            "2016-1-2 03:04:05.678,Informational,200,100,Node.Up,text"
        );

        let source = FormatterSettings::new().output_format(OutputFormat::LegacyEventSource);
        assert_eq!(
            render_line(&source, &record, "Provider", "Node", "Up", "text"),
            "2016-1-2 03:04:05.678,Informational,200,100,Provider.Up,text"
        );
    }

    #[test]
    fn test_newlines_are_kept_when_asked() {
        let settings = FormatterSettings::new()
            .output_format(OutputFormat::LegacyTaskName)
            .flatten_newlines(false);
        let line = render_line(&settings, &sample_record(&[]), "P", "T", "E", "a\nb");
        assert!(line.ends_with("T.E,a\nb"));
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(1), "Critical");
        assert_eq!(level_name(5), "Verbose");
        assert_eq!(level_name(0), "0");
        assert_eq!(level_name(16), "16");
    }

    #[test]
    fn test_sinks() {
        let mut lines: Vec<String> = Vec::new();
        lines.write_line("a").unwrap();
        assert_eq!(lines, vec!["a".to_string()]);

        let mut sink = WriteSink::new(Vec::new());
        sink.write_line("a").unwrap();
        sink.write_line("b").unwrap();
        assert_eq!(sink.into_inner(), b"a\nb\n".to_vec());
    }
}
