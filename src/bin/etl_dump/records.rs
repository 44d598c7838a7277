use anyhow::{Context, Result};
use etl_format::record::EXT_TYPE_RELATED_ACTIVITYID;
use etl_format::{EventDescriptor, ExtendedDataItem, Guid, RawEventRecord};
use serde::Deserialize;

/// One line of the `RECORDS` input.
#[derive(Debug, Deserialize)]
pub struct RecordLine {
    pub provider: String,
    pub id: u16,
    #[serde(default)]
    pub version: u8,
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub opcode: u8,
    #[serde(default)]
    pub task: u16,
    #[serde(default)]
    pub keywords: u64,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub tid: u32,
    /// FILETIME ticks.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub flags: u16,
    #[serde(default)]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub related_activity_id: Option<String>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// A [`RecordLine`] with its GUIDs parsed, owning the buffers a [`RawEventRecord`] borrows.
pub struct OwnedRecord {
    provider: Guid,
    descriptor: EventDescriptor,
    pid: u32,
    tid: u32,
    timestamp: i64,
    flags: u16,
    activity_id: Guid,
    related_activity_id: Option<[u8; 16]>,
    payload: Vec<u8>,
}

fn parse_guid(value: &str, field: &str) -> Result<Guid> {
    value
        .parse()
        .with_context(|| format!("invalid `{}` field", field))
}

impl OwnedRecord {
    pub fn from_json(line: &str) -> Result<Self> {
        let raw: RecordLine = serde_json::from_str(line).context("malformed record")?;

        let activity_id = match raw.activity_id.as_deref() {
            Some(value) => parse_guid(value, "activity_id")?,
            None => Guid::nil(),
        };
        let related_activity_id = match raw.related_activity_id.as_deref() {
            Some(value) => Some(parse_guid(value, "related_activity_id")?.to_bytes_le()),
            None => None,
        };

        Ok(OwnedRecord {
            provider: parse_guid(&raw.provider, "provider")?,
            descriptor: EventDescriptor {
                id: raw.id,
                version: raw.version,
                channel: raw.channel,
                level: raw.level,
                opcode: raw.opcode,
                task: raw.task,
                keywords: raw.keywords,
            },
            pid: raw.pid,
            tid: raw.tid,
            timestamp: raw.timestamp,
            flags: raw.flags,
            activity_id,
            related_activity_id,
            payload: raw.payload,
        })
    }

    pub fn extended_data(&self) -> Vec<ExtendedDataItem<'_>> {
        self.related_activity_id
            .iter()
            .map(|data| ExtendedDataItem {
                ext_type: EXT_TYPE_RELATED_ACTIVITYID,
                data,
            })
            .collect()
    }

    pub fn as_record<'a>(&'a self, extended_data: &'a [ExtendedDataItem<'a>]) -> RawEventRecord<'a> {
        let mut record = RawEventRecord::new(self.provider, self.descriptor, &self.payload);
        record.process_id = self.pid;
        record.thread_id = self.tid;
        record.timestamp = self.timestamp;
        record.flags = self.flags;
        record.activity_id = self.activity_id;
        record.extended_data = extended_data;
        record
    }
}
