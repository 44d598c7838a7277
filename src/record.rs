use crate::guid::Guid;

/// Extended data item type carrying the related activity id.
pub const EXT_TYPE_RELATED_ACTIVITYID: u16 = 0x0001;

/// Set in [`RawEventRecord::flags`] when the payload is one UTF-16 string with no schema.
pub const EVENT_HEADER_FLAG_STRING_ONLY: u16 = 0x0004;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventDescriptor {
    pub id: u16,
    pub version: u8,
    pub channel: u8,
    pub level: u8,
    pub opcode: u8,
    pub task: u16,
    pub keywords: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedDataItem<'a> {
    pub ext_type: u16,
    pub data: &'a [u8],
}

/// One trace event as delivered by the trace reader.
///
/// The record only borrows its payload, it is not meant to outlive the callback that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEventRecord<'a> {
    pub provider_id: Guid,
    pub descriptor: EventDescriptor,
    pub process_id: u32,
    pub thread_id: u32,
    /// 100ns ticks since 1601-01-01 UTC.
    pub timestamp: i64,
    pub flags: u16,
    pub activity_id: Guid,
    pub payload: &'a [u8],
    pub extended_data: &'a [ExtendedDataItem<'a>],
}

impl<'a> RawEventRecord<'a> {
    pub fn new(provider_id: Guid, descriptor: EventDescriptor, payload: &'a [u8]) -> Self {
        RawEventRecord {
            provider_id,
            descriptor,
            process_id: 0,
            thread_id: 0,
            timestamp: 0,
            flags: 0,
            activity_id: Guid::nil(),
            payload,
            extended_data: &[],
        }
    }

    pub fn is_string_only(&self) -> bool {
        self.flags & EVENT_HEADER_FLAG_STRING_ONLY != 0
    }

    /// The related activity id, taken from the first 16-byte extended item of that type.
    pub fn related_activity_id(&self) -> Option<Guid> {
        self.extended_data
            .iter()
            .filter(|item| item.ext_type == EXT_TYPE_RELATED_ACTIVITYID)
            .find_map(|item| <&[u8; 16]>::try_from(item.data).ok())
            .map(Guid::from_bytes_le)
    }
}
