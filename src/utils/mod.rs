pub(crate) mod bytes;
mod field_reader;
mod time;
mod utf16;

pub use self::field_reader::FieldReader;
pub(crate) use self::time::format_timestamp;
pub use self::time::{filetime_from_unix_nanos, format_filetime};
pub(crate) use self::utf16::decode_utf16le_bytes_z;
