#![allow(dead_code)]
use std::path::PathBuf;

use std::sync::Once;

use etl_format::{EventDescriptor, Guid, RawEventRecord};

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

pub fn samples_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("samples")
        .canonicalize()
        .unwrap()
}

pub fn test_provider_manifest() -> PathBuf {
    samples_dir().join("test-provider.man")
}

pub fn well_known_manifest() -> PathBuf {
    samples_dir().join("well-known.man")
}

pub fn sample_records() -> PathBuf {
    samples_dir().join("records.jsonl")
}

pub const TEST_PROVIDER: Guid = Guid::new(
    0x1111_1111,
    0x2222,
    0x3333,
    [0x44, 0x44, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55],
);

pub const SERVICE_FABRIC: Guid = Guid::new(
    0xcbd9_3bc2,
    0x71e5,
    0x4566,
    [0xb3, 0xa7, 0x59, 0x5d, 0x8e, 0xec, 0xa6, 0xe8],
);

/// 2016-01-02 03:04:05.678 UTC
pub const SAMPLE_FILETIME: i64 = 130_961_774_456_780_000;

pub fn event_record(provider: Guid, id: u16, payload: &[u8]) -> RawEventRecord<'_> {
    let descriptor = EventDescriptor {
        id,
        level: 4,
        ..EventDescriptor::default()
    };
    let mut record = RawEventRecord::new(provider, descriptor, payload);
    record.process_id = 100;
    record.thread_id = 200;
    record.timestamp = SAMPLE_FILETIME;
    record
}

/// NUL-terminated UTF-16LE.
pub fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|u| u.to_le_bytes())
        .collect()
}
