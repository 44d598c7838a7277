//! A manifest-driven decoder for ETW/LTTng trace events.
//!
//! Load instrumentation manifests into a [`ManifestRegistry`], then feed it [`RawEventRecord`]s
//! to get formatted log lines back.
#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

pub use correlation::CorrelationStack;
pub use guid::Guid;
pub use manifest::{ManifestChunkReassembler, ManifestDocument};
pub use output::{DecodedEvent, EventSink, FormatOutcome, WriteSink, level_name};
pub use record::{EventDescriptor, ExtendedDataItem, RawEventRecord};
pub use registry::ManifestRegistry;
pub use schema::{EventSchema, FieldSchema, MessageTemplate, ProviderSchema, ValueMaps, WireType};
pub use settings::{FormatterSettings, OutputFormat, ProviderAllowlist, ProviderKind};
pub use utils::{FieldReader, filetime_from_unix_nanos, format_filetime};

pub mod correlation;
pub mod err;
mod guid;
pub mod manifest;
mod output;
pub mod record;
mod registry;
pub mod schema;
mod settings;
mod utils;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
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
