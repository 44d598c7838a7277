//! The decoding model built from manifests: providers own events, events own fields.

mod event;
mod field;
mod provider;
mod template;
mod value_map;

pub use self::event::{EventBody, EventNames, EventSchema};
pub use self::field::{FieldSchema, FieldValue, WireType};
pub use self::provider::ProviderSchema;
pub use self::template::{MessageTemplate, TemplateError, Token};
pub use self::value_map::{MapDefinition, ValueMaps};
