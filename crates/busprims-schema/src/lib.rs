//! Type descriptors and the packed bit-level codec.
//!
//! A [`TypeDescriptor`] describes the layout of a structure or union: field
//! kinds, bit widths, alignment and the maximum encoded size (extent).
//! [`serialize`] and [`deserialize`] convert between a [`Value`] tree and
//! the packed little-endian, LSB-first wire form. Decoding is tolerant of
//! short input, so types can grow trailing fields without breaking older
//! peers.

mod bits;
pub mod config;
pub mod descriptor;
pub mod deserializer;
pub mod error;
pub mod float16;
pub mod registry;
pub mod serializer;
pub mod value;

pub use config::RegistryConfig;
pub use descriptor::{DescriptorBuilder, Field, FieldKind, Layout, PrimitiveKind, TypeDescriptor};
pub use deserializer::deserialize;
pub use error::{Result, SchemaError};
pub use registry::{SchemaRegistry, ServiceDescriptor};
pub use serializer::serialize;
pub use value::Value;
