use std::collections::BTreeMap;

use tracing::trace;

use crate::bits::{bits_for, BitReader};
use crate::descriptor::{FieldKind, Layout, PrimitiveKind, TypeDescriptor};
use crate::error::{Result, SchemaError};
use crate::float16::f16_bits_to_f32;
use crate::serializer::FieldPath;
use crate::value::Value;

/// Decode `bytes` according to `descriptor`.
///
/// Input past the descriptor's extent is ignored and missing input reads as
/// zero, so a shorter encoding from an older revision of the type decodes
/// with its trailing fields zeroed or empty. Only an array length or union
/// tag outside its declared range is an error.
pub fn deserialize(bytes: &[u8], descriptor: &TypeDescriptor) -> Result<Value> {
    let input = &bytes[..bytes.len().min(descriptor.extent())];
    let mut decoder = Decoder {
        reader: BitReader::new(input),
        path: FieldPath::default(),
    };
    let value = decoder.composite(descriptor)?;
    trace!(
        type_name = descriptor.name(),
        bits = decoder.reader.position(),
        available = input.len() * 8,
        "deserialized"
    );
    Ok(value)
}

struct Decoder<'a> {
    reader: BitReader<'a>,
    path: FieldPath,
}

impl Decoder<'_> {
    fn composite(&mut self, descriptor: &TypeDescriptor) -> Result<Value> {
        self.reader.align(descriptor.alignment());
        match descriptor.layout() {
            Layout::Structure => {
                let mut members = BTreeMap::new();
                for field in descriptor.fields() {
                    self.reader.align(field.alignment);
                    if let FieldKind::Primitive(PrimitiveKind::Void(bits)) = field.kind {
                        self.reader.skip(u64::from(bits));
                        continue;
                    }
                    self.path.push_field(&field.name);
                    let value = self.kind(&field.kind)?;
                    self.path.pop();
                    members.insert(field.name.clone(), value);
                }
                Ok(Value::Struct(members))
            }
            Layout::Union => {
                let variants = descriptor.fields();
                let tag = self.reader.read(descriptor.tag_bits());
                let Some(field) = usize::try_from(tag).ok().and_then(|t| variants.get(t)) else {
                    return Err(SchemaError::CapacityExceeded {
                        path: self.path.render(),
                        length: tag,
                        capacity: variants.len() as u64 - 1,
                    });
                };
                self.reader.align(field.alignment);
                self.path.push_field(&field.name);
                let value = self.kind(&field.kind)?;
                self.path.pop();
                Ok(Value::union(tag as u32, value))
            }
        }
    }

    fn kind(&mut self, kind: &FieldKind) -> Result<Value> {
        match kind {
            FieldKind::Primitive(p) => Ok(self.primitive(*p)),
            FieldKind::FixedArray { element, length } => self.elements(element, *length),
            FieldKind::VariableArray { element, capacity } => {
                let length = self.reader.read(bits_for(*capacity as u64));
                if length > *capacity as u64 {
                    return Err(SchemaError::CapacityExceeded {
                        path: self.path.render(),
                        length,
                        capacity: *capacity as u64,
                    });
                }
                self.elements(element, length as usize)
            }
            FieldKind::Composite(descriptor) => self.composite(descriptor),
        }
    }

    fn elements(&mut self, element: &FieldKind, length: usize) -> Result<Value> {
        let mut items = Vec::with_capacity(length);
        for i in 0..length {
            self.path.push_index(i);
            items.push(self.kind(element)?);
            self.path.pop();
        }
        Ok(Value::Array(items))
    }

    fn primitive(&mut self, kind: PrimitiveKind) -> Value {
        let bits = kind.bit_width();
        let raw = self.reader.read(bits);
        match kind {
            PrimitiveKind::Bool => Value::Bool(raw != 0),
            PrimitiveKind::Unsigned(_) | PrimitiveKind::Void(_) => Value::Unsigned(raw),
            PrimitiveKind::Signed(_) => {
                let shift = 64 - bits;
                Value::Signed(((raw << shift) as i64) >> shift)
            }
            PrimitiveKind::Float(16) => Value::Float(f64::from(f16_bits_to_f32(raw as u16))),
            PrimitiveKind::Float(32) => Value::Float(f64::from(f32::from_bits(raw as u32))),
            PrimitiveKind::Float(_) => Value::Float(f64::from_bits(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;
    use crate::serializer::serialize;

    fn sample() -> Arc<TypeDescriptor> {
        let point = Arc::new(
            TypeDescriptor::structure("demo.Point")
                .field("x", FieldKind::int(12))
                .field("y", FieldKind::int(12))
                .build()
                .unwrap(),
        );
        let reading = Arc::new(
            TypeDescriptor::union("demo.Reading")
                .field("none", FieldKind::uint(1))
                .field("scalar", FieldKind::float(16))
                .field("point", FieldKind::composite(point.clone()))
                .build()
                .unwrap(),
        );
        Arc::new(
            TypeDescriptor::structure("demo.Sample")
                .field("ok", FieldKind::boolean())
                .void(2)
                .field("level", FieldKind::uint(5))
                .field("offset", FieldKind::int(7))
                .aligned_field("gain", FieldKind::float(32), 8)
                .field("history", FieldKind::vla(FieldKind::uint(10), 6))
                .field("corners", FieldKind::array(FieldKind::composite(point), 2))
                .field("reading", FieldKind::composite(reading))
                .field("ratio", FieldKind::float(64))
                .build()
                .unwrap(),
        )
    }

    fn point(x: i64, y: i64) -> Value {
        Value::structure([("x", Value::Signed(x)), ("y", Value::Signed(y))])
    }

    prop_compose! {
        fn sample_value()(
            ok in any::<bool>(),
            level in 0u64..32,
            offset in -64i64..64,
            gain in any::<f32>().prop_filter("finite", |g| g.is_finite()),
            history in prop::collection::vec(0u64..1024, 0..=6),
            corners in prop::collection::vec((-2048i64..2048, -2048i64..2048), 2),
            reading in 0u32..3,
            scalar in -1024i32..1024,
            ratio in any::<f64>().prop_filter("finite", |r| r.is_finite()),
        ) -> Value {
            let reading_value = match reading {
                0 => Value::Unsigned(1),
                1 => Value::Float(f64::from(scalar) / 4.0),
                _ => point(corners[0].1, corners[0].0),
            };
            Value::structure([
                ("ok", Value::Bool(ok)),
                ("level", Value::Unsigned(level)),
                ("offset", Value::Signed(offset)),
                ("gain", Value::Float(f64::from(gain))),
                ("history", Value::Array(history.into_iter().map(Value::Unsigned).collect())),
                ("corners", Value::Array(corners.iter().map(|&(x, y)| point(x, y)).collect())),
                ("reading", Value::union(reading, reading_value)),
                ("ratio", Value::Float(ratio)),
            ])
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(value in sample_value()) {
            let d = sample();
            let bytes = serialize(&value, &d).unwrap();
            prop_assert!(bytes.len() <= d.extent());
            prop_assert_eq!(deserialize(&bytes, &d).unwrap(), value);
        }

        #[test]
        fn prop_truncated_input_never_fails(value in sample_value(), cut in 0usize..64) {
            let d = sample();
            let bytes = serialize(&value, &d).unwrap();
            let cut = cut.min(bytes.len());
            prop_assert!(deserialize(&bytes[..cut], &d).is_ok());
        }
    }

    #[test]
    fn test_missing_trailing_fields_are_zero() {
        let old = TypeDescriptor::structure("demo.Config")
            .field("a", FieldKind::uint(8))
            .build()
            .unwrap();
        let new = TypeDescriptor::structure("demo.Config")
            .field("a", FieldKind::uint(8))
            .field("b", FieldKind::int(16))
            .field("c", FieldKind::vla(FieldKind::uint(8), 4))
            .build()
            .unwrap();
        let bytes = serialize(&Value::structure([("a", Value::from(9u8))]), &old).unwrap();
        let value = deserialize(&bytes, &new).unwrap();
        assert_eq!(
            value,
            Value::structure([
                ("a", Value::Unsigned(9)),
                ("b", Value::Signed(0)),
                ("c", Value::Array(vec![])),
            ])
        );
        assert_eq!(deserialize(&[], &new).unwrap().get("a"), Some(&Value::Unsigned(0)));
    }

    #[test]
    fn test_input_beyond_extent_ignored() {
        let d = TypeDescriptor::structure("demo.Byte")
            .field("v", FieldKind::uint(8))
            .build()
            .unwrap();
        assert_eq!(
            deserialize(&[7, 1, 2, 3], &d).unwrap(),
            Value::structure([("v", Value::Unsigned(7))])
        );
    }

    #[test]
    fn test_length_above_capacity_fails() {
        let d = TypeDescriptor::structure("demo.List")
            .field("items", FieldKind::vla(FieldKind::uint(8), 5))
            .build()
            .unwrap();
        // 3-bit prefix can encode 7 > 5.
        assert!(matches!(
            deserialize(&[0b111], &d),
            Err(SchemaError::CapacityExceeded { length: 7, capacity: 5, .. })
        ));
    }

    #[test]
    fn test_union_tag_out_of_range_fails() {
        let d = TypeDescriptor::union("demo.Tri")
            .field("a", FieldKind::boolean())
            .field("b", FieldKind::boolean())
            .field("c", FieldKind::boolean())
            .build()
            .unwrap();
        assert!(matches!(
            deserialize(&[0b11], &d),
            Err(SchemaError::CapacityExceeded { length: 3, .. })
        ));
        assert_eq!(
            deserialize(&[0b110], &d).unwrap(),
            Value::union(2, Value::Bool(true))
        );
    }

    #[test]
    fn test_sign_extension() {
        let d = TypeDescriptor::structure("demo.Signed")
            .field("a", FieldKind::int(3))
            .field("b", FieldKind::int(64))
            .build()
            .unwrap();
        let v = Value::structure([("a", Value::Signed(-4)), ("b", Value::Signed(i64::MIN))]);
        assert_eq!(deserialize(&serialize(&v, &d).unwrap(), &d).unwrap(), v);
    }
}
