use tracing::trace;

use crate::bits::{bits_for, mask, BitWriter};
use crate::descriptor::{FieldKind, Layout, PrimitiveKind, TypeDescriptor};
use crate::error::{Result, SchemaError};
use crate::float16::f32_to_f16_bits;
use crate::value::Value;

/// Dotted location inside a value tree, rendered only when an error is built.
#[derive(Debug, Default)]
pub(crate) struct FieldPath(Vec<Segment>);

#[derive(Debug)]
enum Segment {
    Field(String),
    Index(usize),
}

impl FieldPath {
    pub(crate) fn push_field(&mut self, name: &str) {
        self.0.push(Segment::Field(name.to_owned()));
    }

    pub(crate) fn push_index(&mut self, index: usize) {
        self.0.push(Segment::Index(index));
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }

    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        for segment in &self.0 {
            match segment {
                Segment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                Segment::Index(i) => out.push_str(&format!("[{i}]")),
            }
        }
        out
    }
}

/// Encode `value` as packed little-endian, LSB-first bits.
///
/// Values wider than their field fail with
/// [`SchemaError::ValueOutOfRange`]; nothing is truncated implicitly.
pub fn serialize(value: &Value, descriptor: &TypeDescriptor) -> Result<Vec<u8>> {
    let mut encoder = Encoder {
        writer: BitWriter::with_capacity(descriptor.extent()),
        path: FieldPath::default(),
    };
    encoder.composite(value, descriptor)?;
    let bits = encoder.writer.position();
    trace!(type_name = descriptor.name(), bits, "serialized");
    Ok(encoder.writer.into_bytes())
}

struct Encoder {
    writer: BitWriter,
    path: FieldPath,
}

impl Encoder {
    fn mismatch(&self, expected: impl Into<String>, found: &Value) -> SchemaError {
        SchemaError::TypeMismatch {
            path: self.path.render(),
            expected: format!("{} (found {})", expected.into(), found.kind_name()),
        }
    }

    fn composite(&mut self, value: &Value, descriptor: &TypeDescriptor) -> Result<()> {
        self.writer.align(descriptor.alignment());
        match descriptor.layout() {
            Layout::Structure => {
                let Value::Struct(members) = value else {
                    return Err(self.mismatch(format!("struct {descriptor}"), value));
                };
                if let Some(unknown) = members.keys().find(|k| {
                    descriptor
                        .field(k)
                        .is_none_or(|field| field.kind.is_void())
                }) {
                    self.path.push_field(unknown);
                    return Err(SchemaError::TypeMismatch {
                        path: self.path.render(),
                        expected: format!("a field of {descriptor}"),
                    });
                }
                for field in descriptor.fields() {
                    self.writer.align(field.alignment);
                    if let FieldKind::Primitive(PrimitiveKind::Void(bits)) = field.kind {
                        self.writer.write(0, u32::from(bits));
                        continue;
                    }
                    self.path.push_field(&field.name);
                    let Some(member) = members.get(&field.name) else {
                        return Err(SchemaError::TypeMismatch {
                            path: self.path.render(),
                            expected: format!("{} value", field.kind),
                        });
                    };
                    self.kind(member, &field.kind)?;
                    self.path.pop();
                }
                Ok(())
            }
            Layout::Union => {
                let Value::Union { tag, value: inner } = value else {
                    return Err(self.mismatch(format!("union {descriptor}"), value));
                };
                let variants = descriptor.fields();
                let Some(field) = variants.get(*tag as usize) else {
                    return Err(SchemaError::CapacityExceeded {
                        path: self.path.render(),
                        length: u64::from(*tag),
                        capacity: variants.len() as u64 - 1,
                    });
                };
                self.writer.write(u64::from(*tag), descriptor.tag_bits());
                self.writer.align(field.alignment);
                self.path.push_field(&field.name);
                self.kind(inner, &field.kind)?;
                self.path.pop();
                Ok(())
            }
        }
    }

    fn kind(&mut self, value: &Value, kind: &FieldKind) -> Result<()> {
        match kind {
            FieldKind::Primitive(p) => self.primitive(value, *p),
            FieldKind::FixedArray { element, length } => {
                let items = self.items(value, kind)?;
                if items.len() > *length {
                    return Err(self.capacity(items.len(), *length));
                }
                if items.len() < *length {
                    return Err(SchemaError::TypeMismatch {
                        path: self.path.render(),
                        expected: format!("{length} elements, found {}", items.len()),
                    });
                }
                self.elements(items, element)
            }
            FieldKind::VariableArray { element, capacity } => {
                let items = self.items(value, kind)?;
                if items.len() > *capacity {
                    return Err(self.capacity(items.len(), *capacity));
                }
                self.writer
                    .write(items.len() as u64, bits_for(*capacity as u64));
                self.elements(items, element)
            }
            FieldKind::Composite(descriptor) => self.composite(value, descriptor),
        }
    }

    fn items<'v>(&self, value: &'v Value, kind: &FieldKind) -> Result<&'v [Value]> {
        value
            .as_array()
            .ok_or_else(|| self.mismatch(kind.to_string(), value))
    }

    fn capacity(&self, length: usize, capacity: usize) -> SchemaError {
        SchemaError::CapacityExceeded {
            path: self.path.render(),
            length: length as u64,
            capacity: capacity as u64,
        }
    }

    fn elements(&mut self, items: &[Value], element: &FieldKind) -> Result<()> {
        for (i, item) in items.iter().enumerate() {
            self.path.push_index(i);
            self.kind(item, element)?;
            self.path.pop();
        }
        Ok(())
    }

    fn primitive(&mut self, value: &Value, kind: PrimitiveKind) -> Result<()> {
        let bits = kind.bit_width();
        let out_of_range = |path: &FieldPath| SchemaError::ValueOutOfRange {
            path: path.render(),
            value: format!("{value:?}"),
            bits,
        };
        let raw = match kind {
            PrimitiveKind::Bool => match value.as_bool() {
                Some(b) => u64::from(b),
                None => return Err(self.mismatch("bool", value)),
            },
            PrimitiveKind::Unsigned(_) => {
                let Some(v) = value.as_u64() else {
                    return Err(match value {
                        Value::Signed(_) => out_of_range(&self.path),
                        _ => self.mismatch(kind.to_string(), value),
                    });
                };
                if v & !mask(bits) != 0 {
                    return Err(out_of_range(&self.path));
                }
                v
            }
            PrimitiveKind::Signed(_) => {
                let Some(v) = value.as_i64() else {
                    return Err(match value {
                        Value::Unsigned(_) => out_of_range(&self.path),
                        _ => self.mismatch(kind.to_string(), value),
                    });
                };
                let half = 1i128 << (bits - 1);
                if !(-half..half).contains(&i128::from(v)) {
                    return Err(out_of_range(&self.path));
                }
                (v as u64) & mask(bits)
            }
            PrimitiveKind::Float(width) => {
                let Some(v) = value.as_f64() else {
                    return Err(self.mismatch(kind.to_string(), value));
                };
                // Finite values that only fit as infinity are out of range.
                match width {
                    16 => {
                        let half = f32_to_f16_bits(v as f32);
                        if v.is_finite() && half & 0x7FFF == 0x7C00 {
                            return Err(out_of_range(&self.path));
                        }
                        u64::from(half)
                    }
                    32 => {
                        let single = v as f32;
                        if v.is_finite() && single.is_infinite() {
                            return Err(out_of_range(&self.path));
                        }
                        u64::from(single.to_bits())
                    }
                    _ => v.to_bits(),
                }
            }
            PrimitiveKind::Void(_) => 0,
        };
        self.writer.write(raw, bits);
        Ok(())
    }
}
