use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bits::{align_up, bits_for};
use crate::error::{Result, SchemaError};

/// Scalar wire types. Widths are in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "bits", rename_all = "snake_case")]
pub enum PrimitiveKind {
    Bool,
    Unsigned(u8),
    Signed(u8),
    Float(u8),
    Void(u8),
}

impl PrimitiveKind {
    pub fn bit_width(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::Unsigned(bits) | Self::Signed(bits) | Self::Float(bits) | Self::Void(bits) => {
                u32::from(bits)
            }
        }
    }

    fn validate(self) -> Result<()> {
        let ok = match self {
            Self::Bool => true,
            Self::Unsigned(bits) | Self::Void(bits) => (1..=64).contains(&bits),
            Self::Signed(bits) => (2..=64).contains(&bits),
            Self::Float(bits) => matches!(bits, 16 | 32 | 64),
        };
        if ok {
            Ok(())
        } else {
            Err(SchemaError::InvalidDescriptor(format!(
                "unsupported primitive {self}"
            )))
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Unsigned(bits) => write!(f, "uint{bits}"),
            Self::Signed(bits) => write!(f, "int{bits}"),
            Self::Float(bits) => write!(f, "float{bits}"),
            Self::Void(bits) => write!(f, "void{bits}"),
        }
    }
}

/// What a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    FixedArray {
        element: Box<FieldKind>,
        length: usize,
    },
    /// Encoded as a length prefix of `bits_for(capacity)` bits, then the
    /// elements.
    VariableArray {
        element: Box<FieldKind>,
        capacity: usize,
    },
    Composite(Arc<TypeDescriptor>),
}

impl FieldKind {
    pub fn boolean() -> Self {
        Self::Primitive(PrimitiveKind::Bool)
    }

    pub fn uint(bits: u8) -> Self {
        Self::Primitive(PrimitiveKind::Unsigned(bits))
    }

    pub fn int(bits: u8) -> Self {
        Self::Primitive(PrimitiveKind::Signed(bits))
    }

    pub fn float(bits: u8) -> Self {
        Self::Primitive(PrimitiveKind::Float(bits))
    }

    pub fn void(bits: u8) -> Self {
        Self::Primitive(PrimitiveKind::Void(bits))
    }

    pub fn array(element: FieldKind, length: usize) -> Self {
        Self::FixedArray {
            element: Box::new(element),
            length,
        }
    }

    pub fn vla(element: FieldKind, capacity: usize) -> Self {
        Self::VariableArray {
            element: Box::new(element),
            capacity,
        }
    }

    pub fn composite(descriptor: Arc<TypeDescriptor>) -> Self {
        Self::Composite(descriptor)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveKind::Void(_)))
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Primitive(p) => p.validate(),
            Self::FixedArray { element, .. } | Self::VariableArray { element, .. } => {
                if element.is_void() {
                    return Err(SchemaError::InvalidDescriptor(
                        "arrays of void are not allowed".into(),
                    ));
                }
                element.validate()
            }
            // Nested descriptors were validated when they were built.
            Self::Composite(_) => Ok(()),
        }
    }

    /// Upper bound of the end position when encoding starts at `start`.
    fn max_end(&self, start: u64) -> u64 {
        match self {
            Self::Primitive(p) => start + u64::from(p.bit_width()),
            Self::FixedArray { element, length } => {
                (0..*length).fold(start, |pos, _| element.max_end(pos))
            }
            Self::VariableArray { element, capacity } => {
                let prefix = u64::from(bits_for(*capacity as u64));
                (0..*capacity).fold(start + prefix, |pos, _| element.max_end(pos))
            }
            Self::Composite(d) => align_up(start, d.alignment) + d.max_bits,
        }
    }

    /// Exact end position if the encoded size does not depend on the value.
    fn fixed_end(&self, start: u64) -> Option<u64> {
        match self {
            Self::Primitive(p) => Some(start + u64::from(p.bit_width())),
            Self::FixedArray { element, length } => {
                (0..*length).try_fold(start, |pos, _| element.fixed_end(pos))
            }
            Self::VariableArray { .. } => None,
            Self::Composite(d) => d
                .fixed_bits
                .map(|bits| align_up(start, d.alignment) + bits),
        }
    }

    /// Largest alignment required anywhere inside this kind.
    fn alignment(&self) -> u32 {
        match self {
            Self::Primitive(_) => 1,
            Self::FixedArray { element, .. } | Self::VariableArray { element, .. } => {
                element.alignment()
            }
            Self::Composite(d) => d.alignment,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::FixedArray { element, length } => write!(f, "{element}[{length}]"),
            Self::VariableArray { element, capacity } => write!(f, "{element}[<={capacity}]"),
            Self::Composite(d) => write!(f, "{}", d.name),
        }
    }
}

/// A named member of a structure or a variant of a union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    /// Alignment in bits; padding is inserted before the field.
    #[serde(default = "default_alignment")]
    pub alignment: u32,
    /// Offset from the start of the enclosing type when it does not depend
    /// on earlier values. Computed by the builder.
    #[serde(skip)]
    pub bit_offset: Option<u64>,
}

fn default_alignment() -> u32 {
    1
}

impl Field {
    pub fn bit_width(&self) -> Option<u64> {
        self.kind.fixed_end(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Structure,
    /// Exactly one field is present, selected by a tag of
    /// `bits_for(variants - 1)` bits.
    Union,
}

/// Immutable layout of a structured type.
///
/// Built with [`TypeDescriptor::structure`] or [`TypeDescriptor::union`], or
/// deserialized from JSON; either way offsets, alignment and extent are
/// computed here and never taken from the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DescriptorSource", into = "DescriptorSource")]
pub struct TypeDescriptor {
    name: String,
    layout: Layout,
    fields: Vec<Field>,
    alignment: u32,
    max_bits: u64,
    fixed_bits: Option<u64>,
    extent: usize,
}

impl TypeDescriptor {
    pub fn structure(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(name.into(), Layout::Structure)
    }

    pub fn union(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(name.into(), Layout::Union)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Largest alignment of any field, recursively. A composite value is
    /// aligned to this before it is encoded.
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Upper bound of the encoded length in bits.
    pub fn max_bits(&self) -> u64 {
        self.max_bits
    }

    /// Maximum serialized length in bytes. Input beyond it is ignored.
    pub fn extent(&self) -> usize {
        self.extent
    }

    /// Width of the union tag; zero for structures.
    pub fn tag_bits(&self) -> u32 {
        match self.layout {
            Layout::Structure => 0,
            Layout::Union => bits_for(self.fields.len().saturating_sub(1) as u64).max(1),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Collects fields and computes the layout on [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    layout: Layout,
    fields: Vec<Field>,
    extent: Option<usize>,
}

impl DescriptorBuilder {
    fn new(name: String, layout: Layout) -> Self {
        Self {
            name,
            layout,
            fields: Vec::new(),
            extent: None,
        }
    }

    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.aligned_field(name, kind, 1)
    }

    pub fn aligned_field(mut self, name: impl Into<String>, kind: FieldKind, alignment: u32) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind,
            alignment,
            bit_offset: None,
        });
        self
    }

    /// Anonymous padding; structures only.
    pub fn void(self, bits: u8) -> Self {
        let name = format!("_void{}", self.fields.len());
        self.field(name, FieldKind::void(bits))
    }

    /// Reserve room beyond the current maximum size for future fields.
    pub fn extent(mut self, bytes: usize) -> Self {
        self.extent = Some(bytes);
        self
    }

    pub fn build(self) -> Result<TypeDescriptor> {
        let invalid = |msg: String| SchemaError::InvalidDescriptor(format!("{}: {msg}", self.name));

        if self.name.is_empty() {
            return Err(SchemaError::InvalidDescriptor("empty type name".into()));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(invalid("empty field name".into()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
            if field.alignment == 0 || !field.alignment.is_power_of_two() {
                return Err(invalid(format!(
                    "alignment of '{}' must be a power of two",
                    field.name
                )));
            }
            field
                .kind
                .validate()
                .map_err(|err| invalid(format!("field '{}': {err}", field.name)))?;
        }

        let alignment = self
            .fields
            .iter()
            .map(|f| f.alignment.max(f.kind.alignment()))
            .max()
            .unwrap_or(1);

        let mut fields = self.fields;
        let (max_bits, fixed_bits) = match self.layout {
            Layout::Structure => {
                let mut max = 0u64;
                let mut exact = Some(0u64);
                for field in &mut fields {
                    let align = field.alignment.max(field.kind.alignment());
                    max = field.kind.max_end(align_up(max, align));
                    let offset = exact.map(|pos| align_up(pos, align));
                    field.bit_offset = offset;
                    exact = offset.and_then(|pos| field.kind.fixed_end(pos));
                }
                (max, exact)
            }
            Layout::Union => {
                if fields.len() < 2 {
                    return Err(SchemaError::InvalidDescriptor(format!(
                        "{}: a union needs at least two variants",
                        self.name
                    )));
                }
                if let Some(void) = fields.iter().find(|f| f.kind.is_void()) {
                    return Err(SchemaError::InvalidDescriptor(format!(
                        "{}: void variant '{}'",
                        self.name, void.name
                    )));
                }
                let tag = u64::from(bits_for(fields.len() as u64 - 1).max(1));
                let mut max = tag;
                for field in &mut fields {
                    let offset = align_up(tag, field.alignment.max(field.kind.alignment()));
                    field.bit_offset = Some(offset);
                    max = max.max(field.kind.max_end(offset));
                }
                (max, None)
            }
        };

        let minimum_extent = max_bits.div_ceil(8) as usize;
        let extent = match self.extent {
            Some(extent) if extent < minimum_extent => {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "{}: extent {extent} is below the maximum size {minimum_extent}",
                    self.name
                )));
            }
            Some(extent) => extent,
            None => minimum_extent,
        };

        Ok(TypeDescriptor {
            name: self.name,
            layout: self.layout,
            fields,
            alignment,
            max_bits,
            fixed_bits,
            extent,
        })
    }
}

/// Serialized form of a descriptor: only what cannot be computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DescriptorSource {
    name: String,
    layout: Layout,
    fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extent: Option<usize>,
}

impl TryFrom<DescriptorSource> for TypeDescriptor {
    type Error = SchemaError;

    fn try_from(source: DescriptorSource) -> Result<Self> {
        DescriptorBuilder {
            name: source.name,
            layout: source.layout,
            fields: source.fields,
            extent: source.extent,
        }
        .build()
    }
}

impl From<TypeDescriptor> for DescriptorSource {
    fn from(descriptor: TypeDescriptor) -> Self {
        let minimum = descriptor.max_bits.div_ceil(8) as usize;
        Self {
            extent: (descriptor.extent != minimum).then_some(descriptor.extent),
            name: descriptor.name,
            layout: descriptor.layout,
            fields: descriptor.fields,
        }
    }
}
