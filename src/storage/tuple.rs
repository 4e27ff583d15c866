use crate::shared::{
    definitions::RecordId,
    error::{DbError, Result},
};
use std::{cmp::Ordering, fmt, sync::Arc};

/// Maximum number of bytes a string field stores on a page.
pub const STRING_LEN: usize = 128;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    Int,
    String,
}

impl Type {
    /// Number of bytes a field of this type occupies in a tuple slot.
    pub const fn len(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::String => 4 + STRING_LEN,
        }
    }

    pub(crate) fn parse(&self, bytes: &[u8]) -> std::result::Result<Field, String> {
        debug_assert_eq!(bytes.len(), self.len());
        match self {
            Type::Int => {
                let raw: [u8; 4] = bytes.try_into().map_err(|_| "short int field")?;
                Ok(Field::Int(i32::from_be_bytes(raw)))
            }
            Type::String => {
                let raw: [u8; 4] = bytes[..4].try_into().map_err(|_| "short string header")?;
                let len = u32::from_be_bytes(raw) as usize;
                if len > STRING_LEN {
                    return Err(format!("string length {} exceeds {}", len, STRING_LEN));
                }
                let value = String::from_utf8_lossy(&bytes[4..4 + len]).into_owned();
                Ok(Field::Str(value))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("INT"),
            Type::String => f.write_str("STRING"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub const fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::String,
        }
    }

    /// Appends exactly `self.field_type().len()` bytes to `buf`.
    pub(crate) fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Field::Int(value) => buf.extend_from_slice(&value.to_be_bytes()),
            Field::Str(value) => {
                let mut end = value.len().min(STRING_LEN);
                // never split a utf-8 sequence when truncating
                while !value.is_char_boundary(end) {
                    end -= 1;
                }
                let bytes = &value.as_bytes()[..end];
                buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(bytes);
                buf.resize(buf.len() + STRING_LEN - bytes.len(), 0);
            }
        }
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Some(a.cmp(b)),
            (Field::Str(a), Field::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(value) => write!(f, "{}", value),
            Field::Str(value) => f.write_str(value),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TupleDescItem {
    pub field_type: Type,
    pub name: Option<String>,
}

/// Schema of a tuple. Two descriptors are equal when their field types
/// match position by position; names are ignored.
#[derive(Clone, Debug)]
pub struct TupleDesc {
    items: Vec<TupleDescItem>,
}

impl TupleDesc {
    pub fn new(types: &[Type]) -> Self {
        assert!(!types.is_empty(), "a schema needs at least one field");
        Self {
            items: types
                .iter()
                .map(|&field_type| TupleDescItem {
                    field_type,
                    name: None,
                })
                .collect(),
        }
    }

    pub fn with_names(types: &[Type], names: &[&str]) -> Self {
        assert!(!types.is_empty(), "a schema needs at least one field");
        assert_eq!(types.len(), names.len());
        Self {
            items: types
                .iter()
                .zip(names)
                .map(|(&field_type, name)| TupleDescItem {
                    field_type,
                    name: Some(name.to_string()),
                })
                .collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, index: usize) -> Option<Type> {
        self.items.get(index).map(|item| item.field_type)
    }

    pub fn field_name(&self, index: usize) -> Option<&str> {
        self.items.get(index)?.name.as_deref()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    /// Width in bytes of one serialized tuple.
    pub fn byte_size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    pub fn items(&self) -> impl Iterator<Item = &TupleDescItem> {
        self.items.iter()
    }

    pub fn merge(first: &TupleDesc, second: &TupleDesc) -> TupleDesc {
        Self {
            items: first.items.iter().chain(&second.items).cloned().collect(),
        }
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "{}({})",
                item.name.as_deref().unwrap_or(""),
                item.field_type
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Option<Field>>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>) -> Self {
        let fields = vec![None; desc.num_fields()];
        Self {
            desc,
            fields,
            record_id: None,
        }
    }

    /// Builds a tuple with every field set, checking each value against `desc`.
    pub fn from_fields(desc: Arc<TupleDesc>, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != desc.num_fields() {
            return Err(DbError::SchemaMismatch(format!(
                "expected {} fields, got {}",
                desc.num_fields(),
                fields.len()
            )));
        }
        let mut tuple = Self::new(desc);
        for (i, field) in fields.into_iter().enumerate() {
            tuple.set_field(i, field)?;
        }
        Ok(tuple)
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)?.as_ref()
    }

    pub fn set_field(&mut self, index: usize, field: Field) -> Result<()> {
        let expected = self.desc.field_type(index).ok_or_else(|| {
            DbError::SchemaMismatch(format!(
                "field index {} out of range for {} fields",
                index,
                self.fields.len()
            ))
        })?;
        if expected != field.field_type() {
            return Err(DbError::SchemaMismatch(format!(
                "field {} expects {}, got {}",
                index,
                expected,
                field.field_type()
            )));
        }
        self.fields[index] = Some(field);
        Ok(())
    }

    pub fn fields(&self) -> impl Iterator<Item = Option<&Field>> {
        self.fields.iter().map(Option::as_ref)
    }

    /// True when every field holds a value.
    pub fn is_complete(&self) -> bool {
        self.fields.iter().all(Option::is_some)
    }

    /// Appends the fixed-width slot image of this tuple to `buf`.
    /// Unset fields are written as zero bytes.
    pub(crate) fn serialize_into(&self, buf: &mut Vec<u8>) {
        for (item, field) in self.desc.items().zip(&self.fields) {
            match field {
                Some(field) => field.serialize_into(buf),
                None => buf.resize(buf.len() + item.field_type.len(), 0),
            }
        }
    }

    pub(crate) fn parse(desc: &Arc<TupleDesc>, bytes: &[u8]) -> std::result::Result<Self, String> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for item in desc.items() {
            let len = item.field_type.len();
            fields.push(Some(item.field_type.parse(&bytes[offset..offset + len])?));
            offset += len;
        }
        Ok(Self {
            desc: Arc::clone(desc),
            fields,
            record_id: None,
        })
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.fields == other.fields
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str("\t")?;
            }
            match field {
                Some(field) => write!(f, "{}", field)?,
                None => f.write_str("null")?,
            }
        }
        Ok(())
    }
}
