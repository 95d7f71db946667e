use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use super::value::{Field, Type};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;

/// Physical location of a stored tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

/// One column of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TdItem {
    pub field_type: Type,
    pub name: Option<String>,
}

/// Ordered list of (type, name) pairs describing a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(types: Vec<Type>, names: Vec<Option<String>>) -> Self {
        let items = types
            .into_iter()
            .zip(names.into_iter().chain(std::iter::repeat(None)))
            .map(|(field_type, name)| TdItem { field_type, name })
            .collect();
        Self { items }
    }

    /// Schema with anonymous columns.
    pub fn from_types(types: Vec<Type>) -> Self {
        Self::new(types, Vec::new())
    }

    /// Parses a comma separated type list such as `int,string`.
    pub fn parse(types: &str) -> StorageResult<Self> {
        let types = types
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<StorageResult<Vec<Type>>>()?;
        if types.is_empty() {
            return Err(StorageError::SchemaMismatch("empty schema".into()));
        }
        Ok(Self::from_types(types))
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Option<Type> {
        self.items.get(i).map(|item| item.field_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items.get(i).and_then(|item| item.name.as_deref())
    }

    /// Index of the first column called `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    /// Fixed width of one tuple in bytes.
    pub fn byte_size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.size()).sum()
    }

    pub fn items(&self) -> impl Iterator<Item = &TdItem> {
        self.items.iter()
    }

    /// Concatenation of two schemas, `a`'s columns first.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let mut items = a.items.clone();
        items.extend(b.items.iter().cloned());
        TupleDesc { items }
    }
}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &item.name {
                Some(name) => write!(f, "{}({})", item.field_type, name)?,
                None => write!(f, "{}", item.field_type)?,
            }
        }
        Ok(())
    }
}

/// A row conforming to a [`TupleDesc`].
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Builds a tuple, checking arity and field types against `desc`.
    /// Strings longer than a string field holds are cut to fit.
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> StorageResult<Self> {
        if fields.len() != desc.num_fields() {
            return Err(StorageError::SchemaMismatch(format!(
                "expected {} fields, got {}",
                desc.num_fields(),
                fields.len()
            )));
        }
        for (i, (field, item)) in fields.iter().zip(desc.items()).enumerate() {
            if field.field_type() != item.field_type {
                return Err(StorageError::SchemaMismatch(format!(
                    "field {} is {}, schema says {}",
                    i,
                    field.field_type(),
                    item.field_type
                )));
            }
        }
        Ok(Self {
            desc,
            fields: fields.into_iter().map(Field::fitted).collect(),
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    /// Replaces field `i`. The type must match the schema.
    pub fn set_field(&mut self, i: usize, field: Field) -> StorageResult<()> {
        match self.desc.field_type(i) {
            Some(t) if t == field.field_type() => {
                self.fields[i] = field.fitted();
                Ok(())
            }
            Some(t) => Err(StorageError::SchemaMismatch(format!(
                "field {} is {}, got {}",
                i,
                t,
                field.field_type()
            ))),
            None => Err(StorageError::SchemaMismatch(format!(
                "no field {} in {}",
                i, self.desc
            ))),
        }
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        for field in &self.fields {
            field.serialize(buf);
        }
    }

    /// Reads one tuple of `desc` from `buf`.
    pub fn parse(desc: &Arc<TupleDesc>, buf: &mut impl Buf) -> StorageResult<Self> {
        let fields = desc
            .items()
            .map(|item| item.field_type.parse(buf))
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(Self {
            desc: Arc::clone(desc),
            fields,
            record_id: None,
        })
    }
}

/// Equality is over schema and field values; location is ignored.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}
