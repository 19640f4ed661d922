//! Typed index keys.
//!
//! A key is a copy of one attribute value in its external encoding: 4
//! bytes for Int/Real, a 4-byte length prefix plus raw bytes for VarChar.
//! Keeping the decoded value alongside the type makes ordering infallible
//! inside the tree, where every key shares the indexed attribute's type.

use std::cmp::Ordering;

use crate::errors::DbResult;
use crate::record::schema::{AttrType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexKey {
    value: Value,
}

impl IndexKey {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Copy a key out of its external encoding. Trailing bytes beyond the
    /// encoded width are ignored.
    pub fn from_external(attr_type: AttrType, data: &[u8]) -> DbResult<Self> {
        Ok(Self {
            value: Value::decode(attr_type, data)?,
        })
    }

    /// Decode a key from a page buffer, returning the consumed width.
    pub fn decode_from(attr_type: AttrType, data: &[u8]) -> DbResult<(Self, usize)> {
        let value = Value::decode(attr_type, data)?;
        let len = value.encoded_len();
        Ok((Self { value }, len))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn attr_type(&self) -> AttrType {
        self.value.attr_type()
    }

    pub fn encoded_len(&self) -> usize {
        self.value.encoded_len()
    }

    /// The key's external encoding, as handed back to scan callers.
    pub fn to_bytes(&self) -> DbResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.value.encode(&mut out)?;
        Ok(out)
    }

    pub fn cmp_key(&self, other: &IndexKey) -> Ordering {
        self.value.total_cmp(&other.value)
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}
