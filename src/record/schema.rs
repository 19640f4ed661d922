//! Typed attributes, record identifiers and the external record form.
//!
//! A record travels between callers and the store as a null-indicator
//! bitmap (one bit per attribute, MSB first, set = NULL) followed by the
//! encoded non-null values in schema order. Int and Real are 4 bytes
//! little-endian, VarChar is a 4-byte length prefix plus raw bytes.

use std::cmp::Ordering;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::errors::{DbError, DbResult};

/// Two Real values closer than this compare equal.
pub const REAL_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Real,
    VarChar,
}

/// One column of a record schema: `(name, type, declared length)`.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub attr_type: AttrType,
    pub length: u32,
}

impl Attribute {
    pub fn new(name: &str, attr_type: AttrType, length: u32) -> Self {
        Self {
            name: name.to_string(),
            attr_type,
            length,
        }
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, AttrType::Int, 4)
    }

    pub fn real(name: &str) -> Self {
        Self::new(name, AttrType::Real, 4)
    }

    pub fn varchar(name: &str, length: u32) -> Self {
        Self::new(name, AttrType::VarChar, length)
    }
}

/// Record identifier: `(page, slot)` within one store file. Stable until
/// the record is deleted; a reused tombstone slot reissues the same rid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page: u32,
    pub slot: u32,
}

impl Rid {
    pub fn new(page: u32, slot: u32) -> Self {
        Self { page, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.page, self.slot)
    }
}

/// Comparison operator of a scan predicate. `No` matches every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    No,
}

impl CompOp {
    pub fn matches(self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::No => true,
        }
    }
}

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Real(f32),
    VarChar(Vec<u8>),
}

impl Value {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Int(_) => AttrType::Int,
            Value::Real(_) => AttrType::Real,
            Value::VarChar(_) => AttrType::VarChar,
        }
    }

    /// Decode one value from its external encoding. Trailing bytes beyond
    /// the encoded width are ignored.
    pub fn decode(attr_type: AttrType, data: &[u8]) -> DbResult<Self> {
        let mut rdr = Cursor::new(data);
        match attr_type {
            AttrType::Int => Ok(Value::Int(rdr.read_i32::<LittleEndian>().map_err(|_| {
                DbError::Corrupt("int value truncated".into())
            })?)),
            AttrType::Real => Ok(Value::Real(rdr.read_f32::<LittleEndian>().map_err(
                |_| DbError::Corrupt("real value truncated".into()),
            )?)),
            AttrType::VarChar => {
                let len = rdr
                    .read_u32::<LittleEndian>()
                    .map_err(|_| DbError::Corrupt("varchar length truncated".into()))?
                    as usize;
                let start = rdr.position() as usize;
                let end = start
                    .checked_add(len)
                    .ok_or_else(|| DbError::Corrupt("varchar length overflow".into()))?;
                if end > data.len() {
                    return Err(DbError::Corrupt(format!(
                        "varchar value truncated: need {len} bytes, have {}",
                        data.len() - start
                    )));
                }
                Ok(Value::VarChar(data[start..end].to_vec()))
            }
        }
    }

    /// Append the external encoding of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> DbResult<()> {
        match self {
            Value::Int(i) => out.write_i32::<LittleEndian>(*i)?,
            Value::Real(r) => out.write_f32::<LittleEndian>(*r)?,
            Value::VarChar(bytes) => {
                out.write_u32::<LittleEndian>(bytes.len() as u32)?;
                out.extend_from_slice(bytes);
            }
        }
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Int(_) | Value::Real(_) => 4,
            Value::VarChar(bytes) => 4 + bytes.len(),
        }
    }

    /// Total order over values. Real uses the documented `1e-3` equality
    /// tolerance, VarChar compares raw bytes lexicographically. Values of
    /// different types order by type tag; callers validate types up front,
    /// so that arm is never reached through the public surface.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => {
                if (a - b).abs() < REAL_EPSILON {
                    Ordering::Equal
                } else {
                    a.total_cmp(b)
                }
            }
            (Value::VarChar(a), Value::VarChar(b)) => a.cmp(b),
            _ => type_rank(self.attr_type()).cmp(&type_rank(other.attr_type())),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Real(r) => serde_json::Number::from_f64(*r as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::VarChar(bytes) => {
                serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::VarChar(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

fn type_rank(t: AttrType) -> u8 {
    match t {
        AttrType::Int => 0,
        AttrType::Real => 1,
        AttrType::VarChar => 2,
    }
}

/// Width of the null-indicator bitmap for `attr_count` attributes.
pub fn null_bitmap_len(attr_count: usize) -> usize {
    (attr_count + 7) / 8
}

/// Read the leading null bitmap of an external-form record.
pub fn parse_null_bitmap(schema: &[Attribute], data: &[u8]) -> DbResult<Vec<bool>> {
    let width = null_bitmap_len(schema.len());
    if data.len() < width {
        return Err(DbError::Corrupt(format!(
            "record shorter than its null bitmap: {} < {width}",
            data.len()
        )));
    }
    let mut nulls = Vec::with_capacity(schema.len());
    for i in 0..schema.len() {
        let byte = data[i / 8];
        nulls.push((byte << (i % 8)) & 0x80 != 0);
    }
    Ok(nulls)
}

/// Build a null bitmap from per-attribute flags.
pub fn build_null_bitmap(nulls: &[bool]) -> Vec<u8> {
    let mut bitmap = vec![0u8; null_bitmap_len(nulls.len())];
    for (i, is_null) in nulls.iter().enumerate() {
        if *is_null {
            bitmap[i / 8] |= 0x80 >> (i % 8);
        }
    }
    bitmap
}

/// Slice an external-form record into per-attribute encoded values.
/// `None` marks a NULL attribute; VarChar slices include their length
/// prefix so they can be re-concatenated verbatim.
pub fn field_slices<'d>(
    schema: &[Attribute],
    data: &'d [u8],
) -> DbResult<Vec<Option<&'d [u8]>>> {
    let nulls = parse_null_bitmap(schema, data)?;
    let mut offset = null_bitmap_len(schema.len());
    let mut out = Vec::with_capacity(schema.len());

    for (attr, is_null) in schema.iter().zip(nulls) {
        if is_null {
            out.push(None);
            continue;
        }
        let width = match attr.attr_type {
            AttrType::Int | AttrType::Real => 4,
            AttrType::VarChar => {
                if offset + 4 > data.len() {
                    return Err(DbError::Corrupt(format!(
                        "record truncated in varchar length of `{}`",
                        attr.name
                    )));
                }
                let mut rdr = Cursor::new(&data[offset..offset + 4]);
                4 + rdr.read_u32::<LittleEndian>()? as usize
            }
        };
        if offset + width > data.len() {
            return Err(DbError::Corrupt(format!(
                "record truncated in value of `{}`",
                attr.name
            )));
        }
        out.push(Some(&data[offset..offset + width]));
        offset += width;
    }
    Ok(out)
}

/// Encoded size of an external-form record (bitmap plus values). Trailing
/// bytes past that size are not part of the record.
pub fn record_size(schema: &[Attribute], data: &[u8]) -> DbResult<usize> {
    let fields = field_slices(schema, data)?;
    let values: usize = fields.iter().flatten().map(|s| s.len()).sum();
    Ok(null_bitmap_len(schema.len()) + values)
}

/// Assemble an external-form record from typed values (`None` = NULL).
pub fn encode_record(schema: &[Attribute], values: &[Option<Value>]) -> DbResult<Vec<u8>> {
    if schema.len() != values.len() {
        return Err(DbError::BadArgument(format!(
            "schema has {} attributes, got {} values",
            schema.len(),
            values.len()
        )));
    }
    for (attr, value) in schema.iter().zip(values) {
        if let Some(v) = value {
            if v.attr_type() != attr.attr_type {
                return Err(DbError::BadArgument(format!(
                    "value type mismatch for attribute `{}`",
                    attr.name
                )));
            }
        }
    }

    let nulls: Vec<bool> = values.iter().map(|v| v.is_none()).collect();
    let mut out = build_null_bitmap(&nulls);
    for value in values.iter().flatten() {
        value.encode(&mut out)?;
    }
    Ok(out)
}

/// Decode an external-form record into typed values.
pub fn decode_record(schema: &[Attribute], data: &[u8]) -> DbResult<Vec<Option<Value>>> {
    let fields = field_slices(schema, data)?;
    schema
        .iter()
        .zip(fields)
        .map(|(attr, slice)| {
            slice
                .map(|s| Value::decode(attr.attr_type, s))
                .transpose()
        })
        .collect()
}

/// How a scan reassembles the records it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Keep the input schema's bitmap width; dropped attributes read as
    /// NULL. Used by index maintenance, which must not shift field offsets.
    Preserving,
    /// Recompute the bitmap for the projected attribute list only.
    Compressed,
}

/// An ordered attribute subset plus the reassembly mode.
#[derive(Debug, Clone)]
pub struct Projection {
    pub mode: ProjectionMode,
    pub attrs: Vec<String>,
}

impl Projection {
    pub fn preserving(attrs: &[&str]) -> Self {
        Self {
            mode: ProjectionMode::Preserving,
            attrs: attrs.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn compressed(attrs: &[&str]) -> Self {
        Self {
            mode: ProjectionMode::Compressed,
            attrs: attrs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Every attribute of `schema`, preserving form: the identity
    /// projection.
    pub fn all(schema: &[Attribute]) -> Self {
        Self {
            mode: ProjectionMode::Preserving,
            attrs: schema.iter().map(|a| a.name.clone()).collect(),
        }
    }

    pub(crate) fn resolve(&self, schema: &[Attribute]) -> DbResult<Vec<usize>> {
        self.attrs
            .iter()
            .map(|name| attr_index(schema, name))
            .collect()
    }

    /// Reassemble `data` according to this projection.
    pub fn apply(&self, schema: &[Attribute], data: &[u8]) -> DbResult<Vec<u8>> {
        let wanted = self.resolve(schema)?;
        let fields = field_slices(schema, data)?;

        match self.mode {
            ProjectionMode::Preserving => {
                let nulls: Vec<bool> = (0..schema.len())
                    .map(|i| fields[i].is_none() || !wanted.contains(&i))
                    .collect();
                let mut out = build_null_bitmap(&nulls);
                for (i, slice) in fields.iter().enumerate() {
                    if let Some(s) = slice {
                        if wanted.contains(&i) {
                            out.extend_from_slice(s);
                        }
                    }
                }
                Ok(out)
            }
            ProjectionMode::Compressed => {
                let nulls: Vec<bool> = wanted.iter().map(|&i| fields[i].is_none()).collect();
                let mut out = build_null_bitmap(&nulls);
                for &i in &wanted {
                    if let Some(s) = fields[i] {
                        out.extend_from_slice(s);
                    }
                }
                Ok(out)
            }
        }
    }
}

pub(crate) fn attr_index(schema: &[Attribute], name: &str) -> DbResult<usize> {
    schema
        .iter()
        .position(|a| a.name == name)
        .ok_or_else(|| DbError::BadArgument(format!("unknown attribute `{name}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Vec<Attribute> {
        vec![
            Attribute::int("id"),
            Attribute::varchar("name", 20),
            Attribute::real("score"),
        ]
    }

    #[test]
    fn bitmap_width_rounds_up() {
        assert_eq!(null_bitmap_len(0), 0);
        assert_eq!(null_bitmap_len(1), 1);
        assert_eq!(null_bitmap_len(8), 1);
        assert_eq!(null_bitmap_len(9), 2);
    }

    #[test]
    fn record_roundtrip_with_nulls() {
        let schema = sample_schema();
        let values = vec![
            Some(Value::Int(42)),
            None,
            Some(Value::Real(1.5)),
        ];
        let data = encode_record(&schema, &values).unwrap();
        // 1 bitmap byte, int, real; the NULL varchar takes no space.
        assert_eq!(data.len(), 1 + 4 + 4);
        assert_eq!(data[0], 0b0100_0000);
        assert_eq!(decode_record(&schema, &data).unwrap(), values);
    }

    #[test]
    fn truncated_varchar_is_corrupt() {
        let schema = vec![Attribute::varchar("s", 10)];
        // Length prefix claims 8 bytes but only 2 follow.
        let mut data = vec![0u8];
        data.extend_from_slice(&8u32.to_le_bytes());
        data.extend_from_slice(b"hi");
        let err = field_slices(&schema, &data).unwrap_err();
        assert!(matches!(err, DbError::Corrupt(_)));
    }

    #[test]
    fn real_comparison_uses_tolerance() {
        let a = Value::Real(1.0);
        let b = Value::Real(1.0005);
        let c = Value::Real(1.01);
        assert_eq!(a.total_cmp(&b), Ordering::Equal);
        assert_eq!(a.total_cmp(&c), Ordering::Less);
        assert_eq!(c.total_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn empty_varchar_sorts_below_everything() {
        let empty = Value::VarChar(Vec::new());
        let a = Value::VarChar(b"a".to_vec());
        assert_eq!(empty.total_cmp(&a), Ordering::Less);
        assert_eq!(empty.total_cmp(&empty.clone()), Ordering::Equal);
    }

    #[test]
    fn preserving_projection_keeps_bitmap_width() {
        let schema = sample_schema();
        let data = encode_record(
            &schema,
            &[
                Some(Value::Int(7)),
                Some(Value::VarChar(b"ann".to_vec())),
                Some(Value::Real(9.5)),
            ],
        )
        .unwrap();

        let projected = Projection::preserving(&["score"])
            .apply(&schema, &data)
            .unwrap();
        // Same single bitmap byte with id and name now NULL, then the real.
        assert_eq!(projected[0], 0b1100_0000);
        assert_eq!(projected.len(), 1 + 4);
        let score = Value::decode(AttrType::Real, &projected[1..]).unwrap();
        assert_eq!(score, Value::Real(9.5));
    }

    #[test]
    fn compressed_projection_reorders_and_shrinks() {
        let schema = sample_schema();
        let data = encode_record(
            &schema,
            &[
                Some(Value::Int(7)),
                Some(Value::VarChar(b"ann".to_vec())),
                Some(Value::Real(9.5)),
            ],
        )
        .unwrap();

        let projected = Projection::compressed(&["score", "id"])
            .apply(&schema, &data)
            .unwrap();
        assert_eq!(projected[0], 0b0000_0000);
        let score = Value::decode(AttrType::Real, &projected[1..5]).unwrap();
        let id = Value::decode(AttrType::Int, &projected[5..9]).unwrap();
        assert_eq!(score, Value::Real(9.5));
        assert_eq!(id, Value::Int(7));
    }

    #[test]
    fn unknown_projection_attribute_is_rejected() {
        let schema = sample_schema();
        let data = encode_record(&schema, &[Some(Value::Int(1)), None, None]).unwrap();
        let err = Projection::compressed(&["nope"])
            .apply(&schema, &data)
            .unwrap_err();
        assert!(matches!(err, DbError::BadArgument(_)));
    }
}
