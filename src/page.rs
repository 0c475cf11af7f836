use crate::*;

/// Fixed page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Page header: page id (8), next page id (8), record count (2), free pointer (2).
pub const PAGE_HDR: usize = 20;

/// Logical page number.
pub type PageId = u64;

/// Sentinel for "no page".
pub const NO_PAGE: PageId = u64::MAX;

/// Physical record position: page id plus slot within the page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Locator {
    pub page: PageId,
    pub slot: u16,
}

/// Initialise a fresh page.
pub fn init(data: &mut [u8], id: PageId) {
    data[..PAGE_SIZE].fill(0);
    util::setu64(data, 0, id);
    util::setu64(data, 8, NO_PAGE);
    util::setu16(data, 16, 0);
    util::setu16(data, 18, PAGE_HDR as u16);
}

pub fn page_id(data: &[u8]) -> PageId {
    util::getu64(data, 0)
}

pub fn next_page(data: &[u8]) -> PageId {
    util::getu64(data, 8)
}

pub fn set_next_page(data: &mut [u8], next: PageId) {
    util::setu64(data, 8, next);
}

pub fn record_count(data: &[u8]) -> usize {
    util::getu16(data, 16) as usize
}

pub fn free_ptr(data: &[u8]) -> usize {
    util::getu16(data, 18) as usize
}

/// Byte offsets of the record payloads on the page, in slot order.
pub fn offsets(data: &[u8]) -> Vec<usize> {
    let n = record_count(data);
    let mut result = Vec::with_capacity(n);
    let mut off = PAGE_HDR;
    for _ in 0..n {
        result.push(off);
        off += 2 + util::getu16(data, off) as usize;
    }
    result
}

/// Record payload at the given slot.
pub fn record_at(data: &[u8], slot: u16) -> Option<&[u8]> {
    let offs = offsets(data);
    let off = *offs.get(slot as usize)?;
    let len = util::getu16(data, off) as usize;
    Some(&data[off + 2..off + 2 + len])
}

/// Append a record payload, returning its slot. Fails with PageFull when
/// the payload does not fit in the remaining free space.
pub fn append(data: &mut [u8], rec: &[u8]) -> Result<u16> {
    let free = free_ptr(data);
    if free + 2 + rec.len() > PAGE_SIZE {
        return Err(StorageError::PageFull.into());
    }
    let slot = record_count(data) as u16;
    util::setu16(data, free, rec.len() as u16);
    data[free + 2..free + 2 + rec.len()].copy_from_slice(rec);
    util::setu16(data, 16, slot + 1);
    util::setu16(data, 18, (free + 2 + rec.len()) as u16);
    Ok(slot)
}

/// Remove the record at the given slot, compacting the slot array.
/// Records after the removed slot shift down by one slot.
pub fn remove(data: &mut [u8], slot: u16) {
    let recs: Vec<Vec<u8>> = offsets(data)
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != slot as usize)
        .map(|(_, off)| {
            let len = util::getu16(data, *off) as usize;
            data[off + 2..off + 2 + len].to_vec()
        })
        .collect();
    rebuild(data, &recs);
}

/// Replace the record at the given slot in place.
pub fn replace(data: &mut [u8], slot: u16, rec: &[u8]) -> Result<()> {
    let offs = offsets(data);
    let off = offs[slot as usize];
    let old_len = util::getu16(data, off) as usize;
    if rec.len() == old_len {
        data[off + 2..off + 2 + old_len].copy_from_slice(rec);
        return Ok(());
    }
    let mut recs: Vec<Vec<u8>> = offs
        .iter()
        .map(|off| {
            let len = util::getu16(data, *off) as usize;
            data[off + 2..off + 2 + len].to_vec()
        })
        .collect();
    let total: usize = recs.iter().map(|r| 2 + r.len()).sum::<usize>() - old_len + rec.len();
    if PAGE_HDR + total > PAGE_SIZE {
        return Err(StorageError::PageFull.into());
    }
    recs[slot as usize] = rec.to_vec();
    rebuild(data, &recs);
    Ok(())
}

fn rebuild(data: &mut [u8], recs: &[Vec<u8>]) {
    let id = page_id(data);
    let next = next_page(data);
    init(data, id);
    set_next_page(data, next);
    for r in recs {
        append(data, r).expect("records fitted before rebuild");
    }
}

// ------------------------------------------------------------------
// Record codec.
//
// A record is serialized in schema column order. Each column starts with a
// presence byte (0 = null), followed by the value encoding for its kind:
// Int and Float are 8 bytes little-endian, Bool is one byte, Str is a u16
// length prefix plus UTF-8 bytes.

/// Serialize a record against a schema.
pub fn serialize_record(rec: &Record, schema: &[ColumnInfo]) -> Result<Vec<u8>> {
    static NULL: Value = Value::Null;
    let mut out = Vec::with_capacity(schema.len() * 9);
    for col in schema {
        let val = rec.get(&col.name).unwrap_or(&NULL);
        if val.is_null() {
            if !col.nullable {
                return Err(ConstraintError::NotNullViolation(col.name.clone()).into());
            }
            out.push(0);
            continue;
        }
        out.push(1);
        match (col.kind, val) {
            (ColumnKind::Integer, Value::Int(x)) => out.extend_from_slice(&x.to_le_bytes()),
            (ColumnKind::Float, Value::Float(x)) => out.extend_from_slice(&x.to_le_bytes()),
            (ColumnKind::Float, Value::Int(x)) => out.extend_from_slice(&(*x as f64).to_le_bytes()),
            (ColumnKind::Bool, Value::Bool(b)) => out.push(*b as u8),
            (ColumnKind::Str, Value::Str(s)) => {
                if let Some(max) = col.max_length {
                    if s.chars().count() > max {
                        return Err(ConstraintError::DataTooLong {
                            column: col.name.clone(),
                            max,
                        }
                        .into());
                    }
                }
                out.extend_from_slice(&(s.len() as u16).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            (kind, val) => {
                return Err(SemanticError::TypeMismatch(format!(
                    "column '{}' is {:?}, got {}",
                    col.name,
                    kind,
                    val.kind_name()
                ))
                .into())
            }
        }
    }
    Ok(out)
}

/// Deserialize a record against a schema. Inverse of [serialize_record].
pub fn deserialize_record(bytes: &[u8], schema: &[ColumnInfo]) -> Result<Record> {
    let mut rec = Record::new();
    let mut off = 0;
    for col in schema {
        if off >= bytes.len() {
            return Err(StorageError::CatalogCorrupt(format!(
                "record truncated at column '{}'",
                col.name
            ))
            .into());
        }
        let present = bytes[off];
        off += 1;
        if present == 0 {
            rec.push(col.name.clone(), Value::Null);
            continue;
        }
        let val = match col.kind {
            ColumnKind::Integer => {
                let v = util::geti64(bytes, off);
                off += 8;
                Value::Int(v)
            }
            ColumnKind::Float => {
                let v = util::getf64(bytes, off);
                off += 8;
                Value::Float(v)
            }
            ColumnKind::Bool => {
                let v = bytes[off] != 0;
                off += 1;
                Value::Bool(v)
            }
            ColumnKind::Str => {
                let len = util::getu16(bytes, off) as usize;
                off += 2;
                let s = std::str::from_utf8(&bytes[off..off + len])
                    .map_err(|e| StorageError::CatalogCorrupt(e.to_string()))?
                    .to_string();
                off += len;
                Value::Str(s)
            }
        };
        rec.push(col.name.clone(), val);
    }
    Ok(rec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("id", ColumnKind::Integer).primary_key(),
            ColumnInfo::new("name", ColumnKind::Str).max_length(50),
            ColumnInfo::new("score", ColumnKind::Float),
            ColumnInfo::new("active", ColumnKind::Bool),
        ]
    }

    fn sample() -> Record {
        Record::from(vec![
            ("id", Value::Int(7)),
            ("name", Value::Str("Alice".into())),
            ("score", Value::Float(91.5)),
            ("active", Value::Bool(true)),
        ])
    }

    #[test]
    fn record_round_trip() {
        let s = schema();
        let rec = sample();
        let bytes = serialize_record(&rec, &s).unwrap();
        let back = deserialize_record(&bytes, &s).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn null_round_trip() {
        let s = schema();
        let mut rec = sample();
        rec.set("score", Value::Null);
        let bytes = serialize_record(&rec, &s).unwrap();
        let back = deserialize_record(&bytes, &s).unwrap();
        assert_eq!(back.get("score"), Some(&Value::Null));
    }

    #[test]
    fn int_widens_to_float_and_survives() {
        let s = schema();
        let mut rec = sample();
        rec.set("score", Value::Int(85));
        let bytes = serialize_record(&rec, &s).unwrap();
        let back = deserialize_record(&bytes, &s).unwrap();
        assert_eq!(back.get("score"), Some(&Value::Float(85.0)));
    }

    #[test]
    fn not_null_rejected() {
        let mut s = schema();
        s[1].nullable = false;
        let mut rec = sample();
        rec.set("name", Value::Null);
        assert!(matches!(
            serialize_record(&rec, &s),
            Err(Error::Constraint(ConstraintError::NotNullViolation(_)))
        ));
    }

    #[test]
    fn too_long_rejected() {
        let s = schema();
        let mut rec = sample();
        rec.set("name", Value::Str("x".repeat(51)));
        assert!(matches!(
            serialize_record(&rec, &s),
            Err(Error::Constraint(ConstraintError::DataTooLong { .. }))
        ));
    }

    #[test]
    fn page_append_remove_replace() {
        let mut data = vec![0u8; PAGE_SIZE];
        init(&mut data, 3);
        assert_eq!(page_id(&data), 3);
        let s0 = append(&mut data, b"first").unwrap();
        let s1 = append(&mut data, b"second").unwrap();
        let s2 = append(&mut data, b"third").unwrap();
        assert_eq!((s0, s1, s2), (0, 1, 2));
        assert_eq!(record_at(&data, 1).unwrap(), b"second");

        remove(&mut data, 1);
        assert_eq!(record_count(&data), 2);
        assert_eq!(record_at(&data, 0).unwrap(), b"first");
        assert_eq!(record_at(&data, 1).unwrap(), b"third");

        replace(&mut data, 0, b"FIRST").unwrap();
        assert_eq!(record_at(&data, 0).unwrap(), b"FIRST");
        replace(&mut data, 0, b"lengthier payload").unwrap();
        assert_eq!(record_at(&data, 0).unwrap(), b"lengthier payload");
        assert_eq!(record_at(&data, 1).unwrap(), b"third");
    }

    #[test]
    fn page_full() {
        let mut data = vec![0u8; PAGE_SIZE];
        init(&mut data, 0);
        let big = vec![7u8; PAGE_SIZE / 2];
        append(&mut data, &big).unwrap();
        assert!(append(&mut data, &big).is_err());
    }
}
