use crate::*;
use serde::{Deserialize, Serialize};

/// Column kind stored in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Float,
    Str,
    Bool,
}

/// Column descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    pub max_length: Option<usize>,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<Value>,
}

impl ColumnInfo {
    pub fn new(name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            max_length: None,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn default_value(mut self, v: Value) -> Self {
        self.default = Some(v);
        self
    }
}

/// Table metadata held by the catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub first_page: PageId,
    pub last_page: PageId,
    pub record_count: u64,
}

impl TableInfo {
    pub fn new(name: &str, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            first_page: NO_PAGE,
            last_page: NO_PAGE,
            record_count: 0,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn primary_key_column(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.primary_key)
    }
}

/// Index descriptor. The backing B+tree is derived state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub order: usize,
}

/// An ordered column-name to value mapping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn push(&mut self, name: String, value: Value) {
        self.fields.push((name, value));
    }

    /// Set a field, replacing any existing value under the name.
    pub fn set(&mut self, name: &str, value: Value) {
        for (n, v) in &mut self.fields {
            if n == name {
                *v = value;
                return;
            }
        }
        self.fields.push((name.to_string(), value));
    }

    /// Exact-name field access.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Field access tolerating qualified names. An exact match wins;
    /// otherwise `alias.col` matches a field named `col` or `*.col`, and a
    /// bare name matches a field named `*.name`.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.get(name) {
            return Some(v);
        }
        if let Some((_, col)) = name.split_once('.') {
            return self
                .fields
                .iter()
                .find(|(n, _)| n == col || n.ends_with(&format!(".{}", col)))
                .map(|(_, v)| v);
        }
        self.fields
            .iter()
            .find(|(n, _)| n.ends_with(&format!(".{}", name)))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }
}

impl From<Vec<(&str, Value)>> for Record {
    fn from(fields: Vec<(&str, Value)>) -> Self {
        Record {
            fields: fields
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        }
    }
}

/// Put an incoming record into schema shape: schema column order, defaults
/// applied to absent columns, integers widened for float columns, kinds
/// checked.
pub fn normalize_record(info: &TableInfo, rec: &Record) -> Result<Record> {
    for (name, _) in rec.iter() {
        if !info.has_column(name) {
            return Err(SemanticError::ColumnNotFound {
                table: info.name.clone(),
                column: name.to_string(),
            }
            .into());
        }
    }
    let mut out = Record::new();
    for col in &info.columns {
        let val = match rec.get(&col.name) {
            Some(v) => v.clone(),
            None => col.default.clone().unwrap_or(Value::Null),
        };
        out.push(col.name.clone(), coerce(col, val)?);
    }
    Ok(out)
}

/// Coerce a value to the column kind, or fail with a typed error.
pub fn coerce(col: &ColumnInfo, val: Value) -> Result<Value> {
    let coerced = match (col.kind, val) {
        (_, Value::Null) => {
            if !col.nullable {
                return Err(ConstraintError::NotNullViolation(col.name.clone()).into());
            }
            Value::Null
        }
        (ColumnKind::Integer, Value::Int(x)) => Value::Int(x),
        (ColumnKind::Float, Value::Float(x)) => Value::Float(x),
        (ColumnKind::Float, Value::Int(x)) => Value::Float(x as f64),
        (ColumnKind::Bool, Value::Bool(b)) => Value::Bool(b),
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
            Value::Str(s)
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
    };
    Ok(coerced)
}

/// Page id allocator, persisted as part of the catalog.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageAlloc {
    pub next_page: PageId,
    pub free: Vec<PageId>,
}

impl PageAlloc {
    pub fn alloc(&mut self) -> PageId {
        if let Some(pid) = self.free.pop() {
            return pid;
        }
        let pid = self.next_page;
        self.next_page += 1;
        pid
    }

    pub fn release(&mut self, pid: PageId) {
        self.free.push(pid);
    }
}

/// Record routing over a table's page chain. Borrows the buffer pool,
/// backing storage and page allocator from the engine for one operation.
pub struct TableOps<'a> {
    pub pool: &'a mut BufferPool,
    pub stg: &'a mut dyn Storage,
    pub alloc: &'a mut PageAlloc,
}

impl<'a> TableOps<'a> {
    /// Append a record to the last page of the table, allocating a new page
    /// on PageFull. The record must already be normalized.
    pub fn insert(&mut self, info: &mut TableInfo, rec: &Record) -> Result<Locator> {
        let bytes = page::serialize_record(rec, &info.columns)?;
        if info.first_page == NO_PAGE {
            let pid = self.alloc.alloc();
            let fid = self.pool.fetch(pid, &mut *self.stg)?;
            page::init(self.pool.data_mut(fid), pid);
            let slot = match page::append(self.pool.data_mut(fid), &bytes) {
                Ok(slot) => slot,
                Err(e) => {
                    self.pool.unpin(fid, true);
                    return Err(e);
                }
            };
            self.pool.unpin(fid, true);
            info.first_page = pid;
            info.last_page = pid;
            info.record_count += 1;
            return Ok(Locator { page: pid, slot });
        }
        let fid = self.pool.fetch(info.last_page, &mut *self.stg)?;
        match page::append(self.pool.data_mut(fid), &bytes) {
            Ok(slot) => {
                self.pool.unpin(fid, true);
                info.record_count += 1;
                Ok(Locator {
                    page: info.last_page,
                    slot,
                })
            }
            Err(Error::Storage(StorageError::PageFull)) => {
                // Chain a fresh page onto the table.
                let pid = self.alloc.alloc();
                page::set_next_page(self.pool.data_mut(fid), pid);
                self.pool.unpin(fid, true);
                let fid = self.pool.fetch(pid, &mut *self.stg)?;
                page::init(self.pool.data_mut(fid), pid);
                let slot = match page::append(self.pool.data_mut(fid), &bytes) {
                    Ok(slot) => slot,
                    Err(e) => {
                        self.pool.unpin(fid, true);
                        return Err(e);
                    }
                };
                self.pool.unpin(fid, true);
                info.last_page = pid;
                info.record_count += 1;
                Ok(Locator { page: pid, slot })
            }
            Err(e) => {
                self.pool.unpin(fid, false);
                Err(e)
            }
        }
    }

    /// Yield every record of the table in page order.
    pub fn scan(&mut self, info: &TableInfo) -> Result<Vec<(Locator, Record)>> {
        let mut out = Vec::with_capacity(info.record_count as usize);
        let mut pid = info.first_page;
        while pid != NO_PAGE {
            let fid = self.pool.fetch(pid, &mut *self.stg)?;
            let data = self.pool.data(fid);
            let next = page::next_page(data);
            let result: Result<()> = (|| {
                for (slot, off) in page::offsets(data).iter().enumerate() {
                    let len = util::getu16(data, *off) as usize;
                    let rec = page::deserialize_record(&data[off + 2..off + 2 + len], &info.columns)?;
                    out.push((
                        Locator {
                            page: pid,
                            slot: slot as u16,
                        },
                        rec,
                    ));
                }
                Ok(())
            })();
            self.pool.unpin(fid, false);
            result?;
            pid = next;
        }
        Ok(out)
    }

    /// Load one record by locator.
    pub fn get(&mut self, info: &TableInfo, loc: Locator) -> Result<Option<Record>> {
        let fid = self.pool.fetch(loc.page, &mut *self.stg)?;
        let data = self.pool.data(fid);
        let result = match page::record_at(data, loc.slot) {
            Some(bytes) => page::deserialize_record(bytes, &info.columns).map(Some),
            None => Ok(None),
        };
        self.pool.unpin(fid, false);
        result
    }

    /// Rewrite a record in place. Returns false when the new payload does
    /// not fit its page, in which case the caller deletes and re-inserts.
    pub fn try_replace(&mut self, info: &TableInfo, loc: Locator, rec: &Record) -> Result<bool> {
        let bytes = page::serialize_record(rec, &info.columns)?;
        let fid = self.pool.fetch(loc.page, &mut *self.stg)?;
        match page::replace(self.pool.data_mut(fid), loc.slot, &bytes) {
            Ok(()) => {
                self.pool.unpin(fid, true);
                Ok(true)
            }
            Err(Error::Storage(StorageError::PageFull)) => {
                self.pool.unpin(fid, false);
                Ok(false)
            }
            Err(e) => {
                self.pool.unpin(fid, false);
                Err(e)
            }
        }
    }

    /// Delete records by locator, compacting each touched page. Returns the
    /// locator moves of surviving records whose slots shifted, so the caller
    /// can repair index entries.
    pub fn delete(
        &mut self,
        info: &mut TableInfo,
        locs: &[Locator],
    ) -> Result<Vec<(Locator, Locator)>> {
        let mut by_page: std::collections::BTreeMap<PageId, Vec<u16>> =
            std::collections::BTreeMap::new();
        for l in locs {
            by_page.entry(l.page).or_default().push(l.slot);
        }
        let mut moved = Vec::new();
        for (pid, mut slots) in by_page {
            slots.sort_unstable();
            slots.dedup();
            let fid = self.pool.fetch(pid, &mut *self.stg)?;
            let old_count = page::record_count(self.pool.data(fid));
            // Remove from the highest slot down so earlier removals do not
            // shift the slots still to be removed.
            for slot in slots.iter().rev() {
                page::remove(self.pool.data_mut(fid), *slot);
            }
            self.pool.unpin(fid, true);
            for old_slot in 0..old_count as u16 {
                if slots.contains(&old_slot) {
                    continue;
                }
                let shift = slots.iter().filter(|s| **s < old_slot).count() as u16;
                if shift > 0 {
                    moved.push((
                        Locator {
                            page: pid,
                            slot: old_slot,
                        },
                        Locator {
                            page: pid,
                            slot: old_slot - shift,
                        },
                    ));
                }
            }
            info.record_count -= slots.len() as u64;
        }
        Ok(moved)
    }

    /// Release every page of the table back to the allocator.
    pub fn free_pages(&mut self, info: &mut TableInfo) -> Result<()> {
        let mut pid = info.first_page;
        while pid != NO_PAGE {
            let fid = self.pool.fetch(pid, &mut *self.stg)?;
            let next = page::next_page(self.pool.data(fid));
            self.pool.unpin(fid, false);
            self.alloc.release(pid);
            pid = next;
        }
        info.first_page = NO_PAGE;
        info.last_page = NO_PAGE;
        info.record_count = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableInfo {
        TableInfo::new(
            "users",
            vec![
                ColumnInfo::new("id", ColumnKind::Integer).primary_key(),
                ColumnInfo::new("name", ColumnKind::Str).max_length(50),
                ColumnInfo::new("age", ColumnKind::Integer),
                ColumnInfo::new("status", ColumnKind::Str).default_value(Value::Str("active".into())),
            ],
        )
    }

    fn engine_parts() -> (BufferPool, MemStorage, PageAlloc) {
        (
            BufferPool::new(4, ReplacementPolicy::Lru),
            MemStorage::new(),
            PageAlloc::default(),
        )
    }

    fn row(id: i64, name: &str, age: i64) -> Record {
        Record::from(vec![
            ("id", Value::Int(id)),
            ("name", Value::Str(name.into())),
            ("age", Value::Int(age)),
        ])
    }

    #[test]
    fn normalize_applies_defaults_and_widens() {
        let info = users();
        let rec = normalize_record(&info, &row(1, "Alice", 25)).unwrap();
        assert_eq!(rec.get("status"), Some(&Value::Str("active".into())));
        assert_eq!(rec.column_names(), vec!["id", "name", "age", "status"]);

        let bad = Record::from(vec![("id", Value::Str("x".into()))]);
        assert!(matches!(
            normalize_record(&info, &bad),
            Err(Error::Semantic(SemanticError::TypeMismatch(_)))
        ));

        let unknown = Record::from(vec![("nope", Value::Int(1))]);
        assert!(matches!(
            normalize_record(&info, &unknown),
            Err(Error::Semantic(SemanticError::ColumnNotFound { .. }))
        ));
    }

    #[test]
    fn insert_scan_round_trip() {
        let (mut pool, mut stg, mut alloc) = engine_parts();
        let mut info = users();
        let mut ops = TableOps {
            pool: &mut pool,
            stg: &mut stg,
            alloc: &mut alloc,
        };
        for i in 0..5 {
            let rec = normalize_record(&info, &row(i, "user", 20 + i)).unwrap();
            ops.insert(&mut info, &rec).unwrap();
        }
        let rows = ops.scan(&info).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[3].1.get("age"), Some(&Value::Int(23)));
        assert_eq!(info.record_count, 5);
        assert_eq!(pool.pinned(), 0);
    }

    #[test]
    fn insert_spills_to_new_page() {
        let (mut pool, mut stg, mut alloc) = engine_parts();
        let mut info = TableInfo::new(
            "blobs",
            vec![ColumnInfo::new("body", ColumnKind::Str)],
        );
        let mut ops = TableOps {
            pool: &mut pool,
            stg: &mut stg,
            alloc: &mut alloc,
        };
        let body = "x".repeat(1500);
        for _ in 0..5 {
            let rec = Record::from(vec![("body", Value::Str(body.clone()))]);
            ops.insert(&mut info, &rec).unwrap();
        }
        assert_ne!(info.first_page, info.last_page);
        assert_eq!(ops.scan(&info).unwrap().len(), 5);
    }

    #[test]
    fn delete_reports_slot_moves() {
        let (mut pool, mut stg, mut alloc) = engine_parts();
        let mut info = users();
        let mut ops = TableOps {
            pool: &mut pool,
            stg: &mut stg,
            alloc: &mut alloc,
        };
        let mut locs = Vec::new();
        for i in 0..4 {
            let rec = normalize_record(&info, &row(i, "u", 20)).unwrap();
            locs.push(ops.insert(&mut info, &rec).unwrap());
        }
        let moved = ops.delete(&mut info, &[locs[1]]).unwrap();
        assert_eq!(info.record_count, 3);
        // Slots 2 and 3 shifted down by one.
        assert_eq!(moved.len(), 2);
        assert_eq!(moved[0].0.slot, 2);
        assert_eq!(moved[0].1.slot, 1);
        let rows = ops.scan(&info).unwrap();
        let ids: Vec<i64> = rows.iter().map(|(_, r)| r.get("id").unwrap().int().unwrap()).collect();
        assert_eq!(ids, vec![0, 2, 3]);
    }

    #[test]
    fn replace_in_place_or_report() {
        let (mut pool, mut stg, mut alloc) = engine_parts();
        let mut info = users();
        let mut ops = TableOps {
            pool: &mut pool,
            stg: &mut stg,
            alloc: &mut alloc,
        };
        let rec = normalize_record(&info, &row(1, "Alice", 25)).unwrap();
        let loc = ops.insert(&mut info, &rec).unwrap();
        let mut upd = rec.clone();
        upd.set("age", Value::Int(26));
        assert!(ops.try_replace(&info, loc, &upd).unwrap());
        let back = ops.get(&info, loc).unwrap().unwrap();
        assert_eq!(back.get("age"), Some(&Value::Int(26)));
    }
}
