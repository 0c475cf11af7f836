use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

/// Catalog persisted as `catalog.json` in the database directory.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub tables: BTreeMap<String, TableInfo>,
    pub indexes: BTreeMap<String, IndexInfo>,
    pub alloc: PageAlloc,
}

/// Timing comparison between a full scan and an index probe for the same
/// predicate.
#[derive(Debug)]
pub struct PerfComparison {
    pub scan_rows: Vec<Record>,
    pub index_rows: Vec<Record>,
    pub scan_micros: u128,
    pub index_micros: u128,
}

const CATALOG_FILE: &str = "catalog.json";
const PAGES_FILE: &str = "data.pages";

/// Storage engine: catalog, buffer pool, page file and index trees behind
/// one value.
pub struct StorageEngine {
    cat: Catalog,
    pool: BufferPool,
    stg: Box<dyn Storage>,
    trees: BTreeMap<String, BTree>,
    dir: Option<PathBuf>,
    btree_order: usize,
}

impl StorageEngine {
    /// Open a database. With a directory the catalog and pages are loaded
    /// from disk; without one everything lives in memory.
    pub fn open(config: &Config) -> Result<Self> {
        let (stg, cat, dir): (Box<dyn Storage>, Catalog, Option<PathBuf>) = match &config.dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(StorageError::Io)?;
                let stg = FileStorage::open(&dir.join(PAGES_FILE)).map_err(StorageError::Io)?;
                let cat_path = dir.join(CATALOG_FILE);
                let cat = if cat_path.exists() {
                    let text = std::fs::read_to_string(&cat_path).map_err(StorageError::Io)?;
                    serde_json::from_str(&text)
                        .map_err(|e| StorageError::CatalogCorrupt(e.to_string()))?
                } else {
                    Catalog::default()
                };
                (Box::new(stg), cat, Some(dir.clone()))
            }
            None => (Box::new(MemStorage::new()), Catalog::default(), None),
        };
        let mut engine = Self {
            cat,
            pool: BufferPool::new(config.pool_frames, config.policy),
            stg,
            trees: BTreeMap::new(),
            dir,
            btree_order: config.btree_order,
        };
        engine.check_catalog()?;
        engine.rebuild_indexes()?;
        Ok(engine)
    }

    /// Every index must name an existing table and existing columns.
    fn check_catalog(&self) -> Result<()> {
        for ix in self.cat.indexes.values() {
            let table = self.cat.tables.get(&ix.table).ok_or_else(|| {
                StorageError::CatalogCorrupt(format!(
                    "index '{}' names missing table '{}'",
                    ix.name, ix.table
                ))
            })?;
            for col in &ix.columns {
                if !table.has_column(col) {
                    return Err(StorageError::CatalogCorrupt(format!(
                        "index '{}' names missing column '{}'",
                        ix.name, col
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Index descriptors persist; the trees themselves are rebuilt from
    /// table pages on open.
    fn rebuild_indexes(&mut self) -> Result<()> {
        let names: Vec<String> = self.cat.indexes.keys().cloned().collect();
        for name in names {
            let ix = self.cat.indexes[&name].clone();
            let tree = self.build_tree(&ix)?;
            self.trees.insert(name, tree);
        }
        Ok(())
    }

    fn build_tree(&mut self, ix: &IndexInfo) -> Result<BTree> {
        let info = self
            .cat
            .tables
            .get(&ix.table)
            .ok_or_else(|| SemanticError::TableNotFound(ix.table.clone()))?
            .clone();
        let mut tree = BTree::new(ix.order, ix.unique);
        let rows = self.with_ops(|ops, tables| {
            let info = &tables[&info.name];
            ops.scan(info)
        })?;
        for (loc, rec) in rows {
            let key = index_key(ix, &rec);
            if tree.insert(key, loc).is_err() {
                return Err(ConstraintError::UniqueViolation {
                    column: ix.columns.join(","),
                    value: index_key(ix, &rec)
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                }
                .into());
            }
        }
        Ok(tree)
    }

    /// Borrow the page-level machinery together with the table map.
    fn with_ops<R>(
        &mut self,
        f: impl FnOnce(&mut TableOps, &mut BTreeMap<String, TableInfo>) -> Result<R>,
    ) -> Result<R> {
        let Catalog { tables, alloc, .. } = &mut self.cat;
        let mut ops = TableOps {
            pool: &mut self.pool,
            stg: self.stg.as_mut(),
            alloc,
        };
        f(&mut ops, tables)
    }

    // ------------------------------------------------------------------
    // DDL.

    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnInfo>) -> Result<()> {
        if self.cat.tables.contains_key(name) {
            return Err(SemanticError::TableExists(name.to_string()).into());
        }
        validate_columns(&columns)?;
        self.cat
            .tables
            .insert(name.to_string(), TableInfo::new(name, columns));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if !self.cat.tables.contains_key(name) {
            return Err(SemanticError::TableNotFound(name.to_string()).into());
        }
        self.with_ops(|ops, tables| {
            let info = tables.get_mut(name).expect("checked above");
            ops.free_pages(info)
        })?;
        self.cat.tables.remove(name);
        let dead: Vec<String> = self
            .cat
            .indexes
            .values()
            .filter(|ix| ix.table == name)
            .map(|ix| ix.name.clone())
            .collect();
        for ix in dead {
            self.cat.indexes.remove(&ix);
            self.trees.remove(&ix);
        }
        Ok(())
    }

    /// Add a column. Existing records are rewritten against the widened
    /// schema with the default (or NULL) filled in.
    pub fn add_column(&mut self, table: &str, col: ColumnInfo) -> Result<()> {
        let info = self
            .cat
            .tables
            .get(table)
            .ok_or_else(|| SemanticError::TableNotFound(table.to_string()))?;
        if info.has_column(&col.name) {
            return Err(SemanticError::DuplicateColumn(col.name.clone()).into());
        }
        if let Some(d) = &col.default {
            coerce(&col, d.clone())
                .map_err(|e| SemanticError::InvalidDefault {
                    column: col.name.clone(),
                    msg: e.to_string(),
                })?;
        }
        let fill = col.default.clone().unwrap_or(Value::Null);
        if fill.is_null() && !col.nullable && info.record_count > 0 {
            return Err(ConstraintError::NotNullViolation(col.name.clone()).into());
        }
        self.with_ops(|ops, tables| {
            let info = tables.get_mut(table).expect("checked above");
            let old = ops.scan(info)?;
            ops.free_pages(info)?;
            info.columns.push(col.clone());
            for (_, mut rec) in old {
                rec.push(col.name.clone(), fill.clone());
                let rec = normalize_record(info, &rec)?;
                ops.insert(info, &rec)?;
            }
            // free_pages and the re-inserts both touched record_count.
            Ok(())
        })?;
        // Locators changed wholesale, so rebuild the table's trees.
        self.rebuild_table_indexes(table)?;
        Ok(())
    }

    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: &[String],
        unique: bool,
    ) -> Result<()> {
        if self.cat.indexes.contains_key(name) {
            return Err(SemanticError::IndexExists(name.to_string()).into());
        }
        let info = self
            .cat
            .tables
            .get(table)
            .ok_or_else(|| SemanticError::TableNotFound(table.to_string()))?;
        for col in columns {
            if !info.has_column(col) {
                return Err(SemanticError::ColumnNotFound {
                    table: table.to_string(),
                    column: col.clone(),
                }
                .into());
            }
        }
        let ix = IndexInfo {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.to_vec(),
            unique,
            order: self.btree_order,
        };
        let tree = self.build_tree(&ix)?;
        self.cat.indexes.insert(name.to_string(), ix);
        self.trees.insert(name.to_string(), tree);
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        if self.cat.indexes.remove(name).is_none() {
            return Err(SemanticError::IndexNotFound(name.to_string()).into());
        }
        self.trees.remove(name);
        Ok(())
    }

    fn rebuild_table_indexes(&mut self, table: &str) -> Result<()> {
        let names: Vec<String> = self
            .cat
            .indexes
            .values()
            .filter(|ix| ix.table == table)
            .map(|ix| ix.name.clone())
            .collect();
        for name in names {
            let ix = self.cat.indexes[&name].clone();
            let tree = self.build_tree(&ix)?;
            self.trees.insert(name, tree);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // DML.

    /// Insert one record. Constraint checks run before any page write.
    pub fn insert(&mut self, table: &str, rec: &Record) -> Result<()> {
        let info = self
            .cat
            .tables
            .get(table)
            .ok_or_else(|| SemanticError::TableNotFound(table.to_string()))?
            .clone();
        let rec = normalize_record(&info, rec)?;
        // Serialization is rehearsed here so length and null violations
        // surface before uniqueness scans.
        page::serialize_record(&rec, &info.columns)?;
        self.check_unique(&info, &rec, None)?;
        self.check_unique_trees(table, &rec)?;
        let loc = self.with_ops(|ops, tables| {
            let info = tables.get_mut(table).expect("checked above");
            ops.insert(info, &rec)
        })?;
        self.index_insert(table, &rec, loc)?;
        Ok(())
    }

    /// Select records, optionally filtered. With `use_index`, a simple
    /// equality or range predicate on an indexed column routes through the
    /// B+tree instead of scanning.
    pub fn select(
        &mut self,
        table: &str,
        wher: Option<&Pred>,
        use_index: bool,
    ) -> Result<Vec<Record>> {
        Ok(self
            .select_locators(table, wher, use_index)?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    pub fn select_locators(
        &mut self,
        table: &str,
        wher: Option<&Pred>,
        use_index: bool,
    ) -> Result<Vec<(Locator, Record)>> {
        let info = self
            .cat
            .tables
            .get(table)
            .ok_or_else(|| SemanticError::TableNotFound(table.to_string()))?
            .clone();
        if use_index {
            if let Some(pred) = wher {
                if let Some(rows) = self.index_probe(&info, pred)? {
                    return Ok(rows);
                }
            }
        }
        let rows = self.with_ops(|ops, tables| {
            let info = &tables[table];
            ops.scan(info)
        })?;
        Ok(match wher {
            Some(p) => rows.into_iter().filter(|(_, r)| p.matches(r)).collect(),
            None => rows,
        })
    }

    /// Try to answer a simple predicate from an index. Returns None when no
    /// index applies.
    fn index_probe(
        &mut self,
        info: &TableInfo,
        pred: &Pred,
    ) -> Result<Option<Vec<(Locator, Record)>>> {
        let (col, op, val) = match pred.simple() {
            Some(x) => x,
            None => return Ok(None),
        };
        let col = base_column(col);
        let ix = match self
            .cat
            .indexes
            .values()
            .find(|ix| ix.table == info.name && ix.columns[0] == col)
        {
            Some(ix) => ix.clone(),
            None => return Ok(None),
        };
        let tree = &self.trees[&ix.name];
        let key = vec![val.clone()];
        let locs = match op {
            CmpOp::Eq => tree.search_prefix(&key),
            // Range probes stay on single-column indexes; a composite key
            // range on the first column would miss extended keys.
            CmpOp::Gt if ix.columns.len() == 1 => tree.search_range(Some((&key, false)), None),
            CmpOp::Ge if ix.columns.len() == 1 => tree.search_range(Some((&key, true)), None),
            CmpOp::Lt if ix.columns.len() == 1 => tree.search_range(None, Some((&key, false))),
            CmpOp::Le if ix.columns.len() == 1 => tree.search_range(None, Some((&key, true))),
            _ => return Ok(None),
        };
        log::debug!(
            "index probe: {} rows via '{}' for {}",
            locs.len(),
            ix.name,
            pred
        );
        let mut out = Vec::with_capacity(locs.len());
        self.with_ops(|ops, tables| {
            let info = &tables[&info.name];
            for loc in locs {
                if let Some(rec) = ops.get(info, loc)? {
                    if pred.matches(&rec) {
                        out.push((loc, rec));
                    }
                }
            }
            Ok(())
        })?;
        Ok(Some(out))
    }

    /// Run the same predicate through a full scan and through the index
    /// path, timing both.
    pub fn select_with_performance(&mut self, table: &str, wher: &Pred) -> Result<PerfComparison> {
        let t0 = Instant::now();
        let scan_rows = self.select(table, Some(wher), false)?;
        let scan_micros = t0.elapsed().as_micros();
        let t1 = Instant::now();
        let index_rows = self.select(table, Some(wher), true)?;
        let index_micros = t1.elapsed().as_micros();
        Ok(PerfComparison {
            scan_rows,
            index_rows,
            scan_micros,
            index_micros,
        })
    }

    /// Update matching records. All constraint checks pass before the first
    /// page write, giving single-statement atomicity.
    pub fn update(
        &mut self,
        table: &str,
        sets: &[Assign],
        wher: Option<&Pred>,
    ) -> Result<usize> {
        let info = self
            .cat
            .tables
            .get(table)
            .ok_or_else(|| SemanticError::TableNotFound(table.to_string()))?
            .clone();
        for a in sets {
            if !info.has_column(&a.column) {
                return Err(SemanticError::ColumnNotFound {
                    table: table.to_string(),
                    column: a.column.clone(),
                }
                .into());
            }
        }
        let matches = self.select_locators(table, wher, false)?;
        let mut changes: Vec<(Locator, Record, Record)> = Vec::with_capacity(matches.len());
        for (loc, old) in matches {
            let mut new = old.clone();
            for a in sets {
                let col = info.column(&a.column).expect("validated above");
                let val = a.value.eval(&old)?;
                new.set(&a.column, coerce(col, val)?);
            }
            let new = normalize_record(&info, &new)?;
            page::serialize_record(&new, &info.columns)?;
            changes.push((loc, old, new));
        }
        let excluded: Vec<Locator> = changes.iter().map(|(l, _, _)| *l).collect();
        for (i, (_, _, new)) in changes.iter().enumerate() {
            self.check_unique(&info, new, Some(&excluded))?;
            // New values must not collide among themselves either.
            for (_, _, other) in changes.iter().take(i) {
                for col in info.columns.iter().filter(|c| c.primary_key || c.unique) {
                    let a = new.get(&col.name);
                    let b = other.get(&col.name);
                    if a.is_some() && !a.unwrap().is_null() && a == b {
                        return Err(constraint_for(col, a.unwrap()).into());
                    }
                }
            }
        }
        let count = changes.len();
        // Apply from the highest locator down: a delete-and-reinsert
        // compacts its page, which would shift lower-ordered pending slots.
        changes.sort_by(|a, b| (b.0.page, b.0.slot).cmp(&(a.0.page, a.0.slot)));
        for (loc, old, new) in changes {
            self.index_delete(table, &old, loc)?;
            let replaced = self.with_ops(|ops, tables| {
                let info = &tables[table];
                ops.try_replace(info, loc, &new)
            })?;
            let final_loc = if replaced {
                loc
            } else {
                let moved = self.with_ops(|ops, tables| {
                    let info = tables.get_mut(table).expect("checked above");
                    ops.delete(info, &[loc])
                })?;
                self.repair_moved(table, &moved)?;
                self.with_ops(|ops, tables| {
                    let info = tables.get_mut(table).expect("checked above");
                    ops.insert(info, &new)
                })?
            };
            self.index_insert(table, &new, final_loc)?;
        }
        Ok(count)
    }

    /// Delete matching records.
    pub fn delete(&mut self, table: &str, wher: Option<&Pred>) -> Result<usize> {
        if !self.cat.tables.contains_key(table) {
            return Err(SemanticError::TableNotFound(table.to_string()).into());
        }
        let matches = self.select_locators(table, wher, false)?;
        let count = matches.len();
        let locs: Vec<Locator> = matches.iter().map(|(l, _)| *l).collect();
        for (loc, rec) in &matches {
            self.index_delete(table, rec, *loc)?;
        }
        let moved = self.with_ops(|ops, tables| {
            let info = tables.get_mut(table).expect("checked above");
            ops.delete(info, &locs)
        })?;
        self.repair_moved(table, &moved)?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Constraints and index maintenance.

    /// Primary-key and unique-column checks against stored records,
    /// optionally excluding locators (the rows being updated).
    fn check_unique(
        &mut self,
        info: &TableInfo,
        rec: &Record,
        exclude: Option<&[Locator]>,
    ) -> Result<()> {
        let guarded: Vec<&ColumnInfo> = info
            .columns
            .iter()
            .filter(|c| c.primary_key || c.unique)
            .collect();
        if guarded.is_empty() {
            return Ok(());
        }
        let rows = self.with_ops(|ops, tables| {
            let info = &tables[&info.name];
            ops.scan(info)
        })?;
        for col in guarded {
            let val = match rec.get(&col.name) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };
            for (loc, other) in &rows {
                if let Some(ex) = exclude {
                    if ex.contains(loc) {
                        continue;
                    }
                }
                if other.get(&col.name) == Some(val) {
                    return Err(constraint_for(col, val).into());
                }
            }
        }
        Ok(())
    }

    /// Unique-index check before the page write.
    fn check_unique_trees(&self, table: &str, rec: &Record) -> Result<()> {
        for ix in self.cat.indexes.values() {
            if ix.table != table || !ix.unique {
                continue;
            }
            let key = index_key(ix, rec);
            if !self.trees[&ix.name].search_exact(&key).is_empty() {
                return Err(ConstraintError::UniqueViolation {
                    column: ix.columns.join(","),
                    value: key
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                }
                .into());
            }
        }
        Ok(())
    }

    fn index_insert(&mut self, table: &str, rec: &Record, loc: Locator) -> Result<()> {
        for ix in self.cat.indexes.values() {
            if ix.table != table {
                continue;
            }
            let key = index_key(ix, rec);
            if self
                .trees
                .get_mut(&ix.name)
                .expect("descriptor and tree kept in step")
                .insert(key, loc)
                .is_err()
            {
                return Err(ConstraintError::UniqueViolation {
                    column: ix.columns.join(","),
                    value: index_key(ix, rec)
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                }
                .into());
            }
        }
        Ok(())
    }

    fn index_delete(&mut self, table: &str, rec: &Record, loc: Locator) -> Result<()> {
        for ix in self.cat.indexes.values() {
            if ix.table != table {
                continue;
            }
            let key = index_key(ix, rec);
            self.trees
                .get_mut(&ix.name)
                .expect("descriptor and tree kept in step")
                .delete(&key, loc);
        }
        Ok(())
    }

    /// Page compaction shifts slots; re-point index entries at the moved
    /// records.
    fn repair_moved(&mut self, table: &str, moved: &[(Locator, Locator)]) -> Result<()> {
        if moved.is_empty() || self.cat.indexes.values().all(|ix| ix.table != table) {
            return Ok(());
        }
        for (old, new) in moved {
            let rec = self.with_ops(|ops, tables| {
                let info = &tables[table];
                ops.get(info, *new)
            })?;
            if let Some(rec) = rec {
                self.index_delete(table, &rec, *old)?;
                self.index_insert(table, &rec, *new)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection and lifecycle.

    pub fn list_tables(&self) -> Vec<String> {
        self.cat.tables.keys().cloned().collect()
    }

    pub fn table_info(&self, name: &str) -> Option<&TableInfo> {
        self.cat.tables.get(name)
    }

    pub fn indexes_on(&self, table: &str) -> Vec<&IndexInfo> {
        self.cat
            .indexes
            .values()
            .filter(|ix| ix.table == table)
            .collect()
    }

    pub fn index_info(&self, name: &str) -> Option<&IndexInfo> {
        self.cat.indexes.get(name)
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.pool.stats()
    }

    pub fn pool_policy(&self) -> ReplacementPolicy {
        self.pool.policy()
    }

    #[cfg(test)]
    pub fn pinned_frames(&self) -> usize {
        self.pool.pinned()
    }

    #[cfg(test)]
    pub fn pool_clean(&self) -> bool {
        self.pool.clean()
    }

    /// Write dirty pages and the catalog out. A flushed engine has zero
    /// dirty frames.
    pub fn flush_all(&mut self) -> Result<()> {
        self.pool.flush_all(self.stg.as_mut())?;
        if let Some(dir) = &self.dir {
            let text = serde_json::to_string_pretty(&self.cat)
                .map_err(|e| StorageError::CatalogCorrupt(e.to_string()))?;
            std::fs::write(dir.join(CATALOG_FILE), text).map_err(StorageError::Io)?;
        }
        Ok(())
    }
}

/// Key for a record under an index: the indexed column values in order.
pub fn index_key(ix: &IndexInfo, rec: &Record) -> Key {
    ix.columns
        .iter()
        .map(|c| rec.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Strip an `alias.` qualifier.
pub fn base_column(name: &str) -> &str {
    name.rsplit_once('.').map(|(_, c)| c).unwrap_or(name)
}

fn constraint_for(col: &ColumnInfo, val: &Value) -> ConstraintError {
    if col.primary_key {
        ConstraintError::PrimaryKeyViolation {
            column: col.name.clone(),
            value: val.to_string(),
        }
    } else {
        ConstraintError::UniqueViolation {
            column: col.name.clone(),
            value: val.to_string(),
        }
    }
}

fn validate_columns(columns: &[ColumnInfo]) -> Result<()> {
    if columns.is_empty() {
        return Err(SemanticError::TypeMismatch("table needs at least one column".into()).into());
    }
    let mut seen = std::collections::HashSet::new();
    let mut pk = 0;
    for col in columns {
        if !seen.insert(col.name.as_str()) {
            return Err(SemanticError::DuplicateColumn(col.name.clone()).into());
        }
        if col.primary_key {
            pk += 1;
        }
        if let Some(d) = &col.default {
            coerce(col, d.clone()).map_err(|e| SemanticError::InvalidDefault {
                column: col.name.clone(),
                msg: e.to_string(),
            })?;
        }
    }
    if pk > 1 {
        return Err(SemanticError::TypeMismatch("multiple primary key columns".into()).into());
    }
    Ok(())
}
