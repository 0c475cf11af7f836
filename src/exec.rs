use crate::*;
use rustc_hash::FxHashMap;

/// A register holds a record list, a scalar, or a boolean.
#[derive(Clone, Debug)]
pub enum RegVal {
    Rows(Vec<Record>),
    Scalar(Value),
    Bool(bool),
}

/// Execution counters, accumulated across queries.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecStats {
    pub instructions_executed: u64,
    pub tables_opened: u64,
    pub records_scanned: u64,
    pub records_filtered: u64,
    pub records_output: u64,
}

/// Per-query interpreter state.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    pub current_table: Option<String>,
    pub current_records: Vec<Record>,
    pub filtered_records: Vec<Record>,
    pub projected_columns: Option<Vec<String>>,
    pub comparison_result: Option<bool>,
    pub registers: FxHashMap<Reg, RegVal>,
    pub groups: Vec<(Vec<Value>, Vec<Record>)>,
    pub group_columns: Vec<String>,
    /// Set once a grouped aggregate has materialized per-group records, so
    /// a second aggregate extends them instead of rebuilding.
    pub group_results: bool,
    pub join_tables: Vec<String>,
    pub use_index: bool,
    pub limit: Option<usize>,
    pub offset: usize,
    pub output_results: Vec<Record>,
}

/// Linear interpreter over a register program, driving the storage engine.
pub struct Executor<'a> {
    store: &'a mut StorageEngine,
    pub ctx: ExecutionContext,
    pub stats: ExecStats,
    reg_labels: FxHashMap<Reg, String>,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a mut StorageEngine) -> Self {
        Self {
            store,
            ctx: ExecutionContext::default(),
            stats: ExecStats::default(),
            reg_labels: FxHashMap::default(),
        }
    }

    /// Execute a program to completion and return the output rows.
    /// A runtime error discards any partial output.
    pub fn run(&mut self, prog: &Program, use_index: bool) -> Result<Vec<Record>> {
        self.ctx = ExecutionContext {
            use_index,
            ..Default::default()
        };
        self.reg_labels = prog.reg_labels.clone();
        let labels = label_positions(&prog.instructions);
        let result = self.run_inner(prog, &labels);
        // Finalization: close anything still open, even on abort.
        self.ctx.current_table = None;
        result?;
        Ok(std::mem::take(&mut self.ctx.output_results))
    }

    fn run_inner(&mut self, prog: &Program, labels: &FxHashMap<String, usize>) -> Result<()> {
        let instrs = &prog.instructions;
        let mut ip = 0;
        while ip < instrs.len() {
            let ins = &instrs[ip];
            ip += 1;
            self.stats.instructions_executed += 1;
            match ins.op {
                Opcode::Begin | Opcode::End | Opcode::Nop | Opcode::Label => {}
                Opcode::Open => self.x_open(ins)?,
                Opcode::Close => self.x_close(),
                Opcode::Scan => self.x_scan(ins)?,
                Opcode::Filter => self.x_filter(ins)?,
                Opcode::Project => self.x_project(ins, prog)?,
                op if op.is_join() => self.x_join(ins)?,
                op if op.is_aggregate() => self.x_aggregate(ins)?,
                Opcode::GroupBy => self.x_group_by(ins)?,
                Opcode::OrderBy => self.x_order_by(ins)?,
                Opcode::Having => self.x_having(ins)?,
                Opcode::Limit => self.ctx.limit = Some(self.count_operand(ins)?),
                Opcode::Offset => self.ctx.offset = self.count_operand(ins)?,
                op if op.is_comparison() => self.x_comparison(ins)?,
                Opcode::And | Opcode::Or | Opcode::Not => self.x_logic(ins)?,
                Opcode::Load => self.x_load(ins)?,
                Opcode::Store | Opcode::Move => self.x_move(ins)?,
                Opcode::Jump => {
                    ip = self.jump_target(ins, labels)?;
                }
                Opcode::JumpIf => {
                    if self.ctx.comparison_result == Some(true) {
                        ip = self.jump_target(ins, labels)?;
                    }
                }
                Opcode::Output => self.x_output(ins)?,
                Opcode::Halt => break,
                other => {
                    return Err(ExecError::UnknownInstruction(other.name().to_string()).into())
                }
            }
        }
        Ok(())
    }

    fn jump_target(&self, ins: &Instruction, labels: &FxHashMap<String, usize>) -> Result<usize> {
        match ins.operands.last() {
            Some(Operand::Name(l)) => labels
                .get(l)
                .copied()
                .ok_or_else(|| ExecError::UnknownInstruction(format!("label '{}'", l)).into()),
            _ => Err(ExecError::UnknownInstruction("jump without label".into()).into()),
        }
    }

    fn count_operand(&self, ins: &Instruction) -> Result<usize> {
        match ins.operands.first() {
            Some(Operand::Value(Value::Int(n))) if *n >= 0 => Ok(*n as usize),
            other => Err(ExecError::TypeMismatch(format!(
                "expected a count operand, got {:?}",
                other
            ))
            .into()),
        }
    }

    fn x_open(&mut self, ins: &Instruction) -> Result<()> {
        if let Some(Operand::Table(t)) = ins.operands.first() {
            self.ctx.current_table = Some(t.clone());
            self.stats.tables_opened += 1;
        }
        Ok(())
    }

    fn x_close(&mut self) {
        self.ctx.current_table = None;
        self.ctx.current_records.clear();
    }

    fn x_scan(&mut self, ins: &Instruction) -> Result<()> {
        let table = match ins.operands.first() {
            Some(Operand::Table(t)) => t.clone(),
            _ => self
                .ctx
                .current_table
                .clone()
                .ok_or(ExecError::NoOpenTable("SCAN"))?,
        };
        if self.ctx.current_table.is_none() {
            return Err(ExecError::NoOpenTable("SCAN").into());
        }
        let records = self.store.select(&table, None, self.ctx.use_index)?;
        self.stats.records_scanned += records.len() as u64;
        log::trace!("scan {}: {} records", table, records.len());
        if let Some(r) = ins.result {
            self.ctx.registers.insert(r, RegVal::Rows(records.clone()));
        }
        self.ctx.current_records = records;
        Ok(())
    }

    /// FILTER in one of three modes: a predicate operand, a boolean
    /// register, or the stored comparison result.
    fn x_filter(&mut self, ins: &Instruction) -> Result<()> {
        let keep_all = match ins.operands.first() {
            Some(Operand::Pred(p)) => {
                let records = std::mem::take(&mut self.ctx.current_records);
                let kept: Vec<Record> = records.into_iter().filter(|r| p.matches(r)).collect();
                self.stats.records_filtered += kept.len() as u64;
                self.ctx.filtered_records = kept.clone();
                self.ctx.current_records = kept.clone();
                if let Some(r) = ins.result {
                    self.ctx.registers.insert(r, RegVal::Rows(kept));
                }
                return Ok(());
            }
            Some(Operand::Reg(r)) => match self.ctx.registers.get(r) {
                Some(RegVal::Bool(b)) => *b,
                _ => true,
            },
            _ => self.ctx.comparison_result.unwrap_or(true),
        };
        if keep_all {
            self.ctx.filtered_records = self.ctx.current_records.clone();
        } else {
            self.ctx.filtered_records.clear();
            self.ctx.current_records.clear();
        }
        Ok(())
    }

    fn x_project(&mut self, ins: &Instruction, prog: &Program) -> Result<()> {
        let cols = match ins.operands.get(1) {
            Some(Operand::Columns(c)) => c.clone(),
            _ => {
                return Err(
                    ExecError::TypeMismatch("PROJECT without a column list".into()).into(),
                )
            }
        };
        let records = std::mem::take(&mut self.ctx.current_records);
        let mut projected = Vec::with_capacity(records.len());
        for rec in &records {
            let mut out = Record::new();
            for col in &cols {
                if col == "*" {
                    out = rec.clone();
                    break;
                }
                if let Some(v) = rec.lookup(col) {
                    out.push(col.clone(), v.clone());
                    continue;
                }
                // An aggregate alias resolves through the sentinel column
                // its aggregate left behind.
                if prog.agg_aliases.contains_key(col) {
                    if let Some(v) = sentinel_value(rec) {
                        out.push(col.clone(), v.clone());
                        continue;
                    }
                }
                out.push(col.clone(), Value::Null);
            }
            projected.push(out);
        }
        if let Some(r) = ins.result {
            self.ctx
                .registers
                .insert(r, RegVal::Rows(projected.clone()));
        }
        self.ctx.current_records = projected;
        self.ctx.projected_columns = Some(cols);
        Ok(())
    }

    /// Nested-loop join. The left side is the running join result when one
    /// exists, otherwise the left table itself.
    fn x_join(&mut self, ins: &Instruction) -> Result<()> {
        let spec = match ins.operands.get(2) {
            Some(Operand::Join(s)) => s.clone(),
            _ => return Err(ExecError::TypeMismatch("JOIN without a spec".into()).into()),
        };
        let alias1 = spec
            .left_alias
            .clone()
            .unwrap_or_else(|| spec.left_table.clone());
        let alias2 = spec
            .right_alias
            .clone()
            .unwrap_or_else(|| spec.right_table.clone());
        let chained = !self.ctx.join_tables.is_empty();
        let left: Vec<Record> = if chained {
            std::mem::take(&mut self.ctx.current_records)
        } else {
            self.store
                .select(&spec.left_table, None, false)?
                .into_iter()
                .map(|r| prefix_record(&r, &alias1))
                .collect()
        };
        let right: Vec<Record> = self
            .store
            .select(&spec.right_table, None, false)?
            .into_iter()
            .map(|r| prefix_record(&r, &alias2))
            .collect();

        let left_columns: Vec<String> = match left.first() {
            Some(r) => r.column_names().iter().map(|s| s.to_string()).collect(),
            None => self
                .store
                .table_info(&spec.left_table)
                .map(|i| {
                    i.column_names()
                        .iter()
                        .map(|c| format!("{}.{}", alias1, c))
                        .collect()
                })
                .unwrap_or_default(),
        };
        let right_columns: Vec<String> = self
            .store
            .table_info(&spec.right_table)
            .map(|i| {
                i.column_names()
                    .iter()
                    .map(|c| format!("{}.{}", alias2, c))
                    .collect()
            })
            .unwrap_or_default();

        let on_match = |l: &Record, r: &Record| -> bool {
            let lv = l.lookup(&spec.on.left).or_else(|| r.lookup(&spec.on.left));
            let rv = r.lookup(&spec.on.right).or_else(|| l.lookup(&spec.on.right));
            match (lv, rv) {
                (Some(a), Some(b)) => !a.is_null() && a == b,
                _ => false,
            }
        };

        let mut joined = Vec::new();
        let mut right_matched = vec![false; right.len()];
        for l in &left {
            let mut matched = false;
            for (j, r) in right.iter().enumerate() {
                if on_match(l, r) {
                    joined.push(merge_records(l, r));
                    matched = true;
                    right_matched[j] = true;
                }
            }
            if !matched && matches!(spec.kind, JoinKind::Left | JoinKind::Full) {
                joined.push(pad_record(l, &right_columns));
            }
        }
        if matches!(spec.kind, JoinKind::Right | JoinKind::Full) {
            for (j, r) in right.iter().enumerate() {
                if !right_matched[j] {
                    joined.push(pad_record_left(&left_columns, r));
                }
            }
        }
        log::trace!(
            "{} {} x {}: {} rows",
            ins.op.name(),
            spec.left_table,
            spec.right_table,
            joined.len()
        );
        if let Some(r) = ins.result {
            self.ctx.registers.insert(r, RegVal::Rows(joined.clone()));
        }
        self.ctx.current_records = joined;
        if !chained {
            self.ctx.join_tables.push(spec.left_table.clone());
        }
        self.ctx.join_tables.push(spec.right_table.clone());
        Ok(())
    }

    /// Aggregate over the groups when a GROUP BY is active, otherwise over
    /// the current records into a scalar register.
    fn x_aggregate(&mut self, ins: &Instruction) -> Result<()> {
        let column = match ins.operands.get(1) {
            Some(Operand::Column(c)) => c.clone(),
            _ => "*".to_string(),
        };
        let func = match ins.op {
            Opcode::Count => AggFunc::Count,
            Opcode::Sum => AggFunc::Sum,
            Opcode::Avg => AggFunc::Avg,
            Opcode::Min => AggFunc::Min,
            Opcode::Max => AggFunc::Max,
            other => return Err(ExecError::UnknownInstruction(other.name().to_string()).into()),
        };
        let label = ins.result.and_then(|r| self.reg_labels.get(&r).cloned());
        if !self.ctx.groups.is_empty() {
            let results = if self.ctx.group_results
                && self.ctx.current_records.len() == self.ctx.groups.len()
            {
                // A later aggregate of the same GROUP BY extends the rows
                // the first one produced.
                let mut records = std::mem::take(&mut self.ctx.current_records);
                for (rec, (_, group)) in records.iter_mut().zip(&self.ctx.groups) {
                    let val = aggregate_value(func, &column, group);
                    rec.set(func.sentinel(), val.clone());
                    if let Some(l) = &label {
                        rec.set(l, val);
                    }
                }
                records
            } else {
                let mut results = Vec::with_capacity(self.ctx.groups.len());
                for (key, records) in &self.ctx.groups {
                    let val = aggregate_value(func, &column, records);
                    let mut rec = Record::new();
                    for (col, v) in self.ctx.group_columns.iter().zip(key) {
                        rec.push(col.clone(), v.clone());
                    }
                    rec.push(func.sentinel().to_string(), val.clone());
                    if let Some(l) = &label {
                        rec.push(l.clone(), val);
                    }
                    results.push(rec);
                }
                self.ctx.group_results = true;
                results
            };
            if let Some(r) = ins.result {
                self.ctx.registers.insert(r, RegVal::Rows(results.clone()));
            }
            self.ctx.current_records = results;
        } else {
            let val = aggregate_value(func, &column, &self.ctx.current_records);
            log::trace!("{}({}) = {}", func.name(), column, val);
            if let Some(r) = ins.result {
                self.ctx.registers.insert(r, RegVal::Scalar(val));
            }
        }
        Ok(())
    }

    /// Partition the current records by the grouping columns, keeping
    /// first-seen group order.
    fn x_group_by(&mut self, ins: &Instruction) -> Result<()> {
        let cols = match ins.operands.get(1) {
            Some(Operand::Columns(c)) => c.clone(),
            _ => return Err(ExecError::TypeMismatch("GROUP_BY without columns".into()).into()),
        };
        let mut groups: Vec<(Vec<Value>, Vec<Record>)> = Vec::new();
        let mut index: FxHashMap<String, usize> = FxHashMap::default();
        for rec in &self.ctx.current_records {
            let key: Vec<Value> = cols
                .iter()
                .map(|c| rec.lookup(c).cloned().unwrap_or(Value::Null))
                .collect();
            let tag = key
                .iter()
                .map(|v| quoted(v))
                .collect::<Vec<_>>()
                .join("\u{1f}");
            match index.get(&tag) {
                Some(&i) => groups[i].1.push(rec.clone()),
                None => {
                    index.insert(tag, groups.len());
                    groups.push((key, vec![rec.clone()]));
                }
            }
        }
        log::trace!("group by {}: {} groups", cols.join(","), groups.len());
        self.ctx.groups = groups;
        self.ctx.group_columns = cols;
        Ok(())
    }

    /// Stable sort of the pending records. Nulls sort as if zero.
    fn x_order_by(&mut self, ins: &Instruction) -> Result<()> {
        let keys = match ins.operands.get(1) {
            Some(Operand::Order(k)) => k.clone(),
            _ => return Err(ExecError::TypeMismatch("ORDER_BY without keys".into()).into()),
        };
        let cmp = |a: &Record, b: &Record| {
            for k in &keys {
                let av = a.lookup(&k.column).cloned().unwrap_or(Value::Null);
                let bv = b.lookup(&k.column).cloned().unwrap_or(Value::Null);
                let ord = av.sort_cmp(&bv);
                let ord = if k.desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        };
        self.ctx.current_records.sort_by(&cmp);
        self.ctx.filtered_records.sort_by(&cmp);
        if let Some(r) = ins.result {
            self.ctx
                .registers
                .insert(r, RegVal::Rows(self.ctx.current_records.clone()));
        }
        Ok(())
    }

    /// Filter groups by `aggregate(column) op literal` before the
    /// aggregates materialize.
    fn x_having(&mut self, ins: &Instruction) -> Result<()> {
        let cond = match ins.operands.first() {
            Some(Operand::Having(h)) => h.clone(),
            _ => return Err(ExecError::TypeMismatch("HAVING without a condition".into()).into()),
        };
        let column = cond.column.clone().unwrap_or_else(|| "*".to_string());
        let keep: Vec<bool> = self
            .ctx
            .groups
            .iter()
            .map(|(_, records)| {
                let val = aggregate_value(cond.func, &column, records);
                !val.is_null() && cond.op.eval(val.total_cmp(&cond.value))
            })
            .collect();
        // Per-group rows already materialized by an aggregate are dropped
        // along with their groups.
        if self.ctx.group_results && self.ctx.current_records.len() == keep.len() {
            let mut it = keep.iter();
            self.ctx.current_records.retain(|_| *it.next().expect("keep flags match rows"));
        }
        let mut it = keep.iter();
        self.ctx.groups.retain(|_| *it.next().expect("keep flags match groups"));
        Ok(())
    }

    /// Pure comparison over scalar operands.
    fn x_comparison(&mut self, ins: &Instruction) -> Result<()> {
        let l = self.scalar_operand(ins.operands.first())?;
        let r = self.scalar_operand(ins.operands.get(1))?;
        let op = match ins.op {
            Opcode::Gt => CmpOp::Gt,
            Opcode::Ge => CmpOp::Ge,
            Opcode::Lt => CmpOp::Lt,
            Opcode::Le => CmpOp::Le,
            Opcode::Eq => CmpOp::Eq,
            Opcode::Ne => CmpOp::Ne,
            other => return Err(ExecError::UnknownInstruction(other.name().to_string()).into()),
        };
        let result = op.eval(l.total_cmp(&r));
        self.ctx.comparison_result = Some(result);
        if let Some(r) = ins.result {
            self.ctx.registers.insert(r, RegVal::Bool(result));
        }
        Ok(())
    }

    fn x_logic(&mut self, ins: &Instruction) -> Result<()> {
        let mut vals = Vec::new();
        for op in &ins.operands {
            vals.push(self.bool_operand(op)?);
        }
        let result = match ins.op {
            Opcode::And => vals.iter().all(|b| *b),
            Opcode::Or => vals.iter().any(|b| *b),
            Opcode::Not => !vals.first().copied().unwrap_or(false),
            other => return Err(ExecError::UnknownInstruction(other.name().to_string()).into()),
        };
        self.ctx.comparison_result = Some(result);
        if let Some(r) = ins.result {
            self.ctx.registers.insert(r, RegVal::Bool(result));
        }
        Ok(())
    }

    fn scalar_operand(&self, op: Option<&Operand>) -> Result<Value> {
        match op {
            Some(Operand::Value(v)) => Ok(v.clone()),
            Some(Operand::Reg(r)) => match self.ctx.registers.get(r) {
                Some(RegVal::Scalar(v)) => Ok(v.clone()),
                Some(RegVal::Bool(b)) => Ok(Value::Bool(*b)),
                other => Err(ExecError::TypeMismatch(format!(
                    "register R{} holds {:?}, expected a scalar",
                    r, other
                ))
                .into()),
            },
            other => Err(
                ExecError::TypeMismatch(format!("expected a scalar operand, got {:?}", other))
                    .into(),
            ),
        }
    }

    fn bool_operand(&self, op: &Operand) -> Result<bool> {
        match op {
            Operand::Value(Value::Bool(b)) => Ok(*b),
            Operand::Reg(r) => match self.ctx.registers.get(r) {
                Some(RegVal::Bool(b)) => Ok(*b),
                _ => Ok(self.ctx.comparison_result.unwrap_or(false)),
            },
            _ => Err(ExecError::TypeMismatch("expected a boolean operand".into()).into()),
        }
    }

    /// LOAD writes the named context slot, or a scalar into a register.
    fn x_load(&mut self, ins: &Instruction) -> Result<()> {
        match (ins.operands.first(), ins.operands.get(1)) {
            (Some(Operand::Name(n)), Some(Operand::Value(Value::Bool(b)))) => {
                match n.as_str() {
                    "use_index" => self.ctx.use_index = *b,
                    "comparison_result" => self.ctx.comparison_result = Some(*b),
                    other => {
                        return Err(ExecError::UnknownInstruction(format!(
                            "LOAD target '{}'",
                            other
                        ))
                        .into())
                    }
                }
                Ok(())
            }
            (Some(Operand::Value(v)), _) => {
                if let Some(r) = ins.result {
                    self.ctx.registers.insert(r, RegVal::Scalar(v.clone()));
                }
                Ok(())
            }
            _ => Err(ExecError::TypeMismatch("malformed LOAD".into()).into()),
        }
    }

    /// MOVE and STORE copy between registers, carrying the output label.
    fn x_move(&mut self, ins: &Instruction) -> Result<()> {
        let src = match ins.operands.first() {
            Some(Operand::Reg(r)) => *r,
            _ => return Err(ExecError::TypeMismatch("MOVE without a source".into()).into()),
        };
        let dst = match ins.result {
            Some(r) => r,
            None => return Ok(()),
        };
        if let Some(v) = self.ctx.registers.get(&src).cloned() {
            self.ctx.registers.insert(dst, v);
        }
        if let Some(label) = self.reg_labels.get(&src).cloned() {
            self.reg_labels.entry(dst).or_insert(label);
        }
        Ok(())
    }

    /// OUTPUT: pick the pending rows (or wrap a scalar aggregate), apply
    /// OFFSET then LIMIT, then the projection column order.
    fn x_output(&mut self, ins: &Instruction) -> Result<()> {
        let src = match ins.operands.first() {
            Some(Operand::Reg(r)) => Some(*r),
            _ => None,
        };
        let mut rows: Vec<Record> = match src.and_then(|r| self.ctx.registers.get(&r)) {
            Some(RegVal::Scalar(v)) => {
                let label = src
                    .and_then(|r| self.reg_labels.get(&r).cloned())
                    .or_else(|| single_projected_column(&self.ctx))
                    .unwrap_or_else(|| "result".to_string());
                let mut rec = Record::new();
                rec.push(label, v.clone());
                vec![rec]
            }
            _ => {
                if !self.ctx.filtered_records.is_empty() {
                    self.ctx.filtered_records.clone()
                } else {
                    self.ctx.current_records.clone()
                }
            }
        };
        if self.ctx.offset > 0 {
            rows = rows.split_off(self.ctx.offset.min(rows.len()));
        }
        if let Some(limit) = self.ctx.limit {
            rows.truncate(limit);
        }
        if let Some(cols) = &self.ctx.projected_columns {
            rows = rows
                .iter()
                .map(|rec| {
                    let mut out = Record::new();
                    for col in cols {
                        if col == "*" {
                            out = rec.clone();
                            break;
                        }
                        if let Some(v) = rec.lookup(col) {
                            out.push(col.clone(), v.clone());
                        }
                    }
                    out
                })
                .filter(|r| !r.is_empty())
                .collect();
        }
        self.stats.records_output += rows.len() as u64;
        self.ctx.output_results.extend(rows);
        Ok(())
    }
}

fn label_positions(instrs: &[Instruction]) -> FxHashMap<String, usize> {
    let mut out = FxHashMap::default();
    for (i, ins) in instrs.iter().enumerate() {
        if ins.op == Opcode::Label {
            if let Some(Operand::Name(l)) = ins.operands.first() {
                out.insert(l.clone(), i);
            }
        }
    }
    out
}

/// First sentinel column left behind by a grouped aggregate.
fn sentinel_value(rec: &Record) -> Option<&Value> {
    for f in [
        "_count_result",
        "_sum_result",
        "_avg_result",
        "_min_result",
        "_max_result",
    ] {
        if let Some(v) = rec.get(f) {
            return Some(v);
        }
    }
    None
}

fn single_projected_column(ctx: &ExecutionContext) -> Option<String> {
    match &ctx.projected_columns {
        Some(cols) if cols.len() == 1 && cols[0] != "*" => Some(cols[0].clone()),
        _ => None,
    }
}

/// Compute one aggregate over a record slice.
pub fn aggregate_value(func: AggFunc, column: &str, records: &[Record]) -> Value {
    match func {
        AggFunc::Count => {
            if column == "*" {
                Value::Int(records.len() as i64)
            } else {
                let n = records
                    .iter()
                    .filter(|r| r.lookup(column).map(|v| !v.is_null()).unwrap_or(false))
                    .count();
                Value::Int(n as i64)
            }
        }
        AggFunc::Sum => {
            let mut int_sum: i64 = 0;
            let mut float_sum: f64 = 0.0;
            let mut any_float = false;
            for r in records {
                match r.lookup(column) {
                    Some(Value::Int(x)) => {
                        int_sum += x;
                        float_sum += *x as f64;
                    }
                    Some(Value::Float(x)) => {
                        any_float = true;
                        float_sum += x;
                    }
                    _ => {}
                }
            }
            if any_float {
                Value::Float(float_sum)
            } else {
                Value::Int(int_sum)
            }
        }
        AggFunc::Avg => {
            let mut sum = 0.0;
            let mut n = 0usize;
            for r in records {
                if let Some(v) = r.lookup(column).and_then(Value::num) {
                    sum += v;
                    n += 1;
                }
            }
            if n == 0 {
                Value::Null
            } else {
                Value::Float(sum / n as f64)
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<Value> = None;
            for r in records {
                let v = match r.lookup(column) {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => continue,
                };
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        let take = if func == AggFunc::Min {
                            v.total_cmp(&b) == std::cmp::Ordering::Less
                        } else {
                            v.total_cmp(&b) == std::cmp::Ordering::Greater
                        };
                        if take {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            best.unwrap_or(Value::Null)
        }
    }
}

/// Qualify every bare field with the table alias.
fn prefix_record(rec: &Record, alias: &str) -> Record {
    let mut out = Record::new();
    for (name, v) in rec.iter() {
        if name.contains('.') {
            out.push(name.to_string(), v.clone());
        } else {
            out.push(format!("{}.{}", alias, name), v.clone());
        }
    }
    out
}

fn merge_records(l: &Record, r: &Record) -> Record {
    let mut out = Record::new();
    for (name, v) in l.iter() {
        out.push(name.to_string(), v.clone());
    }
    for (name, v) in r.iter() {
        out.push(name.to_string(), v.clone());
    }
    out
}

/// Left row with the right side padded out with nulls.
fn pad_record(l: &Record, right_columns: &[String]) -> Record {
    let mut out = Record::new();
    for (name, v) in l.iter() {
        out.push(name.to_string(), v.clone());
    }
    for c in right_columns {
        out.push(c.clone(), Value::Null);
    }
    out
}

/// Right row with the left side padded out with nulls.
fn pad_record_left(left_columns: &[String], r: &Record) -> Record {
    let mut out = Record::new();
    for c in left_columns {
        out.push(c.clone(), Value::Null);
    }
    for (name, v) in r.iter() {
        out.push(name.to_string(), v.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: Vec<(&str, Value)>) -> Record {
        Record::from(pairs)
    }

    #[test]
    fn aggregate_values() {
        let rows = vec![
            rec(vec![("a", Value::Int(1))]),
            rec(vec![("a", Value::Int(2))]),
            rec(vec![("a", Value::Null)]),
        ];
        assert_eq!(aggregate_value(AggFunc::Count, "*", &rows), Value::Int(3));
        assert_eq!(aggregate_value(AggFunc::Count, "a", &rows), Value::Int(2));
        assert_eq!(aggregate_value(AggFunc::Sum, "a", &rows), Value::Int(3));
        assert_eq!(aggregate_value(AggFunc::Avg, "a", &rows), Value::Float(1.5));
        assert_eq!(aggregate_value(AggFunc::Min, "a", &rows), Value::Int(1));
        assert_eq!(aggregate_value(AggFunc::Max, "a", &rows), Value::Int(2));
        assert_eq!(aggregate_value(AggFunc::Max, "a", &[]), Value::Null);
    }

    #[test]
    fn sum_stays_integral_until_a_float_appears() {
        let rows = vec![
            rec(vec![("a", Value::Int(1))]),
            rec(vec![("a", Value::Float(0.5))]),
        ];
        assert_eq!(aggregate_value(AggFunc::Sum, "a", &rows), Value::Float(1.5));
    }

    #[test]
    fn record_prefix_and_merge() {
        let l = rec(vec![("id", Value::Int(1))]);
        let p = prefix_record(&l, "u");
        assert_eq!(p.get("u.id"), Some(&Value::Int(1)));
        let r = prefix_record(&rec(vec![("score", Value::Float(90.0))]), "c");
        let m = merge_records(&p, &r);
        assert_eq!(m.lookup("score"), Some(&Value::Float(90.0)));
        assert_eq!(m.lookup("u.id"), Some(&Value::Int(1)));
    }
}
