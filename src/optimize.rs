use crate::*;

/// Optimizer switches. Each pass can be disabled on its own; `enabled`
/// turns the whole rewriter off.
#[derive(Clone, Debug)]
pub struct OptConfig {
    pub enabled: bool,
    pub predicate_pushdown: bool,
    pub projection_pushdown: bool,
    pub index_hinting: bool,
    pub join_reorder: bool,
    pub constant_folding: bool,
    pub dead_code: bool,
    /// Tables below this row count prefer a full scan over the index.
    pub small_table_threshold: u64,
}

impl Default for OptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            predicate_pushdown: true,
            projection_pushdown: true,
            index_hinting: true,
            join_reorder: true,
            constant_folding: true,
            dead_code: true,
            small_table_threshold: 100,
        }
    }
}

/// What the rewriter did to the program.
#[derive(Clone, Debug, Default)]
pub struct OptStats {
    pub original_len: usize,
    pub optimized_len: usize,
    pub applied: Vec<&'static str>,
    /// Estimated cost reduction in percent, from the weighted
    /// per-instruction cost model.
    pub cost_reduction: f64,
}

/// Rewrite the instruction program in place. Passes run once, in a fixed
/// order, each behind its switch.
pub fn optimize(prog: &mut Program, store: &StorageEngine, cfg: &OptConfig) -> OptStats {
    let mut stats = OptStats {
        original_len: prog.instructions.len(),
        optimized_len: prog.instructions.len(),
        ..Default::default()
    };
    if !cfg.enabled {
        return stats;
    }
    let original_cost = cost(&prog.instructions);

    if cfg.predicate_pushdown && predicate_pushdown(&mut prog.instructions, store) {
        stats.applied.push("predicate pushdown");
    }
    if cfg.projection_pushdown && projection_pushdown(&mut prog.instructions, store) {
        stats.applied.push("projection pushdown");
    }
    if cfg.index_hinting && index_hinting(&mut prog.instructions, store, cfg) {
        stats.applied.push("index hinting");
    }
    if cfg.join_reorder && join_reorder(&mut prog.instructions, store) {
        stats.applied.push("join reorder");
    }
    if cfg.constant_folding && constant_folding(&mut prog.instructions) {
        stats.applied.push("constant folding");
    }
    if cfg.dead_code && dead_code(&mut prog.instructions) {
        stats.applied.push("dead code elimination");
    }

    stats.optimized_len = prog.instructions.len();
    let optimized_cost = cost(&prog.instructions);
    if original_cost > 0.0 {
        stats.cost_reduction = ((original_cost - optimized_cost) / original_cost * 100.0).max(0.0);
    }
    if !stats.applied.is_empty() {
        log::debug!(
            "optimizer: {} ({} -> {} instructions, -{:.1}% cost)",
            stats.applied.join(", "),
            stats.original_len,
            stats.optimized_len,
            stats.cost_reduction
        );
    }
    stats
}

fn scan_position(instrs: &[Instruction]) -> Option<(usize, String)> {
    instrs.iter().position(|i| i.op == Opcode::Scan).map(|p| {
        let table = match &instrs[p].operands[0] {
            Operand::Table(t) => t.clone(),
            _ => String::new(),
        };
        (p, table)
    })
}

/// Move FILTERs whose predicate only references the scanned base table to
/// immediately after the SCAN.
fn predicate_pushdown(instrs: &mut Vec<Instruction>, store: &StorageEngine) -> bool {
    let (scan_pos, table) = match scan_position(instrs) {
        Some(x) => x,
        None => return false,
    };
    let info = match store.table_info(&table) {
        Some(i) => i,
        None => return false,
    };
    let mut movable = Vec::new();
    for (i, ins) in instrs.iter().enumerate() {
        if ins.op != Opcode::Filter {
            continue;
        }
        if let Some(Operand::Pred(p)) = ins.operands.first() {
            if p.columns()
                .iter()
                .all(|c| info.has_column(storage::base_column(c)))
            {
                movable.push(i);
            }
        }
    }
    // Already sitting right behind the scan.
    let in_place = movable
        .iter()
        .enumerate()
        .all(|(k, i)| *i == scan_pos + 1 + k);
    if movable.is_empty() || in_place {
        return false;
    }
    let mut filters = Vec::new();
    for i in movable.iter().rev() {
        filters.push(instrs.remove(*i));
    }
    filters.reverse();
    let at = instrs
        .iter()
        .position(|i| i.op == Opcode::Scan)
        .expect("scan still present");
    for (k, f) in filters.into_iter().enumerate() {
        instrs.insert(at + 1 + k, f);
    }
    true
}

/// Duplicate the projection right after the SCAN, narrowed to the columns
/// the rest of the program still needs.
fn projection_pushdown(instrs: &mut Vec<Instruction>, store: &StorageEngine) -> bool {
    if instrs.iter().any(|i| i.op.is_join()) {
        return false;
    }
    let (scan_pos, table) = match scan_position(instrs) {
        Some(x) => x,
        None => return false,
    };
    let info = match store.table_info(&table) {
        Some(i) => i,
        None => return false,
    };
    let scan_reg = match instrs[scan_pos].result {
        Some(r) => r,
        None => return false,
    };
    let project = instrs.iter().find(|i| i.op == Opcode::Project);
    let cols = match project {
        Some(ins) => match ins.operands.get(1) {
            Some(Operand::Columns(c)) => c.clone(),
            _ => return false,
        },
        None => return false,
    };
    if cols.iter().any(|c| c == "*") {
        return false;
    }
    // The narrowed set keeps every column a later stage consumes.
    let mut needed: Vec<String> = Vec::new();
    let mut need = |c: &str| {
        let c = storage::base_column(c).to_string();
        if !needed.contains(&c) {
            needed.push(c);
        }
    };
    for c in &cols {
        need(c);
    }
    for ins in instrs.iter() {
        match ins.op {
            Opcode::Filter => {
                if let Some(Operand::Pred(p)) = ins.operands.first() {
                    for c in p.columns() {
                        need(c);
                    }
                }
            }
            Opcode::OrderBy => {
                if let Some(Operand::Order(keys)) = ins.operands.get(1) {
                    for k in keys {
                        need(&k.column);
                    }
                }
            }
            Opcode::GroupBy => {
                if let Some(Operand::Columns(cs)) = ins.operands.get(1) {
                    for c in cs {
                        need(c);
                    }
                }
            }
            Opcode::Having => {
                if let Some(Operand::Having(h)) = ins.operands.first() {
                    if let Some(c) = &h.column {
                        need(c);
                    }
                }
            }
            op if op.is_aggregate() => {
                if let Some(Operand::Column(c)) = ins.operands.get(1) {
                    if c != "*" {
                        need(c);
                    }
                }
            }
            _ => {}
        }
    }
    if !needed.iter().all(|c| info.has_column(c)) {
        return false;
    }
    if needed.len() >= info.columns.len() {
        return false;
    }
    instrs.insert(
        scan_pos + 1,
        Instruction::new(
            Opcode::Project,
            vec![Operand::Reg(scan_reg), Operand::Columns(needed.clone())],
        )
        .with_result(scan_reg)
        .with_comment(format!("early projection {}", needed.join(","))),
    );
    true
}

/// Insert LOAD use_index hints after OPEN: small tables prefer the scan,
/// larger tables with an applicable index and an equality predicate take
/// the index.
fn index_hinting(instrs: &mut Vec<Instruction>, store: &StorageEngine, cfg: &OptConfig) -> bool {
    let mut eq_columns: Vec<String> = Vec::new();
    for ins in instrs.iter() {
        if ins.op != Opcode::Filter {
            continue;
        }
        if let Some(Operand::Pred(p)) = ins.operands.first() {
            collect_eq_columns(p, &mut eq_columns);
        }
    }
    let mut inserts: Vec<(usize, bool)> = Vec::new();
    for (i, ins) in instrs.iter().enumerate() {
        if ins.op != Opcode::Open {
            continue;
        }
        let table = match &ins.operands[0] {
            Operand::Table(t) => t,
            _ => continue,
        };
        let info = match store.table_info(table) {
            Some(i) => i,
            None => continue,
        };
        if info.record_count < cfg.small_table_threshold {
            inserts.push((i, false));
        } else {
            let indexed = store.indexes_on(table).iter().any(|ix| {
                eq_columns
                    .iter()
                    .any(|c| storage::base_column(c) == ix.columns[0])
            });
            if indexed {
                inserts.push((i, true));
            }
        }
    }
    if inserts.is_empty() {
        return false;
    }
    for (i, on) in inserts.into_iter().rev() {
        instrs.insert(
            i + 1,
            Instruction::new(
                Opcode::Load,
                vec![
                    Operand::Name("use_index".to_string()),
                    Operand::Value(Value::Bool(on)),
                ],
            )
            .with_comment(if on {
                "index applicable"
            } else {
                "small table, prefer scan"
            }),
        );
    }
    true
}

fn collect_eq_columns(p: &Pred, out: &mut Vec<String>) {
    match p {
        Pred::Cmp {
            left: Scalar::Col(c),
            op: CmpOp::Eq,
            right: Scalar::Lit(_),
        } => out.push(c.clone()),
        Pred::And(a, b) | Pred::Or(a, b) => {
            collect_eq_columns(a, out);
            collect_eq_columns(b, out);
        }
        _ => {}
    }
}

/// Reorder inner joins so the one touching the smallest table runs first.
fn join_reorder(instrs: &mut [Instruction], store: &StorageEngine) -> bool {
    let positions: Vec<usize> = instrs
        .iter()
        .enumerate()
        .filter(|(_, i)| i.op.is_join())
        .map(|(p, _)| p)
        .collect();
    if positions.len() < 2 {
        return false;
    }
    // Outer joins are order-sensitive; only inner forms are shuffled.
    if positions
        .iter()
        .any(|p| !matches!(instrs[*p].op, Opcode::Join | Opcode::InnerJoin))
    {
        return false;
    }
    let smaller_operand = |ins: &Instruction| -> u64 {
        let card = |t: &Operand| match t {
            Operand::Table(name) => store
                .table_info(name)
                .map(|i| i.record_count)
                .unwrap_or(u64::MAX),
            _ => u64::MAX,
        };
        card(&ins.operands[0]).min(card(&ins.operands[1]))
    };
    let mut keyed: Vec<(u64, Instruction)> = positions
        .iter()
        .map(|p| (smaller_operand(&instrs[*p]), instrs[*p].clone()))
        .collect();
    if keyed.windows(2).all(|w| w[0].0 <= w[1].0) {
        return false;
    }
    keyed.sort_by_key(|(k, _)| *k);
    for (slot, (_, ins)) in positions.iter().zip(keyed) {
        instrs[*slot] = ins;
    }
    true
}

/// Evaluate comparisons between two literals at optimization time.
fn constant_folding(instrs: &mut [Instruction]) -> bool {
    let mut applied = false;
    for ins in instrs.iter_mut() {
        if !ins.op.is_comparison() {
            continue;
        }
        let (l, r) = match (ins.operands.first(), ins.operands.get(1)) {
            (Some(Operand::Value(l)), Some(Operand::Value(r))) => (l.clone(), r.clone()),
            _ => continue,
        };
        let op = match ins.op {
            Opcode::Gt => CmpOp::Gt,
            Opcode::Ge => CmpOp::Ge,
            Opcode::Lt => CmpOp::Lt,
            Opcode::Le => CmpOp::Le,
            Opcode::Eq => CmpOp::Eq,
            Opcode::Ne => CmpOp::Ne,
            _ => continue,
        };
        let result = op.eval(l.total_cmp(&r));
        *ins = Instruction::new(
            Opcode::Load,
            vec![
                Operand::Name("comparison_result".to_string()),
                Operand::Value(Value::Bool(result)),
            ],
        )
        .with_comment(format!("folded {} {} {}", quoted(&l), op, quoted(&r)));
        applied = true;
    }
    applied
}

/// Drop NOPs, duplicate LOADs and OPEN/CLOSE pairs with nothing between.
fn dead_code(instrs: &mut Vec<Instruction>) -> bool {
    let before = instrs.len();
    let mut seen_loads: Vec<String> = Vec::new();
    let mut out: Vec<Instruction> = Vec::with_capacity(instrs.len());
    let mut i = 0;
    while i < instrs.len() {
        let ins = &instrs[i];
        if ins.op == Opcode::Nop {
            i += 1;
            continue;
        }
        if ins.op == Opcode::Open && i + 1 < instrs.len() {
            let next = &instrs[i + 1];
            if next.op == Opcode::Close {
                if let (Some(Operand::Table(a)), Some(Operand::Table(b))) =
                    (ins.operands.first(), next.operands.first())
                {
                    if a == b {
                        i += 2;
                        continue;
                    }
                }
            }
        }
        if ins.op == Opcode::Load {
            let rendered = ins.to_string();
            if seen_loads.contains(&rendered) {
                i += 1;
                continue;
            }
            seen_loads.push(rendered);
        }
        out.push(ins.clone());
        i += 1;
    }
    *instrs = out;
    instrs.len() != before
}

/// Weighted instruction-cost model.
fn cost(instrs: &[Instruction]) -> f64 {
    instrs
        .iter()
        .map(|i| match i.op {
            Opcode::Scan => 10.0,
            op if op.is_join() => 20.0,
            Opcode::Filter => 2.0,
            Opcode::Project => 1.0,
            Opcode::Load => 0.1,
            op if op.is_comparison() => 1.0,
            _ => 1.0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_rows(n: i64) -> StorageEngine {
        let mut store = StorageEngine::open(&Config::memory()).unwrap();
        store
            .create_table(
                "users",
                vec![
                    ColumnInfo::new("id", ColumnKind::Integer).primary_key(),
                    ColumnInfo::new("name", ColumnKind::Str),
                    ColumnInfo::new("age", ColumnKind::Integer),
                ],
            )
            .unwrap();
        for i in 0..n {
            store
                .insert(
                    "users",
                    &Record::from(vec![
                        ("id", Value::Int(i)),
                        ("name", Value::Str(format!("u{}", i))),
                        ("age", Value::Int(20 + (i % 50))),
                    ]),
                )
                .unwrap();
        }
        store
    }

    fn program(store: &StorageEngine, sql: &str) -> Program {
        let toks = lex::tokenize(sql).unwrap();
        let stmt = parse::parse_statement(&toks).unwrap();
        let quads = Analyzer::new(store).analyze(&stmt).unwrap();
        Generator::new().generate(&quads).unwrap()
    }

    #[test]
    fn constant_folding_replaces_comparison() {
        let store = store_with_rows(3);
        let mut p = program(&store, "SELECT * FROM users WHERE 1 = 1;");
        let stats = optimize(&mut p, &store, &OptConfig::default());
        assert!(stats.applied.contains(&"constant folding"));
        assert!(!p.instructions.iter().any(|i| i.op.is_comparison()));
        let load = p
            .instructions
            .iter()
            .find(|i| i.op == Opcode::Load)
            .unwrap();
        assert!(matches!(
            (&load.operands[0], &load.operands[1]),
            (Operand::Name(n), Operand::Value(Value::Bool(true))) if n == "comparison_result"
        ));
    }

    #[test]
    fn small_table_disables_index() {
        let mut store = store_with_rows(5);
        store
            .create_index("idx_age", "users", &["age".to_string()], false)
            .unwrap();
        let mut p = program(&store, "SELECT * FROM users WHERE age = 25;");
        let stats = optimize(&mut p, &store, &OptConfig::default());
        assert!(stats.applied.contains(&"index hinting"));
        let load = p
            .instructions
            .iter()
            .find(|i| i.op == Opcode::Load)
            .unwrap();
        assert!(matches!(&load.operands[1], Operand::Value(Value::Bool(false))));
    }

    #[test]
    fn large_indexed_table_enables_index() {
        let mut store = store_with_rows(150);
        store
            .create_index("idx_age", "users", &["age".to_string()], false)
            .unwrap();
        let mut p = program(&store, "SELECT * FROM users WHERE age = 25;");
        optimize(&mut p, &store, &OptConfig::default());
        let load = p
            .instructions
            .iter()
            .find(|i| i.op == Opcode::Load)
            .unwrap();
        assert!(matches!(&load.operands[1], Operand::Value(Value::Bool(true))));
    }

    #[test]
    fn projection_pushdown_narrows_scan() {
        let store = store_with_rows(10);
        let mut p = program(&store, "SELECT name FROM users WHERE age > 25;");
        let stats = optimize(&mut p, &store, &OptConfig::default());
        assert!(stats.applied.contains(&"projection pushdown"));
        let scan = p
            .instructions
            .iter()
            .position(|i| i.op == Opcode::Scan)
            .unwrap();
        let early = &p.instructions[scan + 1];
        assert_eq!(early.op, Opcode::Project);
        match &early.operands[1] {
            Operand::Columns(cols) => {
                assert!(cols.contains(&"name".to_string()));
                assert!(cols.contains(&"age".to_string()));
                assert!(!cols.contains(&"id".to_string()));
            }
            other => panic!("expected columns, got {:?}", other),
        }
    }

    #[test]
    fn switches_disable_passes() {
        let store = store_with_rows(10);
        let mut p = program(&store, "SELECT name FROM users WHERE 1 = 1;");
        let cfg = OptConfig {
            enabled: false,
            ..Default::default()
        };
        let stats = optimize(&mut p, &store, &cfg);
        assert!(stats.applied.is_empty());
        assert_eq!(stats.original_len, stats.optimized_len);
    }

    #[test]
    fn dead_code_drops_duplicate_loads_and_nops() {
        let mut instrs = vec![
            Instruction::new(
                Opcode::Load,
                vec![
                    Operand::Name("use_index".into()),
                    Operand::Value(Value::Bool(true)),
                ],
            ),
            Instruction::new(Opcode::Nop, vec![]),
            Instruction::new(
                Opcode::Load,
                vec![
                    Operand::Name("use_index".into()),
                    Operand::Value(Value::Bool(true)),
                ],
            ),
            Instruction::new(Opcode::Halt, vec![]),
        ];
        assert!(dead_code(&mut instrs));
        assert_eq!(instrs.len(), 2);
    }
}
