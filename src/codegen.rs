use crate::*;
use rustc_hash::FxHashMap;
use std::fmt;

/// Register number, rendered `R1, R2, …` in listings.
pub type Reg = u32;

/// Target instruction operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Begin,
    End,
    Open,
    Close,
    Scan,
    Filter,
    Project,
    Join,
    InnerJoin,
    LeftJoin,
    RightJoin,
    FullJoin,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    GroupBy,
    OrderBy,
    Having,
    Limit,
    Offset,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Load,
    Store,
    Move,
    Jump,
    JumpIf,
    Label,
    Output,
    Nop,
    Halt,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Begin => "BEGIN",
            Opcode::End => "END",
            Opcode::Open => "OPEN",
            Opcode::Close => "CLOSE",
            Opcode::Scan => "SCAN",
            Opcode::Filter => "FILTER",
            Opcode::Project => "PROJECT",
            Opcode::Join => "JOIN",
            Opcode::InnerJoin => "INNER_JOIN",
            Opcode::LeftJoin => "LEFT_JOIN",
            Opcode::RightJoin => "RIGHT_JOIN",
            Opcode::FullJoin => "FULL_JOIN",
            Opcode::Count => "COUNT",
            Opcode::Sum => "SUM",
            Opcode::Avg => "AVG",
            Opcode::Min => "MIN",
            Opcode::Max => "MAX",
            Opcode::GroupBy => "GROUP_BY",
            Opcode::OrderBy => "ORDER_BY",
            Opcode::Having => "HAVING",
            Opcode::Limit => "LIMIT",
            Opcode::Offset => "OFFSET",
            Opcode::Gt => "GT",
            Opcode::Ge => "GE",
            Opcode::Lt => "LT",
            Opcode::Le => "LE",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::Not => "NOT",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Move => "MOVE",
            Opcode::Jump => "JUMP",
            Opcode::JumpIf => "JUMP_IF",
            Opcode::Label => "LABEL",
            Opcode::Output => "OUTPUT",
            Opcode::Nop => "NOP",
            Opcode::Halt => "HALT",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Opcode::Gt | Opcode::Ge | Opcode::Lt | Opcode::Le | Opcode::Eq | Opcode::Ne
        )
    }

    pub fn is_join(self) -> bool {
        matches!(
            self,
            Opcode::Join
                | Opcode::InnerJoin
                | Opcode::LeftJoin
                | Opcode::RightJoin
                | Opcode::FullJoin
        )
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            Opcode::Count | Opcode::Sum | Opcode::Avg | Opcode::Min | Opcode::Max
        )
    }

    fn from_quad(op: QuadOp) -> Option<Opcode> {
        Some(match op {
            QuadOp::Gt => Opcode::Gt,
            QuadOp::Ge => Opcode::Ge,
            QuadOp::Lt => Opcode::Lt,
            QuadOp::Le => Opcode::Le,
            QuadOp::Eq => Opcode::Eq,
            QuadOp::Ne => Opcode::Ne,
            QuadOp::Join => Opcode::Join,
            QuadOp::InnerJoin => Opcode::InnerJoin,
            QuadOp::LeftJoin => Opcode::LeftJoin,
            QuadOp::RightJoin => Opcode::RightJoin,
            QuadOp::FullJoin => Opcode::FullJoin,
            QuadOp::Count => Opcode::Count,
            QuadOp::Sum => Opcode::Sum,
            QuadOp::Avg => Opcode::Avg,
            QuadOp::Min => Opcode::Min,
            QuadOp::Max => Opcode::Max,
            _ => return None,
        })
    }
}

/// Typed instruction operand. Listings render the traditional textual
/// forms (`R1`, literals, names).
#[derive(Clone, Debug)]
pub enum Operand {
    Reg(Reg),
    Value(Value),
    Column(String),
    Table(String),
    Columns(Vec<String>),
    Name(String),
    Pred(Pred),
    Join(JoinSpec),
    Having(HavingCond),
    Order(Vec<OrderKey>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "R{}", r),
            Operand::Value(v) => write!(f, "{}", quoted(v)),
            Operand::Column(c) => write!(f, "{}", c),
            Operand::Table(t) => write!(f, "{}", t),
            Operand::Columns(cols) => write!(f, "{}", cols.join(",")),
            Operand::Name(n) => write!(f, "{}", n),
            Operand::Pred(p) => write!(f, "{}", p),
            Operand::Join(j) => write!(f, "{} {} ON {} = {}", j.left_table, j.right_table, j.on.left, j.on.right),
            Operand::Having(h) => write!(
                f,
                "{}({}) {} {}",
                h.func.name(),
                h.column.as_deref().unwrap_or("*"),
                h.op,
                quoted(&h.value)
            ),
            Operand::Order(keys) => {
                let parts: Vec<String> = keys
                    .iter()
                    .map(|k| format!("{} {}", k.column, if k.desc { "DESC" } else { "ASC" }))
                    .collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

/// One target instruction.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: Opcode,
    pub operands: Vec<Operand>,
    pub result: Option<Reg>,
    pub comment: Option<String>,
}

impl Instruction {
    pub fn new(op: Opcode, operands: Vec<Operand>) -> Self {
        Self {
            op,
            operands,
            result: None,
            comment: None,
        }
    }

    pub fn with_result(mut self, r: Reg) -> Self {
        self.result = Some(r);
        self
    }

    pub fn with_comment(mut self, c: impl Into<String>) -> Self {
        self.comment = Some(c.into());
        self
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.op.name())?;
        for op in &self.operands {
            write!(f, " {}", op)?;
        }
        if let Some(r) = self.result {
            write!(f, " -> R{}", r)?;
        }
        if let Some(c) = &self.comment {
            write!(f, "  # {}", c)?;
        }
        Ok(())
    }
}

/// An instruction program plus the maps the executor needs to label
/// output columns: aggregate alias to register, register to label, and
/// table alias to table.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub agg_aliases: FxHashMap<String, Reg>,
    pub reg_labels: FxHashMap<Reg, String>,
    pub table_aliases: FxHashMap<String, String>,
}

impl Program {
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (i, ins) in self.instructions.iter().enumerate() {
            out.push_str(&format!("{:3}: {}\n", i + 1, ins));
        }
        out
    }
}

/// Lowers a quadruple list to a register program. Each analyzer temporary
/// maps to exactly one register on first use.
pub struct Generator {
    regs: Reg,
    temp_map: FxHashMap<String, Reg>,
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator {
    pub fn new() -> Self {
        Self {
            regs: 0,
            temp_map: FxHashMap::default(),
        }
    }

    fn fresh(&mut self) -> Reg {
        self.regs += 1;
        self.regs
    }

    fn reg_for(&mut self, temp: &str) -> Reg {
        if let Some(r) = self.temp_map.get(temp) {
            return *r;
        }
        let r = self.fresh();
        self.temp_map.insert(temp.to_string(), r);
        r
    }

    /// Generate the target program for a SELECT quadruple list.
    pub fn generate(&mut self, quads: &[Quad]) -> Result<Program> {
        let mut prog = Program::default();
        let has_join = quads.iter().any(|q| {
            matches!(
                q.op,
                QuadOp::Join
                    | QuadOp::InnerJoin
                    | QuadOp::LeftJoin
                    | QuadOp::RightJoin
                    | QuadOp::FullJoin
            )
        });
        let mut opened: Vec<String> = Vec::new();
        let mut current: Option<Reg> = None;

        // Quadruples are classified and emitted in execution order: scans
        // and joins first, then the WHERE filter, then grouping and
        // aggregation, then ordering and projection. This keeps aggregates
        // working over filtered rows and sort keys alive until PROJECT.
        let bucket = |op: QuadOp| -> usize {
            match op {
                QuadOp::Begin => 0,
                QuadOp::Select => 1,
                QuadOp::Join
                | QuadOp::InnerJoin
                | QuadOp::LeftJoin
                | QuadOp::RightJoin
                | QuadOp::FullJoin => 2,
                QuadOp::Gt | QuadOp::Ge | QuadOp::Lt | QuadOp::Le | QuadOp::Eq | QuadOp::Ne => 3,
                QuadOp::Filter => 4,
                QuadOp::GroupBy => 5,
                QuadOp::Count | QuadOp::Sum | QuadOp::Avg | QuadOp::Min | QuadOp::Max => 6,
                QuadOp::Having => 7,
                QuadOp::OrderBy => 8,
                QuadOp::Project => 9,
                QuadOp::Limit => 10,
                QuadOp::Offset => 11,
                QuadOp::Output => 12,
                QuadOp::End => 13,
                _ => 14,
            }
        };
        let mut ordered: Vec<&Quad> = quads.iter().collect();
        ordered.sort_by_key(|q| bucket(q.op));

        for quad in ordered {
            match (quad.op, &quad.arg1, &quad.arg2) {
                (QuadOp::Begin, _, _) => {
                    prog.instructions.push(Instruction::new(Opcode::Begin, vec![]));
                }
                (QuadOp::End, _, _) => {
                    prog.instructions.push(Instruction::new(Opcode::End, vec![]));
                }
                (QuadOp::Select, _, QuadArg::Source { table, alias }) => {
                    if let Some(a) = alias {
                        prog.table_aliases.insert(a.clone(), table.clone());
                    }
                    if !opened.contains(table) {
                        prog.instructions.push(
                            Instruction::new(Opcode::Open, vec![Operand::Table(table.clone())])
                                .with_comment(format!("open table {}", table)),
                        );
                        opened.push(table.clone());
                    }
                    let r = self.reg_for(&quad.result);
                    // A join reads both of its tables itself, so the scan
                    // is suppressed.
                    if !has_join {
                        prog.instructions.push(
                            Instruction::new(Opcode::Scan, vec![Operand::Table(table.clone())])
                                .with_result(r)
                                .with_comment(format!("scan table {}", table)),
                        );
                        current = Some(r);
                    }
                }
                (op, _, QuadArg::Join(spec)) if Opcode::from_quad(op).is_some_and(|o| o.is_join()) => {
                    for (t, a) in [
                        (&spec.left_table, &spec.left_alias),
                        (&spec.right_table, &spec.right_alias),
                    ] {
                        if let Some(a) = a {
                            prog.table_aliases.insert(a.clone(), t.clone());
                        }
                        if !opened.contains(t) {
                            prog.instructions.push(
                                Instruction::new(Opcode::Open, vec![Operand::Table(t.clone())])
                                    .with_comment(format!("open table {}", t)),
                            );
                            opened.push(t.clone());
                        }
                    }
                    let r = self.reg_for(&quad.result);
                    prog.instructions.push(
                        Instruction::new(
                            Opcode::from_quad(quad.op).expect("join op maps"),
                            vec![
                                Operand::Table(spec.left_table.clone()),
                                Operand::Table(spec.right_table.clone()),
                                Operand::Join(spec.clone()),
                            ],
                        )
                        .with_result(r),
                    );
                    current = Some(r);
                }
                (QuadOp::GroupBy, QuadArg::Temp(src), QuadArg::Columns(cols)) => {
                    let src = self.reg_for(src);
                    let r = self.reg_for(&quad.result);
                    prog.instructions.push(
                        Instruction::new(
                            Opcode::GroupBy,
                            vec![Operand::Reg(src), Operand::Columns(cols.clone())],
                        )
                        .with_result(r)
                        .with_comment(format!("group by {}", cols.join(","))),
                    );
                }
                (op, QuadArg::Temp(src), QuadArg::Agg { column, alias })
                    if Opcode::from_quad(op).is_some_and(|o| o.is_aggregate()) =>
                {
                    let src = self.reg_for(src);
                    let r = self.reg_for(&quad.result);
                    prog.instructions.push(
                        Instruction::new(
                            Opcode::from_quad(quad.op).expect("aggregate op maps"),
                            vec![
                                Operand::Reg(src),
                                Operand::Column(column.clone().unwrap_or_else(|| "*".to_string())),
                            ],
                        )
                        .with_result(r),
                    );
                    if let Some(a) = alias {
                        prog.agg_aliases.insert(a.clone(), r);
                        prog.reg_labels.insert(r, a.clone());
                    }
                }
                (QuadOp::Having, _, QuadArg::Having(cond)) => {
                    let r = self.reg_for(&quad.result);
                    prog.instructions.push(
                        Instruction::new(Opcode::Having, vec![Operand::Having(cond.clone())])
                            .with_result(r),
                    );
                }
                (op, QuadArg::Scalar(l), QuadArg::Scalar(r))
                    if Opcode::from_quad(op).is_some_and(|o| o.is_comparison()) =>
                {
                    // A comparison feeding a FILTER is absorbed into the
                    // FILTER instruction; only literal comparisons survive
                    // as instructions (constant folding targets them).
                    if l.is_lit() && r.is_lit() {
                        let dst = self.reg_for(&quad.result);
                        let (lv, rv) = match (l, r) {
                            (Scalar::Lit(a), Scalar::Lit(b)) => (a.clone(), b.clone()),
                            _ => unreachable!("guard checked literals"),
                        };
                        prog.instructions.push(
                            Instruction::new(
                                Opcode::from_quad(quad.op).expect("comparison op maps"),
                                vec![Operand::Value(lv), Operand::Value(rv)],
                            )
                            .with_result(dst),
                        );
                    }
                }
                (QuadOp::Filter, QuadArg::Temp(_), QuadArg::Pred(p)) => {
                    let r = self.reg_for(&quad.result);
                    prog.instructions.push(
                        Instruction::new(Opcode::Filter, vec![Operand::Pred(p.clone())])
                            .with_result(r)
                            .with_comment(format!("filter {}", p)),
                    );
                    current = Some(r);
                }
                (QuadOp::Project, QuadArg::Temp(src), QuadArg::Columns(cols)) => {
                    // A single aggregate alias projects as a MOVE from the
                    // aggregate's result register.
                    if cols.len() == 1 {
                        if let Some(agg) = prog.agg_aliases.get(&cols[0]).copied() {
                            let r = self.reg_for(&quad.result);
                            prog.instructions.push(
                                Instruction::new(Opcode::Move, vec![Operand::Reg(agg)])
                                    .with_result(r)
                                    .with_comment(format!("aggregate result as {}", cols[0])),
                            );
                            prog.reg_labels.insert(r, cols[0].clone());
                            current = Some(r);
                            continue;
                        }
                    }
                    let src = self.reg_for(src);
                    let r = self.reg_for(&quad.result);
                    prog.instructions.push(
                        Instruction::new(
                            Opcode::Project,
                            vec![Operand::Reg(src), Operand::Columns(cols.clone())],
                        )
                        .with_result(r)
                        .with_comment(format!("project {}", cols.join(","))),
                    );
                    current = Some(r);
                }
                (QuadOp::OrderBy, QuadArg::Temp(src), QuadArg::Order(keys)) => {
                    let src = self.reg_for(src);
                    let r = self.reg_for(&quad.result);
                    prog.instructions.push(
                        Instruction::new(
                            Opcode::OrderBy,
                            vec![Operand::Reg(src), Operand::Order(keys.clone())],
                        )
                        .with_result(r),
                    );
                }
                (QuadOp::Limit, QuadArg::Num(n), _) => {
                    prog.instructions.push(Instruction::new(
                        Opcode::Limit,
                        vec![Operand::Value(Value::Int(*n as i64))],
                    ));
                }
                (QuadOp::Offset, QuadArg::Num(n), _) => {
                    prog.instructions.push(Instruction::new(
                        Opcode::Offset,
                        vec![Operand::Value(Value::Int(*n as i64))],
                    ));
                }
                (QuadOp::Output, QuadArg::Temp(src), _) => {
                    let r = match current {
                        Some(r) => r,
                        None => self.reg_for(src),
                    };
                    prog.instructions
                        .push(Instruction::new(Opcode::Output, vec![Operand::Reg(r)]));
                }
                (op, _, _) => {
                    return Err(ExecError::UnknownInstruction(format!(
                        "quadruple {} cannot be lowered",
                        op.name()
                    ))
                    .into());
                }
            }
        }

        // Every opened table gets a matching CLOSE before HALT.
        for table in opened.iter().rev() {
            prog.instructions.push(
                Instruction::new(Opcode::Close, vec![Operand::Table(table.clone())])
                    .with_comment(format!("close table {}", table)),
            );
        }
        prog.instructions.push(Instruction::new(Opcode::Halt, vec![]));
        Ok(prog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_store() -> StorageEngine {
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
        store
            .create_table(
                "courses",
                vec![
                    ColumnInfo::new("course_id", ColumnKind::Integer),
                    ColumnInfo::new("student_id", ColumnKind::Integer),
                    ColumnInfo::new("score", ColumnKind::Float),
                ],
            )
            .unwrap();
        store
    }

    fn gen(sql: &str) -> Program {
        let store = schema_store();
        let toks = lex::tokenize(sql).unwrap();
        let stmt = parse::parse_statement(&toks).unwrap();
        let quads = Analyzer::new(&store).analyze(&stmt).unwrap();
        Generator::new().generate(&quads).unwrap()
    }

    fn opcodes(p: &Program) -> Vec<Opcode> {
        p.instructions.iter().map(|i| i.op).collect()
    }

    #[test]
    fn simple_select_shape() {
        let p = gen("SELECT name FROM users WHERE age > 25;");
        assert_eq!(
            opcodes(&p),
            vec![
                Opcode::Begin,
                Opcode::Open,
                Opcode::Scan,
                Opcode::Filter,
                Opcode::Project,
                Opcode::Output,
                Opcode::End,
                Opcode::Close,
                Opcode::Halt,
            ]
        );
        // The FILTER carries the predicate directly.
        let filter = &p.instructions[3];
        match &filter.operands[0] {
            Operand::Pred(p) => {
                let (c, op, v) = p.simple().unwrap();
                assert_eq!((c, op), ("age", CmpOp::Gt));
                assert_eq!(v, &Value::Int(25));
            }
            other => panic!("expected predicate operand, got {:?}", other),
        }
    }

    #[test]
    fn join_suppresses_scan() {
        let p = gen(
            "SELECT u.name FROM users u INNER JOIN courses c ON u.id = c.student_id;",
        );
        let ops = opcodes(&p);
        assert!(!ops.contains(&Opcode::Scan));
        assert!(ops.contains(&Opcode::InnerJoin));
        // Both tables are opened and closed.
        assert_eq!(ops.iter().filter(|o| **o == Opcode::Open).count(), 2);
        assert_eq!(ops.iter().filter(|o| **o == Opcode::Close).count(), 2);
        assert_eq!(*ops.last().unwrap(), Opcode::Halt);
        assert_eq!(p.table_aliases.get("u").map(String::as_str), Some("users"));
    }

    #[test]
    fn aggregate_alias_moves() {
        let p = gen("SELECT COUNT(*) AS c FROM users;");
        let ops = opcodes(&p);
        assert!(ops.contains(&Opcode::Count));
        assert!(ops.contains(&Opcode::Move));
        assert!(!ops.contains(&Opcode::Project));
        let agg_reg = p.agg_aliases["c"];
        assert_eq!(p.reg_labels.get(&agg_reg).map(String::as_str), Some("c"));
    }

    #[test]
    fn literal_comparison_survives_lowering() {
        let p = gen("SELECT * FROM users WHERE 1 = 1;");
        assert!(opcodes(&p).contains(&Opcode::Eq));
    }

    #[test]
    fn registers_are_stable_per_temp() {
        let mut g = Generator::new();
        let a = g.reg_for("T1");
        let b = g.reg_for("T2");
        assert_eq!(g.reg_for("T1"), a);
        assert_ne!(a, b);
    }

    #[test]
    fn order_limit_offset_emit_once() {
        let p = gen("SELECT name FROM users ORDER BY age DESC LIMIT 3 OFFSET 1;");
        let ops = opcodes(&p);
        assert_eq!(ops.iter().filter(|o| **o == Opcode::OrderBy).count(), 1);
        assert_eq!(ops.iter().filter(|o| **o == Opcode::Limit).count(), 1);
        assert_eq!(ops.iter().filter(|o| **o == Opcode::Offset).count(), 1);
    }
}
