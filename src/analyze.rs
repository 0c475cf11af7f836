use crate::*;
use std::fmt;

/// Quadruple operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuadOp {
    Begin,
    End,
    Select,
    Filter,
    Project,
    Output,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
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
    CreateTable,
    DropTable,
    AlterTableAdd,
    CreateIndex,
    Insert,
    Update,
    Delete,
}

impl QuadOp {
    pub fn name(self) -> &'static str {
        match self {
            QuadOp::Begin => "BEGIN",
            QuadOp::End => "END",
            QuadOp::Select => "SELECT",
            QuadOp::Filter => "FILTER",
            QuadOp::Project => "PROJECT",
            QuadOp::Output => "OUTPUT",
            QuadOp::Gt => "GT",
            QuadOp::Ge => "GE",
            QuadOp::Lt => "LT",
            QuadOp::Le => "LE",
            QuadOp::Eq => "EQ",
            QuadOp::Ne => "NE",
            QuadOp::Join => "JOIN",
            QuadOp::InnerJoin => "INNER_JOIN",
            QuadOp::LeftJoin => "LEFT_JOIN",
            QuadOp::RightJoin => "RIGHT_JOIN",
            QuadOp::FullJoin => "FULL_JOIN",
            QuadOp::Count => "COUNT",
            QuadOp::Sum => "SUM",
            QuadOp::Avg => "AVG",
            QuadOp::Min => "MIN",
            QuadOp::Max => "MAX",
            QuadOp::GroupBy => "GROUP_BY",
            QuadOp::OrderBy => "ORDER_BY",
            QuadOp::Having => "HAVING",
            QuadOp::Limit => "LIMIT",
            QuadOp::Offset => "OFFSET",
            QuadOp::CreateTable => "CREATE_TABLE",
            QuadOp::DropTable => "DROP_TABLE",
            QuadOp::AlterTableAdd => "ALTER_TABLE_ADD",
            QuadOp::CreateIndex => "CREATE_INDEX",
            QuadOp::Insert => "INSERT",
            QuadOp::Update => "UPDATE",
            QuadOp::Delete => "DELETE",
        }
    }

    pub fn from_cmp(op: CmpOp) -> QuadOp {
        match op {
            CmpOp::Gt => QuadOp::Gt,
            CmpOp::Ge => QuadOp::Ge,
            CmpOp::Lt => QuadOp::Lt,
            CmpOp::Le => QuadOp::Le,
            CmpOp::Eq => QuadOp::Eq,
            CmpOp::Ne => QuadOp::Ne,
        }
    }

    pub fn from_join(kind: JoinKind) -> QuadOp {
        match kind {
            JoinKind::Plain => QuadOp::Join,
            JoinKind::Inner => QuadOp::InnerJoin,
            JoinKind::Left => QuadOp::LeftJoin,
            JoinKind::Right => QuadOp::RightJoin,
            JoinKind::Full => QuadOp::FullJoin,
        }
    }

    pub fn from_agg(f: AggFunc) -> QuadOp {
        match f {
            AggFunc::Count => QuadOp::Count,
            AggFunc::Sum => QuadOp::Sum,
            AggFunc::Avg => QuadOp::Avg,
            AggFunc::Min => QuadOp::Min,
            AggFunc::Max => QuadOp::Max,
        }
    }
}

/// A fully resolved join, carried on a JOIN quadruple.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub left_table: String,
    pub left_alias: Option<String>,
    pub right_table: String,
    pub right_alias: Option<String>,
    pub on: JoinCond,
}

/// Payload of a DDL quadruple.
#[derive(Clone, Debug)]
pub enum DdlPayload {
    CreateTable {
        columns: Vec<ColumnInfo>,
    },
    AlterAdd {
        column: ColumnInfo,
    },
    CreateIndex {
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
    Drop,
}

/// Payload of a DML quadruple.
#[derive(Clone, Debug)]
pub enum DmlPayload {
    Insert {
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Value>>,
    },
    Update {
        sets: Vec<Assign>,
        wher: Option<Pred>,
    },
    Delete {
        wher: Option<Pred>,
    },
}

/// Typed quadruple argument. The Display impl keeps the traditional
/// human-readable textual form for listings.
#[derive(Clone, Debug)]
pub enum QuadArg {
    None,
    Name(String),
    Temp(String),
    Columns(Vec<String>),
    Source { table: String, alias: Option<String> },
    Scalar(Scalar),
    Pred(Pred),
    Join(JoinSpec),
    Having(HavingCond),
    Order(Vec<OrderKey>),
    Agg { column: Option<String>, alias: Option<String> },
    Num(usize),
    Ddl(DdlPayload),
    Dml(DmlPayload),
}

impl fmt::Display for QuadArg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QuadArg::None => write!(f, "_"),
            QuadArg::Name(s) | QuadArg::Temp(s) => write!(f, "{}", s),
            QuadArg::Columns(cols) => write!(f, "{}", cols.join(",")),
            QuadArg::Source { table, alias } => match alias {
                Some(a) => write!(f, "{} {}", table, a),
                None => write!(f, "{}", table),
            },
            QuadArg::Scalar(s) => write!(f, "{}", s),
            QuadArg::Pred(p) => write!(f, "{}", p),
            QuadArg::Join(j) => write!(
                f,
                "{} ON {} = {}",
                j.right_table, j.on.left, j.on.right
            ),
            QuadArg::Having(h) => write!(
                f,
                "{}({}) {} {}",
                h.func.name(),
                h.column.as_deref().unwrap_or("*"),
                h.op,
                quoted(&h.value)
            ),
            QuadArg::Order(keys) => {
                let parts: Vec<String> = keys
                    .iter()
                    .map(|k| {
                        format!("{} {}", k.column, if k.desc { "DESC" } else { "ASC" })
                    })
                    .collect();
                write!(f, "{}", parts.join(","))
            }
            QuadArg::Agg { column, .. } => {
                write!(f, "{}", column.as_deref().unwrap_or("*"))
            }
            QuadArg::Num(n) => write!(f, "{}", n),
            QuadArg::Ddl(d) => write!(f, "{}", ddl_payload_text(d)),
            QuadArg::Dml(d) => write!(f, "{}", dml_payload_text(d)),
        }
    }
}

/// Render a DDL payload in the legacy textual convention.
fn ddl_payload_text(d: &DdlPayload) -> String {
    fn column_text(c: &ColumnInfo) -> String {
        let mut constraints = Vec::new();
        if c.primary_key {
            constraints.push("PRIMARY_KEY".to_string());
        }
        if !c.nullable {
            constraints.push("NOT_NULL".to_string());
        }
        if c.unique {
            constraints.push("UNIQUE".to_string());
        }
        if let Some(d) = &c.default {
            constraints.push(format!("DEFAULT={}", quoted(d)));
        }
        let typ = match (c.kind, c.max_length) {
            (ColumnKind::Str, Some(n)) => format!("VARCHAR({})", n),
            (ColumnKind::Str, None) => "STRING".to_string(),
            (ColumnKind::Integer, _) => "INTEGER".to_string(),
            (ColumnKind::Float, _) => "FLOAT".to_string(),
            (ColumnKind::Bool, _) => "BOOLEAN".to_string(),
        };
        format!(
            "{{name: {}, type: {}, constraints: [{}]}}",
            c.name,
            typ,
            constraints.join(",")
        )
    }
    match d {
        DdlPayload::CreateTable { columns } => {
            let cols: Vec<String> = columns.iter().map(column_text).collect();
            format!("[{}]", cols.join(", "))
        }
        DdlPayload::AlterAdd { column } => column_text(column),
        DdlPayload::CreateIndex {
            table, columns, ..
        } => format!("{}({})", table, columns.join(",")),
        DdlPayload::Drop => "_".to_string(),
    }
}

/// Render a DML payload in the legacy textual convention.
fn dml_payload_text(d: &DmlPayload) -> String {
    match d {
        DmlPayload::Insert { columns, rows } => {
            let cols = match columns {
                Some(c) => c.join(","),
                None => "ALL".to_string(),
            };
            let vals: Vec<String> = rows
                .iter()
                .map(|row| {
                    let vs: Vec<String> = row.iter().map(quoted).collect();
                    format!("({})", vs.join(","))
                })
                .collect();
            format!("COLUMNS={};VALUES={}", cols, vals.join(","))
        }
        DmlPayload::Update { sets, wher } => {
            let set: Vec<String> = sets
                .iter()
                .map(|a| format!("{}={}", a.column, a.value))
                .collect();
            let wh = match wher {
                Some(p) => p.to_string(),
                None => "ALL".to_string(),
            };
            format!("SET={};WHERE={}", set.join(";"), wh)
        }
        DmlPayload::Delete { wher } => match wher {
            Some(p) => p.to_string(),
            None => "ALL".to_string(),
        },
    }
}

/// Four-field intermediate representation emitted by the analyzer.
#[derive(Clone, Debug)]
pub struct Quad {
    pub op: QuadOp,
    pub arg1: QuadArg,
    pub arg2: QuadArg,
    pub result: String,
}

impl Quad {
    fn new(op: QuadOp, arg1: QuadArg, arg2: QuadArg, result: impl Into<String>) -> Quad {
        Quad {
            op,
            arg1,
            arg2,
            result: result.into(),
        }
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let res = if self.result.is_empty() {
            "_"
        } else {
            self.result.as_str()
        };
        write!(f, "({}, {}, {}, {})", self.op.name(), self.arg1, self.arg2, res)
    }
}

/// Symbol kinds tracked during analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Table,
    Column,
    Identifier,
    Literal,
    ColumnList,
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub scope: String,
}

/// Scoped name table populated during analysis, exposed for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    pub symbols: Vec<Symbol>,
    scope: String,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            symbols: Vec::new(),
            scope: "global".to_string(),
        }
    }

    pub fn add(&mut self, name: &str, kind: SymbolKind) {
        self.symbols.push(Symbol {
            name: name.to_string(),
            kind,
            scope: self.scope.clone(),
        });
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Semantic analyzer. Validates names against the live catalog and lowers
/// the AST to quadruples.
pub struct Analyzer<'a> {
    store: &'a StorageEngine,
    temps: usize,
    pub symbols: SymbolTable,
}

impl<'a> Analyzer<'a> {
    pub fn new(store: &'a StorageEngine) -> Self {
        Self {
            store,
            temps: 0,
            symbols: SymbolTable::new(),
        }
    }

    fn temp(&mut self) -> String {
        self.temps += 1;
        format!("T{}", self.temps)
    }

    pub fn analyze(&mut self, stmt: &Statement) -> Result<Vec<Quad>> {
        match stmt {
            Statement::Select(s) => self.analyze_select(s),
            Statement::CreateTable(c) => self.analyze_create_table(c),
            Statement::DropTable(name) => self.analyze_drop_table(name),
            Statement::AlterTableAdd { table, column } => self.analyze_alter_add(table, column),
            Statement::CreateIndex(c) => self.analyze_create_index(c),
            Statement::Insert(i) => self.analyze_insert(i),
            Statement::Update(u) => self.analyze_update(u),
            Statement::Delete(d) => self.analyze_delete(d),
        }
    }

    // ------------------------------------------------------------------
    // Query analysis.

    fn analyze_select(&mut self, s: &SelectStmt) -> Result<Vec<Quad>> {
        // FROM and JOIN sources: (visible qualifier, table name).
        let mut sources: Vec<(String, String)> = Vec::new();
        self.require_table(&s.table)?;
        sources.push((
            s.alias.clone().unwrap_or_else(|| s.table.clone()),
            s.table.clone(),
        ));
        for j in &s.joins {
            self.require_table(&j.table)?;
            sources.push((
                j.alias.clone().unwrap_or_else(|| j.table.clone()),
                j.table.clone(),
            ));
        }

        // Aggregate output labels are legal column references downstream.
        let agg_labels: Vec<String> = s
            .items
            .iter()
            .filter(|i| matches!(i, SelectItem::Aggregate { .. }))
            .map(|i| i.label())
            .collect();

        let mut labels = Vec::new();
        for item in &s.items {
            match item {
                SelectItem::Star => labels.push("*".to_string()),
                SelectItem::Column(c) => {
                    self.resolve_column(&sources, c)?;
                    self.symbols.add(c, SymbolKind::Column);
                    labels.push(c.clone());
                }
                SelectItem::Aggregate { column, .. } => {
                    if let Some(c) = column {
                        self.resolve_column(&sources, c)?;
                    }
                    labels.push(item.label());
                }
            }
        }
        self.symbols.add(&labels.join(","), SymbolKind::ColumnList);

        if let Some(p) = &s.wher {
            for c in p.columns() {
                self.resolve_column(&sources, c)?;
            }
        }
        for c in &s.group_by {
            self.resolve_column(&sources, c)?;
        }
        if let Some(h) = &s.having {
            if let Some(c) = &h.column {
                self.resolve_column(&sources, c)?;
            }
        }
        for k in &s.order_by {
            if !agg_labels.contains(&k.column) {
                self.resolve_column(&sources, &k.column)?;
            }
        }

        // Emission order: BEGIN, SELECT, JOINs, GROUP_BY, aggregates,
        // HAVING, comparisons and FILTER, PROJECT, ORDER_BY, LIMIT and
        // OFFSET, OUTPUT, END.
        let mut quads = Vec::new();
        quads.push(Quad::new(QuadOp::Begin, QuadArg::None, QuadArg::None, ""));

        let select_temp = self.temp();
        quads.push(Quad::new(
            QuadOp::Select,
            QuadArg::Columns(labels.clone()),
            QuadArg::Source {
                table: s.table.clone(),
                alias: s.alias.clone(),
            },
            select_temp.clone(),
        ));
        let mut current = select_temp.clone();

        let mut left_table = s.table.clone();
        let mut left_alias = s.alias.clone();
        for j in &s.joins {
            let t = self.temp();
            quads.push(Quad::new(
                QuadOp::from_join(j.kind),
                QuadArg::Name(left_table.clone()),
                QuadArg::Join(JoinSpec {
                    kind: j.kind,
                    left_table: left_table.clone(),
                    left_alias: left_alias.clone(),
                    right_table: j.table.clone(),
                    right_alias: j.alias.clone(),
                    on: j.on.clone(),
                }),
                t.clone(),
            ));
            current = t;
            left_table = j.table.clone();
            left_alias = j.alias.clone();
        }

        if !s.group_by.is_empty() {
            let t = self.temp();
            quads.push(Quad::new(
                QuadOp::GroupBy,
                QuadArg::Temp(current.clone()),
                QuadArg::Columns(s.group_by.clone()),
                t.clone(),
            ));
            current = t;
        }

        for item in &s.items {
            if let SelectItem::Aggregate { func, column, .. } = item {
                let t = self.temp();
                quads.push(Quad::new(
                    QuadOp::from_agg(*func),
                    QuadArg::Temp(select_temp.clone()),
                    QuadArg::Agg {
                        column: column.clone(),
                        alias: Some(item.label()),
                    },
                    t.clone(),
                ));
            }
        }

        if let Some(h) = &s.having {
            let t = self.temp();
            quads.push(Quad::new(
                QuadOp::Having,
                QuadArg::Temp(current.clone()),
                QuadArg::Having(h.clone()),
                t.clone(),
            ));
            current = t;
        }

        if let Some(p) = &s.wher {
            self.emit_comparisons(p, &mut quads);
            let t = self.temp();
            quads.push(Quad::new(
                QuadOp::Filter,
                QuadArg::Temp(current.clone()),
                QuadArg::Pred(p.clone()),
                t.clone(),
            ));
            current = t;
        }

        let star_only = s.items.len() == 1 && matches!(s.items[0], SelectItem::Star);
        if !star_only {
            let t = self.temp();
            quads.push(Quad::new(
                QuadOp::Project,
                QuadArg::Temp(current.clone()),
                QuadArg::Columns(labels),
                t.clone(),
            ));
            current = t;
        }

        if !s.order_by.is_empty() {
            let t = self.temp();
            quads.push(Quad::new(
                QuadOp::OrderBy,
                QuadArg::Temp(current.clone()),
                QuadArg::Order(s.order_by.clone()),
                t.clone(),
            ));
            current = t;
        }

        if let Some(n) = s.limit {
            quads.push(Quad::new(QuadOp::Limit, QuadArg::Num(n), QuadArg::None, ""));
        }
        if let Some(n) = s.offset {
            quads.push(Quad::new(QuadOp::Offset, QuadArg::Num(n), QuadArg::None, ""));
        }

        quads.push(Quad::new(
            QuadOp::Output,
            QuadArg::Temp(current),
            QuadArg::None,
            "RESULT",
        ));
        quads.push(Quad::new(QuadOp::End, QuadArg::None, QuadArg::None, ""));
        Ok(quads)
    }

    /// One comparison quadruple per leaf of the predicate tree, in source
    /// order. The FILTER quadruple that follows consumes their temps
    /// through the predicate itself.
    fn emit_comparisons(&mut self, p: &Pred, quads: &mut Vec<Quad>) {
        match p {
            Pred::Cmp { left, op, right } => {
                let t = self.temp();
                quads.push(Quad::new(
                    QuadOp::from_cmp(*op),
                    QuadArg::Scalar(left.clone()),
                    QuadArg::Scalar(right.clone()),
                    t,
                ));
                for s in [left, right] {
                    match s {
                        Scalar::Col(c) => self.symbols.add(c, SymbolKind::Identifier),
                        Scalar::Lit(v) => self
                            .symbols
                            .add(&format!("literal_{}", v), SymbolKind::Literal),
                    }
                }
            }
            Pred::And(a, b) | Pred::Or(a, b) => {
                self.emit_comparisons(a, quads);
                self.emit_comparisons(b, quads);
            }
            Pred::Not(inner) => self.emit_comparisons(inner, quads),
        }
    }

    fn require_table(&mut self, name: &str) -> Result<&TableInfo> {
        self.symbols.add(name, SymbolKind::Table);
        self.store
            .table_info(name)
            .ok_or_else(|| SemanticError::TableNotFound(name.to_string()).into())
    }

    /// Resolve a possibly qualified column against the visible sources.
    fn resolve_column(&self, sources: &[(String, String)], name: &str) -> Result<()> {
        if let Some((qual, col)) = name.split_once('.') {
            let table = sources
                .iter()
                .find(|(q, _)| q == qual)
                .map(|(_, t)| t.as_str())
                .ok_or_else(|| SemanticError::TableNotFound(qual.to_string()))?;
            let info = self.store.table_info(table).expect("source tables checked");
            if !info.has_column(col) {
                return Err(SemanticError::ColumnNotFound {
                    table: table.to_string(),
                    column: col.to_string(),
                }
                .into());
            }
            return Ok(());
        }
        let mut owners = Vec::new();
        for (_, table) in sources {
            let info = self.store.table_info(table).expect("source tables checked");
            if info.has_column(name) {
                owners.push(table.as_str());
            }
        }
        match owners.len() {
            0 => Err(SemanticError::ColumnNotFound {
                table: sources[0].1.clone(),
                column: name.to_string(),
            }
            .into()),
            1 => Ok(()),
            _ => Err(SemanticError::AmbiguousReference(name.to_string()).into()),
        }
    }

    // ------------------------------------------------------------------
    // DDL / DML analysis. Each statement lowers to one payload quadruple.

    fn analyze_create_table(&mut self, c: &CreateTableStmt) -> Result<Vec<Quad>> {
        if self.store.table_info(&c.name).is_some() {
            return Err(SemanticError::TableExists(c.name.clone()).into());
        }
        let mut seen = std::collections::HashSet::new();
        let mut pk = 0;
        for col in &c.columns {
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
            self.symbols.add(&col.name, SymbolKind::Column);
        }
        if pk > 1 {
            return Err(
                SemanticError::TypeMismatch("multiple primary key columns".into()).into(),
            );
        }
        self.symbols.add(&c.name, SymbolKind::Table);
        Ok(vec![Quad::new(
            QuadOp::CreateTable,
            QuadArg::Name(c.name.clone()),
            QuadArg::Ddl(DdlPayload::CreateTable {
                columns: c.columns.clone(),
            }),
            "",
        )])
    }

    fn analyze_drop_table(&mut self, name: &str) -> Result<Vec<Quad>> {
        self.require_table(name)?;
        Ok(vec![Quad::new(
            QuadOp::DropTable,
            QuadArg::Name(name.to_string()),
            QuadArg::Ddl(DdlPayload::Drop),
            "",
        )])
    }

    fn analyze_alter_add(&mut self, table: &str, column: &ColumnInfo) -> Result<Vec<Quad>> {
        let info = self.require_table(table)?;
        if info.has_column(&column.name) {
            return Err(SemanticError::DuplicateColumn(column.name.clone()).into());
        }
        if let Some(d) = &column.default {
            coerce(column, d.clone()).map_err(|e| SemanticError::InvalidDefault {
                column: column.name.clone(),
                msg: e.to_string(),
            })?;
        }
        Ok(vec![Quad::new(
            QuadOp::AlterTableAdd,
            QuadArg::Name(table.to_string()),
            QuadArg::Ddl(DdlPayload::AlterAdd {
                column: column.clone(),
            }),
            "",
        )])
    }

    fn analyze_create_index(&mut self, c: &CreateIndexStmt) -> Result<Vec<Quad>> {
        if self.store.index_info(&c.name).is_some() {
            return Err(SemanticError::IndexExists(c.name.clone()).into());
        }
        let info = self.require_table(&c.table)?;
        for col in &c.columns {
            if !info.has_column(col) {
                return Err(SemanticError::ColumnNotFound {
                    table: c.table.clone(),
                    column: col.clone(),
                }
                .into());
            }
        }
        Ok(vec![Quad::new(
            QuadOp::CreateIndex,
            QuadArg::Name(c.name.clone()),
            QuadArg::Ddl(DdlPayload::CreateIndex {
                table: c.table.clone(),
                columns: c.columns.clone(),
                unique: c.unique,
            }),
            "",
        )])
    }

    fn analyze_insert(&mut self, i: &InsertStmt) -> Result<Vec<Quad>> {
        let info = self.require_table(&i.table)?.clone();
        let targets: Vec<&ColumnInfo> = match &i.columns {
            Some(cols) => {
                let mut targets = Vec::with_capacity(cols.len());
                for c in cols {
                    targets.push(info.column(c).ok_or_else(|| SemanticError::ColumnNotFound {
                        table: i.table.clone(),
                        column: c.clone(),
                    })?);
                }
                targets
            }
            None => info.columns.iter().collect(),
        };
        for row in &i.rows {
            if row.len() != targets.len() {
                return Err(SemanticError::TypeMismatch(format!(
                    "expected {} values, got {}",
                    targets.len(),
                    row.len()
                ))
                .into());
            }
            for (col, val) in targets.iter().zip(row) {
                coerce(col, val.clone())?;
            }
        }
        Ok(vec![Quad::new(
            QuadOp::Insert,
            QuadArg::Name(i.table.clone()),
            QuadArg::Dml(DmlPayload::Insert {
                columns: i.columns.clone(),
                rows: i.rows.clone(),
            }),
            "",
        )])
    }

    fn analyze_update(&mut self, u: &UpdateStmt) -> Result<Vec<Quad>> {
        let info = self.require_table(&u.table)?.clone();
        for a in &u.sets {
            let col = info
                .column(&a.column)
                .ok_or_else(|| SemanticError::ColumnNotFound {
                    table: u.table.clone(),
                    column: a.column.clone(),
                })?;
            match &a.value {
                SetExpr::Value(v) => {
                    coerce(col, v.clone())?;
                }
                SetExpr::Column(c) | SetExpr::Arith { column: c, .. } => {
                    if !info.has_column(base_column(c)) {
                        return Err(SemanticError::ColumnNotFound {
                            table: u.table.clone(),
                            column: c.clone(),
                        }
                        .into());
                    }
                }
            }
        }
        self.check_dml_where(&info, &u.wher)?;
        Ok(vec![Quad::new(
            QuadOp::Update,
            QuadArg::Name(u.table.clone()),
            QuadArg::Dml(DmlPayload::Update {
                sets: u.sets.clone(),
                wher: u.wher.clone(),
            }),
            "",
        )])
    }

    fn analyze_delete(&mut self, d: &DeleteStmt) -> Result<Vec<Quad>> {
        let info = self.require_table(&d.table)?.clone();
        self.check_dml_where(&info, &d.wher)?;
        Ok(vec![Quad::new(
            QuadOp::Delete,
            QuadArg::Name(d.table.clone()),
            QuadArg::Dml(DmlPayload::Delete { wher: d.wher.clone() }),
            "",
        )])
    }

    fn check_dml_where(&self, info: &TableInfo, wher: &Option<Pred>) -> Result<()> {
        if let Some(p) = wher {
            for c in p.columns() {
                if !info.has_column(base_column(c)) {
                    return Err(SemanticError::ColumnNotFound {
                        table: info.name.clone(),
                        column: c.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_schema() -> StorageEngine {
        let mut store = StorageEngine::open(&Config::memory()).unwrap();
        store
            .create_table(
                "users",
                vec![
                    ColumnInfo::new("id", ColumnKind::Integer).primary_key(),
                    ColumnInfo::new("name", ColumnKind::Str).max_length(50),
                    ColumnInfo::new("age", ColumnKind::Integer),
                ],
            )
            .unwrap();
        store
            .create_table(
                "courses",
                vec![
                    ColumnInfo::new("course_id", ColumnKind::Integer).primary_key(),
                    ColumnInfo::new("student_id", ColumnKind::Integer),
                    ColumnInfo::new("course_name", ColumnKind::Str),
                    ColumnInfo::new("score", ColumnKind::Float),
                ],
            )
            .unwrap();
        store
    }

    fn analyze(store: &StorageEngine, sql: &str) -> Result<Vec<Quad>> {
        let toks = lex::tokenize(sql)?;
        let stmt = parse::parse_statement(&toks)?;
        Analyzer::new(store).analyze(&stmt)
    }

    fn ops(quads: &[Quad]) -> Vec<QuadOp> {
        quads.iter().map(|q| q.op).collect()
    }

    #[test]
    fn simple_select_order() {
        let store = store_with_schema();
        let quads = analyze(&store, "SELECT name FROM users WHERE age > 25;").unwrap();
        assert_eq!(
            ops(&quads),
            vec![
                QuadOp::Begin,
                QuadOp::Select,
                QuadOp::Gt,
                QuadOp::Filter,
                QuadOp::Project,
                QuadOp::Output,
                QuadOp::End,
            ]
        );
        // Temps are assigned in order of emission.
        assert_eq!(quads[1].result, "T1");
        assert_eq!(quads[3].result, "T3");
        assert_eq!(quads[5].result, "RESULT");
    }

    #[test]
    fn join_and_group_order() {
        let store = store_with_schema();
        let quads = analyze(
            &store,
            "SELECT u.name, COUNT(*) AS c FROM users u \
             INNER JOIN courses co ON u.id = co.student_id \
             GROUP BY u.name ORDER BY u.name LIMIT 5;",
        )
        .unwrap();
        assert_eq!(
            ops(&quads),
            vec![
                QuadOp::Begin,
                QuadOp::Select,
                QuadOp::InnerJoin,
                QuadOp::GroupBy,
                QuadOp::Count,
                QuadOp::Project,
                QuadOp::OrderBy,
                QuadOp::Limit,
                QuadOp::Output,
                QuadOp::End,
            ]
        );
    }

    #[test]
    fn catalog_validation() {
        let store = store_with_schema();
        assert!(matches!(
            analyze(&store, "SELECT * FROM nope;"),
            Err(Error::Semantic(SemanticError::TableNotFound(_)))
        ));
        assert!(matches!(
            analyze(&store, "SELECT wrong FROM users;"),
            Err(Error::Semantic(SemanticError::ColumnNotFound { .. }))
        ));
        assert!(matches!(
            analyze(&store, "SELECT name FROM users WHERE missing = 1;"),
            Err(Error::Semantic(SemanticError::ColumnNotFound { .. }))
        ));
        // `id` exists in both users and courses via student_id? No: `id`
        // only in users, but `course_id` only in courses. A bare column
        // present in both tables is ambiguous.
        assert!(matches!(
            analyze(
                &store,
                "SELECT name FROM users u INNER JOIN courses c ON u.id = c.student_id WHERE course_id = 1;"
            ),
            Ok(_)
        ));
    }

    #[test]
    fn ddl_payloads() {
        let store = store_with_schema();
        let quads = analyze(
            &store,
            "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(10) DEFAULT 'x');",
        )
        .unwrap();
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].op, QuadOp::CreateTable);
        let text = quads[0].arg2.to_string();
        assert!(text.contains("PRIMARY_KEY"), "{}", text);
        assert!(text.contains("VARCHAR(10)"), "{}", text);

        assert!(matches!(
            analyze(&store, "CREATE TABLE users (a INT);"),
            Err(Error::Semantic(SemanticError::TableExists(_)))
        ));
        assert!(matches!(
            analyze(&store, "CREATE TABLE t (a INT, a INT);"),
            Err(Error::Semantic(SemanticError::DuplicateColumn(_)))
        ));
        assert!(matches!(
            analyze(&store, "CREATE TABLE t (a INT DEFAULT 'oops');"),
            Err(Error::Semantic(SemanticError::InvalidDefault { .. }))
        ));
    }

    #[test]
    fn dml_payload_text_forms() {
        let store = store_with_schema();
        let quads = analyze(&store, "INSERT INTO users VALUES (1, 'Alice', 25);").unwrap();
        assert_eq!(
            quads[0].arg2.to_string(),
            "COLUMNS=ALL;VALUES=(1,'Alice',25)"
        );
        let quads =
            analyze(&store, "UPDATE users SET age = 26 WHERE name = 'Alice';").unwrap();
        assert_eq!(quads[0].arg2.to_string(), "SET=age=26;WHERE=name = 'Alice'");
        let quads = analyze(&store, "DELETE FROM users;").unwrap();
        assert_eq!(quads[0].arg2.to_string(), "ALL");
    }

    #[test]
    fn insert_type_checks() {
        let store = store_with_schema();
        assert!(matches!(
            analyze(&store, "INSERT INTO users VALUES (1, 'Alice');"),
            Err(Error::Semantic(SemanticError::TypeMismatch(_)))
        ));
        assert!(matches!(
            analyze(&store, "INSERT INTO users VALUES ('x', 'Alice', 25);"),
            Err(Error::Semantic(SemanticError::TypeMismatch(_)))
        ));
        assert!(matches!(
            analyze(&store, "INSERT INTO users (id, nope) VALUES (1, 2);"),
            Err(Error::Semantic(SemanticError::ColumnNotFound { .. }))
        ));
    }
}
