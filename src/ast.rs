use crate::*;
use std::fmt;

/// Statement class reported by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementClass {
    Ddl,
    Dml,
    Select,
}

/// A parsed SQL statement.
#[derive(Clone, Debug)]
pub enum Statement {
    Select(SelectStmt),
    CreateTable(CreateTableStmt),
    DropTable(String),
    AlterTableAdd { table: String, column: ColumnInfo },
    CreateIndex(CreateIndexStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

impl Statement {
    pub fn class(&self) -> StatementClass {
        match self {
            Statement::Select(_) => StatementClass::Select,
            Statement::CreateTable(_)
            | Statement::DropTable(_)
            | Statement::AlterTableAdd { .. }
            | Statement::CreateIndex(_) => StatementClass::Ddl,
            Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) => {
                StatementClass::Dml
            }
        }
    }
}

/// Comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn eval(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CmpOp::Gt => ord == Greater,
            CmpOp::Ge => ord != Less,
            CmpOp::Lt => ord == Less,
            CmpOp::Le => ord != Greater,
            CmpOp::Eq => ord == Equal,
            CmpOp::Ne => ord != Equal,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
        };
        write!(f, "{}", s)
    }
}

/// One side of a comparison: a column reference or a literal.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Col(String),
    Lit(Value),
}

impl Scalar {
    pub fn is_lit(&self) -> bool {
        matches!(self, Scalar::Lit(_))
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::Col(c) => write!(f, "{}", c),
            Scalar::Lit(v) => write!(f, "{}", quoted(v)),
        }
    }
}

/// Predicate tree. AND binds tighter than OR; NOT binds tightest.
#[derive(Clone, Debug, PartialEq)]
pub enum Pred {
    Cmp {
        left: Scalar,
        op: CmpOp,
        right: Scalar,
    },
    And(Box<Pred>, Box<Pred>),
    Or(Box<Pred>, Box<Pred>),
    Not(Box<Pred>),
}

impl Pred {
    pub fn cmp(column: &str, op: CmpOp, value: Value) -> Pred {
        Pred::Cmp {
            left: Scalar::Col(column.to_string()),
            op,
            right: Scalar::Lit(value),
        }
    }

    /// Evaluate against a record. A comparison involving NULL is false,
    /// except that NULL != x holds when x is non-null.
    pub fn matches(&self, rec: &Record) -> bool {
        match self {
            Pred::Cmp { left, op, right } => {
                let l = resolve(left, rec);
                let r = resolve(right, rec);
                match (l, r) {
                    (Some(l), Some(r)) => {
                        if l.is_null() || r.is_null() {
                            *op == CmpOp::Ne && l.is_null() != r.is_null()
                        } else {
                            op.eval(l.total_cmp(r))
                        }
                    }
                    _ => false,
                }
            }
            Pred::And(a, b) => a.matches(rec) && b.matches(rec),
            Pred::Or(a, b) => a.matches(rec) || b.matches(rec),
            Pred::Not(p) => !p.matches(rec),
        }
    }

    /// The (column, op, value) triple when the predicate is one simple
    /// column-to-literal comparison.
    pub fn simple(&self) -> Option<(&str, CmpOp, &Value)> {
        if let Pred::Cmp {
            left: Scalar::Col(c),
            op,
            right: Scalar::Lit(v),
        } = self
        {
            Some((c, *op, v))
        } else {
            None
        }
    }

    /// Every column referenced anywhere in the tree.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Pred::Cmp { left, right, .. } => {
                if let Scalar::Col(c) = left {
                    out.push(c);
                }
                if let Scalar::Col(c) = right {
                    out.push(c);
                }
            }
            Pred::And(a, b) | Pred::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Pred::Not(p) => p.collect_columns(out),
        }
    }
}

fn resolve<'a>(s: &'a Scalar, rec: &'a Record) -> Option<&'a Value> {
    match s {
        Scalar::Lit(v) => Some(v),
        Scalar::Col(c) => rec.lookup(c),
    }
}

impl fmt::Display for Pred {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Pred::Cmp { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Pred::And(a, b) => write!(f, "({} AND {})", a, b),
            Pred::Or(a, b) => write!(f, "({} OR {})", a, b),
            Pred::Not(p) => write!(f, "(NOT {})", p),
        }
    }
}

/// Aggregate function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }

    /// Sentinel column name carrying the per-group result until PROJECT
    /// renames it to the SQL alias.
    pub fn sentinel(self) -> &'static str {
        match self {
            AggFunc::Count => "_count_result",
            AggFunc::Sum => "_sum_result",
            AggFunc::Avg => "_avg_result",
            AggFunc::Min => "_min_result",
            AggFunc::Max => "_max_result",
        }
    }
}

/// One item of a SELECT list.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    Star,
    Column(String),
    Aggregate {
        func: AggFunc,
        /// None means `*`, as in COUNT(*).
        column: Option<String>,
        alias: Option<String>,
    },
}

impl SelectItem {
    /// Output column label: alias if given, else the SQL form.
    pub fn label(&self) -> String {
        match self {
            SelectItem::Star => "*".to_string(),
            SelectItem::Column(c) => c.clone(),
            SelectItem::Aggregate { func, column, alias } => match alias {
                Some(a) => a.clone(),
                None => format!("{}({})", func.name(), column.as_deref().unwrap_or("*")),
            },
        }
    }
}

/// Join kind. A bare JOIN behaves as INNER but keeps its own tag through
/// the IR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Plain,
    Inner,
    Left,
    Right,
    Full,
}

/// Equality join condition between two qualified columns.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinCond {
    pub left: String,
    pub right: String,
}

/// One JOIN clause of a SELECT.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    pub on: JoinCond,
}

/// ORDER BY key.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderKey {
    pub column: String,
    pub desc: bool,
}

/// HAVING predicate: aggregate(column) op literal.
#[derive(Clone, Debug, PartialEq)]
pub struct HavingCond {
    pub func: AggFunc,
    pub column: Option<String>,
    pub op: CmpOp,
    pub value: Value,
}

/// SELECT statement.
#[derive(Clone, Debug, Default)]
pub struct SelectStmt {
    pub items: Vec<SelectItem>,
    pub table: String,
    pub alias: Option<String>,
    pub joins: Vec<Join>,
    pub wher: Option<Pred>,
    pub group_by: Vec<String>,
    pub having: Option<HavingCond>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SelectStmt {
    /// A complex query carries a JOIN, aggregate, GROUP BY, HAVING,
    /// ORDER BY or LIMIT/OFFSET and is routed through the extended
    /// analysis path.
    pub fn is_complex(&self) -> bool {
        !self.joins.is_empty()
            || !self.group_by.is_empty()
            || self.having.is_some()
            || !self.order_by.is_empty()
            || self.limit.is_some()
            || self.offset.is_some()
            || self
                .items
                .iter()
                .any(|i| matches!(i, SelectItem::Aggregate { .. }))
    }
}

/// CREATE TABLE statement.
#[derive(Clone, Debug)]
pub struct CreateTableStmt {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// CREATE [UNIQUE] INDEX statement.
#[derive(Clone, Debug)]
pub struct CreateIndexStmt {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// INSERT statement. `columns` of None means the full column list.
#[derive(Clone, Debug)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
}

/// Arithmetic operator usable on the right side of SET.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        };
        write!(f, "{}", s)
    }
}

/// Value expression on the right side of a SET assignment.
#[derive(Clone, Debug, PartialEq)]
pub enum SetExpr {
    Value(Value),
    Column(String),
    Arith {
        column: String,
        op: ArithOp,
        value: Value,
    },
}

impl SetExpr {
    /// Evaluate against the current row.
    pub fn eval(&self, rec: &Record) -> Result<Value> {
        match self {
            SetExpr::Value(v) => Ok(v.clone()),
            SetExpr::Column(c) => Ok(rec.lookup(c).cloned().unwrap_or(Value::Null)),
            SetExpr::Arith { column, op, value } => {
                let cur = rec.lookup(column).cloned().unwrap_or(Value::Null);
                arith(&cur, *op, value)
            }
        }
    }
}

impl fmt::Display for SetExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SetExpr::Value(v) => write!(f, "{}", quoted(v)),
            SetExpr::Column(c) => write!(f, "{}", c),
            SetExpr::Arith { column, op, value } => write!(f, "{}{}{}", column, op, quoted(value)),
        }
    }
}

/// Apply an arithmetic operator to two values, keeping integers integral.
pub fn arith(left: &Value, op: ArithOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        return match op {
            ArithOp::Add => Ok(Value::Int(a + b)),
            ArithOp::Sub => Ok(Value::Int(a - b)),
            ArithOp::Mul => Ok(Value::Int(a * b)),
            ArithOp::Div => {
                if *b == 0 {
                    Err(ExecError::DivideByZero.into())
                } else {
                    Ok(Value::Int(a / b))
                }
            }
            ArithOp::Mod => {
                if *b == 0 {
                    Err(ExecError::DivideByZero.into())
                } else {
                    Ok(Value::Int(a % b))
                }
            }
        };
    }
    let a = left.float()?;
    let b = right.float()?;
    match op {
        ArithOp::Add => Ok(Value::Float(a + b)),
        ArithOp::Sub => Ok(Value::Float(a - b)),
        ArithOp::Mul => Ok(Value::Float(a * b)),
        ArithOp::Div => {
            if b == 0.0 {
                Err(ExecError::DivideByZero.into())
            } else {
                Ok(Value::Float(a / b))
            }
        }
        ArithOp::Mod => {
            if b == 0.0 {
                Err(ExecError::DivideByZero.into())
            } else {
                Ok(Value::Float(a % b))
            }
        }
    }
}

/// SET assignment of an UPDATE.
#[derive(Clone, Debug, PartialEq)]
pub struct Assign {
    pub column: String,
    pub value: SetExpr,
}

/// UPDATE statement.
#[derive(Clone, Debug)]
pub struct UpdateStmt {
    pub table: String,
    pub sets: Vec<Assign>,
    pub wher: Option<Pred>,
}

/// DELETE statement.
#[derive(Clone, Debug)]
pub struct DeleteStmt {
    pub table: String,
    pub wher: Option<Pred>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pred_matching() {
        let rec = Record::from(vec![
            ("age", Value::Int(30)),
            ("name", Value::Str("Bob".into())),
        ]);
        assert!(Pred::cmp("age", CmpOp::Gt, Value::Int(25)).matches(&rec));
        assert!(!Pred::cmp("age", CmpOp::Lt, Value::Int(25)).matches(&rec));
        let both = Pred::And(
            Box::new(Pred::cmp("age", CmpOp::Ge, Value::Int(30))),
            Box::new(Pred::cmp("name", CmpOp::Eq, Value::Str("Bob".into()))),
        );
        assert!(both.matches(&rec));
        let either = Pred::Or(
            Box::new(Pred::cmp("age", CmpOp::Lt, Value::Int(0))),
            Box::new(Pred::cmp("name", CmpOp::Ne, Value::Str("Eve".into()))),
        );
        assert!(either.matches(&rec));
    }

    #[test]
    fn qualified_lookup_in_pred() {
        let rec = Record::from(vec![("u.age", Value::Int(40))]);
        assert!(Pred::cmp("u.age", CmpOp::Eq, Value::Int(40)).matches(&rec));
        assert!(Pred::cmp("age", CmpOp::Eq, Value::Int(40)).matches(&rec));
    }

    #[test]
    fn arith_keeps_integers() {
        assert_eq!(
            arith(&Value::Int(25), ArithOp::Add, &Value::Int(1)).unwrap(),
            Value::Int(26)
        );
        assert_eq!(
            arith(&Value::Float(1.5), ArithOp::Mul, &Value::Int(2)).unwrap(),
            Value::Float(3.0)
        );
        assert!(matches!(
            arith(&Value::Int(1), ArithOp::Div, &Value::Int(0)),
            Err(Error::Execution(ExecError::DivideByZero))
        ));
    }

    #[test]
    fn complex_detection() {
        let mut s = SelectStmt {
            items: vec![SelectItem::Star],
            table: "users".into(),
            ..Default::default()
        };
        assert!(!s.is_complex());
        s.limit = Some(3);
        assert!(s.is_complex());
    }
}
