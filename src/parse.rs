use crate::*;
use crate::lex::{Token, TokenKind};

/// Keywords that terminate a table alias position.
const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "INNER", "LEFT", "RIGHT", "FULL",
    "JOIN", "ON", "SET", "VALUES", "AS",
];

/// Recursive-descent parser over the token stream.
///
/// Name convention for methods: `s_` parses a statement, `p_` parses a
/// clause or sub-expression.
pub struct Parser<'a> {
    toks: &'a [Token],
    ix: usize,
}

/// Parse one statement, classifying it by its leading keyword.
pub fn parse_statement(toks: &[Token]) -> Result<Statement> {
    let mut p = Parser::new(toks);
    let stmt = p.statement()?;
    p.test(&TokenKind::Semi);
    if p.kind() != &TokenKind::EndOfFile {
        return Err(p.err(format!("unexpected {} after statement", p.kind().describe())));
    }
    Ok(stmt)
}

impl<'a> Parser<'a> {
    pub fn new(toks: &'a [Token]) -> Self {
        Self { toks, ix: 0 }
    }

    fn cur(&self) -> &Token {
        &self.toks[self.ix.min(self.toks.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.cur().kind
    }

    fn advance(&mut self) {
        if self.ix < self.toks.len() - 1 {
            self.ix += 1;
        }
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        let t = self.cur();
        Error::syntax(msg, t.line, t.column)
    }

    /// Checks the token is as expected, and consumes it.
    fn read(&mut self, k: TokenKind) -> Result<()> {
        if self.kind() == &k {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {}, got {}", k.describe(), self.kind().describe())))
        }
    }

    /// Tests whether the token is as specified. If so, it is consumed.
    fn test(&mut self, k: &TokenKind) -> bool {
        if self.kind() == k {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.kind(), TokenKind::Id(s) if s.eq_ignore_ascii_case(kw))
    }

    /// Tests whether the token is the given keyword. If so, it is consumed.
    fn test_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Checks the token is the given keyword, and consumes it.
    fn read_kw(&mut self, kw: &str) -> Result<()> {
        if self.test_kw(kw) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}', got {}", kw, self.kind().describe())))
        }
    }

    fn id(&mut self) -> Result<String> {
        match self.kind() {
            TokenKind::Id(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            other => Err(self.err(format!("expected a name, got {}", other.describe()))),
        }
    }

    /// `name` or `qualifier.name`.
    fn qualified(&mut self) -> Result<String> {
        let mut name = self.id()?;
        if self.test(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.id()?);
        }
        Ok(name)
    }

    fn statement(&mut self) -> Result<Statement> {
        let kw = match self.kind() {
            TokenKind::Id(s) => s.to_ascii_uppercase(),
            other => {
                return Err(self.err(format!(
                    "statement keyword expected, got {}",
                    other.describe()
                )))
            }
        };
        match kw.as_str() {
            "SELECT" => {
                self.advance();
                Ok(Statement::Select(self.s_select()?))
            }
            "CREATE" => {
                self.advance();
                self.s_create()
            }
            "DROP" => {
                self.advance();
                self.read_kw("TABLE")?;
                Ok(Statement::DropTable(self.id()?))
            }
            "ALTER" => {
                self.advance();
                self.s_alter()
            }
            "INSERT" => {
                self.advance();
                Ok(Statement::Insert(self.s_insert()?))
            }
            "UPDATE" => {
                self.advance();
                Ok(Statement::Update(self.s_update()?))
            }
            "DELETE" => {
                self.advance();
                Ok(Statement::Delete(self.s_delete()?))
            }
            _ => Err(self.err(format!("statement keyword expected, got '{}'", kw))),
        }
    }

    // ****************** SELECT

    fn s_select(&mut self) -> Result<SelectStmt> {
        let items = self.p_select_items()?;
        self.read_kw("FROM")?;
        let table = self.id()?;
        let alias = self.p_alias()?;
        let mut joins = Vec::new();
        while let Some(kind) = self.p_join_kind() {
            let jtable = self.id()?;
            let jalias = self.p_alias()?;
            self.read_kw("ON")?;
            let left = self.qualified()?;
            self.read(TokenKind::Equal)?;
            let right = self.qualified()?;
            joins.push(Join {
                kind,
                table: jtable,
                alias: jalias,
                on: JoinCond { left, right },
            });
        }
        let wher = if self.test_kw("WHERE") {
            Some(self.p_pred()?)
        } else {
            None
        };
        let mut group_by = Vec::new();
        if self.test_kw("GROUP") {
            self.read_kw("BY")?;
            loop {
                group_by.push(self.qualified()?);
                if !self.test(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let having = if self.test_kw("HAVING") {
            Some(self.p_having()?)
        } else {
            None
        };
        let mut order_by = Vec::new();
        if self.test_kw("ORDER") {
            self.read_kw("BY")?;
            loop {
                let column = self.qualified()?;
                let desc = if self.test_kw("DESC") {
                    true
                } else {
                    self.test_kw("ASC");
                    false
                };
                order_by.push(OrderKey { column, desc });
                if !self.test(&TokenKind::Comma) {
                    break;
                }
            }
        }
        let mut limit = None;
        let mut offset = None;
        if self.test_kw("LIMIT") {
            limit = Some(self.p_count()?);
            if self.test_kw("OFFSET") {
                offset = Some(self.p_count()?);
            }
        }
        Ok(SelectStmt {
            items,
            table,
            alias,
            joins,
            wher,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn p_select_items(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            if self.test(&TokenKind::Times) {
                items.push(SelectItem::Star);
            } else if let Some(func) = self.p_agg_func() {
                self.read(TokenKind::LBra)?;
                let column = if self.test(&TokenKind::Times) {
                    None
                } else {
                    Some(self.qualified()?)
                };
                self.read(TokenKind::RBra)?;
                let alias = if self.test_kw("AS") {
                    Some(self.id()?)
                } else {
                    None
                };
                items.push(SelectItem::Aggregate {
                    func,
                    column,
                    alias,
                });
            } else {
                items.push(SelectItem::Column(self.qualified()?));
            }
            if !self.test(&TokenKind::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// Consume an aggregate function name only when it is followed by `(`.
    fn p_agg_func(&mut self) -> Option<AggFunc> {
        let func = match self.kind() {
            TokenKind::Id(s) => match s.to_ascii_uppercase().as_str() {
                "COUNT" => AggFunc::Count,
                "SUM" => AggFunc::Sum,
                "AVG" => AggFunc::Avg,
                "MIN" => AggFunc::Min,
                "MAX" => AggFunc::Max,
                _ => return None,
            },
            _ => return None,
        };
        if self.ix + 1 < self.toks.len() && self.toks[self.ix + 1].kind == TokenKind::LBra {
            self.advance();
            Some(func)
        } else {
            None
        }
    }

    fn p_alias(&mut self) -> Result<Option<String>> {
        if self.test_kw("AS") {
            return Ok(Some(self.id()?));
        }
        if let TokenKind::Id(s) = self.kind() {
            if !CLAUSE_KEYWORDS.iter().any(|k| s.eq_ignore_ascii_case(k)) {
                return Ok(Some(self.id()?));
            }
        }
        Ok(None)
    }

    fn kw_at(&self, ix: usize, kw: &str) -> bool {
        matches!(self.toks.get(ix).map(|t| &t.kind), Some(TokenKind::Id(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn p_join_kind(&mut self) -> Option<JoinKind> {
        if self.is_kw("JOIN") {
            self.advance();
            return Some(JoinKind::Plain);
        }
        let kind = if self.is_kw("INNER") {
            JoinKind::Inner
        } else if self.is_kw("LEFT") {
            JoinKind::Left
        } else if self.is_kw("RIGHT") {
            JoinKind::Right
        } else if self.is_kw("FULL") {
            JoinKind::Full
        } else {
            return None;
        };
        // OUTER is accepted and ignored between LEFT/RIGHT/FULL and JOIN.
        // The whole form is checked before anything is consumed.
        if self.kw_at(self.ix + 1, "JOIN") {
            self.advance();
            self.advance();
            Some(kind)
        } else if self.kw_at(self.ix + 1, "OUTER") && self.kw_at(self.ix + 2, "JOIN") {
            self.advance();
            self.advance();
            self.advance();
            Some(kind)
        } else {
            None
        }
    }

    fn p_count(&mut self) -> Result<usize> {
        match self.kind() {
            TokenKind::Int(x) if *x >= 0 => {
                let n = *x as usize;
                self.advance();
                Ok(n)
            }
            other => Err(self.err(format!(
                "expected a non-negative count, got {}",
                other.describe()
            ))),
        }
    }

    // ****************** Predicates

    /// OR level. AND binds tighter than OR, NOT tighter than AND,
    /// comparisons tighter than all logical operators.
    fn p_pred(&mut self) -> Result<Pred> {
        let mut left = self.p_and()?;
        while self.test_kw("OR") {
            let right = self.p_and()?;
            left = Pred::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn p_and(&mut self) -> Result<Pred> {
        let mut left = self.p_not()?;
        while self.test_kw("AND") {
            let right = self.p_not()?;
            left = Pred::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn p_not(&mut self) -> Result<Pred> {
        if self.test_kw("NOT") {
            return Ok(Pred::Not(Box::new(self.p_not()?)));
        }
        if self.test(&TokenKind::LBra) {
            let p = self.p_pred()?;
            self.read(TokenKind::RBra)?;
            return Ok(p);
        }
        self.p_comparison()
    }

    fn p_comparison(&mut self) -> Result<Pred> {
        let left = self.p_scalar()?;
        let op = self.p_cmp_op()?;
        let right = self.p_scalar()?;
        Ok(Pred::Cmp { left, op, right })
    }

    fn p_cmp_op(&mut self) -> Result<CmpOp> {
        let op = match self.kind() {
            TokenKind::Greater => CmpOp::Gt,
            TokenKind::GreaterEqual => CmpOp::Ge,
            TokenKind::Less => CmpOp::Lt,
            TokenKind::LessEqual => CmpOp::Le,
            TokenKind::Equal => CmpOp::Eq,
            TokenKind::NotEqual => CmpOp::Ne,
            other => {
                return Err(self.err(format!(
                    "expected a comparison operator, got {}",
                    other.describe()
                )))
            }
        };
        self.advance();
        Ok(op)
    }

    fn p_scalar(&mut self) -> Result<Scalar> {
        if let Some(v) = self.p_literal_opt()? {
            return Ok(Scalar::Lit(v));
        }
        Ok(Scalar::Col(self.qualified()?))
    }

    /// Consume a literal if one is next: number, string, NULL, TRUE, FALSE,
    /// or a minus-signed number.
    fn p_literal_opt(&mut self) -> Result<Option<Value>> {
        let v = match self.kind() {
            TokenKind::Int(x) => Value::Int(*x),
            TokenKind::Float(x) => Value::Float(*x),
            TokenKind::Str(s) => Value::Str(s.clone()),
            TokenKind::Minus => {
                self.advance();
                return match self.kind() {
                    TokenKind::Int(x) => {
                        let v = Value::Int(-x);
                        self.advance();
                        Ok(Some(v))
                    }
                    TokenKind::Float(x) => {
                        let v = Value::Float(-x);
                        self.advance();
                        Ok(Some(v))
                    }
                    other => Err(self.err(format!(
                        "expected a number after '-', got {}",
                        other.describe()
                    ))),
                };
            }
            TokenKind::Id(s) => {
                if s.eq_ignore_ascii_case("NULL") {
                    Value::Null
                } else if s.eq_ignore_ascii_case("TRUE") {
                    Value::Bool(true)
                } else if s.eq_ignore_ascii_case("FALSE") {
                    Value::Bool(false)
                } else {
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        };
        self.advance();
        Ok(Some(v))
    }

    fn p_literal(&mut self) -> Result<Value> {
        match self.p_literal_opt()? {
            Some(v) => Ok(v),
            None => Err(self.err(format!("expected a literal, got {}", self.kind().describe()))),
        }
    }

    /// Simple predicate for DML WHERE clauses: column op literal.
    fn p_simple_pred(&mut self) -> Result<Pred> {
        let column = self.qualified()?;
        let op = self.p_cmp_op()?;
        let value = self.p_literal()?;
        Ok(Pred::cmp(&column, op, value))
    }

    fn p_having(&mut self) -> Result<HavingCond> {
        let func = match self.p_agg_func() {
            Some(f) => f,
            None => {
                return Err(self.err(format!(
                    "expected an aggregate function in HAVING, got {}",
                    self.kind().describe()
                )))
            }
        };
        self.read(TokenKind::LBra)?;
        let column = if self.test(&TokenKind::Times) {
            None
        } else {
            Some(self.qualified()?)
        };
        self.read(TokenKind::RBra)?;
        let op = self.p_cmp_op()?;
        let value = self.p_literal()?;
        Ok(HavingCond {
            func,
            column,
            op,
            value,
        })
    }

    // ****************** DDL

    fn s_create(&mut self) -> Result<Statement> {
        if self.test_kw("TABLE") {
            return self.s_create_table();
        }
        let unique = self.test_kw("UNIQUE");
        if self.test_kw("INDEX") {
            return self.s_create_index(unique);
        }
        Err(self.err("expected TABLE or INDEX after CREATE"))
    }

    fn s_create_table(&mut self) -> Result<Statement> {
        let name = self.id()?;
        self.read(TokenKind::LBra)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.p_column_def()?);
            if self.test(&TokenKind::RBra) {
                break;
            }
            if !self.test(&TokenKind::Comma) {
                return Err(self.err("expected ',' or ')' in column list"));
            }
        }
        Ok(Statement::CreateTable(CreateTableStmt { name, columns }))
    }

    fn p_column_def(&mut self) -> Result<ColumnInfo> {
        let name = self.id()?;
        let (kind, max_length) = self.p_data_type()?;
        let mut col = ColumnInfo::new(&name, kind);
        col.max_length = max_length;
        loop {
            if self.test_kw("NOT") {
                self.read_kw("NULL")?;
                col.nullable = false;
            } else if self.test_kw("PRIMARY") {
                self.read_kw("KEY")?;
                col.primary_key = true;
                col.nullable = false;
            } else if self.test_kw("UNIQUE") {
                col.unique = true;
            } else if self.test_kw("DEFAULT") {
                col.default = Some(self.p_literal()?);
            } else {
                break;
            }
        }
        Ok(col)
    }

    /// Data type with synonyms. DECIMAL maps to FLOAT; CHAR, VARCHAR and
    /// TEXT map to STRING with an optional maximum length.
    fn p_data_type(&mut self) -> Result<(ColumnKind, Option<usize>)> {
        let name = self.id()?.to_ascii_uppercase();
        match name.as_str() {
            "INTEGER" | "INT" => Ok((ColumnKind::Integer, None)),
            "FLOAT" | "DOUBLE" | "REAL" => Ok((ColumnKind::Float, None)),
            "DECIMAL" | "NUMERIC" => {
                // Precision and scale are recognized and dropped.
                if self.test(&TokenKind::LBra) {
                    self.p_count()?;
                    if self.test(&TokenKind::Comma) {
                        self.p_count()?;
                    }
                    self.read(TokenKind::RBra)?;
                }
                Ok((ColumnKind::Float, None))
            }
            "VARCHAR" | "CHAR" => {
                let mut max = None;
                if self.test(&TokenKind::LBra) {
                    max = Some(self.p_count()?);
                    self.read(TokenKind::RBra)?;
                }
                Ok((ColumnKind::Str, max))
            }
            "TEXT" | "STRING" => Ok((ColumnKind::Str, None)),
            "BOOLEAN" | "BOOL" => Ok((ColumnKind::Bool, None)),
            other => Err(self.err(format!("unknown data type '{}'", other))),
        }
    }

    fn s_create_index(&mut self, unique: bool) -> Result<Statement> {
        let name = self.id()?;
        self.read_kw("ON")?;
        let table = self.id()?;
        self.read(TokenKind::LBra)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.id()?);
            if self.test(&TokenKind::RBra) {
                break;
            }
            if !self.test(&TokenKind::Comma) {
                return Err(self.err("expected ',' or ')' in index column list"));
            }
        }
        Ok(Statement::CreateIndex(CreateIndexStmt {
            name,
            table,
            columns,
            unique,
        }))
    }

    fn s_alter(&mut self) -> Result<Statement> {
        self.read_kw("TABLE")?;
        let table = self.id()?;
        self.read_kw("ADD")?;
        self.test_kw("COLUMN");
        let column = self.p_column_def()?;
        Ok(Statement::AlterTableAdd { table, column })
    }

    // ****************** DML

    fn s_insert(&mut self) -> Result<InsertStmt> {
        self.read_kw("INTO")?;
        let table = self.id()?;
        let columns = if self.test(&TokenKind::LBra) {
            let mut cols = Vec::new();
            loop {
                let col = self.id()?;
                if cols.contains(&col) {
                    return Err(self.err(format!("duplicate column '{}' in INSERT", col)));
                }
                cols.push(col);
                if self.test(&TokenKind::RBra) {
                    break;
                }
                if !self.test(&TokenKind::Comma) {
                    return Err(self.err("expected ',' or ')' in column list"));
                }
            }
            Some(cols)
        } else {
            None
        };
        self.read_kw("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.read(TokenKind::LBra)?;
            let mut vals = Vec::new();
            loop {
                vals.push(self.p_literal()?);
                if self.test(&TokenKind::RBra) {
                    break;
                }
                if !self.test(&TokenKind::Comma) {
                    return Err(self.err("expected ',' or ')' in VALUES"));
                }
            }
            rows.push(vals);
            if !self.test(&TokenKind::Comma) {
                break;
            }
        }
        Ok(InsertStmt {
            table,
            columns,
            rows,
        })
    }

    fn s_update(&mut self) -> Result<UpdateStmt> {
        let table = self.id()?;
        self.read_kw("SET")?;
        let mut sets = Vec::new();
        loop {
            let column = self.id()?;
            self.read(TokenKind::Equal)?;
            sets.push(Assign {
                column,
                value: self.p_set_expr()?,
            });
            if !self.test(&TokenKind::Comma) {
                break;
            }
        }
        let wher = if self.test_kw("WHERE") {
            Some(self.p_simple_pred()?)
        } else {
            None
        };
        Ok(UpdateStmt { table, sets, wher })
    }

    /// Right side of SET: a literal, a column, or column op literal.
    fn p_set_expr(&mut self) -> Result<SetExpr> {
        if let Some(v) = self.p_literal_opt()? {
            return Ok(SetExpr::Value(v));
        }
        let column = self.id()?;
        let op = match self.kind() {
            TokenKind::Plus => ArithOp::Add,
            TokenKind::Minus => ArithOp::Sub,
            TokenKind::Times => ArithOp::Mul,
            TokenKind::Divide => ArithOp::Div,
            TokenKind::Percent => ArithOp::Mod,
            _ => return Ok(SetExpr::Column(column)),
        };
        self.advance();
        let value = self.p_literal()?;
        Ok(SetExpr::Arith { column, op, value })
    }

    fn s_delete(&mut self) -> Result<DeleteStmt> {
        self.read_kw("FROM")?;
        let table = self.id()?;
        let wher = if self.test_kw("WHERE") {
            Some(self.p_simple_pred()?)
        } else {
            None
        };
        Ok(DeleteStmt { table, wher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Statement {
        let toks = lex::tokenize(sql).unwrap();
        parse_statement(&toks).unwrap()
    }

    fn parse_err(sql: &str) -> Error {
        let toks = lex::tokenize(sql).unwrap();
        parse_statement(&toks).unwrap_err()
    }

    #[test]
    fn classify_statements() {
        assert_eq!(parse("SELECT * FROM t;").class(), StatementClass::Select);
        assert_eq!(
            parse("CREATE TABLE t (a INT);").class(),
            StatementClass::Ddl
        );
        assert_eq!(
            parse("INSERT INTO t VALUES (1);").class(),
            StatementClass::Dml
        );
    }

    #[test]
    fn select_with_everything() {
        let stmt = parse(
            "SELECT u.name, COUNT(*) AS c FROM users u \
             INNER JOIN courses c ON u.id = c.student_id \
             WHERE c.score >= 85 AND u.age > 18 \
             GROUP BY u.name HAVING COUNT(*) > 1 \
             ORDER BY u.name DESC LIMIT 10 OFFSET 2;",
        );
        let s = match stmt {
            Statement::Select(s) => s,
            _ => panic!("expected SELECT"),
        };
        assert_eq!(s.table, "users");
        assert_eq!(s.alias.as_deref(), Some("u"));
        assert_eq!(s.joins.len(), 1);
        assert_eq!(s.joins[0].kind, JoinKind::Inner);
        assert_eq!(s.joins[0].on.left, "u.id");
        assert_eq!(s.group_by, vec!["u.name".to_string()]);
        assert!(s.having.is_some());
        assert_eq!(s.order_by[0].desc, true);
        assert_eq!((s.limit, s.offset), (Some(10), Some(2)));
        assert!(s.is_complex());
        match &s.items[1] {
            SelectItem::Aggregate { func, column, alias } => {
                assert_eq!(*func, AggFunc::Count);
                assert!(column.is_none());
                assert_eq!(alias.as_deref(), Some("c"));
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
    }

    #[test]
    fn where_precedence() {
        let stmt = parse("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3;");
        let s = match stmt {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        // AND binds tighter: a = 1 OR (b = 2 AND c = 3).
        match s.wher.unwrap() {
            Pred::Or(l, r) => {
                assert!(matches!(*l, Pred::Cmp { .. }));
                assert!(matches!(*r, Pred::And(_, _)));
            }
            other => panic!("expected OR at the top, got {:?}", other),
        }
    }

    #[test]
    fn create_table_constraints() {
        let stmt = parse(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(50) NOT NULL, \
             score DECIMAL(8,2), status TEXT DEFAULT 'active', ok BOOLEAN DEFAULT TRUE);",
        );
        let c = match stmt {
            Statement::CreateTable(c) => c,
            _ => unreachable!(),
        };
        assert_eq!(c.columns.len(), 5);
        assert!(c.columns[0].primary_key && !c.columns[0].nullable);
        assert_eq!(c.columns[1].max_length, Some(50));
        assert!(!c.columns[1].nullable);
        assert_eq!(c.columns[2].kind, ColumnKind::Float);
        assert_eq!(c.columns[3].default, Some(Value::Str("active".into())));
        assert_eq!(c.columns[4].default, Some(Value::Bool(true)));
    }

    #[test]
    fn insert_forms() {
        let stmt = parse("INSERT INTO users (id, name) VALUES (1, 'Alice'), (2, 'Bob');");
        let i = match stmt {
            Statement::Insert(i) => i,
            _ => unreachable!(),
        };
        assert_eq!(i.columns.as_deref().unwrap().len(), 2);
        assert_eq!(i.rows.len(), 2);
        assert_eq!(i.rows[1][0], Value::Int(2));

        let stmt = parse("INSERT INTO t VALUES (-3, 2.5, NULL);");
        let i = match stmt {
            Statement::Insert(i) => i,
            _ => unreachable!(),
        };
        assert_eq!(i.rows[0], vec![Value::Int(-3), Value::Float(2.5), Value::Null]);
    }

    #[test]
    fn update_with_arithmetic() {
        let stmt = parse("UPDATE users SET age = age + 1 WHERE name = 'Alice';");
        let u = match stmt {
            Statement::Update(u) => u,
            _ => unreachable!(),
        };
        assert_eq!(
            u.sets[0].value,
            SetExpr::Arith {
                column: "age".into(),
                op: ArithOp::Add,
                value: Value::Int(1),
            }
        );
        assert_eq!(
            u.wher.unwrap().simple().map(|(c, o, v)| (c.to_string(), o, v.clone())),
            Some(("name".to_string(), CmpOp::Eq, Value::Str("Alice".into())))
        );
    }

    #[test]
    fn expected_vs_found() {
        let e = parse_err("SELECT name users;");
        assert!(e.to_string().contains("expected 'FROM'"), "{}", e);
        let e = parse_err("CREATE TABLE t (a WIBBLE);");
        assert!(e.to_string().contains("unknown data type"), "{}", e);
        let e = parse_err("SELECT * FROM t WHERE;");
        assert!(matches!(e, Error::Syntax { .. }));
    }

    #[test]
    fn alter_and_index() {
        assert!(matches!(
            parse("ALTER TABLE t ADD COLUMN note TEXT;"),
            Statement::AlterTableAdd { .. }
        ));
        let stmt = parse("CREATE UNIQUE INDEX idx ON t (a, b);");
        let i = match stmt {
            Statement::CreateIndex(i) => i,
            _ => unreachable!(),
        };
        assert!(i.unique);
        assert_eq!(i.columns, vec!["a".to_string(), "b".to_string()]);
    }
}
