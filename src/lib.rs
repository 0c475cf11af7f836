//! SQL database engine with a register-based execution core.
//!
//! A statement travels text -> tokens -> AST -> quadruples -> register
//! program -> rows:
//!
//! - [lex] scans the SQL text into tokens.
//! - [parse] builds a typed AST and classifies the statement.
//! - [analyze] validates names against the catalog and emits quadruples.
//! - [codegen] lowers quadruples onto a flat register file.
//! - [optimize] rewrites the program (predicate and projection pushdown,
//!   index hints, join reorder, constant folding, dead code).
//! - [exec] interprets the program against the storage engine.
//!
//! DDL and DML skip code generation: the analyzer lowers them to a single
//! payload-carrying quadruple which [Database] applies directly to the
//! storage engine.
//!
//! Storage is page-oriented: fixed 4 KiB pages behind a pinning buffer
//! pool with a pluggable replacement policy ([buffer]), a serialized
//! record codec ([page]), a table manager over chained pages ([table]),
//! and B+tree secondary indexes ([btree]), composed by [storage].
//!
//! Example:
//! ```
//! use regdb::{Config, Database};
//! let mut db = Database::open(Config::memory()).unwrap();
//! db.process("CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(50), age INTEGER);");
//! db.process("INSERT INTO users VALUES (1, 'Alice', 25);");
//! db.process("INSERT INTO users VALUES (2, 'Bob', 30);");
//! let out = db.process("SELECT name FROM users WHERE age > 25;");
//! assert!(out.success);
//! assert_eq!(out.rows.len(), 1);
//! ```

use std::path::PathBuf;

/// Semantic analysis: quadruple IR and symbol table.
pub mod analyze;
/// Statement AST, predicates and value expressions.
pub mod ast;
/// B+tree index structure.
pub mod btree;
/// Buffer pool with LRU, FIFO and CLOCK replacement.
pub mod buffer;
/// Lowering of quadruples to register instructions.
pub mod codegen;
/// Error taxonomy.
pub mod error;
/// Register program interpreter.
pub mod exec;
/// SQL tokenizer.
pub mod lex;
/// Peephole rewriter over instruction programs.
pub mod optimize;
/// Page layout and record codec.
pub mod page;
/// Recursive-descent SQL parser.
pub mod parse;
/// Backing storage abstraction.
pub mod stg;
/// Storage engine facade: catalog, pages, buffer pool and indexes.
pub mod storage;
/// Table metadata, records and record routing.
pub mod table;
/// Byte-level helpers.
pub mod util;
/// Runtime values.
pub mod value;

#[cfg(test)]
mod tests;

pub use crate::{
    analyze::{
        Analyzer, DdlPayload, DmlPayload, JoinSpec, Quad, QuadArg, QuadOp, Symbol, SymbolKind,
        SymbolTable,
    },
    ast::{
        arith, AggFunc, ArithOp, Assign, CmpOp, CreateIndexStmt, CreateTableStmt, DeleteStmt,
        HavingCond, InsertStmt, Join, JoinCond, JoinKind, OrderKey, Pred, Scalar, SelectItem,
        SelectStmt, SetExpr, Statement, StatementClass, UpdateStmt,
    },
    btree::{BTree, DuplicateKey, Key},
    buffer::{BufferPool, BufferStats, ReplacementPolicy},
    codegen::{Generator, Instruction, Opcode, Operand, Program, Reg},
    error::{ConstraintError, Error, ExecError, Result, SemanticError, StorageError},
    exec::{aggregate_value, ExecStats, ExecutionContext, Executor, RegVal},
    lex::{tokenize, Lexer, Token, TokenKind},
    optimize::{optimize, OptConfig, OptStats},
    page::{Locator, PageId, NO_PAGE, PAGE_HDR, PAGE_SIZE},
    parse::{parse_statement, Parser},
    stg::{FileStorage, MemStorage, Storage},
    storage::{base_column, index_key, Catalog, PerfComparison, StorageEngine},
    table::{
        coerce, normalize_record, ColumnInfo, ColumnKind, IndexInfo, PageAlloc, Record, TableInfo,
        TableOps,
    },
    value::{quoted, Value},
};

/// Engine configuration, consumed by [Database::open].
#[derive(Clone, Debug)]
pub struct Config {
    /// Database directory. None keeps everything in memory.
    pub dir: Option<PathBuf>,
    /// Buffer pool capacity in frames.
    pub pool_frames: usize,
    /// Frame replacement policy.
    pub policy: ReplacementPolicy,
    /// Default use-index mode for queries.
    pub use_index: bool,
    /// Order of newly created B+tree indexes.
    pub btree_order: usize,
    /// Optimizer switches.
    pub optimizer: OptConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: None,
            pool_frames: 64,
            policy: ReplacementPolicy::Lru,
            use_index: true,
            btree_order: 32,
            optimizer: OptConfig::default(),
        }
    }
}

impl Config {
    /// In-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Database persisted under the given directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }
}

/// Result of [Database::process].
#[derive(Clone, Debug)]
pub struct QueryOutcome {
    pub success: bool,
    pub rows: Vec<Record>,
    pub error: Option<String>,
}

/// Result of [Database::process_with_details]: the outcome plus pipeline
/// counters.
#[derive(Clone, Debug)]
pub struct QueryDetails {
    pub sql: String,
    pub success: bool,
    pub rows: Vec<Record>,
    pub error: Option<String>,
    pub token_count: usize,
    pub quad_count: usize,
    pub instruction_count: usize,
    pub complex: bool,
    pub optimizer: Option<OptStats>,
}

/// Engine-level counters.
#[derive(Clone, Copy, Debug)]
pub struct EngineStats {
    pub execution: ExecStats,
    pub buffer: BufferStats,
}

struct PipelineOutput {
    rows: Vec<Record>,
    tokens: usize,
    quads: usize,
    instructions: usize,
    complex: bool,
    optimizer: Option<OptStats>,
}

/// The SQL front door. Owns the storage engine; construction opens the
/// catalog and sizes the buffer pool, dropping flushes dirty state.
pub struct Database {
    store: StorageEngine,
    opt_config: OptConfig,
    use_index: bool,
    exec_stats: ExecStats,
}

impl Database {
    /// Open a database with the given configuration.
    pub fn open(config: Config) -> Result<Database> {
        let store = StorageEngine::open(&config)?;
        Ok(Database {
            store,
            opt_config: config.optimizer,
            use_index: config.use_index,
            exec_stats: ExecStats::default(),
        })
    }

    /// Process one SQL statement. Never panics; failures come back as an
    /// unsuccessful outcome with the error message.
    pub fn process(&mut self, sql: &str) -> QueryOutcome {
        match self.pipeline(sql) {
            Ok(out) => QueryOutcome {
                success: true,
                rows: out.rows,
                error: None,
            },
            Err(e) => {
                let msg = e.to_string();
                let mut rec = Record::new();
                rec.push("error".to_string(), Value::Str(msg.clone()));
                QueryOutcome {
                    success: false,
                    rows: vec![rec],
                    error: Some(msg),
                }
            }
        }
    }

    /// Process one SQL statement and report pipeline counters alongside
    /// the rows.
    pub fn process_with_details(&mut self, sql: &str) -> QueryDetails {
        match self.pipeline(sql) {
            Ok(out) => QueryDetails {
                sql: sql.to_string(),
                success: true,
                rows: out.rows,
                error: None,
                token_count: out.tokens,
                quad_count: out.quads,
                instruction_count: out.instructions,
                complex: out.complex,
                optimizer: out.optimizer,
            },
            Err(e) => QueryDetails {
                sql: sql.to_string(),
                success: false,
                rows: Vec::new(),
                error: Some(e.to_string()),
                token_count: 0,
                quad_count: 0,
                instruction_count: 0,
                complex: false,
                optimizer: None,
            },
        }
    }

    /// Lex, parse, analyze, then either run the register pipeline (SELECT)
    /// or apply the payload quadruple directly (DDL and DML).
    fn pipeline(&mut self, sql: &str) -> Result<PipelineOutput> {
        let tokens = lex::tokenize(sql)?;
        let stmt = parse::parse_statement(&tokens)?;
        let complex = match &stmt {
            Statement::Select(s) => s.is_complex(),
            _ => false,
        };
        let quads = Analyzer::new(&self.store).analyze(&stmt)?;
        match stmt.class() {
            StatementClass::Select => {
                let mut prog = Generator::new().generate(&quads)?;
                let opt_stats = optimize(&mut prog, &self.store, &self.opt_config);
                let mut ex = Executor::new(&mut self.store);
                let rows = ex.run(&prog, self.use_index)?;
                let stats = ex.stats;
                self.accumulate(stats);
                Ok(PipelineOutput {
                    rows,
                    tokens: tokens.len(),
                    quads: quads.len(),
                    instructions: prog.instructions.len(),
                    complex,
                    optimizer: Some(opt_stats),
                })
            }
            StatementClass::Ddl | StatementClass::Dml => {
                let rows = self.apply_quads(&quads)?;
                Ok(PipelineOutput {
                    rows,
                    tokens: tokens.len(),
                    quads: quads.len(),
                    instructions: 0,
                    complex,
                    optimizer: None,
                })
            }
        }
    }

    /// Interpret DDL and DML quadruples against the storage engine,
    /// producing one status record per operation.
    fn apply_quads(&mut self, quads: &[Quad]) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(quads.len());
        for quad in quads {
            let message = self.apply_quad(quad)?;
            let mut rec = Record::new();
            rec.push("message".to_string(), Value::Str(message));
            out.push(rec);
        }
        Ok(out)
    }

    fn apply_quad(&mut self, quad: &Quad) -> Result<String> {
        let name = match &quad.arg1 {
            QuadArg::Name(n) => n.clone(),
            _ => String::new(),
        };
        match (quad.op, &quad.arg2) {
            (QuadOp::CreateTable, QuadArg::Ddl(DdlPayload::CreateTable { columns })) => {
                self.store.create_table(&name, columns.clone())?;
                Ok(format!("Table '{}' created successfully", name))
            }
            (QuadOp::DropTable, QuadArg::Ddl(DdlPayload::Drop)) => {
                self.store.drop_table(&name)?;
                Ok(format!("Table '{}' dropped successfully", name))
            }
            (QuadOp::AlterTableAdd, QuadArg::Ddl(DdlPayload::AlterAdd { column })) => {
                self.store.add_column(&name, column.clone())?;
                Ok(format!(
                    "Column '{}' added to table '{}' successfully",
                    column.name, name
                ))
            }
            (
                QuadOp::CreateIndex,
                QuadArg::Ddl(DdlPayload::CreateIndex {
                    table,
                    columns,
                    unique,
                }),
            ) => {
                self.store.create_index(&name, table, columns, *unique)?;
                Ok(format!("Index '{}' created successfully", name))
            }
            (QuadOp::Insert, QuadArg::Dml(DmlPayload::Insert { columns, rows })) => {
                let info = self
                    .store
                    .table_info(&name)
                    .ok_or_else(|| SemanticError::TableNotFound(name.clone()))?;
                let targets: Vec<String> = match columns {
                    Some(c) => c.clone(),
                    None => info.column_names(),
                };
                for row in rows {
                    let mut rec = Record::new();
                    for (col, val) in targets.iter().zip(row) {
                        rec.push(col.clone(), val.clone());
                    }
                    self.store.insert(&name, &rec)?;
                }
                Ok(format!("{} record(s) inserted successfully", rows.len()))
            }
            (QuadOp::Update, QuadArg::Dml(DmlPayload::Update { sets, wher })) => {
                let n = self.store.update(&name, sets, wher.as_ref())?;
                Ok(format!("{} record(s) updated successfully", n))
            }
            (QuadOp::Delete, QuadArg::Dml(DmlPayload::Delete { wher })) => {
                let n = self.store.delete(&name, wher.as_ref())?;
                Ok(format!("{} record(s) deleted successfully", n))
            }
            (op, _) => Err(ExecError::UnknownInstruction(format!(
                "unsupported operation {}",
                op.name()
            ))
            .into()),
        }
    }

    fn accumulate(&mut self, s: ExecStats) {
        self.exec_stats.instructions_executed += s.instructions_executed;
        self.exec_stats.tables_opened += s.tables_opened;
        self.exec_stats.records_scanned += s.records_scanned;
        self.exec_stats.records_filtered += s.records_filtered;
        self.exec_stats.records_output += s.records_output;
    }

    /// Flush dirty pages and persist the catalog.
    pub fn flush_all(&mut self) -> Result<()> {
        self.store.flush_all()
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.store.list_tables()
    }

    pub fn table_info(&self, name: &str) -> Option<&TableInfo> {
        self.store.table_info(name)
    }

    pub fn indexes_on(&self, table: &str) -> Vec<&IndexInfo> {
        self.store.indexes_on(table)
    }

    /// Compare full-scan and index timings for a predicate.
    pub fn select_with_performance(&mut self, table: &str, wher: &Pred) -> Result<PerfComparison> {
        self.store.select_with_performance(table, wher)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            execution: self.exec_stats,
            buffer: self.store.buffer_stats(),
        }
    }

    /// Direct access to the storage engine.
    pub fn storage(&mut self) -> &mut StorageEngine {
        &mut self.store
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.store.flush_all() {
            log::warn!("flush on close failed: {}", e);
        }
    }
}
