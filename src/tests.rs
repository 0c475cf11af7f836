use crate::*;

fn db() -> Database {
    Database::open(Config::memory()).unwrap()
}

fn run(db: &mut Database, sql: &str) -> Vec<Record> {
    let out = db.process(sql);
    assert!(out.success, "query failed: {} -> {:?}", sql, out.error);
    out.rows
}

fn fail(db: &mut Database, sql: &str) -> String {
    let out = db.process(sql);
    assert!(!out.success, "query unexpectedly succeeded: {}", sql);
    out.error.unwrap()
}

fn seed_users(db: &mut Database) {
    run(
        db,
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(50), age INTEGER);",
    );
    run(db, "INSERT INTO users VALUES (1, 'Alice', 25);");
    run(db, "INSERT INTO users VALUES (2, 'Bob', 30);");
}

fn seed_courses(db: &mut Database) {
    run(
        db,
        "CREATE TABLE courses (course_id INTEGER PRIMARY KEY, student_id INTEGER, \
         course_name VARCHAR(50), score FLOAT);",
    );
    run(db, "INSERT INTO courses VALUES (10, 1, 'Math', 90.0);");
    run(db, "INSERT INTO courses VALUES (11, 1, 'History', 70.0);");
    run(db, "INSERT INTO courses VALUES (12, 2, 'Math', 85.0);");
    run(db, "INSERT INTO courses VALUES (13, 9, 'Physics', 99.0);");
}

#[test]
fn select_with_where_projects_matching_rows() {
    let mut db = db();
    seed_users(&mut db);
    let rows = run(&mut db, "SELECT name FROM users WHERE age > 25;");
    assert_eq!(rows, vec![Record::from(vec![("name", Value::Str("Bob".into()))])]);
}

#[test]
fn primary_key_violation_leaves_table_unchanged() {
    let mut db = db();
    seed_users(&mut db);
    let err = fail(&mut db, "INSERT INTO users VALUES (1, 'Carol', 22);");
    assert!(err.contains("primary key"), "{}", err);
    let rows = run(&mut db, "SELECT * FROM users;");
    assert_eq!(rows.len(), 2);
    let ids: Vec<i64> = rows
        .iter()
        .map(|r| r.get("id").unwrap().int().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn index_and_scan_return_the_same_rows() {
    let mut db = db();
    seed_users(&mut db);
    run(&mut db, "CREATE INDEX idx_age ON users (age);");
    let rows = run(&mut db, "SELECT * FROM users WHERE age = 30;");
    assert_eq!(
        rows,
        vec![Record::from(vec![
            ("id", Value::Int(2)),
            ("name", Value::Str("Bob".into())),
            ("age", Value::Int(30)),
        ])]
    );
    // Storage-level equality of the two access paths.
    let pred = Pred::cmp("age", CmpOp::Eq, Value::Int(30));
    let scan = db.storage().select("users", Some(&pred), false).unwrap();
    let indexed = db.storage().select("users", Some(&pred), true).unwrap();
    assert_eq!(scan, indexed);
}

#[test]
fn count_star_plain_and_aliased() {
    let mut db = db();
    seed_users(&mut db);
    let rows = run(&mut db, "SELECT COUNT(*) FROM users;");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("COUNT(*)"), Some(&Value::Int(2)));

    let rows = run(&mut db, "SELECT COUNT(*) AS c FROM users;");
    assert_eq!(rows, vec![Record::from(vec![("c", Value::Int(2))])]);
}

#[test]
fn inner_join_with_predicate() {
    let mut db = db();
    seed_users(&mut db);
    seed_courses(&mut db);
    let rows = run(
        &mut db,
        "SELECT u.name, c.course_name FROM users u \
         INNER JOIN courses c ON u.id = c.student_id \
         WHERE c.score >= 85;",
    );
    let mut pairs: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r.get("u.name").unwrap().to_string(),
                r.get("c.course_name").unwrap().to_string(),
            )
        })
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("Alice".to_string(), "Math".to_string()),
            ("Bob".to_string(), "Math".to_string()),
        ]
    );
}

#[test]
fn left_join_pads_unmatched_rows_with_nulls() {
    let mut db = db();
    seed_users(&mut db);
    run(&mut db, "INSERT INTO users VALUES (3, 'Carol', 21);");
    seed_courses(&mut db);
    let rows = run(
        &mut db,
        "SELECT u.name, c.course_name FROM users u \
         LEFT JOIN courses c ON u.id = c.student_id;",
    );
    let carol: Vec<&Record> = rows
        .iter()
        .filter(|r| r.get("u.name") == Some(&Value::Str("Carol".into())))
        .collect();
    assert_eq!(carol.len(), 1);
    assert_eq!(carol[0].get("c.course_name"), Some(&Value::Null));
}

#[test]
fn update_with_arithmetic_persists_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::open(Config::at(dir.path())).unwrap();
        seed_users(&mut db);
        let rows = run(&mut db, "UPDATE users SET age = age + 1 WHERE name = 'Alice';");
        assert_eq!(
            rows[0].get("message"),
            Some(&Value::Str("1 record(s) updated successfully".into()))
        );
        let rows = run(&mut db, "SELECT age FROM users WHERE name = 'Alice';");
        assert_eq!(rows, vec![Record::from(vec![("age", Value::Int(26))])]);
        // Dropping the database flushes dirty pages and the catalog.
    }
    let mut db = Database::open(Config::at(dir.path())).unwrap();
    let rows = run(&mut db, "SELECT age FROM users WHERE name = 'Alice';");
    assert_eq!(rows, vec![Record::from(vec![("age", Value::Int(26))])]);
    assert_eq!(db.list_tables(), vec!["users".to_string()]);
}

#[test]
fn indexes_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::open(Config::at(dir.path())).unwrap();
        seed_users(&mut db);
        run(&mut db, "CREATE INDEX idx_age ON users (age);");
    }
    let mut db = Database::open(Config::at(dir.path())).unwrap();
    let ix = db.indexes_on("users");
    assert_eq!(ix.len(), 1);
    assert_eq!(ix[0].columns, vec!["age".to_string()]);
    let pred = Pred::cmp("age", CmpOp::Eq, Value::Int(25));
    let rows = db.storage().select("users", Some(&pred), true).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&Value::Str("Alice".into())));
}

#[test]
fn group_by_having_and_order() {
    let mut db = db();
    seed_users(&mut db);
    seed_courses(&mut db);
    let rows = run(
        &mut db,
        "SELECT student_id, COUNT(*) AS n FROM courses \
         GROUP BY student_id HAVING COUNT(*) > 1;",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("student_id"), Some(&Value::Int(1)));
    assert_eq!(rows[0].get("n"), Some(&Value::Int(2)));

    let rows = run(
        &mut db,
        "SELECT course_name, score FROM courses ORDER BY score DESC;",
    );
    let scores: Vec<f64> = rows
        .iter()
        .map(|r| r.get("score").unwrap().float().unwrap())
        .collect();
    assert_eq!(scores, vec![99.0, 90.0, 85.0, 70.0]);
}

#[test]
fn aggregates_over_filtered_rows() {
    let mut db = db();
    seed_users(&mut db);
    run(&mut db, "INSERT INTO users VALUES (3, 'Carol', 35);");
    let rows = run(&mut db, "SELECT COUNT(*) AS n FROM users WHERE age > 25;");
    assert_eq!(rows[0].get("n"), Some(&Value::Int(2)));
    let rows = run(&mut db, "SELECT AVG(age) AS a FROM users WHERE age > 25;");
    assert_eq!(rows[0].get("a"), Some(&Value::Float(32.5)));
    let rows = run(&mut db, "SELECT MIN(age) AS lo FROM users;");
    assert_eq!(rows[0].get("lo"), Some(&Value::Int(25)));
    let rows = run(&mut db, "SELECT SUM(age) AS s FROM users;");
    assert_eq!(rows[0].get("s"), Some(&Value::Int(90)));
}

#[test]
fn limit_offset_after_order() {
    let mut db = db();
    seed_users(&mut db);
    run(&mut db, "INSERT INTO users VALUES (3, 'Carol', 35);");
    run(&mut db, "INSERT INTO users VALUES (4, 'Dave', 40);");
    let rows = run(
        &mut db,
        "SELECT name FROM users ORDER BY age DESC LIMIT 2 OFFSET 1;",
    );
    assert_eq!(
        rows,
        vec![
            Record::from(vec![("name", Value::Str("Carol".into()))]),
            Record::from(vec![("name", Value::Str("Bob".into()))]),
        ]
    );
}

#[test]
fn delete_then_select() {
    let mut db = db();
    seed_users(&mut db);
    let rows = run(&mut db, "DELETE FROM users WHERE age < 30;");
    assert_eq!(
        rows[0].get("message"),
        Some(&Value::Str("1 record(s) deleted successfully".into()))
    );
    let rows = run(&mut db, "SELECT name FROM users;");
    assert_eq!(rows, vec![Record::from(vec![("name", Value::Str("Bob".into()))])]);
}

#[test]
fn errors_surface_without_side_effects() {
    let mut db = db();
    seed_users(&mut db);
    assert!(fail(&mut db, "SELECT name FROM missing;").contains("does not exist"));
    assert!(fail(&mut db, "SELECT wrong FROM users;").contains("wrong"));
    assert!(fail(&mut db, "SELEC name FROM users;").contains("statement keyword"));
    assert!(fail(&mut db, "SELECT 'broken FROM users;").contains("closing quote"));
    assert!(fail(&mut db, "INSERT INTO users VALUES (5);").contains("expected 3 values"));
    // Nothing was written along the way.
    assert_eq!(run(&mut db, "SELECT COUNT(*) AS n FROM users;")[0].get("n"), Some(&Value::Int(2)));
}

#[test]
fn optimizer_preserves_results() {
    let queries = [
        "SELECT name FROM users WHERE age > 24;",
        "SELECT * FROM users WHERE 1 = 1;",
        "SELECT name, age FROM users ORDER BY age DESC LIMIT 2;",
        "SELECT COUNT(*) AS n FROM users WHERE age > 20;",
        "SELECT u.name, c.course_name FROM users u \
         INNER JOIN courses c ON u.id = c.student_id WHERE c.score >= 85;",
    ];
    let mut plain_cfg = Config::memory();
    plain_cfg.optimizer.enabled = false;
    let mut with_opt = db();
    let mut without_opt = Database::open(plain_cfg).unwrap();
    for d in [&mut with_opt, &mut without_opt] {
        seed_users(d);
        seed_courses(d);
        run(d, "CREATE INDEX idx_age ON users (age);");
    }
    for q in queries {
        let a = run(&mut with_opt, q);
        let b = run(&mut without_opt, q);
        assert_eq!(a, b, "optimizer changed the result of {}", q);
    }
}

#[test]
fn replacement_policies_agree_under_pressure() {
    for policy in [
        ReplacementPolicy::Lru,
        ReplacementPolicy::Fifo,
        ReplacementPolicy::Clock,
    ] {
        let mut config = Config::memory();
        config.pool_frames = 2;
        config.policy = policy;
        let mut db = Database::open(config).unwrap();
        run(
            &mut db,
            "CREATE TABLE blobs (id INTEGER PRIMARY KEY, body VARCHAR(2000));",
        );
        for i in 0..20 {
            run(
                &mut db,
                &format!("INSERT INTO blobs VALUES ({}, '{}');", i, "x".repeat(1500)),
            );
        }
        let rows = run(&mut db, "SELECT COUNT(*) AS n FROM blobs;");
        assert_eq!(rows[0].get("n"), Some(&Value::Int(20)), "{:?}", policy);
        let stats = db.stats().buffer;
        assert!(stats.evictions > 0, "{:?} never evicted", policy);
        assert_eq!(db.storage().pinned_frames(), 0);
    }
}

#[test]
fn flush_leaves_pool_clean() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::open(Config::at(dir.path())).unwrap();
    seed_users(&mut db);
    db.flush_all().unwrap();
    assert!(db.storage().pool_clean());
    assert_eq!(db.stats().buffer.dirty_count, 0);
}

#[test]
fn details_report_pipeline_counts() {
    let mut db = db();
    seed_users(&mut db);
    let d = db.process_with_details("SELECT name FROM users WHERE age > 25;");
    assert!(d.success);
    assert!(d.token_count >= 8);
    assert!(d.quad_count >= 6);
    assert!(d.instruction_count >= 7);
    assert!(!d.complex);
    assert!(d.optimizer.is_some());

    let d = db.process_with_details("SELECT name FROM users ORDER BY age LIMIT 1;");
    assert!(d.complex);

    let d = db.process_with_details("INSERT INTO users VALUES (7, 'Grace', 41);");
    assert!(d.success);
    assert_eq!(d.quad_count, 1);
    assert_eq!(d.instruction_count, 0);
}

#[test]
fn keywords_are_case_insensitive_and_identifiers_are_not() {
    let mut db = db();
    run(
        &mut db,
        "create table Mixed (Id integer primary key, Name varchar(10));",
    );
    run(&mut db, "insert into Mixed values (1, 'x');");
    let rows = run(&mut db, "select Name from Mixed where Id = 1;");
    assert_eq!(rows[0].get("Name"), Some(&Value::Str("x".into())));
    // Identifier case matters against the catalog.
    assert!(fail(&mut db, "SELECT name FROM Mixed;").contains("name"));
}

#[test]
fn alter_table_add_column_with_default() {
    let mut db = db();
    seed_users(&mut db);
    run(
        &mut db,
        "ALTER TABLE users ADD COLUMN status VARCHAR(10) DEFAULT 'active';",
    );
    let rows = run(&mut db, "SELECT status FROM users;");
    assert_eq!(rows.len(), 2);
    for r in rows {
        assert_eq!(r.get("status"), Some(&Value::Str("active".into())));
    }
    // Later inserts without the column pick up the default too.
    run(&mut db, "INSERT INTO users (id, name, age) VALUES (5, 'Eve', 28);");
    let rows = run(&mut db, "SELECT status FROM users WHERE id = 5;");
    assert_eq!(rows[0].get("status"), Some(&Value::Str("active".into())));
}

#[test]
fn select_with_performance_matches_paths() {
    let mut db = db();
    seed_users(&mut db);
    run(&mut db, "CREATE INDEX idx_age ON users (age);");
    let pred = Pred::cmp("age", CmpOp::Eq, Value::Int(30));
    let perf = db.select_with_performance("users", &pred).unwrap();
    assert_eq!(perf.scan_rows, perf.index_rows);
    assert_eq!(perf.scan_rows.len(), 1);
}

#[test]
fn where_and_or_combinations() {
    let mut db = db();
    seed_users(&mut db);
    run(&mut db, "INSERT INTO users VALUES (3, 'Carol', 35);");
    let rows = run(
        &mut db,
        "SELECT name FROM users WHERE age > 20 AND age < 31;",
    );
    assert_eq!(rows.len(), 2);
    let rows = run(
        &mut db,
        "SELECT name FROM users WHERE name = 'Alice' OR age = 35;",
    );
    assert_eq!(rows.len(), 2);
    let rows = run(&mut db, "SELECT name FROM users WHERE NOT age = 25;");
    assert_eq!(rows.len(), 2);
}

#[test]
fn multi_row_insert() {
    let mut db = db();
    run(
        &mut db,
        "CREATE TABLE pts (id INTEGER PRIMARY KEY, v FLOAT);",
    );
    let rows = run(&mut db, "INSERT INTO pts VALUES (1, 1.5), (2, 2.5), (3, 3.5);");
    assert_eq!(
        rows[0].get("message"),
        Some(&Value::Str("3 record(s) inserted successfully".into()))
    );
    let rows = run(&mut db, "SELECT COUNT(*) AS n FROM pts;");
    assert_eq!(rows[0].get("n"), Some(&Value::Int(3)));
}

#[test]
fn drop_table_removes_state() {
    let mut db = db();
    seed_users(&mut db);
    run(&mut db, "CREATE INDEX idx_age ON users (age);");
    run(&mut db, "DROP TABLE users;");
    assert!(db.list_tables().is_empty());
    assert!(fail(&mut db, "SELECT * FROM users;").contains("does not exist"));
}
