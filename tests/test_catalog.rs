mod common;

use std::process::Command;

use libbbp::atoms::AtomKind;
use libbbp::{Pool, PoolErrorKind, SqlName, Value};
use tempdir::TempDir;

use crate::common::{catalog_ids, PoolFixture};

#[test]
fn catalog_pool_resolves_the_user_table() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    common::build_catalog_pool(tmp.path());
    let pool = Pool::open(tmp.path()).unwrap();

    assert!(pool.size() >= 6);
    assert!(pool.has_sql_index());

    let a = pool.find_by_sql_name(&SqlName::new("sys", "t", "a")).unwrap().unwrap();
    assert_eq!(a, catalog_ids::T_A);
    let a = pool.at(a).unwrap();
    assert_eq!(a.length(), 3);
    assert_eq!(a.kind(), Some(AtomKind::Int));
    assert_eq!(a.width(), 4);
    assert_eq!(a.physical_name(), Some("07/701"));
    let values: Vec<_> = a.values().map(|v| v.unwrap()).collect();
    assert_eq!(values, vec![Value::Int(10), Value::Int(20), Value::Int(30)]);

    // an unspecified schema means sys
    let by_default_schema =
        pool.find_by_sql_name(&SqlName::new("", "t", "a")).unwrap().unwrap();
    assert_eq!(by_default_schema, catalog_ids::T_A);
}

#[test]
fn string_column_of_the_user_table() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    common::build_catalog_pool(tmp.path());
    let pool = Pool::open(tmp.path()).unwrap();

    let b = pool.find_by_sql_name(&SqlName::new("sys", "t", "b")).unwrap().unwrap();
    assert_eq!(b, catalog_ids::T_B);
    let b = pool.at(b).unwrap();
    assert_eq!(b.kind(), Some(AtomKind::Str));
    assert!(matches!(b.width(), 1 | 2 | 4 | 8));

    let values: Vec<_> = b.values().map(|v| v.unwrap()).collect();
    assert_eq!(values, vec![Value::Str("one"), Value::Str("two"), Value::Nil]);
}

#[test]
fn sql_names_round_trip() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    common::build_catalog_pool(tmp.path());
    let pool = Pool::open(tmp.path()).unwrap();

    let mut named = 0usize;
    for column in pool.columns() {
        if let Some(name) = column.is_valid().then(|| column.sql_name()).flatten() {
            named += 1;
            assert_eq!(pool.find_by_sql_name(name).unwrap(), Some(column.index()));
        }
    }
    // the system tables' own columns plus t.a and t.b
    assert_eq!(named, 10);

    // views and session-local tables were discarded
    assert_eq!(pool.find_by_sql_name(&SqlName::new("sys", "v", "x")).unwrap(), None);
    assert_eq!(pool.find_by_sql_name(&SqlName::new("tmp", "t2", "y")).unwrap(), None);
}

#[test]
fn index_build_is_idempotent() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    common::build_catalog_pool(tmp.path());
    let mut pool = Pool::open(tmp.path()).unwrap();

    let before: Vec<_> = pool
        .columns()
        .filter_map(|c| c.sql_name().map(|n| (c.index(), n.clone())))
        .collect();
    pool.build_sql_index().unwrap();
    let after: Vec<_> = pool
        .columns()
        .filter_map(|c| c.sql_name().map(|n| (c.index(), n.clone())))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn mismatched_catalog_columns_are_rejected() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    let mut fixture = PoolFixture::new(tmp.path());
    fixture
        .str_column(1, "sql_catalog_nme", 2, &[Some("sys_t_a"), Some("sys_t_b")])
        .int_column(2, "sql_catalog_bid", &[Some(3)])
        .int_column(3, "tmp_3", &[Some(1)]);
    fixture.write();

    let err = Pool::open(tmp.path()).unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::InconsistentCatalog);
    let message = err.to_string();
    assert!(message.contains("sql_catalog_nme"), "message was: {}", message);
    assert!(message.contains("sql_catalog_bid"), "message was: {}", message);

    // the same pool is browsable with the SQL index turned off
    let options =
        libbbp::OpenOptionsBuilder::default().sql_name_index(false).build().unwrap();
    let pool = Pool::open_with(tmp.path(), &options).unwrap();
    assert_eq!(pool.size(), 4);
}

#[test]
fn ambiguous_mangled_names_are_rejected() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    let mut fixture = PoolFixture::new(tmp.path());
    // two non-empty columns behind one mangled name: unresolvable
    fixture
        .str_column(1, "sql_catalog_nme", 2, &[Some("sys_t_a"), Some("sys_t_a")])
        .int_column(2, "sql_catalog_bid", &[Some(3), Some(4)])
        .int_column(3, "tmp_3", &[Some(1)])
        .int_column(4, "tmp_4", &[Some(2)]);
    fixture.write();

    let err = Pool::open(tmp.path()).unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::InconsistentCatalog);
}

#[test]
fn empty_duplicate_of_a_non_empty_column_is_rejected() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    let mut fixture = PoolFixture::new(tmp.path());
    // reversed order: the non-empty column is mapped first, then a row-less
    // one arrives under the same mangled name; nothing may give way here
    fixture
        .str_column(1, "sql_catalog_nme", 2, &[Some("sys_t_a"), Some("sys_t_a")])
        .int_column(2, "sql_catalog_bid", &[Some(3), Some(4)])
        .int_column(3, "tmp_3", &[Some(1)])
        .int_column(4, "tmp_4", &[]);
    fixture.write();

    let err = Pool::open(tmp.path()).unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::InconsistentCatalog);
    let message = err.to_string();
    assert!(message.contains("sys_t_a"), "message was: {}", message);
}

#[test]
fn empty_side_of_a_duplicate_gives_way() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    let mut fixture = PoolFixture::new(tmp.path());
    // same mangled name twice, but one side has no rows: the non-empty wins
    // and the build proceeds to fail only on the missing system tables
    fixture
        .str_column(1, "sql_catalog_nme", 2, &[Some("sys_t_a"), Some("sys_t_a")])
        .int_column(2, "sql_catalog_bid", &[Some(3), Some(4)])
        .int_column(3, "tmp_3", &[])
        .int_column(4, "tmp_4", &[Some(2)]);
    fixture.write();

    let err = Pool::open(tmp.path()).unwrap_err();
    assert_eq!(err.kind(), PoolErrorKind::InconsistentCatalog);
    let message = err.to_string();
    assert!(message.contains("sys.schemas.id"), "message was: {}", message);
}

#[test]
fn cli_lists_and_dumps() {
    let tmp = TempDir::new("bbp-catalog").unwrap();
    common::build_catalog_pool(tmp.path());

    let output =
        Command::new(env!("CARGO_BIN_EXE_bbp-reader")).arg(tmp.path()).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sys.t.a"), "stdout was: {}", stdout);
    assert!(stdout.contains("sql_catalog_nme"), "stdout was: {}", stdout);

    let output = Command::new(env!("CARGO_BIN_EXE_bbp-reader"))
        .arg(tmp.path())
        .args(&["--column", "t.b", "--dump"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sys.t.b"), "stdout was: {}", stdout);
    assert!(stdout.contains("one"), "stdout was: {}", stdout);
    assert!(stdout.contains("nil"), "stdout was: {}", stdout);

    let output = Command::new(env!("CARGO_BIN_EXE_bbp-reader"))
        .arg(tmp.path())
        .args(&["--physical", "07/701", "--dump"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("20"), "stdout was: {}", stdout);

    let output = Command::new(env!("CARGO_BIN_EXE_bbp-reader"))
        .arg(tmp.path())
        .args(&["--column", "sys.absent.column"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
