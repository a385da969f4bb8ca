//! Builds small synthetic pools on disk: a directory file plus heap files,
//! byte-compatible with what the reader expects from a real farm.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Heap files of mapped columns must cover at least one mmap unit.
pub const MMAP_UNIT: usize = 1 << 16;

/// String heaps start with a hash area this many bytes long; offsets of
/// width 1 and 2 are stored relative to its end.
pub const STRING_HEAP_BASE: usize = 8192;

/// Columns are filed under their pool index in octal, with a two-digit
/// subdirectory once the index outgrows one node.
pub fn physical_name(id: usize) -> String {
    if id < 64 {
        format!("{:o}", id)
    } else {
        format!("{:02o}/{:o}", id >> 6, id)
    }
}

// Only used for debugging: `libbbp::GlobalLogger::setup(common::term_logger())`
pub fn term_logger() -> libbbp::slog::Logger {
    use libbbp::slog::Drain;
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    libbbp::slog::Logger::root(
        slog_term::FullFormat::new(plain).use_original_order().build().fuse(),
        libbbp::slog::o!(),
    )
}

pub struct PoolFixture {
    root: PathBuf,
    entries: Vec<String>,
    bbp_size: usize,
}

impl PoolFixture {
    pub fn new<P: AsRef<Path>>(root: P) -> PoolFixture {
        fs::create_dir_all(root.as_ref().join("BACKUP")).unwrap();
        PoolFixture { root: root.as_ref().to_path_buf(), entries: Vec::new(), bbp_size: 64 }
    }

    pub fn root(&self) -> &Path { &self.root }

    fn heap_path(&self, id: usize, ext: &str) -> PathBuf {
        let path = self.root.join(format!("{}.{}", physical_name(id), ext));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        path
    }

    /// A malloc-mode int column; `None` stores the int nil.
    pub fn int_column(&mut self, id: usize, logical: &str, values: &[Option<i32>]) -> &mut Self {
        self.int_column_stored(id, logical, values, 0)
    }

    /// An int column with an explicit storage mode (0 malloc, 1 shared map,
    /// 2 copy-on-write map). Mapped heap files are padded to a full unit.
    pub fn int_column_stored(
        &mut self,
        id: usize,
        logical: &str,
        values: &[Option<i32>],
        storage: u16,
    ) -> &mut Self {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(&v.unwrap_or(i32::MIN).to_ne_bytes());
        }
        let free = bytes.len();
        if storage != 0 {
            bytes.resize(MMAP_UNIT, 0);
        }
        fs::write(self.heap_path(id, "tail"), &bytes).unwrap();
        self.entries.push(format!(
            "{} 1 {} {} 0 {} {} 0 int 4 0 0 0 0 0 0 -1 {} {} {}",
            id,
            logical,
            physical_name(id),
            values.len(),
            values.len(),
            free,
            free,
            storage
        ));
        self
    }

    /// A string column of the given offset width; `None` stores the string
    /// nil.
    pub fn str_column(
        &mut self,
        id: usize,
        logical: &str,
        width: usize,
        values: &[Option<&str>],
    ) -> &mut Self {
        let (offsets, vheap) = build_string_heap(width, values);
        fs::write(self.heap_path(id, "tail"), &offsets).unwrap();
        fs::write(self.heap_path(id, "theap"), &vheap).unwrap();
        self.entries.push(format!(
            "{} 1 {} {} 0 {} {} 0 str {} 1 0 0 0 0 0 -1 {} {} 0 {} {} 0",
            id,
            logical,
            physical_name(id),
            values.len(),
            values.len(),
            width,
            offsets.len(),
            offsets.len(),
            vheap.len(),
            vheap.len()
        ));
        self
    }

    /// A dense (void) column: no heap files at all.
    pub fn dense_column(&mut self, id: usize, logical: &str, base: u64, count: u64) -> &mut Self {
        self.entries.push(format!(
            "{} 1 {} {} 0 {} {} 0 void 0 1 512 0 0 0 0 {} 0 0 0",
            id,
            logical,
            physical_name(id),
            count,
            count,
            base
        ));
        self
    }

    /// An entry line taken verbatim.
    pub fn raw_entry(&mut self, line: &str) -> &mut Self {
        self.entries.push(line.to_owned());
        self
    }

    pub fn write(&self) { self.write_version("061041"); }

    pub fn write_version(&self, version: &str) {
        let mut text = format!(
            "BBP.dir, GDKversion {}\n8 8 8\n0@0 BBPsize={}\n",
            version, self.bbp_size
        );
        for entry in &self.entries {
            text.push_str(entry);
            text.push('\n');
        }
        fs::write(self.root.join("BACKUP").join("BBP.dir"), text).unwrap();
    }
}

/// Lays out a GDK string heap: the leading hash area, then the payloads,
/// 8-byte aligned. Returns (offset array bytes, vheap bytes).
pub fn build_string_heap(width: usize, values: &[Option<&str>]) -> (Vec<u8>, Vec<u8>) {
    let mut vheap = vec![0u8; STRING_HEAP_BASE];
    let mut offsets = Vec::new();
    for value in values {
        let position = vheap.len();
        match value {
            Some(s) => {
                vheap.extend_from_slice(s.as_bytes());
                vheap.push(0);
            }
            None => vheap.extend_from_slice(&[0x80, 0x00]),
        }
        while vheap.len() % 8 != 0 {
            vheap.push(0);
        }
        let stored = match width {
            1 | 2 => (position - STRING_HEAP_BASE) as u64,
            _ => position as u64,
        };
        match width {
            1 => offsets.push(stored as u8),
            2 => offsets.extend_from_slice(&(stored as u16).to_ne_bytes()),
            4 => offsets.extend_from_slice(&(stored as u32).to_ne_bytes()),
            8 => offsets.extend_from_slice(&stored.to_ne_bytes()),
            _ => panic!("unsupported offset width {}", width),
        }
    }
    (offsets, vheap)
}

/// A pool with one int, one string, one dense and one empty column, plus a
/// hole at slot 1.
pub fn build_simple_pool(root: &Path) {
    let mut fixture = PoolFixture::new(root);
    fixture
        .int_column(2, "ints", &[Some(1), Some(2), None])
        .str_column(3, "names", 2, &[Some("aa"), None])
        .dense_column(4, "rowids", 100, 5)
        .int_column(5, "empty", &[]);
    fixture.write();
}

/// Pool indices of the columns `build_catalog_pool` creates.
pub mod catalog_ids {
    pub const CATALOG_NME: usize = 1;
    pub const CATALOG_BID: usize = 2;
    pub const SCHEMAS_ID: usize = 3;
    pub const SCHEMAS_NAME: usize = 4;
    pub const TABLES_ID: usize = 5;
    pub const TABLES_NAME: usize = 6;
    pub const TABLES_SCHEMA_ID: usize = 7;
    pub const TABLES_QUERY: usize = 8;
    pub const COLUMNS_NAME: usize = 9;
    pub const COLUMNS_TABLE_ID: usize = 10;
    /// sys.t.a — parked in an octal subdirectory on purpose.
    pub const T_A: usize = 0o701;
    /// sys.t.b
    pub const T_B: usize = 0o702;
}

/// A pool carrying the minimum SQL catalog plus one user table
/// `sys.t(a int, b str)` with 3 rows, a view, and a `tmp`-schema table.
pub fn build_catalog_pool(root: &Path) {
    use self::catalog_ids::*;

    let sys = 2000i32;
    let tmp = 2114i32;

    let mangled: Vec<Option<&str>> = vec![
        Some("sys_schemas_id"),
        Some("sys_schemas_name"),
        Some("sys__tables_id"),
        Some("sys__tables_name"),
        Some("sys__tables_schema_id"),
        Some("sys__tables_query"),
        Some("sys__columns_name"),
        Some("sys__columns_table_id"),
        Some("sys_t_a"),
        Some("sys_t_b"),
    ];
    let bids: Vec<Option<i32>> = vec![
        Some(SCHEMAS_ID as i32),
        Some(SCHEMAS_NAME as i32),
        Some(TABLES_ID as i32),
        Some(TABLES_NAME as i32),
        Some(TABLES_SCHEMA_ID as i32),
        Some(TABLES_QUERY as i32),
        Some(COLUMNS_NAME as i32),
        Some(COLUMNS_TABLE_ID as i32),
        Some(T_A as i32),
        Some(T_B as i32),
    ];

    let mut fixture = PoolFixture::new(root);
    fixture
        .str_column(CATALOG_NME, "sql_catalog_nme", 2, &mangled)
        .int_column(CATALOG_BID, "sql_catalog_bid", &bids)
        .int_column(SCHEMAS_ID, "tmp_3", &[Some(sys), Some(tmp)])
        .str_column(SCHEMAS_NAME, "tmp_4", 2, &[Some("sys"), Some("tmp")])
        // tables: four persisted in sys, one view, one session-local
        .int_column(
            TABLES_ID,
            "tmp_5",
            &[Some(11), Some(12), Some(13), Some(14), Some(15), Some(16)],
        )
        .str_column(
            TABLES_NAME,
            "tmp_6",
            2,
            &[
                Some("schemas"),
                Some("_tables"),
                Some("_columns"),
                Some("t"),
                Some("v"),
                Some("t2"),
            ],
        )
        .int_column(
            TABLES_SCHEMA_ID,
            "tmp_7",
            &[Some(sys), Some(sys), Some(sys), Some(sys), Some(sys), Some(tmp)],
        )
        .str_column(
            TABLES_QUERY,
            "tmp_10",
            1,
            &[None, None, None, None, Some("select 1"), None],
        )
        .str_column(
            COLUMNS_NAME,
            "tmp_11",
            2,
            &[
                Some("id"),
                Some("name"),
                Some("authorization"),
                Some("id"),
                Some("name"),
                Some("schema_id"),
                Some("query"),
                Some("name"),
                Some("table_id"),
                Some("a"),
                Some("b"),
                Some("x"),
                Some("y"),
            ],
        )
        .int_column(
            COLUMNS_TABLE_ID,
            "tmp_12",
            &[
                Some(11),
                Some(11),
                Some(11),
                Some(12),
                Some(12),
                Some(12),
                Some(12),
                Some(13),
                Some(13),
                Some(14),
                Some(14),
                Some(15),
                Some(16),
            ],
        )
        .int_column(T_A, "tmp_701", &[Some(10), Some(20), Some(30)])
        .str_column(T_B, "tmp_702", 2, &[Some("one"), Some("two"), None]);
    fixture.write();
}
