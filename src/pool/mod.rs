//! The pool container: owns the exclusive lock, the atom registry and every
//! column's descriptor and heaps. Opening a pool validates the path, takes
//! the lock, parses the directory file and materializes all heaps; nothing
//! is loaded lazily afterwards, so a fully constructed pool is safe to read
//! from several threads.

use slog::Logger;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::atoms::AtomRegistry;
use crate::log::GlobalLogger;
use crate::utils;

pub mod catalog;
pub mod column;
pub mod descriptor;
pub mod directory;
pub mod lock;
pub mod names;

pub use self::catalog::SqlNameIndex;
pub use self::column::{Column, ErasedIter, Value, Values};
pub use self::descriptor::{ColumnDescriptor, ColumnProperties};
pub use self::directory::{ColumnRecord, LIBRARY_VERSION};
pub use self::lock::PoolLock;
pub use self::names::SqlName;

/// Subdirectory holding the authoritative copy of the directory file.
pub const BACKUP_DIR: &str = "BACKUP";
/// Name of the directory file itself.
pub const DIRECTORY_FILE_NAME: &str = "BBP.dir";

quick_error! {
    /// Everything that can go wrong opening or reading a pool. Nothing is
    /// retried and nothing is repaired; each of these is fatal to the
    /// operation that hit it.
    #[derive(Debug)]
    pub enum PoolError {
        PoolPathMissing(path: PathBuf) {
            display("non-existent pool path {}", path.display())
        }
        NotADirectory(path: PathBuf) {
            display("not a directory: {}", path.display())
        }
        PoolNotTraversable(path: PathBuf) {
            display("cannot descend into pool directory {}", path.display())
        }
        DirectoryFileMissing(path: PathBuf) {
            display("invalid pool: missing the directory file {}", path.display())
        }
        DirectoryFileUnreadable(path: PathBuf) {
            display("unreadable directory file {}", path.display())
        }
        LockContention(path: PathBuf) {
            display("the pool lock {} is held by another process; a MonetDB server is \
                     probably running on this database - stop it before reading the pool",
                    path.display())
        }
        LockFailed(path: PathBuf, err: io::Error) {
            cause(err)
            display("cannot lock {}: {}", path.display(), err)
        }
        UnsupportedVersion(found: u32, supported: u32) {
            display("incompatible directory file version 0{:o} (newest supported: 0{:o}); \
                     this pool was persisted by too old a MonetDB server", found, supported)
        }
        NewerThanSupported(found: u32, supported: u32) {
            display("directory file version 0{:o} is newer than the newest supported 0{:o}",
                    found, supported)
        }
        PlatformMismatch(what: &'static str, expected: u32, found: u32) {
            display("pool persisted by an incompatible server: expected {} size {}, got {}",
                    what, expected, found)
        }
        PoolRequiresServerMaintenance(reason: String) {
            display("the pool needs an on-disk fix-up this reader will not write ({}); \
                     run a MonetDB server on it first", reason)
        }
        CorruptDirectory(line: usize, details: String) {
            display("malformed directory file at entry {}: {}", line, details)
        }
        BackingFileMissing(path: PathBuf) {
            display("missing backing file {} for a column heap", path.display())
        }
        ReadOnlyPoolNeedsExtension(path: PathBuf, required: usize, actual: u64) {
            display("heap file {} is {} bytes but its heap needs {}; refusing to extend \
                     a read-only pool", path.display(), actual, required)
        }
        HeapIoError(path: PathBuf, err: io::Error) {
            cause(err)
            display("I/O error on heap file {}: {}", path.display(), err)
        }
        HeapMapFailed(path: PathBuf, err: io::Error) {
            cause(err)
            display("cannot map heap file {}: {}", path.display(), err)
        }
        CorruptHeap(details: String) {
            display("corrupt heap contents: {}", details)
        }
        InvalidUtf8(index: usize, pos: u64) {
            display("column {} holds a non-UTF-8 string at element {}", index, pos)
        }
        InconsistentCatalog(details: String) {
            display("inconsistent SQL catalog: {}", details)
        }
        NoSuchColumn(index: usize, size: usize) {
            display("no column at pool index {} (pool size is {})", index, size)
        }
        SqlIndexNotBuilt {
            display("the SQL name index has not been built for this pool")
        }
        TypedSpanMismatch(details: String) {
            display("typed view does not fit the column: {}", details)
        }
        Io(err: io::Error) {
            cause(err)
            from()
            display("I/O error: {}", err)
        }
    }
}

/// Type alias to `Result<T, PoolError>`.
pub type PoolResult<T> = Result<T, PoolError>;

/// Fieldless mirror of [`PoolError`] for matching on error classes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PoolErrorKind {
    PoolPathMissing,
    NotADirectory,
    PoolNotTraversable,
    DirectoryFileMissing,
    DirectoryFileUnreadable,
    LockContention,
    LockFailed,
    UnsupportedVersion,
    NewerThanSupported,
    PlatformMismatch,
    PoolRequiresServerMaintenance,
    CorruptDirectory,
    BackingFileMissing,
    ReadOnlyPoolNeedsExtension,
    HeapIoError,
    HeapMapFailed,
    CorruptHeap,
    InvalidUtf8,
    InconsistentCatalog,
    NoSuchColumn,
    SqlIndexNotBuilt,
    TypedSpanMismatch,
    Io,
}

impl PoolError {
    pub fn kind(&self) -> PoolErrorKind {
        match self {
            PoolError::PoolPathMissing(_) => PoolErrorKind::PoolPathMissing,
            PoolError::NotADirectory(_) => PoolErrorKind::NotADirectory,
            PoolError::PoolNotTraversable(_) => PoolErrorKind::PoolNotTraversable,
            PoolError::DirectoryFileMissing(_) => PoolErrorKind::DirectoryFileMissing,
            PoolError::DirectoryFileUnreadable(_) => PoolErrorKind::DirectoryFileUnreadable,
            PoolError::LockContention(_) => PoolErrorKind::LockContention,
            PoolError::LockFailed(_, _) => PoolErrorKind::LockFailed,
            PoolError::UnsupportedVersion(_, _) => PoolErrorKind::UnsupportedVersion,
            PoolError::NewerThanSupported(_, _) => PoolErrorKind::NewerThanSupported,
            PoolError::PlatformMismatch(_, _, _) => PoolErrorKind::PlatformMismatch,
            PoolError::PoolRequiresServerMaintenance(_) => {
                PoolErrorKind::PoolRequiresServerMaintenance
            }
            PoolError::CorruptDirectory(_, _) => PoolErrorKind::CorruptDirectory,
            PoolError::BackingFileMissing(_) => PoolErrorKind::BackingFileMissing,
            PoolError::ReadOnlyPoolNeedsExtension(_, _, _) => {
                PoolErrorKind::ReadOnlyPoolNeedsExtension
            }
            PoolError::HeapIoError(_, _) => PoolErrorKind::HeapIoError,
            PoolError::HeapMapFailed(_, _) => PoolErrorKind::HeapMapFailed,
            PoolError::CorruptHeap(_) => PoolErrorKind::CorruptHeap,
            PoolError::InvalidUtf8(_, _) => PoolErrorKind::InvalidUtf8,
            PoolError::InconsistentCatalog(_) => PoolErrorKind::InconsistentCatalog,
            PoolError::NoSuchColumn(_, _) => PoolErrorKind::NoSuchColumn,
            PoolError::SqlIndexNotBuilt => PoolErrorKind::SqlIndexNotBuilt,
            PoolError::TypedSpanMismatch(_) => PoolErrorKind::TypedSpanMismatch,
            PoolError::Io(_) => PoolErrorKind::Io,
        }
    }
}

impl PartialEq for PoolError {
    fn eq(&self, other: &Self) -> bool { self.kind() == other.kind() }
}

/// Knobs of the open operation.
#[derive(Builder, Debug, Clone, Getters)]
#[builder(setter(into))]
#[get = "pub"]
pub struct OpenOptions {
    /// Whether to resolve SQL names from the pool's catalog while opening.
    #[builder(default = "true")]
    sql_name_index: bool,
}

impl Default for OpenOptions {
    fn default() -> OpenOptions { OpenOptions { sql_name_index: true } }
}

/// A read-only view of one MonetDB database farm directory.
#[derive(Debug)]
pub struct Pool {
    path: PathBuf,
    version: u32,
    oid_seed: u64,
    atoms: AtomRegistry,
    entries: Vec<Option<ColumnRecord>>,
    sql_names: Option<SqlNameIndex>,
    logger: Logger,
    // the lock drops after the heaps above it
    _lock: PoolLock,
}

impl Pool {
    /// Opens the pool at `path`, including its SQL name index.
    pub fn open<P: AsRef<Path>>(path: P) -> PoolResult<Pool> {
        Pool::open_with(path, &OpenOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: &OpenOptions) -> PoolResult<Pool> {
        let path = path.as_ref().to_path_buf();
        let logger =
            GlobalLogger::component("pool").new(o!("pool" => path.display().to_string()));

        Pool::verify_pool_path(&path)?;
        let lock = PoolLock::acquire(&path)?;
        debug!(logger, "pool lock acquired"; "lock" => lock.path().display().to_string());

        let directory_file = path.join(BACKUP_DIR).join(DIRECTORY_FILE_NAME);
        let text = fs::read_to_string(&directory_file).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                PoolError::CorruptDirectory(0, "directory file is not valid UTF-8".to_owned())
            } else {
                PoolError::Io(e)
            }
        })?;

        let mut atoms = AtomRegistry::new();
        let parsed = directory::parse(&text, &mut atoms, &logger)?;
        drop(text);

        let mut pool = Pool {
            path,
            version: parsed.version,
            oid_seed: parsed.oid_seed,
            atoms,
            entries: parsed.entries,
            sql_names: None,
            logger,
            _lock: lock,
        };
        pool.load_heaps()?;
        if *options.sql_name_index() {
            pool.build_sql_index()?;
        }
        debug!(pool.logger, "pool open";
               "slots" => pool.size(),
               "version" => format!("0{:o}", pool.version()));
        Ok(pool)
    }

    fn verify_pool_path(path: &Path) -> PoolResult<()> {
        if !path.exists() {
            return Err(PoolError::PoolPathMissing(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(PoolError::NotADirectory(path.to_path_buf()));
        }
        if !utils::is_traversable_directory(path) {
            return Err(PoolError::PoolNotTraversable(path.to_path_buf()));
        }
        let directory_file = path.join(BACKUP_DIR).join(DIRECTORY_FILE_NAME);
        if !directory_file.exists() {
            return Err(PoolError::DirectoryFileMissing(directory_file));
        }
        if !utils::is_readable(&directory_file) {
            return Err(PoolError::DirectoryFileUnreadable(directory_file));
        }
        Ok(())
    }

    /// Materializes every heap of every column, in slot order. Dense columns
    /// have nothing to load.
    fn load_heaps(&mut self) -> PoolResult<()> {
        let pool_dir = self.path.clone();
        let logger = self.logger.clone();
        for slot in self.entries.iter_mut() {
            if let Some(record) = slot {
                let descriptor = &mut record.descriptor;
                if let Some(heap) = descriptor.main_heap_mut() {
                    heap.load(&pool_dir, &logger)?;
                }
                if let Some(vheap) = descriptor.vheap_mut() {
                    vheap.load(&pool_dir, &logger)?;
                }
                descriptor.refresh_capacity();
            }
        }
        Ok(())
    }

    /// Total number of slots, including slot 0 and invalid ones.
    pub fn size(&self) -> usize { self.entries.len() }

    /// Format version the directory file was written with.
    pub fn version(&self) -> u32 { self.version }

    /// Newest format version this library reads.
    pub fn library_version() -> u32 { LIBRARY_VERSION }

    /// First object id the server would hand out next.
    pub fn oid_seed(&self) -> u64 { self.oid_seed }

    pub fn path(&self) -> &Path { &self.path }

    pub(crate) fn atoms(&self) -> &AtomRegistry { &self.atoms }

    pub(crate) fn record(&self, index: usize) -> Option<&ColumnRecord> {
        self.entries.get(index).and_then(|slot| slot.as_ref())
    }

    pub(crate) fn sql_name_of(&self, index: usize) -> Option<&SqlName> {
        self.sql_names.as_ref().and_then(|names| names.name_of(index))
    }

    /// A proxy for the slot at `index`. Indices at or beyond
    /// [`size`](#method.size) have no slot at all; the reserved slot 0 and
    /// holes yield proxies whose `is_valid` is false.
    pub fn at(&self, index: usize) -> PoolResult<Column> {
        if index >= self.size() {
            return Err(PoolError::NoSuchColumn(index, self.size()));
        }
        Ok(Column::new(self, index))
    }

    /// Iterates slots `1..size()`, invalid ones included; callers filter on
    /// [`Column::is_valid`].
    pub fn columns(&self) -> Columns { Columns { pool: self, index: 1 } }

    /// Linear scan for the first valid column with this physical name.
    pub fn find_by_physical_name(&self, name: &str) -> Option<usize> {
        self.columns()
            .find(|c| c.is_valid() && c.physical_name() == Some(name))
            .map(|c| c.index())
    }

    /// Linear scan for the first valid column with this logical name.
    pub fn find_by_logical_name(&self, name: &str) -> Option<usize> {
        self.columns()
            .find(|c| c.is_valid() && c.logical_name() == Some(name))
            .map(|c| c.index())
    }

    /// Hash lookup by schema.table.column. Requires the SQL index.
    pub fn find_by_sql_name(&self, name: &SqlName) -> PoolResult<Option<usize>> {
        match &self.sql_names {
            Some(index) => Ok(index.lookup(name)),
            None => Err(PoolError::SqlIndexNotBuilt),
        }
    }

    /// Builds the SQL name index from the pool's own catalog columns. A
    /// second build is a no-op.
    pub fn build_sql_index(&mut self) -> PoolResult<()> {
        if self.sql_names.is_some() {
            return Ok(());
        }
        let logger = self.logger.clone();
        let index = SqlNameIndex::build(self, &logger)?;
        debug!(self.logger, "SQL name index built"; "named_columns" => index.len());
        self.sql_names = Some(index);
        Ok(())
    }

    pub fn has_sql_index(&self) -> bool { self.sql_names.is_some() }
}

/// Iterator over a pool's slots.
pub struct Columns<'p> {
    pool: &'p Pool,
    index: usize,
}

impl<'p> Iterator for Columns<'p> {
    type Item = Column<'p>;

    fn next(&mut self) -> Option<Column<'p>> {
        if self.index >= self.pool.size() {
            return None;
        }
        let column = Column::new(self.pool, self.index);
        self.index += 1;
        Some(column)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.pool.size().saturating_sub(self.index);
        (left, Some(left))
    }
}

impl<'p> ExactSizeIterator for Columns<'p> {}
