//! A heap is one contiguous byte range of column storage, backed by a file
//! in the pool directory. The directory file records how the server last
//! persisted it, and we materialize it the same way: a private in-memory
//! copy, a shared read-only mapping, or a private copy-on-write mapping.
//! Nothing here ever opens a file with write intent.

use memmap::{Mmap, MmapMut, MmapOptions};
use slog::Logger;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::pool::{PoolError, PoolResult};
use crate::utils;

/// Mapping granularity of the persisting server; mapped heap sizes are
/// multiples of this, with a minimum of one unit.
pub const MMAP_PAGESIZE: usize = 1 << 16;

/// Storage modes as recorded in the directory file. Values above
/// [`PrivateMap`](#variant.PrivateMap) only exist in newer format versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
#[repr(u16)]
pub enum StorageMode {
    #[strum(serialize = "malloced memory")]
    Memory = 0,
    #[strum(serialize = "shared mmap")]
    SharedMap = 1,
    #[strum(serialize = "copy-on-write mmap")]
    PrivateMap = 2,
    #[strum(serialize = "non-GDK malloced memory")]
    ForeignMemory = 3,
    #[strum(serialize = "unowned memory")]
    Unowned = 4,
    #[strum(serialize = "absolute-path mmap")]
    AbsolutePathMap = 5,
}

impl StorageMode {
    /// Decodes the mode field of a heap spec. Modes 3..=5 appeared in
    /// format 061035; older directories may not carry them.
    pub fn from_directory(raw: u16, version: u32) -> Option<StorageMode> {
        let mode = StorageMode::from_repr(raw)?;
        if mode as u16 > StorageMode::PrivateMap as u16 && version < 0o61035 {
            return None;
        }
        Some(mode)
    }

    /// Everything that is not a plain in-memory load goes through mmap.
    pub fn is_mapped(self) -> bool { self != StorageMode::Memory }
}

#[derive(Debug)]
enum HeapData {
    Unloaded,
    Memory(Vec<u8>),
    Shared(Mmap),
    Private(MmapMut),
}

/// One on-disk heap and, once loaded, its in-memory image.
#[derive(Debug)]
pub struct Heap {
    /// Bytes in use (the directory file's `free` field).
    free: usize,
    /// Allocated bytes; for mapped heaps this is rounded up to
    /// [`MMAP_PAGESIZE`] at load time.
    size: usize,
    storage: StorageMode,
    /// Pool-relative backing file name, e.g. `07/701.tail`.
    filename: String,
    /// Pool index of the column owning this heap, for auxiliary heaps.
    parent: Option<usize>,
    data: HeapData,
}

impl Heap {
    pub fn new(
        free: usize,
        size: usize,
        storage: StorageMode,
        filename: String,
        parent: Option<usize>,
    ) -> Heap {
        Heap { free, size, storage, filename, parent, data: HeapData::Unloaded }
    }

    /// Logical size: bytes in use.
    pub fn free(&self) -> usize { self.free }

    /// Allocated (or mapped) size in bytes.
    pub fn size(&self) -> usize { self.size }

    pub fn storage(&self) -> StorageMode { self.storage }

    pub fn filename(&self) -> &str { &self.filename }

    pub fn parent(&self) -> Option<usize> { self.parent }

    pub fn is_loaded(&self) -> bool {
        match self.data {
            HeapData::Unloaded => false,
            _ => true,
        }
    }

    /// The whole allocated region. `None` before loading.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            HeapData::Unloaded => None,
            HeapData::Memory(v) => Some(&v[..]),
            HeapData::Shared(m) => Some(&m[..]),
            HeapData::Private(m) => Some(&m[..]),
        }
    }

    /// Materializes the heap from its backing file. Never extends, truncates
    /// or otherwise touches the file; a file too short for a mapped heap is
    /// an error, since fixing it would mean writing to the pool.
    pub fn load(&mut self, pool_dir: &Path, logger: &Logger) -> PoolResult<()> {
        debug!(logger, "loading heap";
               "file" => self.filename.as_str(),
               "mode" => %self.storage,
               "free" => self.free,
               "size" => self.size);
        let path = utils::compose_path(pool_dir, None, &self.filename, None)?;
        if self.storage.is_mapped() {
            self.load_mapped(&path)
        } else {
            self.load_memory(&path)
        }
    }

    fn load_memory(&mut self, path: &Path) -> PoolResult<()> {
        let mut buffer = vec![0u8; self.size];
        if self.free > 0 {
            let mut file = open_backing_file(path)?;
            // read in chunks; the slack beyond `free` stays zeroed
            let mut done = 0usize;
            while done < self.free {
                let n = file
                    .read(&mut buffer[done..self.free])
                    .map_err(|e| PoolError::HeapIoError(path.to_path_buf(), e))?;
                if n == 0 {
                    let err = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} bytes missing", self.free - done),
                    );
                    return Err(PoolError::HeapIoError(path.to_path_buf(), err));
                }
                done += n;
            }
        }
        self.data = HeapData::Memory(buffer);
        Ok(())
    }

    fn load_mapped(&mut self, path: &Path) -> PoolResult<()> {
        let mapped_size = round_to_page(self.size);
        let file = open_backing_file(path)?;
        let file_size = file
            .metadata()
            .map_err(|e| PoolError::HeapIoError(path.to_path_buf(), e))?
            .len();
        if file_size < mapped_size as u64 {
            return Err(PoolError::ReadOnlyPoolNeedsExtension(
                path.to_path_buf(),
                mapped_size,
                file_size,
            ));
        }
        let options = {
            let mut o = MmapOptions::new();
            o.len(mapped_size);
            o
        };
        self.data = if self.storage == StorageMode::PrivateMap {
            let map = unsafe { options.map_copy(&file) }
                .map_err(|e| PoolError::HeapMapFailed(path.to_path_buf(), e))?;
            HeapData::Private(map)
        } else {
            let map = unsafe { options.map(&file) }
                .map_err(|e| PoolError::HeapMapFailed(path.to_path_buf(), e))?;
            HeapData::Shared(map)
        };
        self.size = mapped_size;
        Ok(())
    }
}

fn open_backing_file(path: &Path) -> PoolResult<File> {
    File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            PoolError::BackingFileMissing(path.to_path_buf())
        } else {
            PoolError::HeapIoError(path.to_path_buf(), e)
        }
    })
}

fn round_to_page(size: usize) -> usize {
    let rounded = (size + MMAP_PAGESIZE - 1) & !(MMAP_PAGESIZE - 1);
    rounded.max(MMAP_PAGESIZE)
}
