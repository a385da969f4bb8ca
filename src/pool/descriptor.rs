//! The in-memory record the directory parser builds for one column.
//! Descriptors are plain data; reading behavior lives in the column proxy.

use crate::atoms::{AtomKind, AtomTag};
use crate::heap::{Heap, StorageMode};

bitflags! {
    /// Property bits of a heap spec. Bits outside this mask mean the
    /// directory was written by a server we do not understand.
    pub struct ColumnProperties: u16 {
        const SORTED     = 0x0001;
        const REVSORTED  = 0x0080;
        const KEY        = 0x0100;
        const DENSE      = 0x0200;
        const NONIL      = 0x0400;
        const NIL        = 0x0800;
    }
}

/// One column's persisted shape: element type, geometry, ordering flags and
/// its heap(s). Built exclusively by the directory parser.
#[derive(Debug, Getters, Builder)]
#[get = "pub"]
#[builder(pattern = "owned", build_fn(validate = "ColumnDescriptorBuilder::validate"))]
pub struct ColumnDescriptor {
    /// Element type tag; negative for atoms interned as unknown.
    tag: AtomTag,
    /// Built-in kind for the tag, when there is one.
    kind: Option<AtomKind>,
    /// Element width in bytes; the offset width for variable-sized atoms.
    width: u16,
    varsized: bool,
    /// Number of elements actually present.
    length: u64,
    /// Elements the allocated storage can hold.
    capacity: u64,
    properties: ColumnProperties,
    /// Restricted-access bits from the entry record.
    restricted: u8,
    /// Seed of the dense sequence; a void column with a seed stores nothing,
    /// its i-th element is `seed + i`.
    #[builder(default)]
    seq_base: Option<u64>,
    /// Storage mode recorded for the main heap, kept even when the column is
    /// dense and the heap itself is never materialized.
    storage: StorageMode,
    #[builder(default)]
    main_heap: Option<Heap>,
    #[builder(default)]
    vheap: Option<Heap>,
}

impl ColumnDescriptorBuilder {
    fn validate(&self) -> Result<(), String> {
        let width = self.width.ok_or("width not set")?;
        let length = self.length.ok_or("length not set")?;
        let kind = self.kind.clone().ok_or("kind not set")?;
        let varsized = self.varsized.ok_or("varsized flag not set")?;

        if kind != Some(AtomKind::Void) && !varsized && !width.is_power_of_two() {
            return Err(format!("fixed element width {} is not a power of two", width));
        }
        if varsized && kind != Some(AtomKind::Void) {
            match width {
                1 | 2 | 4 | 8 => {}
                w => return Err(format!("offset width {} not one of 1/2/4/8", w)),
            }
        }
        for heap in &[&self.main_heap, &self.vheap] {
            if let Some(Some(heap)) = heap {
                if heap.free() > heap.size() {
                    return Err(format!(
                        "heap {} has free {} beyond its size {}",
                        heap.filename(),
                        heap.free(),
                        heap.size()
                    ));
                }
            }
        }
        if let Some(Some(heap)) = &self.main_heap {
            let needed = length.checked_mul(u64::from(width)).ok_or("element bytes overflow")?;
            if needed > heap.size() as u64 {
                return Err(format!(
                    "{} elements of width {} do not fit the {}-byte heap {}",
                    length,
                    width,
                    heap.size(),
                    heap.filename()
                ));
            }
        }
        if let Some(props) = self.properties {
            if props.contains(ColumnProperties::SORTED | ColumnProperties::REVSORTED)
                && length > 1
            {
                return Err(format!(
                    "column of {} elements claims both sort orders",
                    length
                ));
            }
            if props.contains(ColumnProperties::NONIL | ColumnProperties::NIL) {
                return Err("column claims both nil-free and nil-present".to_owned());
            }
        }
        Ok(())
    }
}

impl ColumnDescriptor {
    /// A dense column synthesizes an arithmetic oid sequence and has no
    /// storage at all.
    pub fn is_dense(&self) -> bool {
        self.kind == Some(AtomKind::Void) && self.seq_base.is_some()
    }

    pub(crate) fn main_heap_mut(&mut self) -> Option<&mut Heap> { self.main_heap.as_mut() }

    pub(crate) fn vheap_mut(&mut self) -> Option<&mut Heap> { self.vheap.as_mut() }

    /// Once a heap is materialized its allocation, not the directory file,
    /// tells how many elements would fit.
    pub(crate) fn refresh_capacity(&mut self) {
        if let Some(heap) = &self.main_heap {
            if self.width > 0 {
                self.capacity = heap.size() as u64 / u64::from(self.width);
            }
        }
    }
}
