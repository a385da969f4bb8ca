//! Non-owning handles into the pool. A [`Column`] is a pair of pool
//! reference and index and may be copied freely; all data it exposes lives
//! in the pool's heaps and is borrowed for the pool's lifetime.

use std::convert::TryInto;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::slice;

use crate::atoms::{AtomKind, AtomTag, STR_NIL};
use crate::heap::StorageMode;
use crate::pool::descriptor::ColumnDescriptor;
use crate::pool::directory::ColumnRecord;
use crate::pool::names::SqlName;
use crate::pool::{Pool, PoolError, PoolResult};

/// Offsets of width 1 and 2 skip a string heap's leading hash area and are
/// stored with this base already subtracted.
pub const GDK_VAROFFSET: u64 = 8192;

/// A lightweight view of one pool slot. Obtained from
/// [`Pool::at`](struct.Pool.html#method.at) or by iterating the pool;
/// valid only while the pool lives.
#[derive(Clone, Copy)]
pub struct Column<'p> {
    pool: &'p Pool,
    index: usize,
}

/// One decoded element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'p> {
    /// The atom's in-band nil, or a void column without a seed.
    Nil,
    Bool(bool),
    /// Any signed integer atom up to 8 bytes, including the temporal ones
    /// (dates are day counts, daytimes millisecond counts).
    Int(i64),
    Huge(i128),
    Float(f64),
    Oid(u64),
    Timestamp { days: i32, msecs: i32 },
    Str(&'p str),
    /// Element of an atom we cannot decode (unknown or pointer-typed).
    Bytes(&'p [u8]),
}

impl<'p> fmt::Display for Value<'p> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Huge(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Oid(v) => write!(f, "{}@0", v),
            Value::Timestamp { days, msecs } => write!(f, "{}d+{}ms", days, msecs),
            Value::Str(v) => write!(f, "{}", v),
            Value::Bytes(v) => {
                for b in *v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl<'p> Column<'p> {
    pub(crate) fn new(pool: &'p Pool, index: usize) -> Column<'p> { Column { pool, index } }

    pub fn index(&self) -> usize { self.index }

    pub fn pool(&self) -> &'p Pool { self.pool }

    fn record(&self) -> Option<&'p ColumnRecord> { self.pool.record(self.index) }

    /// A slot is valid when the directory file described a column there.
    /// The reserved slot 0 and holes in the index space are not columns.
    pub fn is_valid(&self) -> bool { self.record().is_some() }

    /// The descriptor behind this handle. Dereferencing an invalid slot is a
    /// programmer error.
    pub fn descriptor(&self) -> &'p ColumnDescriptor {
        &self
            .record()
            .unwrap_or_else(|| panic!("no column at pool index {}", self.index))
            .descriptor
    }

    pub fn element_type(&self) -> AtomTag { *self.descriptor().tag() }

    pub fn kind(&self) -> Option<AtomKind> { *self.descriptor().kind() }

    pub fn type_name(&self) -> &str { self.pool.atoms().name(self.element_type()) }

    pub fn width(&self) -> u16 { *self.descriptor().width() }

    pub fn length(&self) -> u64 { *self.descriptor().length() }

    pub fn is_empty(&self) -> bool { self.length() == 0 }

    pub fn capacity(&self) -> u64 { *self.descriptor().capacity() }

    pub fn is_dense(&self) -> bool { self.descriptor().is_dense() }

    pub fn seq_base(&self) -> Option<u64> { *self.descriptor().seq_base() }

    pub fn storage_mode(&self) -> StorageMode { *self.descriptor().storage() }

    pub fn physical_name(&self) -> Option<&'p str> {
        self.record().map(|r| r.physical_name.as_str())
    }

    pub fn logical_name(&self) -> Option<&'p str> {
        self.record().map(|r| r.logical_name.as_str())
    }

    /// The column's schema.table.column name. Absent for columns outside
    /// the SQL catalog, and for every column until the pool's SQL index has
    /// been built.
    pub fn sql_name(&self) -> Option<&'p SqlName> { self.pool.sql_name_of(self.index) }

    fn main_heap_bytes(&self) -> &'p [u8] {
        self.descriptor()
            .main_heap()
            .as_ref()
            .and_then(|h| h.bytes())
            .unwrap_or_else(|| panic!("column {} has no loaded main heap", self.index))
    }

    fn vheap_bytes(&self) -> &'p [u8] {
        self.descriptor()
            .vheap()
            .as_ref()
            .and_then(|h| h.bytes())
            .unwrap_or_else(|| panic!("column {} has no loaded vheap", self.index))
    }

    /// Type-erased random access over the stored elements: a pointer to each
    /// element's bytes (for variable-width columns, to the payload the
    /// decoded offset selects). Only stored columns have element bytes;
    /// calling this on a dense column is a programmer error.
    pub fn raw_iter(&self) -> ErasedIter<'p> {
        assert!(!self.is_dense(), "dense columns have no stored elements");
        let desc = self.descriptor();
        let varsized = *desc.varsized();
        ErasedIter {
            varsized,
            width: usize::from(*desc.width()),
            data: self.main_heap_bytes(),
            vheap: if varsized { self.vheap_bytes() } else { &[] },
            pos: 0,
            len: self.length(),
            _pool: PhantomData,
        }
    }

    /// Decoded elements, nil-translated; works for every valid column
    /// including dense ones.
    pub fn values(&self) -> Values<'p> { Values { column: *self, pos: 0 } }

    /// Decodes the element at `pos`. Positions at or beyond `length()` are a
    /// programmer error.
    pub fn value(&self, pos: u64) -> PoolResult<Value<'p>> {
        let desc = self.descriptor();
        assert!(pos < self.length(), "element {} out of range", pos);

        let kind = match desc.kind() {
            Some(kind) => *kind,
            None => {
                let width = usize::from(*desc.width());
                let at = pos as usize * width;
                return Ok(Value::Bytes(&self.main_heap_bytes()[at..at + width]));
            }
        };
        if kind == AtomKind::Void {
            return Ok(match desc.seq_base() {
                Some(base) => Value::Oid(base + pos),
                None => Value::Nil,
            });
        }
        if kind == AtomKind::Str {
            return Ok(match self.str_at(pos)? {
                Some(s) => Value::Str(s),
                None => Value::Nil,
            });
        }

        let width = usize::from(*desc.width());
        let at = pos as usize * width;
        let elem = &self.main_heap_bytes()[at..at + width];
        if let Some(nil) = self.pool.atoms().nil_bytes(self.element_type()) {
            if elem == nil {
                return Ok(Value::Nil);
            }
        }
        Ok(decode_fixed(kind, elem))
    }

    /// A typed view over the main heap. For variable-width columns these are
    /// the stored offsets, not the string payloads. The requested type must
    /// match the element width and the heap's alignment.
    pub fn as_span<T: Copy>(&self) -> PoolResult<&'p [T]> {
        let desc = self.descriptor();
        let len = self.length() as usize;
        if len == 0 {
            return Ok(&[]);
        }
        if self.is_dense() {
            return Err(PoolError::TypedSpanMismatch(format!(
                "column {} is dense and has no stored elements",
                self.index
            )));
        }
        if mem::size_of::<T>() != usize::from(*desc.width()) {
            return Err(PoolError::TypedSpanMismatch(format!(
                "element width is {}, requested type is {} bytes",
                desc.width(),
                mem::size_of::<T>()
            )));
        }
        let bytes = self.main_heap_bytes();
        let ptr = bytes.as_ptr();
        if (ptr as usize) % mem::align_of::<T>() != 0 {
            return Err(PoolError::TypedSpanMismatch(format!(
                "heap base {:p} is not aligned for the requested type",
                ptr
            )));
        }
        debug_assert!(len * mem::size_of::<T>() <= bytes.len());
        Ok(unsafe { slice::from_raw_parts(ptr as *const T, len) })
    }

    /// Resolves the string element at `pos`. `None` is the string nil; the
    /// bytes must otherwise be NUL-terminated UTF-8.
    pub fn str_at(&self, pos: u64) -> PoolResult<Option<&'p str>> {
        let desc = self.descriptor();
        assert!(*desc.varsized() && desc.kind() != &Some(AtomKind::Void),
                "column {} holds no variable-width data", self.index);
        assert!(pos < self.length(), "element {} out of range", pos);

        let offsets = self.main_heap_bytes();
        let vheap = self.vheap_bytes();
        let offset = decode_offset(offsets, pos, usize::from(*desc.width()));

        let logical = self.descriptor().vheap().as_ref().map(|h| h.free()).unwrap_or(0);
        if offset >= logical as u64 {
            return Err(PoolError::CorruptHeap(format!(
                "offset {} of element {} in column {} is beyond the vheap's {} used bytes",
                offset, pos, self.index, logical
            )));
        }
        let payload = &vheap[offset as usize..];
        let terminator = payload.iter().position(|&b| b == 0).ok_or_else(|| {
            PoolError::CorruptHeap(format!(
                "unterminated string at element {} of column {}",
                pos, self.index
            ))
        })?;
        let payload = &payload[..terminator];
        if payload == &STR_NIL[..1] {
            return Ok(None);
        }
        std::str::from_utf8(payload)
            .map(Some)
            .map_err(|_| PoolError::InvalidUtf8(self.index, pos))
    }
}

impl<'p> fmt::Debug for Column<'p> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Column")
            .field("index", &self.index)
            .field("valid", &self.is_valid())
            .finish()
    }
}

fn decode_fixed<'p>(kind: AtomKind, elem: &'p [u8]) -> Value<'p> {
    use self::AtomKind::*;
    match kind {
        Bit => Value::Bool(elem[0] != 0),
        Bte => Value::Int(i64::from(i8::from_ne_bytes(elem.try_into().unwrap()))),
        Sht => Value::Int(i64::from(i16::from_ne_bytes(elem.try_into().unwrap()))),
        Int | Date | Daytime | Bat => {
            Value::Int(i64::from(i32::from_ne_bytes(elem.try_into().unwrap())))
        }
        Lng => Value::Int(i64::from_ne_bytes(elem.try_into().unwrap())),
        Hge => Value::Huge(i128::from_ne_bytes(elem.try_into().unwrap())),
        Flt => Value::Float(f64::from(f32::from_ne_bytes(elem.try_into().unwrap()))),
        Dbl => Value::Float(f64::from_ne_bytes(elem.try_into().unwrap())),
        Oid => Value::Oid(u64::from_ne_bytes(elem.try_into().unwrap())),
        Timestamp => {
            let a = i32::from_ne_bytes(elem[0..4].try_into().unwrap());
            let b = i32::from_ne_bytes(elem[4..8].try_into().unwrap());
            // native struct order: the msecs half sits at the low address on
            // little-endian machines
            let (msecs, days) = if cfg!(target_endian = "little") { (a, b) } else { (b, a) };
            Value::Timestamp { days, msecs }
        }
        Void | Str => unreachable!("handled before dispatch"),
        Ptr => Value::Bytes(elem),
    }
}

/// Decodes one entry of a variable-width column's offset array.
pub fn decode_offset(offsets: &[u8], pos: u64, width: usize) -> u64 {
    let at = pos as usize * width;
    match width {
        1 => u64::from(offsets[at]) + GDK_VAROFFSET,
        2 => u64::from(u16::from_ne_bytes(offsets[at..at + 2].try_into().unwrap()))
            + GDK_VAROFFSET,
        4 => u64::from(u32::from_ne_bytes(offsets[at..at + 4].try_into().unwrap())),
        8 => u64::from_ne_bytes(offsets[at..at + 8].try_into().unwrap()),
        _ => unreachable!("offset widths are validated at parse time"),
    }
}

/// The type-erased element iterator: random-access, restartable, finite.
/// The four leading fields are cached at construction so stepping does not
/// re-read the descriptor.
#[derive(Clone)]
pub struct ErasedIter<'p> {
    varsized: bool,
    width: usize,
    data: &'p [u8],
    vheap: &'p [u8],
    pos: u64,
    len: u64,
    _pool: PhantomData<&'p Pool>,
}

impl<'p> ErasedIter<'p> {
    /// Pointer to the element at `pos`, independent of the cursor.
    pub fn ptr_at(&self, pos: u64) -> *const u8 {
        if self.varsized {
            let offset = decode_offset(self.data, pos, self.width);
            self.vheap[offset as usize..].as_ptr()
        } else {
            self.data[pos as usize * self.width..].as_ptr()
        }
    }

    pub fn restart(&mut self) { self.pos = 0; }
}

impl<'p> Iterator for ErasedIter<'p> {
    type Item = *const u8;

    fn next(&mut self) -> Option<*const u8> {
        if self.pos >= self.len {
            return None;
        }
        let ptr = self.ptr_at(self.pos);
        self.pos += 1;
        Some(ptr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.len - self.pos) as usize;
        (left, Some(left))
    }
}

impl<'p> ExactSizeIterator for ErasedIter<'p> {}

/// Iterator of decoded elements.
pub struct Values<'p> {
    column: Column<'p>,
    pos: u64,
}

impl<'p> Iterator for Values<'p> {
    type Item = PoolResult<Value<'p>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.column.length() {
            return None;
        }
        let value = self.column.value(self.pos);
        self.pos += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.column.length() - self.pos) as usize;
        (left, Some(left))
    }
}

impl<'p> ExactSizeIterator for Values<'p> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn offset_decoding_widths() {
        let one = [3u8];
        assert_eq!(decode_offset(&one, 0, 1), 3 + GDK_VAROFFSET);

        let two = 7u16.to_ne_bytes();
        assert_eq!(decode_offset(&two, 0, 2), 7 + GDK_VAROFFSET);

        let four = 9000u32.to_ne_bytes();
        assert_eq!(decode_offset(&four, 0, 4), 9000);

        let eight = 123_456_789u64.to_ne_bytes();
        assert_eq!(decode_offset(&eight, 0, 8), 123_456_789);
    }

    #[test]
    fn offset_decoding_positions() {
        let mut offsets = Vec::new();
        for v in &[5u16, 6, 7] {
            offsets.extend_from_slice(&v.to_ne_bytes());
        }
        assert_eq!(decode_offset(&offsets, 2, 2), 7 + GDK_VAROFFSET);
    }

    #[test]
    fn fixed_decoding() {
        assert_eq!(decode_fixed(AtomKind::Int, &7i32.to_ne_bytes()), Value::Int(7));
        assert_eq!(decode_fixed(AtomKind::Lng, &(-1i64).to_ne_bytes()), Value::Int(-1));
        assert_eq!(decode_fixed(AtomKind::Oid, &42u64.to_ne_bytes()), Value::Oid(42));
        assert_eq!(decode_fixed(AtomKind::Bit, &[1]), Value::Bool(true));
        assert_eq!(
            decode_fixed(AtomKind::Dbl, &2.5f64.to_ne_bytes()),
            Value::Float(2.5)
        );
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Oid(7).to_string(), "7@0");
        assert_eq!(Value::Str("abc").to_string(), "abc");
        assert_eq!(Value::Bytes(&[0xde, 0xad]).to_string(), "dead");
    }
}
