//! The registry of element types ("atoms" in GDK parlance). The built-in
//! table is fixed at startup; atoms a directory file mentions but we do not
//! know are interned per pool into a bounded side table and handed negative
//! tags, so a pool with exotic user-defined types can still be browsed.

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Numeric tag of an element type. Built-in atoms use their position in the
/// registry table; interned unknown atoms get negative tags.
pub type AtomTag = i32;

/// Built-in atoms, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
pub enum AtomKind {
    #[strum(serialize = "void")]
    Void,
    #[strum(serialize = "bit")]
    Bit,
    #[strum(serialize = "bte")]
    Bte,
    #[strum(serialize = "sht")]
    Sht,
    #[strum(serialize = "BAT")]
    Bat,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "oid")]
    Oid,
    #[strum(serialize = "ptr")]
    Ptr,
    #[strum(serialize = "flt")]
    Flt,
    #[strum(serialize = "dbl")]
    Dbl,
    #[strum(serialize = "lng")]
    Lng,
    #[strum(serialize = "hge")]
    Hge,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "date")]
    Date,
    #[strum(serialize = "daytime")]
    Daytime,
    #[strum(serialize = "timestamp")]
    Timestamp,
}

/// In-band "absent" sentinels, in the native byte order the heaps use.
static BTE_NIL: [u8; 1] = i8::MIN.to_ne_bytes();
static SHT_NIL: [u8; 2] = i16::MIN.to_ne_bytes();
static INT_NIL: [u8; 4] = i32::MIN.to_ne_bytes();
static LNG_NIL: [u8; 8] = i64::MIN.to_ne_bytes();
static HGE_NIL: [u8; 16] = i128::MIN.to_ne_bytes();
/// The oid nil has the sign bit alone set; oids are otherwise unsigned.
static OID_NIL: [u8; 8] = (1u64 << 63).to_ne_bytes();
/// f32::MIN_POSITIVE; the servers this reader supports predate the NaN nil.
static FLT_NIL: [u8; 4] = 0x0080_0000u32.to_ne_bytes();
/// f64::MIN_POSITIVE.
static DBL_NIL: [u8; 8] = 0x0010_0000_0000_0000u64.to_ne_bytes();
static PTR_NIL: [u8; 8] = [0; 8];
/// A timestamp is a (daytime, date) pair; its nil is the int nil in both halves.
static TS_NIL: [u8; 8] = ts_nil_bytes();
/// The string nil: a lone `0x80` byte, NUL-terminated in mid-"character".
pub static STR_NIL: [u8; 2] = [0x80, 0x00];

const fn ts_nil_bytes() -> [u8; 8] {
    let i = i32::MIN.to_ne_bytes();
    [i[0], i[1], i[2], i[3], i[0], i[1], i[2], i[3]]
}

/// One row of the built-in registry.
#[derive(Debug, Clone, Copy)]
pub struct AtomDesc {
    pub kind: AtomKind,
    pub name: &'static str,
    /// Element size in bytes; for `str` the size of an offset, 0 for `void`.
    pub size: u16,
    pub varsized: bool,
    pub nil: &'static [u8],
}

fn desc_of(kind: AtomKind) -> AtomDesc {
    use self::AtomKind::*;
    let (size, varsized, nil): (u16, bool, &'static [u8]) = match kind {
        Void => (0, false, &OID_NIL),
        Bit => (1, false, &BTE_NIL),
        Bte => (1, false, &BTE_NIL),
        Sht => (2, false, &SHT_NIL),
        Bat => (4, false, &INT_NIL),
        Int => (4, false, &INT_NIL),
        Oid => (8, false, &OID_NIL),
        Ptr => (8, false, &PTR_NIL),
        Flt => (4, false, &FLT_NIL),
        Dbl => (8, false, &DBL_NIL),
        Lng => (8, false, &LNG_NIL),
        Hge => (16, false, &HGE_NIL),
        Str => (8, true, &STR_NIL),
        Date => (4, false, &INT_NIL),
        Daytime => (4, false, &INT_NIL),
        Timestamp => (8, false, &TS_NIL),
    };
    AtomDesc { kind, name: kind.into(), size, varsized, nil }
}

lazy_static! {
    static ref BUILTIN_ATOMS: Vec<AtomDesc> = AtomKind::iter().map(desc_of).collect();
}

/// How many unknown atoms one pool may intern before we give up on it.
pub const MAX_UNKNOWN_ATOMS: usize = 32;

/// Per-pool registry: the shared built-in table plus this pool's interned
/// unknown atoms.
#[derive(Debug, Default)]
pub struct AtomRegistry {
    unknown: Vec<String>,
}

impl AtomRegistry {
    pub fn new() -> AtomRegistry { AtomRegistry { unknown: Vec::new() } }

    /// Tag of a built-in atom.
    pub fn builtin(kind: AtomKind) -> AtomTag {
        BUILTIN_ATOMS.iter().position(|d| d.kind == kind).unwrap() as AtomTag
    }

    /// Looks a name up in the built-in table only.
    pub fn lookup_by_name(&self, name: &str) -> Option<AtomTag> {
        BUILTIN_ATOMS.iter().position(|d| d.name == name).map(|p| p as AtomTag)
    }

    /// The historical spellings some directory files still carry.
    pub fn upgraded_name(name: &str, width: u16) -> &str {
        match name {
            "chr" => "bte",
            "wrd" => {
                if width == 4 {
                    "int"
                } else {
                    "lng"
                }
            }
            other => other,
        }
    }

    /// Resolves a directory-file type name to a tag, interning it as an
    /// unknown atom when the built-in table has no entry. `None` only when
    /// the side table is exhausted.
    pub fn resolve(&mut self, name: &str, width: u16) -> Option<AtomTag> {
        let name = Self::upgraded_name(name, width);
        match self.lookup_by_name(name) {
            Some(tag) => Some(tag),
            None => self.register_unknown(name),
        }
    }

    /// Interns an unknown atom name, idempotently. A name that turns out to
    /// be built-in short-circuits to the built-in tag.
    pub fn register_unknown(&mut self, name: &str) -> Option<AtomTag> {
        if let Some(tag) = self.lookup_by_name(name) {
            return Some(tag);
        }
        if let Some(pos) = self.unknown.iter().position(|n| n == name) {
            return Some(-((pos + 1) as AtomTag));
        }
        if self.unknown.len() >= MAX_UNKNOWN_ATOMS {
            return None;
        }
        self.unknown.push(name.to_owned());
        Some(-(self.unknown.len() as AtomTag))
    }

    pub fn unknown_name(&self, tag: AtomTag) -> Option<&str> {
        if tag >= 0 {
            return None;
        }
        self.unknown.get((-tag - 1) as usize).map(String::as_str)
    }

    pub fn desc(&self, tag: AtomTag) -> Option<&'static AtomDesc> {
        if tag < 0 {
            return None;
        }
        BUILTIN_ATOMS.get(tag as usize)
    }

    pub fn kind(&self, tag: AtomTag) -> Option<AtomKind> { self.desc(tag).map(|d| d.kind) }

    pub fn name(&self, tag: AtomTag) -> &str {
        if tag < 0 {
            return self.unknown_name(tag).unwrap_or("null");
        }
        self.desc(tag).map(|d| d.name).unwrap_or("null")
    }

    pub fn size(&self, tag: AtomTag) -> u16 { self.desc(tag).map(|d| d.size).unwrap_or(0) }

    pub fn is_variable_sized(&self, tag: AtomTag) -> bool {
        self.desc(tag).map(|d| d.varsized).unwrap_or(false)
    }

    /// The atom's in-band nil sentinel, native-endian. Unknown atoms have no
    /// known sentinel.
    pub fn nil_bytes(&self, tag: AtomTag) -> Option<&'static [u8]> {
        self.desc(tag).map(|d| d.nil)
    }
}
