//! Parses the `BACKUP/BBP.dir` directory file into column records. The
//! grammar in `parsers/bbp_dir.pest` splits the file into tokens; this
//! module interprets them according to the format version the header
//! announces.

use pest::Parser;
use slog::Logger;

use crate::atoms::{AtomKind, AtomRegistry, AtomTag};
use crate::heap::{Heap, StorageMode};
use crate::parsers::{DirFileParser, Rule};
use crate::pool::descriptor::{
    ColumnDescriptor, ColumnDescriptorBuilder, ColumnProperties,
};
use crate::pool::{PoolError, PoolResult};
use crate::utils;

/// Newest directory format this library understands.
pub const LIBRARY_VERSION: u32 = 0o61041;

const SUPPORTED_VERSIONS: [u32; 5] = [0o61033, 0o61035, 0o61037, 0o61040, 0o61041];

/// The sparse slot array grows in chunks of this many entries.
const SLOT_CHUNK: usize = 2048;

/// Extension of a column's main heap file.
pub const TAIL_EXTENSION: &str = "tail";
/// Extension of a string column's variable-width heap file.
pub const VHEAP_EXTENSION: &str = "theap";

/// Restricted-access bits live in the entry-level properties word.
const RESTRICTED_SHIFT: u32 = 1;
const RESTRICTED_MASK: u32 = 0x06;

/// One slot of the pool: the names under which the column is known plus its
/// descriptor.
#[derive(Debug)]
pub struct ColumnRecord {
    pub logical_name: String,
    pub physical_name: String,
    pub options: Option<String>,
    pub descriptor: ColumnDescriptor,
}

/// Everything the directory file describes.
#[derive(Debug)]
pub struct ParsedPool {
    pub version: u32,
    pub oid_seed: u64,
    /// Slot 0 is reserved and always empty.
    pub entries: Vec<Option<ColumnRecord>>,
}

/// The four per-entry layouts a directory file may use, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryLayout {
    /// 061033: headed, with inserted/deleted counters and map flags.
    Oldest,
    /// 061035: headed, map flags, no inserted/deleted.
    Mid,
    /// 061037: headed, no map flags.
    Later,
    /// 061040 and up: headless, no per-heap align field.
    Recent,
}

impl EntryLayout {
    fn for_version(version: u32) -> EntryLayout {
        match version {
            0o61033 => EntryLayout::Oldest,
            0o61035 => EntryLayout::Mid,
            0o61037 => EntryLayout::Later,
            _ => EntryLayout::Recent,
        }
    }

    fn is_headed(self) -> bool { self != EntryLayout::Recent }

    fn heap_spec_has_align(self) -> bool { self.is_headed() }
}

pub fn parse(
    text: &str,
    atoms: &mut AtomRegistry,
    logger: &Logger,
) -> PoolResult<ParsedPool> {
    let mut pairs = DirFileParser::parse(Rule::dir_file, text)
        .map_err(|e| PoolError::CorruptDirectory(0, e.to_string()))?;
    let mut file = pairs.next().expect("grammar yields one dir_file").into_inner();

    let header = file.next().expect("grammar yields a header");
    let (version, oid_seed, size_hint) = parse_header(header)?;
    let layout = EntryLayout::for_version(version);
    debug!(logger, "directory header accepted";
           "version" => format!("0{:o}", version),
           "oid_seed" => oid_seed,
           "size_hint" => size_hint);

    let mut entries: Vec<Option<ColumnRecord>> = Vec::with_capacity(size_hint.unwrap_or(0));
    entries.push(None); // slot 0 is never used
    let mut highest = 0usize;

    for (line_no, entry) in file.filter(|p| p.as_rule() == Rule::entry_line).enumerate() {
        let toks: Vec<&str> =
            entry.into_inner().filter(|p| p.as_rule() == Rule::field).map(|p| p.as_str()).collect();
        let mut fields = Fields { line_no: line_no + 1, toks, pos: 0 };

        let (index, record) = parse_entry(&mut fields, version, layout, atoms)?;
        debug!(logger, "directory entry parsed";
               "index" => index,
               "logical" => record.logical_name.as_str(),
               "physical" => record.physical_name.as_str(),
               "type" => atoms.name(*record.descriptor.tag()),
               "count" => *record.descriptor.length());

        if index >= entries.len() {
            let chunks = index / SLOT_CHUNK + 1;
            entries.resize_with(chunks * SLOT_CHUNK, || None);
        }
        if entries[index].is_some() {
            return Err(PoolError::CorruptDirectory(
                fields.line_no,
                format!("duplicate entry for column index {}", index),
            ));
        }
        entries[index] = Some(record);
        highest = highest.max(index);
    }

    entries.truncate(highest + 1);
    Ok(ParsedPool { version, oid_seed, entries })
}

fn parse_header(
    header: pest::iterators::Pair<Rule>,
) -> PoolResult<(u32, u64, Option<usize>)> {
    let mut lines = header.into_inner();

    let version_line = lines.next().expect("grammar yields a version line");
    let version_text = version_line.into_inner().next().expect("version number").as_str();
    let version = u32::from_str_radix(version_text, 8)
        .map_err(|_| PoolError::CorruptDirectory(0, format!("bad version {:?}", version_text)))?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(if version > LIBRARY_VERSION {
            PoolError::NewerThanSupported(version, LIBRARY_VERSION)
        } else {
            PoolError::UnsupportedVersion(version, LIBRARY_VERSION)
        });
    }

    let sizes_line = lines.next().expect("grammar yields a sizes line");
    let sizes: Vec<u32> = sizes_line
        .into_inner()
        .map(|p| {
            p.as_str()
                .parse::<u32>()
                .map_err(|_| PoolError::CorruptDirectory(0, "bad platform size".to_owned()))
        })
        .collect::<PoolResult<_>>()?;
    let (ptr_size, oid_size) = (sizes[0], sizes[1]);
    let int_size = sizes.get(2).copied().unwrap_or(8);
    if ptr_size != 8 {
        return Err(PoolError::PlatformMismatch("pointer", 8, ptr_size));
    }
    if oid_size == 4 {
        // the server can widen old 32-bit oids in place; we will not
        return Err(PoolError::PoolRequiresServerMaintenance(
            "the pool still uses 32-bit object identifiers".to_owned(),
        ));
    }
    if oid_size != 8 {
        return Err(PoolError::PlatformMismatch("OID", 8, oid_size));
    }
    if int_size > 16 {
        return Err(PoolError::PlatformMismatch("integer", 16, int_size));
    }

    let seed_line = lines.next().expect("grammar yields a seed line");
    let mut oid_seed = 0u64;
    let mut size_hint = None;
    for (i, field) in seed_line.into_inner().enumerate() {
        let text = field.as_str();
        if i == 0 {
            // "<n>@0" in newer versions, a bare number in older ones
            let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
            oid_seed = digits
                .parse()
                .map_err(|_| PoolError::CorruptDirectory(0, format!("bad oid seed {:?}", text)))?;
        } else if let Some(n) = text.strip_prefix("BBPsize=") {
            size_hint = n.parse::<usize>().ok();
        }
    }
    Ok((version, oid_seed, size_hint))
}

/// Positional access into one tokenized entry line.
struct Fields<'a> {
    line_no: usize,
    toks: Vec<&'a str>,
    pos: usize,
}

impl<'a> Fields<'a> {
    fn corrupt(&self, details: String) -> PoolError {
        PoolError::CorruptDirectory(self.line_no, details)
    }

    fn next(&mut self, what: &str) -> PoolResult<&'a str> {
        let tok = self
            .toks
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.corrupt(format!("record ends before its {} field", what)))?;
        self.pos += 1;
        Ok(tok)
    }

    fn next_i64(&mut self, what: &str) -> PoolResult<i64> {
        let tok = self.next(what)?;
        tok.parse().map_err(|_| self.corrupt(format!("bad {} field {:?}", what, tok)))
    }

    fn next_u64(&mut self, what: &str) -> PoolResult<u64> {
        let v = self.next_i64(what)?;
        if v < 0 {
            return Err(self.corrupt(format!("negative {} field {}", what, v)));
        }
        Ok(v as u64)
    }

    fn next_u16(&mut self, what: &str) -> PoolResult<u16> {
        let tok = self.next(what)?;
        tok.parse().map_err(|_| self.corrupt(format!("bad {} field {:?}", what, tok)))
    }

    fn next_u32(&mut self, what: &str) -> PoolResult<u32> {
        let tok = self.next(what)?;
        tok.parse().map_err(|_| self.corrupt(format!("bad {} field {:?}", what, tok)))
    }

    fn skip(&mut self, n: usize, what: &str) -> PoolResult<()> {
        for _ in 0..n {
            self.next(what)?;
        }
        Ok(())
    }

    /// Whatever follows the parsed fields is the options string.
    fn remainder(&mut self) -> Option<String> {
        if self.pos >= self.toks.len() {
            return None;
        }
        let rest = self.toks[self.pos..].join(" ");
        self.pos = self.toks.len();
        Some(rest)
    }
}

/// The heap-spec fields shared by all versions, before interpretation.
struct RawHeapSpec {
    type_name: String,
    width: u16,
    varsized: bool,
    hashash: bool,
    properties: u16,
    seq_base: i64,
    free: u64,
    size: u64,
    storage: u16,
}

fn parse_heap_spec(fields: &mut Fields, with_align: bool) -> PoolResult<RawHeapSpec> {
    let type_name = fields.next("heap type")?.to_owned();
    let width = fields.next_u16("heap width")?;
    let var = fields.next_u16("heap var flag")?;
    let properties = fields.next_u16("heap properties")?;
    fields.skip(4, "heap ordering position")?; // nokey0 nokey1 nosorted norevsorted
    let seq_base = fields.next_i64("heap sequence base")?;
    if with_align {
        fields.next_i64("heap align")?;
    }
    let free = fields.next_u64("heap free")?;
    let size = fields.next_u64("heap size")?;
    let storage = fields.next_u16("heap storage mode")?;
    Ok(RawHeapSpec {
        type_name,
        width,
        varsized: var & 0x1 != 0,
        hashash: var & 0x2 != 0,
        properties,
        seq_base,
        free,
        size,
        storage,
    })
}

fn parse_entry(
    fields: &mut Fields,
    version: u32,
    layout: EntryLayout,
    atoms: &mut AtomRegistry,
) -> PoolResult<(usize, ColumnRecord)> {
    let index = fields.next_i64("column index")?;
    if index <= 0 {
        return Err(fields.corrupt(format!("column index {} out of range", index)));
    }
    let index = index as usize;

    let _status = fields.next_u16("status")?;
    let headname = fields.next("head name")?.to_owned();
    if layout.is_headed() {
        fields.next("tail name")?; // superseded by the head name long ago
    }
    let filename = fields.next("file name")?.to_owned();
    if layout.is_headed() {
        fields.next_i64("last-used stamp")?;
    }
    let entry_properties = fields.next_u32("entry properties")?;
    let restricted = ((entry_properties & RESTRICTED_MASK) >> RESTRICTED_SHIFT) as u8;
    if layout == EntryLayout::Oldest {
        fields.skip(2, "insert/delete counter")?;
    }
    if layout.is_headed() {
        let first = fields.next_i64("first element")?;
        if first != 0 {
            return Err(PoolError::PoolRequiresServerMaintenance(format!(
                "column {} starts at element {} instead of 0",
                index, first
            )));
        }
    }
    let count = fields.next_u64("element count")?;
    let capacity = fields.next_u64("capacity")?;
    if layout.is_headed() {
        if layout != EntryLayout::Later {
            fields.skip(4, "map flag")?;
        }
    } else {
        let head_base = fields.next_i64("head sequence base")?;
        if head_base < 0 {
            return Err(fields.corrupt(format!(
                "head sequence base {} of column {} out of range",
                head_base, index
            )));
        }
    }

    if layout.is_headed() {
        // pre-headless formats persist a whole heap spec for the head; only
        // an unseeded void head can be represented without rewriting
        let head = parse_heap_spec(fields, layout.heap_spec_has_align())?;
        if head.type_name != "void" {
            return Err(PoolError::PoolRequiresServerMaintenance(format!(
                "column {} has a non-void head of type {}",
                index, head.type_name
            )));
        }
        if head.seq_base < 0 {
            return Err(fields.corrupt(format!(
                "head sequence base {} of column {} out of range",
                head.seq_base, index
            )));
        }
    }

    let tail = parse_heap_spec(fields, layout.heap_spec_has_align())?;
    let (tag, kind) = resolve_atom(fields, atoms, &tail)?;

    let properties = ColumnProperties::from_bits(tail.properties).ok_or_else(|| {
        fields.corrupt(format!(
            "unknown property bits 0x{:04x} on column {}",
            tail.properties, index
        ))
    })?;
    let storage = StorageMode::from_directory(tail.storage, version).ok_or_else(|| {
        fields.corrupt(format!("invalid storage mode {} on column {}", tail.storage, index))
    })?;
    let seq_base = if tail.seq_base < 0 { None } else { Some(tail.seq_base as u64) };

    let physical_name = utils::normalize_separators(&filename);

    let main_heap = if kind == Some(AtomKind::Void) {
        None
    } else {
        Some(Heap::new(
            tail.free as usize,
            tail.size as usize,
            storage,
            format!("{}.{}", physical_name, TAIL_EXTENSION),
            None,
        ))
    };

    let vheap = if tail.varsized && kind != Some(AtomKind::Void) {
        let free = fields.next_u64("vheap free")?;
        let size = fields.next_u64("vheap size")?;
        let storage_raw = fields.next_u16("vheap storage mode")?;
        let vstorage = StorageMode::from_directory(storage_raw, version).ok_or_else(|| {
            fields.corrupt(format!("invalid storage mode {} on column {}", storage_raw, index))
        })?;
        if free > size {
            return Err(fields.corrupt(format!(
                "vheap of column {} has free {} beyond its size {}",
                index, free, size
            )));
        }
        Some(Heap::new(
            free as usize,
            size as usize,
            vstorage,
            format!("{}.{}", physical_name, VHEAP_EXTENSION),
            Some(index),
        ))
    } else {
        None
    };
    let _ = tail.hashash; // string-hash marker; meaningless to a reader

    let options = fields.remainder();

    let descriptor = ColumnDescriptorBuilder::default()
        .tag(tag)
        .kind(kind)
        .width(tail.width)
        .varsized(tail.varsized)
        .length(count)
        .capacity(capacity)
        .properties(properties)
        .restricted(restricted)
        .seq_base(seq_base)
        .storage(storage)
        .main_heap(main_heap)
        .vheap(vheap)
        .build()
        .map_err(|e| fields.corrupt(format!("column {}: {}", index, e)))?;

    let logical_name = if headname.starts_with('~') {
        format!("tmp_{:o}", index)
    } else {
        match headname.find('~') {
            Some(at) => headname[..at].to_owned(),
            None => headname,
        }
    };

    Ok((
        index,
        ColumnRecord { logical_name, physical_name, options, descriptor },
    ))
}

fn resolve_atom(
    fields: &Fields,
    atoms: &mut AtomRegistry,
    spec: &RawHeapSpec,
) -> PoolResult<(AtomTag, Option<AtomKind>)> {
    let tag = atoms.resolve(&spec.type_name, spec.width).ok_or_else(|| {
        fields.corrupt(format!("no space to register atom {:?}", spec.type_name))
    })?;
    let kind = atoms.kind(tag);

    if let Some(desc) = atoms.desc(tag) {
        let expect_var = desc.kind == AtomKind::Void || desc.varsized;
        if spec.varsized != expect_var {
            return Err(fields.corrupt(format!(
                "varsized flag disagrees with atom {}",
                desc.name
            )));
        }
        if desc.varsized {
            match spec.width {
                1 | 2 | 4 | 8 if spec.width <= desc.size => {}
                w => {
                    return Err(fields.corrupt(format!(
                        "offset width {} is invalid for atom {}",
                        w, desc.name
                    )))
                }
            }
        } else if spec.width != desc.size {
            return Err(fields.corrupt(format!(
                "width {} disagrees with atom {} of size {}",
                spec.width, desc.name, desc.size
            )));
        }
    }
    Ok((tag, kind))
}
