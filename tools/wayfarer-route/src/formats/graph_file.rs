//! graph.wfch format - the versioned routing artifact
//!
//! ```text
//! header   magic u32 | version u16 | flags u16 | u_turn_penalty u32
//!          | traffic_signal_penalty u32 | input_sha256 [u8; 32]
//!          | section_count u32 | reserved u32
//! table    section_count x (id u32 | elem_size u32 | len u64 | offset u64)
//! sections little-endian plain arrays, each starting 8-byte aligned
//! footer   crc64 u64 over every preceding byte
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use bytemuck::Pod;
use memmap2::Mmap;
use tracing::info;
use wayfarer_common::{Error, Result};

use super::crc::{self, ChecksumWriter};
use super::Section;
use crate::config::MemoryMode;
use crate::graph::{Adjacency, GraphStore, StoreMeta};

const MAGIC: u32 = u32::from_le_bytes(*b"WFCH");
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 56;
const TABLE_ENTRY_SIZE: usize = 24;
const FOOTER_SIZE: usize = 8;
const ALIGN: u64 = 8;

// Section ids; stable across versions
const NODE_IDS: u32 = 1;
const NODE_LON: u32 = 2;
const NODE_LAT: u32 = 3;
const NODE_FLAGS: u32 = 4;
const EDGE_OFFSETS: u32 = 10;
const EDGE_TAIL: u32 = 11;
const EDGE_HEAD: u32 = 12;
const EDGE_WEIGHT: u32 = 13;
const EDGE_DISTANCE: u32 = 14;
const EDGE_CLASS: u32 = 15;
const EDGE_FLAGS: u32 = 16;
const EDGE_REVERSE: u32 = 17;
const TURN_FROM: u32 = 20;
const TURN_TO: u32 = 21;
const TURN_PENALTY: u32 = 22;
const RANK: u32 = 30;
const UP_BASE: u32 = 40;
const DOWN_BASE: u32 = 50;
// offsets to UP_BASE / DOWN_BASE
const ADJ_OFFSETS: u32 = 0;
const ADJ_HEADS: u32 = 1;
const ADJ_WEIGHTS: u32 = 2;
const ADJ_DISTANCES: u32 = 3;
const ADJ_MIDDLES: u32 = 4;

#[derive(Debug, Clone, Copy)]
struct SectionEntry {
    id: u32,
    elem_size: u32,
    len: u64,
    offset: u64,
}

impl SectionEntry {
    fn byte_len(&self) -> Option<u64> {
        self.len.checked_mul(self.elem_size as u64)
    }
}

/// Every section of a store in file order, as (id, element size, bytes)
fn sections(store: &GraphStore) -> Vec<(u32, u32, &[u8])> {
    fn entry<T: Pod>(id: u32, s: &Section<T>) -> (u32, u32, &[u8]) {
        (id, std::mem::size_of::<T>() as u32, s.as_bytes())
    }
    let mut out = vec![
        entry(NODE_IDS, &store.node_ids),
        entry(NODE_LON, &store.node_lon),
        entry(NODE_LAT, &store.node_lat),
        entry(NODE_FLAGS, &store.node_flags),
        entry(EDGE_OFFSETS, &store.edge_offsets),
        entry(EDGE_TAIL, &store.edge_tail),
        entry(EDGE_HEAD, &store.edge_head),
        entry(EDGE_WEIGHT, &store.edge_weight),
        entry(EDGE_DISTANCE, &store.edge_distance),
        entry(EDGE_CLASS, &store.edge_class),
        entry(EDGE_FLAGS, &store.edge_flags),
        entry(EDGE_REVERSE, &store.edge_reverse),
        entry(TURN_FROM, &store.turn_from),
        entry(TURN_TO, &store.turn_to),
        entry(TURN_PENALTY, &store.turn_penalty),
        entry(RANK, &store.rank),
    ];
    for (base, adj) in [(UP_BASE, &store.up), (DOWN_BASE, &store.down)] {
        out.push(entry(base + ADJ_OFFSETS, &adj.offsets));
        out.push(entry(base + ADJ_HEADS, &adj.heads));
        out.push(entry(base + ADJ_WEIGHTS, &adj.weights));
        out.push(entry(base + ADJ_DISTANCES, &adj.distances));
        out.push(entry(base + ADJ_MIDDLES, &adj.middles));
    }
    out
}

fn align_up(pos: u64) -> u64 {
    pos.div_ceil(ALIGN) * ALIGN
}

/// Write the store to `path`, replacing any existing file only once the
/// new one is complete
pub fn write(path: &Path, store: &GraphStore) -> Result<()> {
    let parts = sections(store);

    let mut pos = (HEADER_SIZE + parts.len() * TABLE_ENTRY_SIZE) as u64;
    let mut table = Vec::with_capacity(parts.len());
    for &(id, elem_size, bytes) in &parts {
        pos = align_up(pos);
        table.push(SectionEntry {
            id,
            elem_size,
            len: bytes.len() as u64 / elem_size as u64,
            offset: pos,
        });
        pos += bytes.len() as u64;
    }

    let tmp = path.with_extension("wfch.partial");
    let mut writer = ChecksumWriter::new(BufWriter::new(File::create(&tmp)?));

    let meta = &store.meta;
    writer.write_all(&MAGIC.to_le_bytes())?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&0u16.to_le_bytes())?;
    writer.write_all(&meta.u_turn_penalty.to_le_bytes())?;
    writer.write_all(&meta.traffic_signal_penalty.to_le_bytes())?;
    writer.write_all(&meta.input_sha256)?;
    writer.write_all(&(parts.len() as u32).to_le_bytes())?;
    writer.write_all(&0u32.to_le_bytes())?;

    for entry in &table {
        writer.write_all(&entry.id.to_le_bytes())?;
        writer.write_all(&entry.elem_size.to_le_bytes())?;
        writer.write_all(&entry.len.to_le_bytes())?;
        writer.write_all(&entry.offset.to_le_bytes())?;
    }

    for (entry, &(_, _, bytes)) in table.iter().zip(&parts) {
        writer.pad_to(ALIGN)?;
        debug_assert_eq!(writer.position(), entry.offset);
        writer.write_all(bytes)?;
    }

    let (mut inner, checksum) = writer.finish();
    inner.write_all(&checksum.to_le_bytes())?;
    inner.flush()?;
    drop(inner);
    fs::rename(&tmp, path)?;

    info!(
        path = %path.display(),
        bytes = pos + FOOTER_SIZE as u64,
        sections = table.len(),
        "wrote graph artifact"
    );
    Ok(())
}

enum Backing {
    Owned(Vec<u8>),
    Mapped(Arc<Mmap>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v.as_slice(),
            Backing::Mapped(m) => &m[..],
        }
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(b)
}

struct Reader<'a> {
    path: &'a Path,
    backing: Backing,
    table: Vec<SectionEntry>,
}

impl Reader<'_> {
    fn take<T: Pod>(&self, id: u32) -> Result<Section<T>> {
        let entry = self
            .table
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::load(self.path, format!("missing section {id}")))?;
        if entry.elem_size as usize != std::mem::size_of::<T>() {
            return Err(Error::load(
                self.path,
                format!("section {id} has element size {}", entry.elem_size),
            ));
        }
        // bounds were checked against the body when the table was parsed
        let start = entry.offset as usize;
        let end = start + entry.byte_len().unwrap_or(0) as usize;
        let section = match &self.backing {
            Backing::Owned(bytes) => Section::copied(&bytes[start..end]),
            Backing::Mapped(map) => Section::mapped(Arc::clone(map), start..end),
        };
        section.ok_or_else(|| Error::load(self.path, format!("section {id} is misaligned")))
    }

    fn adjacency(&self, base: u32) -> Result<Adjacency> {
        Ok(Adjacency {
            offsets: self.take(base + ADJ_OFFSETS)?,
            heads: self.take(base + ADJ_HEADS)?,
            weights: self.take(base + ADJ_WEIGHTS)?,
            distances: self.take(base + ADJ_DISTANCES)?,
            middles: self.take(base + ADJ_MIDDLES)?,
        })
    }
}

/// Read and validate an artifact
pub fn read(path: &Path, mode: MemoryMode, verify_checksum: bool) -> Result<GraphStore> {
    if cfg!(target_endian = "big") {
        return Err(Error::load(path, "artifacts are little-endian; big-endian hosts are not supported"));
    }
    let io_err = |e: std::io::Error| Error::load(path, e.to_string());

    let backing = match mode {
        MemoryMode::Load => Backing::Owned(fs::read(path).map_err(io_err)?),
        MemoryMode::Mmap => {
            let file = File::open(path).map_err(io_err)?;
            // SAFETY: artifacts are written once to a temporary name and
            // renamed into place; nothing mutates a published file.
            let map = unsafe { Mmap::map(&file) }.map_err(io_err)?;
            Backing::Mapped(Arc::new(map))
        }
    };

    let bytes = backing.bytes();
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(Error::load(path, format!("file is truncated ({} bytes)", bytes.len())));
    }
    let magic = read_u32(bytes, 0);
    if magic != MAGIC {
        return Err(Error::load(path, format!("bad magic 0x{magic:08x}")));
    }
    let version = read_u16(bytes, 4);
    if version != VERSION {
        return Err(Error::load(
            path,
            format!("unsupported version {version} (expected {VERSION})"),
        ));
    }

    let body_len = bytes.len() - FOOTER_SIZE;
    if verify_checksum {
        let stored = read_u64(bytes, body_len);
        let actual = crc::checksum(&bytes[..body_len]);
        if stored != actual {
            return Err(Error::load(
                path,
                format!("checksum mismatch (stored {stored:016x}, computed {actual:016x})"),
            ));
        }
    }

    let mut input_sha256 = [0u8; 32];
    input_sha256.copy_from_slice(&bytes[16..48]);
    let meta = StoreMeta {
        u_turn_penalty: read_u32(bytes, 8),
        traffic_signal_penalty: read_u32(bytes, 12),
        input_sha256,
    };

    let count = read_u32(bytes, 48) as usize;
    let table_end = count
        .checked_mul(TABLE_ENTRY_SIZE)
        .and_then(|t| t.checked_add(HEADER_SIZE))
        .filter(|&end| end <= body_len)
        .ok_or_else(|| Error::load(path, "file is truncated (section table)"))?;
    let mut table = Vec::with_capacity(count);
    for at in (HEADER_SIZE..table_end).step_by(TABLE_ENTRY_SIZE) {
        let entry = SectionEntry {
            id: read_u32(bytes, at),
            elem_size: read_u32(bytes, at + 4),
            len: read_u64(bytes, at + 8),
            offset: read_u64(bytes, at + 16),
        };
        let end = entry.byte_len().and_then(|n| n.checked_add(entry.offset));
        match end {
            Some(end) if entry.offset >= table_end as u64 && end <= body_len as u64 => {}
            _ => {
                return Err(Error::load(
                    path,
                    format!("section {} lies outside the file", entry.id),
                ))
            }
        }
        if entry.elem_size == 0 || entry.offset % ALIGN != 0 {
            return Err(Error::load(path, format!("section {} is malformed", entry.id)));
        }
        table.push(entry);
    }

    let reader = Reader {
        path,
        backing,
        table,
    };
    let store = GraphStore {
        meta,
        node_ids: reader.take(NODE_IDS)?,
        node_lon: reader.take(NODE_LON)?,
        node_lat: reader.take(NODE_LAT)?,
        node_flags: reader.take(NODE_FLAGS)?,
        edge_offsets: reader.take(EDGE_OFFSETS)?,
        edge_tail: reader.take(EDGE_TAIL)?,
        edge_head: reader.take(EDGE_HEAD)?,
        edge_weight: reader.take(EDGE_WEIGHT)?,
        edge_distance: reader.take(EDGE_DISTANCE)?,
        edge_class: reader.take(EDGE_CLASS)?,
        edge_flags: reader.take(EDGE_FLAGS)?,
        edge_reverse: reader.take(EDGE_REVERSE)?,
        turn_from: reader.take(TURN_FROM)?,
        turn_to: reader.take(TURN_TO)?,
        turn_penalty: reader.take(TURN_PENALTY)?,
        rank: reader.take(RANK)?,
        up: reader.adjacency(UP_BASE)?,
        down: reader.adjacency(DOWN_BASE)?,
    };
    store.check().map_err(|reason| Error::load(path, reason))?;

    info!(
        path = %path.display(),
        mode = %mode,
        nodes = store.node_count(),
        segments = store.edge_count(),
        shortcuts = store.up.shortcut_count() + store.down.shortcut_count(),
        "loaded graph artifact"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::graph::RawGraph;

    fn store() -> GraphStore {
        let mut g = RawGraph::new();
        g.add_node(1, 4.0, 50.0)
            .add_signal(2, 4.001, 50.0)
            .add_node(3, 4.002, 50.0)
            .add_road(1, 2, 10)
            .add_segment(2, 3, 10);
        crate::contract::build(&g, &BuildConfig::default()).unwrap()
    }

    fn written(store: &GraphStore) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.wfch");
        write(&path, store).unwrap();
        (dir, path)
    }

    fn same(a: &GraphStore, b: &GraphStore) {
        assert_eq!(a.meta, b.meta);
        let (sa, sb) = (sections(a), sections(b));
        assert_eq!(sa.len(), sb.len());
        for (x, y) in sa.iter().zip(&sb) {
            assert_eq!(x, y, "section {} differs", x.0);
        }
    }

    #[test]
    fn test_roundtrip_in_both_memory_modes() {
        let original = store();
        let (_dir, path) = written(&original);

        let loaded = read(&path, MemoryMode::Load, true).unwrap();
        assert!(!loaded.is_mapped());
        same(&original, &loaded);

        let mapped = read(&path, MemoryMode::Mmap, true).unwrap();
        assert!(mapped.is_mapped());
        same(&original, &mapped);
    }

    #[test]
    fn test_sections_are_aligned() {
        let (_dir, path) = written(&store());
        let bytes = fs::read(&path).unwrap();
        let count = read_u32(&bytes, 48) as usize;
        for i in 0..count {
            let offset = read_u64(&bytes, HEADER_SIZE + i * TABLE_ENTRY_SIZE + 16);
            assert_eq!(offset % ALIGN, 0);
        }
    }

    #[test]
    fn test_corruption_is_detected() {
        let (_dir, path) = written(&store());
        let mut bytes = fs::read(&path).unwrap();
        let last_data = bytes.len() - FOOTER_SIZE - 1;
        bytes[last_data] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        let err = read(&path, MemoryMode::Load, true).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn test_rejects_foreign_and_truncated_files() {
        let (_dir, path) = written(&store());
        let bytes = fs::read(&path).unwrap();

        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        fs::write(&path, &wrong_magic).unwrap();
        assert!(matches!(read(&path, MemoryMode::Load, false), Err(Error::Load { .. })));

        let mut wrong_version = bytes.clone();
        wrong_version[4] = 99;
        fs::write(&path, &wrong_version).unwrap();
        let err = read(&path, MemoryMode::Load, false).unwrap_err();
        assert!(err.to_string().contains("version"), "{err}");

        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(read(&path, MemoryMode::Load, false), Err(Error::Load { .. })));

        fs::write(&path, &bytes[..20]).unwrap();
        assert!(matches!(read(&path, MemoryMode::Mmap, false), Err(Error::Load { .. })));
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(&dir.path().join("absent.wfch"), MemoryMode::Load, true).unwrap_err();
        assert_eq!(err.code(), "LoadError");
    }
}
