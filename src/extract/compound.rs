//! Structural checks for compound-binary (OLE2) containers.
//!
//! The legacy spreadsheet reader sizes its buffers from sector ids and stream
//! lengths taken straight from the file. A single flipped byte can turn one of
//! those into a multi-terabyte allocation, which aborts the process rather
//! than panicking. [`check_layout`] walks every table that reader follows and
//! rejects any id or length that points outside the buffer.

use super::{ExtractError, ExtractResult};

pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const HEADER_LEN: usize = 512;
const MINI_SECTOR_SIZE: u64 = 64;
const MINI_STREAM_CUTOFF: u64 = 4096;
const DIR_ENTRY_LEN: usize = 128;
/// Ids at or above this value are markers (FAT, DIFAT, end of chain, free).
const FIRST_MARKER: u32 = 0xFFFF_FFFA;
const END_OF_CHAIN: u32 = 0xFFFF_FFFE;

const OBJECT_STREAM: u8 = 2;
const OBJECT_ROOT: u8 = 5;

pub fn is_compound(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE)
}

/// Verifies that every sector id, chain and stream length reachable from the
/// header stays inside `bytes`, and that no chain loops or shares sectors.
pub fn check_layout(bytes: &[u8]) -> ExtractResult<()> {
    if bytes.len() < HEADER_LEN || !is_compound(bytes) {
        return Err(malformed("not a compound document"));
    }
    let header = &bytes[..HEADER_LEN];

    let sector_size = match u16_at(header, 0x1E) {
        9 => 512,
        12 => 4096,
        shift => return Err(malformed(format!("unsupported sector shift {}", shift))),
    };
    if u16_at(header, 0x20) != 6 {
        return Err(malformed("unsupported mini sector shift"));
    }
    if u64::from(u32_at(header, 0x38)) != MINI_STREAM_CUTOFF {
        return Err(malformed("unsupported mini stream cutoff"));
    }

    let file = Sectors::new(bytes, sector_size);
    for (table, declared) in [
        ("FAT", u32_at(header, 0x2C)),
        ("mini FAT", u32_at(header, 0x40)),
        ("DIFAT", u32_at(header, 0x48)),
    ] {
        if declared as usize > file.count {
            return Err(malformed(format!(
                "{} declares {} sectors, file holds {}",
                table, declared, file.count
            )));
        }
    }

    let fat = file.read_fat(header)?;
    let mut claimed = vec![false; file.count];

    let directory = file.walk(u32_at(header, 0x30), &fat, &mut claimed)?;
    let entries: Vec<DirEntry> = directory
        .iter()
        .flat_map(|&index| file.sector(index).chunks_exact(DIR_ENTRY_LEN))
        .map(DirEntry::parse)
        .collect();
    let root = entries
        .first()
        .filter(|entry| entry.kind == OBJECT_ROOT)
        .ok_or_else(|| malformed("missing root directory entry"))?;

    let mini_fat_chain = file.walk(u32_at(header, 0x3C), &fat, &mut claimed)?;
    let mini_fat: Vec<u32> = mini_fat_chain
        .iter()
        .flat_map(|&index| ids(file.sector(index)))
        .collect();

    check_length(root.size, bytes.len())?;
    let mini_stream = file.walk(root.start, &fat, &mut claimed)?;
    let mini_bytes = root.size.min((mini_stream.len() * sector_size) as u64);
    let mini_count = mini_bytes.div_ceil(MINI_SECTOR_SIZE) as usize;
    if let Some(bad) = mini_fat
        .iter()
        .find(|&&id| id < FIRST_MARKER && id as usize >= mini_count)
    {
        return Err(malformed(format!("mini FAT points at mini sector {}", bad)));
    }

    let mut mini_claimed = vec![false; mini_count];
    for entry in entries.iter().skip(1).filter(|e| e.kind == OBJECT_STREAM) {
        check_length(entry.size, bytes.len())?;
        if entry.size < MINI_STREAM_CUTOFF {
            walk_chain(entry.start, &mini_fat, &mut mini_claimed, "mini sector")?;
        } else {
            file.walk(entry.start, &fat, &mut claimed)?;
        }
    }
    Ok(())
}

struct Sectors<'a> {
    bytes: &'a [u8],
    size: usize,
    count: usize,
}

impl<'a> Sectors<'a> {
    /// The header fills sector slot zero; a trailing partial sector counts.
    fn new(bytes: &'a [u8], size: usize) -> Self {
        let count = bytes.len().saturating_sub(size).div_ceil(size);
        Self { bytes, size, count }
    }

    fn index(&self, id: u32) -> ExtractResult<usize> {
        let index = id as usize;
        if index < self.count {
            Ok(index)
        } else {
            Err(malformed(format!("sector {} lies past the end of the file", id)))
        }
    }

    fn sector(&self, index: usize) -> &'a [u8] {
        let start = (index + 1) * self.size;
        let end = (start + self.size).min(self.bytes.len());
        &self.bytes[start..end]
    }

    /// FAT sector ids come from the 109 header slots plus the DIFAT chain.
    fn read_fat(&self, header: &[u8]) -> ExtractResult<Vec<u32>> {
        let mut fat_sectors: Vec<u32> = ids(&header[0x4C..HEADER_LEN])
            .filter(|&id| id < FIRST_MARKER)
            .collect();

        let mut visited = vec![false; self.count];
        let mut next = u32_at(header, 0x44);
        while next < FIRST_MARKER {
            let index = self.index(next)?;
            if std::mem::replace(&mut visited[index], true) {
                return Err(malformed("DIFAT chain loops"));
            }
            let entries: Vec<u32> = ids(self.sector(index)).collect();
            let Some((&link, slots)) = entries.split_last() else {
                return Err(malformed("truncated DIFAT sector"));
            };
            fat_sectors.extend(slots.iter().copied().filter(|&id| id < FIRST_MARKER));
            next = link;
        }

        let mut fat = Vec::new();
        for id in fat_sectors {
            fat.extend(ids(self.sector(self.index(id)?)));
        }
        if let Some(bad) = fat
            .iter()
            .find(|&&id| id < FIRST_MARKER && id as usize >= self.count)
        {
            return Err(malformed(format!("FAT points at sector {}", bad)));
        }
        Ok(fat)
    }

    fn walk(&self, start: u32, fat: &[u32], claimed: &mut [bool]) -> ExtractResult<Vec<usize>> {
        walk_chain(start, fat, claimed, "sector")
    }
}

/// Follows `start` through `table` until end-of-chain. Each slot may be
/// visited once across all walks sharing `claimed`.
fn walk_chain(
    start: u32,
    table: &[u32],
    claimed: &mut [bool],
    unit: &str,
) -> ExtractResult<Vec<usize>> {
    let mut chain = Vec::new();
    let mut id = start;
    while id != END_OF_CHAIN {
        let index = id as usize;
        if index >= claimed.len() {
            return Err(malformed(format!("{} {} is out of range", unit, id)));
        }
        if std::mem::replace(&mut claimed[index], true) {
            return Err(malformed(format!("{} {} is reached twice", unit, id)));
        }
        chain.push(index);
        id = table
            .get(index)
            .copied()
            .ok_or_else(|| malformed(format!("{} {} has no allocation entry", unit, index)))?;
    }
    Ok(chain)
}

struct DirEntry {
    kind: u8,
    start: u32,
    size: u64,
}

impl DirEntry {
    fn parse(raw: &[u8]) -> Self {
        Self {
            kind: raw[66],
            start: u32_at(raw, 116),
            size: u64::from(u32_at(raw, 120)) | (u64::from(u32_at(raw, 124)) << 32),
        }
    }
}

fn check_length(size: u64, available: usize) -> ExtractResult<()> {
    if size > available as u64 {
        Err(malformed(format!(
            "stream declares {} bytes in a {} byte file",
            size, available
        )))
    } else {
        Ok(())
    }
}

fn ids(raw: &[u8]) -> impl Iterator<Item = u32> + '_ {
    raw.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

fn u16_at(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn u32_at(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        raw[offset],
        raw[offset + 1],
        raw[offset + 2],
        raw[offset + 3],
    ])
}

fn malformed(message: impl Into<String>) -> ExtractError {
    ExtractError::malformed(format!("compound file: {}", message.into()))
}
