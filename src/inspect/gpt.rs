//! GUID partition tables

use anyhow::{Context, Result, bail};
use std::io::{Read, Seek, SeekFrom};

use super::Partition;
use super::mbr::read_sector;

const SIGNATURE: &[u8; 8] = b"EFI PART";
const MIN_ENTRY_SIZE: u32 = 128;
const MAX_ENTRIES: u32 = 1024;
/// Largest partition entry array accepted, in bytes
const MAX_TABLE_BYTES: usize = 1 << 20;

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn le_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Read the primary GPT assuming `sector_size`.
///
/// `Ok(None)` means there is no GPT header at LBA 1 for this sector size.
pub(crate) fn partitions<R: Read + Seek>(
    reader: &mut R,
    sector_size: u64,
) -> Result<Option<Vec<Partition>>> {
    let header = match read_sector(reader, 1, sector_size) {
        Ok(header) => header,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("reading GPT header"),
    };
    if &header[..8] != SIGNATURE {
        return Ok(None);
    }

    let entries_lba = le_u64(&header, 72);
    let entry_count = le_u32(&header, 80);
    let entry_size = le_u32(&header, 84);

    let table_len = (entry_count as usize).checked_mul(entry_size as usize);
    let table_len = match table_len {
        Some(len)
            if entry_size >= MIN_ENTRY_SIZE
                && u64::from(entry_size) <= sector_size
                && entry_size % 8 == 0
                && entry_count <= MAX_ENTRIES
                && len <= MAX_TABLE_BYTES =>
        {
            len
        }
        _ => bail!("corrupt GPT header: {entry_count} entries of {entry_size} bytes"),
    };
    let Some(table_offset) = entries_lba.checked_mul(sector_size) else {
        bail!("corrupt GPT header: entry array at sector {entries_lba} is out of range");
    };

    let mut table = vec![0u8; table_len];
    reader
        .seek(SeekFrom::Start(table_offset))
        .and_then(|_| reader.read_exact(&mut table))
        .with_context(|| format!("reading GPT entries at sector {entries_lba}"))?;

    let mut parts = Vec::new();
    for (slot, entry) in table.chunks_exact(entry_size as usize).enumerate() {
        if entry[..16].iter().all(|b| *b == 0) {
            continue;
        }
        let first = le_u64(entry, 32);
        let last = le_u64(entry, 40);
        let Some(part) = Partition::from_lba(slot as u32 + 1, first, last, sector_size) else {
            bail!("corrupt GPT entry {}: sectors {first}..={last} out of range", slot + 1);
        };
        parts.push(part);
    }

    Ok(Some(parts))
}
