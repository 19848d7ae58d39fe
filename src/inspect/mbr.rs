//! DOS/MBR partition tables, including logical partitions in an extended container

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use super::Partition;

const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];

pub(crate) const PROTECTIVE_GPT: u8 = 0xEE;
const EXTENDED_TYPES: [u8; 3] = [0x05, 0x0F, 0x85];

/// Logical partitions beyond this are treated as a corrupt EBR chain
const MAX_LOGICAL: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MbrEntry {
    pub status: u8,
    pub kind: u8,
    pub first_lba: u32,
    pub sectors: u32,
}

impl MbrEntry {
    fn is_used(&self) -> bool {
        self.kind != 0 && self.sectors != 0
    }

    fn is_extended(&self) -> bool {
        EXTENDED_TYPES.contains(&self.kind)
    }
}

/// Decode the four slots of a boot record sector.
///
/// Returns `None` when the sector has no boot signature or a slot carries a
/// status byte other than 0x00/0x80, which rules out a partition table.
pub(crate) fn parse_entries(sector: &[u8]) -> Option<[MbrEntry; 4]> {
    if sector.len() < 512 || sector[510..512] != SIGNATURE {
        return None;
    }

    let mut entries = [MbrEntry {
        status: 0,
        kind: 0,
        first_lba: 0,
        sectors: 0,
    }; 4];

    for (slot, entry) in entries.iter_mut().enumerate() {
        let raw = &sector[TABLE_OFFSET + slot * ENTRY_SIZE..TABLE_OFFSET + (slot + 1) * ENTRY_SIZE];
        *entry = MbrEntry {
            status: raw[0],
            kind: raw[4],
            first_lba: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            sectors: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        };
        if entry.status != 0x00 && entry.status != 0x80 {
            return None;
        }
    }

    Some(entries)
}

pub(crate) fn is_protective(entries: &[MbrEntry; 4]) -> bool {
    entries.iter().any(|e| e.kind == PROTECTIVE_GPT)
}

/// List primary, extended and logical partitions, in the order parted shows them.
pub(crate) fn partitions<R: Read + Seek>(
    reader: &mut R,
    entries: &[MbrEntry; 4],
    sector_size: u64,
) -> Result<Vec<Partition>> {
    let mut parts = Vec::new();
    let mut extended = None;

    for (slot, entry) in entries.iter().enumerate() {
        if !entry.is_used() {
            continue;
        }
        let first = u64::from(entry.first_lba);
        let last = first + u64::from(entry.sectors) - 1;
        let part = Partition::from_lba(slot as u32 + 1, first, last, sector_size)
            .with_context(|| format!("corrupt MBR entry {}: sectors out of range", slot + 1))?;
        parts.push(part);

        if entry.is_extended() && extended.is_none() {
            extended = Some(first);
        }
    }

    if let Some(ext_base) = extended {
        parts.extend(logical_partitions(reader, ext_base, sector_size)?);
    }

    Ok(parts)
}

/// Walk the EBR chain of the extended container starting at `ext_base`.
fn logical_partitions<R: Read + Seek>(
    reader: &mut R,
    ext_base: u64,
    sector_size: u64,
) -> Result<Vec<Partition>> {
    let mut parts = Vec::new();
    let mut visited = HashSet::new();
    let mut ebr_lba = ext_base;

    loop {
        if !visited.insert(ebr_lba) || parts.len() >= MAX_LOGICAL {
            bail!("extended partition chain loops or is too long (at sector {ebr_lba})");
        }

        let sector = read_sector(reader, ebr_lba, sector_size)
            .with_context(|| format!("reading extended boot record at sector {ebr_lba}"))?;
        let Some(entries) = parse_entries(&sector) else {
            // An empty extended container has no valid EBR
            break;
        };

        let logical = entries[0];
        if logical.is_used() {
            let first = ebr_lba + u64::from(logical.first_lba);
            let last = first + u64::from(logical.sectors) - 1;
            let part_num = 5 + parts.len() as u32;
            let part = Partition::from_lba(part_num, first, last, sector_size).with_context(|| {
                format!("corrupt logical partition {part_num}: sectors out of range")
            })?;
            parts.push(part);
        }

        let link = entries[1];
        if !link.is_used() || !link.is_extended() {
            break;
        }
        ebr_lba = ext_base + u64::from(link.first_lba);
    }

    Ok(parts)
}

pub(crate) fn read_sector<R: Read + Seek>(
    reader: &mut R,
    lba: u64,
    sector_size: u64,
) -> std::io::Result<Vec<u8>> {
    let mut sector = vec![0u8; sector_size as usize];
    reader.seek(SeekFrom::Start(lba * sector_size))?;
    reader.read_exact(&mut sector)?;
    Ok(sector)
}
