//! RVA ↔ raw file offset translation and section/directory lookups.
//!
//! Every function here takes the already-parsed index plus the mapping
//! and re-validates the specific section/directory entry it touches before
//! reading it, since those entries are left unvalidated at parse time.

use crate::headers::{self, SectionHeader, SECTION_HEADER_SIZE};
use crate::index::ParsedIndex;
use crate::mapping::Mapping;

/// Decodes the `n`th section header, or `None` if its bytes don't fit in
/// the mapping (a malformed/truncated file can have a `NumberOfSections`
/// that lies about how much section-table data actually follows).
fn decode_section(mapping: &Mapping, offset: usize) -> Option<SectionHeader> {
    let bytes = mapping.slice(offset, SECTION_HEADER_SIZE)?;
    let (_, hdr) = headers::parse_section_header(bytes).ok()?;
    Some(hdr)
}

fn sections_iter<'a>(
    index: &'a ParsedIndex,
    mapping: &'a Mapping,
) -> impl Iterator<Item = (usize, SectionHeader)> + 'a {
    index
        .section_offsets
        .iter()
        .copied()
        .filter_map(move |off| decode_section(mapping, off).map(|s| (off, s)))
}

/// Returns the first section whose `[VirtualAddress, VirtualAddress +
/// VirtualSize]` range contains `rva` (inclusive upper bound, kept for
/// compatibility with existing callers even though it disagrees with
/// [`rva_to_offset`]'s half-open ranges). Unlike [`rva_to_offset`], this uses
/// the raw `VirtualSize` field with no `SizeOfRawData` fallback: a section
/// with `VirtualSize == 0` has an empty virtual range here regardless of how
/// much raw data it carries on disk. Returns `None` for `rva == 0` or when
/// there is no section table.
pub fn rva_to_section(index: &ParsedIndex, mapping: &Mapping, rva: u64) -> Option<SectionHeader> {
    if rva == 0 || index.section_offsets.is_empty() {
        return None;
    }
    for (_, section) in sections_iter(index, mapping) {
        let start = section.virtual_address as u64;
        let end = start + section.virtual_size as u64;
        if rva >= start && rva <= end {
            return Some(section);
        }
    }
    None
}

/// Converts an RVA to a raw file offset: scans sections for a half-open
/// `[VirtualAddress, VirtualAddress + effective_size)` range containing
/// `rva`, falling back to treating the lone section as covering the whole
/// image when there's exactly one and none matched.
pub fn rva_to_offset(index: &ParsedIndex, mapping: &Mapping, rva: u64) -> u64 {
    if rva == 0 {
        return 0;
    }
    if index.section_offsets.is_empty() {
        return rva;
    }

    let sections: Vec<SectionHeader> = sections_iter(index, mapping).map(|(_, s)| s).collect();

    for section in &sections {
        let size = section.effective_size() as u64;
        let start = section.virtual_address as u64;
        if start <= rva && rva < start + size {
            return rva - start + section.pointer_to_raw_data as u64;
        }
    }

    if sections.len() == 1 {
        let section = &sections[0];
        return rva - section.virtual_address as u64 + section.pointer_to_raw_data as u64;
    }

    rva
}

/// Converts a raw file offset back to an RVA, or 0 if none of the sections
/// cover it (or there are none).
pub fn offset_to_rva(index: &ParsedIndex, mapping: &Mapping, ofs: u64) -> u64 {
    if ofs == 0 || index.section_offsets.is_empty() {
        return 0;
    }
    for section in sections_iter(index, mapping).map(|(_, s)| s) {
        let start = section.pointer_to_raw_data as u64;
        let end = start + section.size_of_raw_data as u64;
        if start <= ofs && ofs < end {
            return ofs - start + section.virtual_address as u64;
        }
    }
    0
}

/// Linear scan by name; compares up to the fixed 8-byte name field, first
/// match wins.
pub fn section_by_name(index: &ParsedIndex, mapping: &Mapping, name: &str) -> Option<SectionHeader> {
    sections_iter(index, mapping)
        .map(|(_, s)| s)
        .find(|s| s.name() == name)
}

/// Returns the offset of the section owning `index_in_table`, re-decoded.
pub fn section_at(index: &ParsedIndex, mapping: &Mapping, idx: usize) -> Option<SectionHeader> {
    let offset = *index.section_offsets.get(idx)?;
    decode_section(mapping, offset)
}

/// Returns the directory at `entry`, or `None` if `entry >= num_directories`
/// or its bytes don't fit in the mapping.
pub fn directory_by_entry(
    index: &ParsedIndex,
    mapping: &Mapping,
    entry: usize,
) -> Option<headers::DataDirectory> {
    let offset = *index.directory_offsets.get(entry)?;
    let bytes = mapping.slice(offset, headers::DATA_DIRECTORY_SIZE)?;
    let (_, dir) = headers::parse_data_directory(bytes).ok()?;
    Some(dir)
}

/// Bounds-checked access to a section's raw-data bytes.
pub fn section_data<'a>(mapping: &'a Mapping, section: &SectionHeader) -> Option<&'a [u8]> {
    mapping.slice(
        section.pointer_to_raw_data as usize,
        section.size_of_raw_data as usize,
    )
}
