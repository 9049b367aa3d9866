//! The structural parser: walks DOS → NT signature → COFF → Optional →
//! Data Directories → Section Table.

use crate::error::{PeError, Result};
use crate::headers::{
    self, CoffHeader, DosHeader, COFF_HEADER_SIZE, DATA_DIRECTORY_SIZE, E_LFANEW_OFFSET,
    OPTIONAL_HEADER_32_SIZE, OPTIONAL_HEADER_64_SIZE, OPTIONAL_MAGIC_PE32,
    OPTIONAL_MAGIC_PE32_PLUS, SECTION_HEADER_SIZE, SIGNATURE_NE, SIGNATURE_PE,
};
use crate::index::{OptionalHeader, OptionalKind, ParsedIndex, MAX_DIRECTORIES, MAX_SECTIONS};
use crate::mapping::Mapping;

/// Runs the eight-step walk against an already-mapped file. Produces a
/// `ParsedIndex` or fails without mutating the mapping.
pub fn parse(mapping: &Mapping) -> Result<ParsedIndex> {
    // Step 1: DOS header.
    let magic_bytes = mapping.slice(0, 2).ok_or(PeError::NotAPEFile)?;
    let e_magic = u16::from_le_bytes([magic_bytes[0], magic_bytes[1]]);
    if e_magic != headers::DOS_MAGIC {
        tracing::warn!(e_magic, "DOS magic mismatch");
        return Err(PeError::NotAPEFile);
    }

    let lfanew_bytes = mapping
        .slice(E_LFANEW_OFFSET, 4)
        .ok_or(PeError::InvalidLfanew)?;
    let e_lfanew =
        u32::from_le_bytes([lfanew_bytes[0], lfanew_bytes[1], lfanew_bytes[2], lfanew_bytes[3]]);
    let dos_header = DosHeader { e_magic, e_lfanew };
    tracing::trace!(e_lfanew, "DOS header reached");

    // Step 2: NT/NE signature.
    let signature_offset = e_lfanew as usize;
    let sig_bytes = mapping
        .slice(signature_offset, 4)
        .ok_or(PeError::InvalidLfanew)?;
    let signature = u32::from_le_bytes([sig_bytes[0], sig_bytes[1], sig_bytes[2], sig_bytes[3]]);
    if signature != SIGNATURE_PE && signature != SIGNATURE_NE {
        tracing::warn!(signature, "unrecognized NT/NE signature");
        return Err(PeError::InvalidSignature);
    }
    tracing::trace!(signature, "NT/NE signature reached");

    // NE is recognized but only shallowly: acknowledge it and stop here.
    // `is_pe()` returns false for NE since `signature != SIGNATURE_PE`.
    if signature == SIGNATURE_NE {
        tracing::debug!("NE (16-bit) signature recognized, not parsed further");
        return Ok(ParsedIndex {
            dos_header,
            signature,
            signature_offset,
            coff_header: placeholder_coff_header(),
            coff_header_offset: signature_offset + 4,
            optional_kind: OptionalKind::Unknown,
            optional_header: OptionalHeader::Pe32(placeholder_optional_header_32()),
            optional_header_offset: signature_offset + 4,
            optional_header_length: 0,
            entrypoint: 0,
            imagebase: 0,
            num_directories: 0,
            directories_offset: None,
            directory_offsets: Vec::new(),
            num_sections: 0,
            sections_offset: None,
            section_offsets: Vec::new(),
        });
    }

    // Step 3: COFF header.
    let coff_header_offset = signature_offset + 4;
    let coff_bytes = mapping
        .slice(coff_header_offset, COFF_HEADER_SIZE)
        .ok_or(PeError::MissingCOFFHeader)?;
    let (_, coff_header) = headers::parse_coff_header(coff_bytes)
        .map_err(|_| PeError::MissingCOFFHeader)?;
    tracing::trace!(
        number_of_sections = coff_header.number_of_sections,
        "COFF header reached"
    );

    // Step 4: optional header classification.
    let optional_header_offset = coff_header_offset + COFF_HEADER_SIZE;
    let magic_bytes = mapping
        .slice(optional_header_offset, 2)
        .ok_or(PeError::MissingOptionalHeader)?;
    let opt_magic = u16::from_le_bytes([magic_bytes[0], magic_bytes[1]]);

    let (optional_kind, optional_header, optional_header_length, entrypoint, imagebase, num_directories) =
        match opt_magic {
            OPTIONAL_MAGIC_PE32 => {
                let body = mapping
                    .slice(optional_header_offset + 2, OPTIONAL_HEADER_32_SIZE - 2)
                    .ok_or(PeError::MissingOptionalHeader)?;
                let (_, hdr) = headers::parse_optional_header_32(body)
                    .map_err(|_| PeError::MissingOptionalHeader)?;
                let entrypoint = hdr.address_of_entry_point as u64;
                let imagebase = hdr.image_base as u64;
                let num_directories = hdr.number_of_rva_and_sizes;
                (
                    OptionalKind::Pe32,
                    OptionalHeader::Pe32(hdr),
                    OPTIONAL_HEADER_32_SIZE,
                    entrypoint,
                    imagebase,
                    num_directories,
                )
            }
            OPTIONAL_MAGIC_PE32_PLUS => {
                let body = mapping
                    .slice(optional_header_offset + 2, OPTIONAL_HEADER_64_SIZE - 2)
                    .ok_or(PeError::MissingOptionalHeader)?;
                let (_, hdr) = headers::parse_optional_header_64(body)
                    .map_err(|_| PeError::MissingOptionalHeader)?;
                let entrypoint = hdr.address_of_entry_point as u64;
                let imagebase = hdr.image_base;
                let num_directories = hdr.number_of_rva_and_sizes;
                (
                    OptionalKind::Pe32Plus,
                    OptionalHeader::Pe32Plus(hdr),
                    OPTIONAL_HEADER_64_SIZE,
                    entrypoint,
                    imagebase,
                    num_directories,
                )
            }
            _ => {
                tracing::warn!(opt_magic, "unsupported optional header magic");
                return Err(PeError::UnsupportedImage);
            }
        };
    tracing::trace!(?optional_kind, num_directories, "optional header reached");

    // Step 5: directory count bound.
    if num_directories > MAX_DIRECTORIES {
        tracing::warn!(num_directories, "too many data directories");
        return Err(PeError::TooManyDirectories(num_directories));
    }

    // Step 6: section count bound.
    let num_sections = coff_header.number_of_sections as u32;
    if num_sections > MAX_SECTIONS {
        tracing::warn!(num_sections, "too many sections");
        return Err(PeError::TooManySections(num_sections));
    }
    tracing::trace!(num_directories, num_sections, "directory/section counts in bounds");

    // Step 7: directory pointer table (no per-entry bounds check at parse time).
    let (directories_offset, directory_offsets) = if num_directories > 0 {
        let directories_ptr = optional_header_offset + optional_header_length;
        let offsets = (0..num_directories as usize)
            .map(|i| directories_ptr + i * DATA_DIRECTORY_SIZE)
            .collect();
        (Some(directories_ptr), offsets)
    } else {
        (None, Vec::new())
    };
    tracing::trace!(?directories_offset, "directory pointer table built");

    // Step 8: section pointer table, using the *declared* SizeOfOptionalHeader.
    let (sections_offset, section_offsets) = if num_sections > 0 {
        let sections_ptr =
            signature_offset + 4 + COFF_HEADER_SIZE + coff_header.size_of_optional_header as usize;
        let offsets = (0..num_sections as usize)
            .map(|i| sections_ptr + i * SECTION_HEADER_SIZE)
            .collect();
        (Some(sections_ptr), offsets)
    } else {
        (None, Vec::new())
    };
    tracing::trace!(?sections_offset, "section pointer table built");

    Ok(ParsedIndex {
        dos_header,
        signature,
        signature_offset,
        coff_header,
        coff_header_offset,
        optional_kind,
        optional_header,
        optional_header_offset,
        optional_header_length,
        entrypoint,
        imagebase,
        num_directories,
        directories_offset,
        directory_offsets,
        num_sections,
        sections_offset,
        section_offsets,
    })
}

/// An all-zero COFF header used only to populate the `Unknown`/NE branch of
/// `ParsedIndex`, which by construction is never inspected by a caller that
/// checks `is_pe()` first.
fn placeholder_coff_header() -> CoffHeader {
    CoffHeader {
        machine: 0u16.into(),
        number_of_sections: 0,
        time_date_stamp: 0,
        pointer_to_symbol_table: 0,
        number_of_symbols: 0,
        size_of_optional_header: 0,
        characteristics: headers::Characteristics::empty(),
    }
}

fn placeholder_optional_header_32() -> headers::OptionalHeader32 {
    headers::OptionalHeader32 {
        major_linker_version: 0,
        minor_linker_version: 0,
        size_of_code: 0,
        size_of_initialized_data: 0,
        size_of_uninitialized_data: 0,
        address_of_entry_point: 0,
        base_of_code: 0,
        base_of_data: 0,
        image_base: 0,
        section_alignment: 0,
        file_alignment: 0,
        major_os_version: 0,
        minor_os_version: 0,
        major_image_version: 0,
        minor_image_version: 0,
        major_subsystem_version: 0,
        minor_subsystem_version: 0,
        win32_version_value: 0,
        size_of_image: 0,
        size_of_headers: 0,
        checksum: 0,
        subsystem: 0u16.into(),
        dll_characteristics: headers::DllCharacteristics::empty(),
        size_of_stack_reserve: 0,
        size_of_stack_commit: 0,
        size_of_heap_reserve: 0,
        size_of_heap_commit: 0,
        loader_flags: 0,
        number_of_rva_and_sizes: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, minimal_pe32};
    use crate::index::OptionalKind;
    use crate::mapping::Mapping;

    fn put_u32(buf: &mut [u8], at: usize, v: u32) {
        buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u16(buf: &mut [u8], at: usize, v: u16) {
        buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    #[test]
    fn parses_minimal_pe32() {
        let mapping = Mapping::from_bytes(minimal_pe32());
        let index = parse(&mapping).unwrap();
        assert!(index.is_pe());
        assert!(!index.is_dll());
        assert_eq!(index.optional_kind, OptionalKind::Pe32);
        assert_eq!(index.entrypoint, 0x1000);
        assert_eq!(index.imagebase, 0x0040_0000);
        assert_eq!(index.num_directories, 1);
        assert_eq!(index.directory_offsets.len(), 1);
        assert_eq!(index.num_sections, 1);
        assert_eq!(index.section_offsets.len(), 1);
    }

    #[test]
    fn rejects_missing_dos_magic() {
        let mut bytes = minimal_pe32();
        bytes[0] = 0;
        let mapping = Mapping::from_bytes(bytes);
        assert!(matches!(parse(&mapping), Err(PeError::NotAPEFile)));
    }

    #[test]
    fn rejects_truncated_file() {
        let mapping = Mapping::from_bytes(vec![b'M', b'Z']);
        assert!(matches!(parse(&mapping), Err(PeError::InvalidLfanew)));
    }

    #[test]
    fn rejects_lfanew_past_eof() {
        let mut bytes = minimal_pe32();
        bytes.truncate(64);
        let mapping = Mapping::from_bytes(bytes);
        assert!(matches!(parse(&mapping), Err(PeError::InvalidLfanew)));
    }

    #[test]
    fn recognizes_ne_signature_without_full_parse() {
        let mut bytes = minimal_pe32();
        put_u32(
            &mut bytes,
            fixtures::E_LFANEW as usize,
            headers::SIGNATURE_NE,
        );
        let mapping = Mapping::from_bytes(bytes);
        let index = parse(&mapping).unwrap();
        assert!(!index.is_pe());
        assert_eq!(index.signature, headers::SIGNATURE_NE);
        assert_eq!(index.num_sections, 0);
    }

    #[test]
    fn rejects_too_many_directories() {
        let mut bytes = minimal_pe32();
        put_u32(
            &mut bytes,
            fixtures::OPTIONAL_OFFSET + 92,
            MAX_DIRECTORIES + 1,
        );
        let mapping = Mapping::from_bytes(bytes);
        assert!(matches!(
            parse(&mapping),
            Err(PeError::TooManyDirectories(n)) if n == MAX_DIRECTORIES + 1
        ));
    }

    #[test]
    fn rejects_too_many_sections() {
        let mut bytes = minimal_pe32();
        put_u16(
            &mut bytes,
            fixtures::COFF_OFFSET + 2,
            (MAX_SECTIONS + 1) as u16,
        );
        let mapping = Mapping::from_bytes(bytes);
        assert!(matches!(
            parse(&mapping),
            Err(PeError::TooManySections(n)) if n == MAX_SECTIONS + 1
        ));
    }
}
