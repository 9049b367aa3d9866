use std::io::Write;

use libpe::{Context, PeError};
use tempfile::NamedTempFile;

const DOS_MAGIC: u16 = 0x5A4D;
const SIGNATURE_PE: u32 = 0x0000_4550;
const SIGNATURE_NE: u32 = 0x0000_454E;

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, v: u64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

struct Layout {
    e_lfanew: usize,
    coff: usize,
    optional: usize,
}

fn layout(e_lfanew: usize) -> Layout {
    Layout {
        e_lfanew,
        coff: e_lfanew + 4,
        optional: e_lfanew + 4 + 20,
    }
}

/// Builds a PE image whose optional header is either PE32 (`pe32_plus =
/// false`) or PE32+ (`pe32_plus = true`), with `num_sections` section
/// headers (only the first is filled in with real data) and
/// `num_directories` data directories.
fn build_pe(
    pe32_plus: bool,
    num_sections: u16,
    num_directories: u32,
    dll: bool,
    file_size: usize,
) -> Vec<u8> {
    let l = layout(128);
    let optional_fixed = if pe32_plus { 112 } else { 96 };
    let declared_optional_size = optional_fixed + num_directories as usize * 8;
    let directories_offset = l.optional + optional_fixed;
    let sections_offset = l.coff + 20 + declared_optional_size;
    let section_size = 40;
    let needed = sections_offset + num_sections as usize * section_size + 0x200;
    let mut buf = vec![0u8; needed.max(file_size)];

    put_u16(&mut buf, 0, DOS_MAGIC);
    put_u32(&mut buf, 0x3c, l.e_lfanew as u32);
    put_u32(&mut buf, l.e_lfanew, SIGNATURE_PE);

    put_u16(&mut buf, l.coff, 0x014c);
    put_u16(&mut buf, l.coff + 2, num_sections);
    put_u16(&mut buf, l.coff + 16, declared_optional_size as u16);
    let characteristics: u16 = if dll { 0x2002 } else { 0x0002 };
    put_u16(&mut buf, l.coff + 18, characteristics);

    if pe32_plus {
        put_u16(&mut buf, l.optional, 0x20b);
        put_u32(&mut buf, l.optional + 16, 0x1000); // AddressOfEntryPoint
        put_u64(&mut buf, l.optional + 24, 0x1_4000_0000); // ImageBase
        put_u32(&mut buf, l.optional + 108, num_directories);
    } else {
        put_u16(&mut buf, l.optional, 0x10b);
        put_u32(&mut buf, l.optional + 16, 0x1000);
        put_u32(&mut buf, l.optional + 28, 0x0040_0000);
        put_u32(&mut buf, l.optional + 92, num_directories);
    }

    for i in 0..num_directories as usize {
        put_u32(&mut buf, directories_offset + i * 8, 0x2000);
        put_u32(&mut buf, directories_offset + i * 8 + 4, 0x40);
    }

    if num_sections > 0 {
        let name = b".text\0\0\0";
        buf[sections_offset..sections_offset + 8].copy_from_slice(name);
        put_u32(&mut buf, sections_offset + 8, 0x10); // VirtualSize
        put_u32(&mut buf, sections_offset + 12, 0x1000); // VirtualAddress
        put_u32(&mut buf, sections_offset + 16, 0x100); // SizeOfRawData
        put_u32(&mut buf, sections_offset + 20, sections_offset as u32 + num_sections as u32 * 40);
    }

    buf
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn minimal_pe32_executable() {
    let bytes = build_pe(false, 1, 1, false, 0);
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    ctx.parse().unwrap();
    assert!(ctx.is_pe());
    assert!(!ctx.is_dll());
    assert_eq!(ctx.entrypoint(), Some(0x1000));
    assert_eq!(ctx.imagebase(), Some(0x0040_0000));
}

#[test]
fn pe32_plus_with_64bit_imagebase() {
    let bytes = build_pe(true, 1, 1, false, 0);
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    ctx.parse().unwrap();
    assert!(ctx.is_pe());
    assert_eq!(ctx.imagebase(), Some(0x1_4000_0000));
}

#[test]
fn dll_characteristic_is_reported() {
    let bytes = build_pe(false, 1, 1, true, 0);
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    ctx.parse().unwrap();
    assert!(ctx.is_dll());
}

#[test]
fn truncated_three_byte_file_is_rejected() {
    let file = write_temp(&[0x4D, 0x5A, 0x00]);
    let mut ctx = Context::load(file.path()).unwrap();
    assert!(matches!(ctx.parse(), Err(PeError::InvalidLfanew)));
}

#[test]
fn e_lfanew_pointing_past_eof_is_rejected() {
    let mut bytes = vec![0u8; 64];
    put_u16(&mut bytes, 0, DOS_MAGIC);
    put_u32(&mut bytes, 0x3c, 0x1000); // points far beyond the 64-byte file
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    assert!(matches!(ctx.parse(), Err(PeError::InvalidLfanew)));
}

#[test]
fn excessive_section_count_is_rejected() {
    let bytes = build_pe(false, 200, 1, false, 0);
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    assert!(matches!(ctx.parse(), Err(PeError::TooManySections(200))));
}

#[test]
fn excessive_directory_count_is_rejected() {
    let bytes = build_pe(false, 1, 17, false, 0);
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    assert!(matches!(ctx.parse(), Err(PeError::TooManyDirectories(17))));
}

#[test]
fn single_section_rva_falls_back_outside_its_range() {
    let bytes = build_pe(false, 1, 1, false, 0);
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    ctx.parse().unwrap();
    // An RVA well outside the lone section's declared range still resolves
    // via the single-section fallback rather than returning the RVA as-is.
    let rva = 0x5000;
    let offset = ctx.rva_to_offset(rva);
    assert_ne!(offset, rva);
}

#[test]
fn ne_signature_is_recognized_but_not_parsed_further() {
    let mut bytes = build_pe(false, 1, 1, false, 0);
    put_u32(&mut bytes, 128, SIGNATURE_NE);
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    ctx.parse().unwrap();
    assert!(!ctx.is_pe());
    assert_eq!(ctx.sections_count(), 0);
}

#[test]
fn rom_optional_header_is_unsupported() {
    let mut bytes = build_pe(false, 1, 1, false, 0);
    let l = layout(128);
    put_u16(&mut bytes, l.optional, 0x107); // ROM magic
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    assert!(matches!(ctx.parse(), Err(PeError::UnsupportedImage)));
}

#[test]
fn rva_to_offset_uses_raw_size_when_virtual_size_is_zero() {
    // Single section: VA=0x2000 VS=0 RS=0x400 PTR=0x400. rva_to_offset(0x2100)
    // must fall back to SizeOfRawData for the range test since VirtualSize==0.
    let l = layout(128);
    let sections_offset = l.optional + 96 + 8; // one directory, PE32
    let mut buf = vec![0u8; sections_offset + 40 + 0x200];

    put_u16(&mut buf, 0, DOS_MAGIC);
    put_u32(&mut buf, 0x3c, l.e_lfanew as u32);
    put_u32(&mut buf, l.e_lfanew, SIGNATURE_PE);

    put_u16(&mut buf, l.coff, 0x014c);
    put_u16(&mut buf, l.coff + 2, 1); // NumberOfSections
    put_u16(&mut buf, l.coff + 16, (96 + 8) as u16);
    put_u16(&mut buf, l.coff + 18, 0x0002);

    put_u16(&mut buf, l.optional, 0x10b);
    put_u32(&mut buf, l.optional + 92, 1); // NumberOfRvaAndSizes

    let name = b".text\0\0\0";
    buf[sections_offset..sections_offset + 8].copy_from_slice(name);
    put_u32(&mut buf, sections_offset + 8, 0); // VirtualSize = 0
    put_u32(&mut buf, sections_offset + 12, 0x2000); // VirtualAddress
    put_u32(&mut buf, sections_offset + 16, 0x400); // SizeOfRawData
    put_u32(&mut buf, sections_offset + 20, 0x400); // PointerToRawData

    let file = write_temp(&buf);
    let mut ctx = Context::load(file.path()).unwrap();
    ctx.parse().unwrap();
    assert_eq!(ctx.rva_to_offset(0x2100), 0x500);
}

#[test]
fn not_a_file_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = Context::load(dir.path()).unwrap_err();
    assert!(matches!(err, PeError::NotAFile));
}

#[test]
fn missing_mz_signature_is_rejected() {
    let bytes = vec![0u8; 256];
    let file = write_temp(&bytes);
    let mut ctx = Context::load(file.path()).unwrap();
    assert!(matches!(ctx.parse(), Err(PeError::NotAPEFile)));
}
