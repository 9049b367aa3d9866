//! On-disk struct layouts and their decoders.
//!
//! Every decoder here is handed a byte slice whose length has already been
//! validated by the caller against the mapping via [`crate::mapping::Mapping::contains`] —
//! the decoders themselves never touch the mapping, they only read
//! fixed-size fields out of nom via little-endian number combinators.

use nom::number::complete::{le_u16, le_u32, le_u64, le_u8};
use nom::sequence::tuple;
use nom::IResult;

pub const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
pub const E_LFANEW_OFFSET: usize = 0x3C;

pub const SIGNATURE_PE: u32 = 0x0000_4550; // "PE\0\0"
pub const SIGNATURE_NE: u32 = 0x0000_454E; // "NE\0\0"

pub const OPTIONAL_MAGIC_PE32: u16 = 0x10b;
pub const OPTIONAL_MAGIC_PE32_PLUS: u16 = 0x20b;
pub const OPTIONAL_MAGIC_ROM: u16 = 0x107;

pub const COFF_HEADER_SIZE: usize = 20;
pub const OPTIONAL_HEADER_32_SIZE: usize = 96;
pub const OPTIONAL_HEADER_64_SIZE: usize = 112;
pub const DATA_DIRECTORY_SIZE: usize = 8;
pub const SECTION_HEADER_SIZE: usize = 40;
pub const SECTION_NAME_SIZE: usize = 8;

/// `IMAGE_FILE_CHARACTERISTICS`, the COFF-header characteristics bitset.
bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Characteristics: u16 {
        const RELOCS_STRIPPED         = 0x0001;
        const EXECUTABLE_IMAGE        = 0x0002;
        const LINE_NUMS_STRIPPED      = 0x0004;
        const LOCAL_SYMS_STRIPPED     = 0x0008;
        const AGGRESSIVE_WS_TRIM      = 0x0010;
        const LARGE_ADDRESS_AWARE     = 0x0020;
        const RESERVED                = 0x0040;
        const BYTES_REVERSED_LO       = 0x0080;
        const BIT32_MACHINE           = 0x0100;
        const DEBUG_STRIPPED          = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP       = 0x0800;
        const SYSTEM                  = 0x1000;
        const DLL                     = 0x2000;
        const UP_SYSTEM_ONLY          = 0x4000;
        const BYTES_REVERSED_HI       = 0x8000;
    }
}

/// `IMAGE_DLLCHARACTERISTICS_*`, the optional-header DLL characteristics bitset.
bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DllCharacteristics: u16 {
        const HIGH_ENTROPY_VA       = 0x0020;
        const DYNAMIC_BASE          = 0x0040;
        const FORCE_INTEGRITY       = 0x0080;
        const NX_COMPAT             = 0x0100;
        const NO_ISOLATION          = 0x0200;
        const NO_SEH                = 0x0400;
        const NO_BIND               = 0x0800;
        const APPCONTAINER          = 0x1000;
        const WDM_DRIVER            = 0x2000;
        const GUARD_CF              = 0x4000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// `IMAGE_SCN_*`, the section-header characteristics bitset.
bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SectionCharacteristics: u32 {
        const TYPE_NO_PAD            = 0x0000_0008;
        const CNT_CODE               = 0x0000_0020;
        const CNT_INITIALIZED_DATA   = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_OTHER              = 0x0000_0100;
        const LNK_INFO               = 0x0000_0200;
        const LNK_REMOVE             = 0x0000_0800;
        const LNK_COMDAT             = 0x0000_1000;
        const GPREL                  = 0x0000_8000;
        const MEM_PURGEABLE          = 0x0002_0000;
        const MEM_LOCKED             = 0x0004_0000;
        const MEM_PRELOAD            = 0x0008_0000;
        const ALIGN_1BYTES           = 0x0010_0000;
        const ALIGN_2BYTES           = 0x0020_0000;
        const ALIGN_4BYTES           = 0x0030_0000;
        const ALIGN_8BYTES           = 0x0040_0000;
        const ALIGN_16BYTES          = 0x0050_0000;
        const LNK_NRELOC_OVFL        = 0x0100_0000;
        const MEM_DISCARDABLE        = 0x0200_0000;
        const MEM_NOT_CACHED         = 0x0400_0000;
        const MEM_NOT_PAGED          = 0x0800_0000;
        const MEM_SHARED             = 0x1000_0000;
        const MEM_EXECUTE            = 0x2000_0000;
        const MEM_READ               = 0x4000_0000;
        const MEM_WRITE              = 0x8000_0000;
    }
}

/// COFF `Machine` field. Unrecognized values do not fail parsing; they
/// classify as `Unknown(raw)` instead of rejecting the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Unknown(u16),
    I386,
    Arm,
    ArmNt,
    Arm64,
    Amd64,
    Ia64,
    Thumb,
}

impl From<u16> for Machine {
    fn from(raw: u16) -> Self {
        match raw {
            0x014c => Machine::I386,
            0x01c0 => Machine::Arm,
            0x01c4 => Machine::ArmNt,
            0xaa64 => Machine::Arm64,
            0x8664 => Machine::Amd64,
            0x0200 => Machine::Ia64,
            0x01c2 => Machine::Thumb,
            other => Machine::Unknown(other),
        }
    }
}

/// Optional-header `Subsystem` field, same infallible-with-fallback treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Unknown(u16),
    Native,
    WindowsGui,
    WindowsCui,
    Os2Cui,
    PosixCui,
    NativeWindows,
    WindowsCeGui,
    EfiApplication,
    EfiBootServiceDriver,
    EfiRuntimeDriver,
    EfiRom,
    Xbox,
    WindowsBootApplication,
}

impl From<u16> for Subsystem {
    fn from(raw: u16) -> Self {
        match raw {
            1 => Subsystem::Native,
            2 => Subsystem::WindowsGui,
            3 => Subsystem::WindowsCui,
            5 => Subsystem::Os2Cui,
            7 => Subsystem::PosixCui,
            8 => Subsystem::NativeWindows,
            9 => Subsystem::WindowsCeGui,
            10 => Subsystem::EfiApplication,
            11 => Subsystem::EfiBootServiceDriver,
            12 => Subsystem::EfiRuntimeDriver,
            13 => Subsystem::EfiRom,
            14 => Subsystem::Xbox,
            16 => Subsystem::WindowsBootApplication,
            other => Subsystem::Unknown(other),
        }
    }
}

/// The fields of `IMAGE_DOS_HEADER` the core actually uses. The full 64-byte
/// MS-DOS stub header is otherwise irrelevant to PE parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    pub e_magic: u16,
    pub e_lfanew: u32,
}

/// `IMAGE_FILE_HEADER`, immediately following the 4-byte NT signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: Characteristics,
}

pub fn parse_coff_header(i: &[u8]) -> IResult<&[u8], CoffHeader> {
    let (i, (machine, number_of_sections, time_date_stamp, pointer_to_symbol_table,
        number_of_symbols, size_of_optional_header, characteristics)) =
        tuple((le_u16, le_u16, le_u32, le_u32, le_u32, le_u16, le_u16))(i)?;
    Ok((
        i,
        CoffHeader {
            machine: machine.into(),
            number_of_sections,
            time_date_stamp,
            pointer_to_symbol_table,
            number_of_symbols,
            size_of_optional_header,
            characteristics: Characteristics::from_bits_truncate(characteristics),
        },
    ))
}

/// The PE32 (32-bit) optional header's fixed-size part (96 bytes), i.e.
/// excluding the variable-length data-directory array that follows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionalHeader32 {
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_os_version: u16,
    pub minor_os_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: DllCharacteristics,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// Parses the fixed part *after* the 2-byte magic has already been consumed.
pub fn parse_optional_header_32(i: &[u8]) -> IResult<&[u8], OptionalHeader32> {
    let (i, major_linker_version) = le_u8(i)?;
    let (i, minor_linker_version) = le_u8(i)?;
    let (i, size_of_code) = le_u32(i)?;
    let (i, size_of_initialized_data) = le_u32(i)?;
    let (i, size_of_uninitialized_data) = le_u32(i)?;
    let (i, address_of_entry_point) = le_u32(i)?;
    let (i, base_of_code) = le_u32(i)?;
    let (i, base_of_data) = le_u32(i)?;
    let (i, image_base) = le_u32(i)?;
    let (i, section_alignment) = le_u32(i)?;
    let (i, file_alignment) = le_u32(i)?;
    let (i, major_os_version) = le_u16(i)?;
    let (i, minor_os_version) = le_u16(i)?;
    let (i, major_image_version) = le_u16(i)?;
    let (i, minor_image_version) = le_u16(i)?;
    let (i, major_subsystem_version) = le_u16(i)?;
    let (i, minor_subsystem_version) = le_u16(i)?;
    let (i, win32_version_value) = le_u32(i)?;
    let (i, size_of_image) = le_u32(i)?;
    let (i, size_of_headers) = le_u32(i)?;
    let (i, checksum) = le_u32(i)?;
    let (i, subsystem) = le_u16(i)?;
    let (i, dll_characteristics) = le_u16(i)?;
    let (i, size_of_stack_reserve) = le_u32(i)?;
    let (i, size_of_stack_commit) = le_u32(i)?;
    let (i, size_of_heap_reserve) = le_u32(i)?;
    let (i, size_of_heap_commit) = le_u32(i)?;
    let (i, loader_flags) = le_u32(i)?;
    let (i, number_of_rva_and_sizes) = le_u32(i)?;
    Ok((
        i,
        OptionalHeader32 {
            major_linker_version,
            minor_linker_version,
            size_of_code,
            size_of_initialized_data,
            size_of_uninitialized_data,
            address_of_entry_point,
            base_of_code,
            base_of_data,
            image_base,
            section_alignment,
            file_alignment,
            major_os_version,
            minor_os_version,
            major_image_version,
            minor_image_version,
            major_subsystem_version,
            minor_subsystem_version,
            win32_version_value,
            size_of_image,
            size_of_headers,
            checksum,
            subsystem: subsystem.into(),
            dll_characteristics: DllCharacteristics::from_bits_truncate(dll_characteristics),
            size_of_stack_reserve,
            size_of_stack_commit,
            size_of_heap_reserve,
            size_of_heap_commit,
            loader_flags,
            number_of_rva_and_sizes,
        },
    ))
}

/// The PE32+ (64-bit) optional header's fixed-size part (112 bytes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionalHeader64 {
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_os_version: u16,
    pub minor_os_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: DllCharacteristics,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

pub fn parse_optional_header_64(i: &[u8]) -> IResult<&[u8], OptionalHeader64> {
    let (i, major_linker_version) = le_u8(i)?;
    let (i, minor_linker_version) = le_u8(i)?;
    let (i, size_of_code) = le_u32(i)?;
    let (i, size_of_initialized_data) = le_u32(i)?;
    let (i, size_of_uninitialized_data) = le_u32(i)?;
    let (i, address_of_entry_point) = le_u32(i)?;
    let (i, base_of_code) = le_u32(i)?;
    let (i, image_base) = le_u64(i)?;
    let (i, section_alignment) = le_u32(i)?;
    let (i, file_alignment) = le_u32(i)?;
    let (i, major_os_version) = le_u16(i)?;
    let (i, minor_os_version) = le_u16(i)?;
    let (i, major_image_version) = le_u16(i)?;
    let (i, minor_image_version) = le_u16(i)?;
    let (i, major_subsystem_version) = le_u16(i)?;
    let (i, minor_subsystem_version) = le_u16(i)?;
    let (i, win32_version_value) = le_u32(i)?;
    let (i, size_of_image) = le_u32(i)?;
    let (i, size_of_headers) = le_u32(i)?;
    let (i, checksum) = le_u32(i)?;
    let (i, subsystem) = le_u16(i)?;
    let (i, dll_characteristics) = le_u16(i)?;
    let (i, size_of_stack_reserve) = le_u64(i)?;
    let (i, size_of_stack_commit) = le_u64(i)?;
    let (i, size_of_heap_reserve) = le_u64(i)?;
    let (i, size_of_heap_commit) = le_u64(i)?;
    let (i, loader_flags) = le_u32(i)?;
    let (i, number_of_rva_and_sizes) = le_u32(i)?;
    Ok((
        i,
        OptionalHeader64 {
            major_linker_version,
            minor_linker_version,
            size_of_code,
            size_of_initialized_data,
            size_of_uninitialized_data,
            address_of_entry_point,
            base_of_code,
            image_base,
            section_alignment,
            file_alignment,
            major_os_version,
            minor_os_version,
            major_image_version,
            minor_image_version,
            major_subsystem_version,
            minor_subsystem_version,
            win32_version_value,
            size_of_image,
            size_of_headers,
            checksum,
            subsystem: subsystem.into(),
            dll_characteristics: DllCharacteristics::from_bits_truncate(dll_characteristics),
            size_of_stack_reserve,
            size_of_stack_commit,
            size_of_heap_reserve,
            size_of_heap_commit,
            loader_flags,
            number_of_rva_and_sizes,
        },
    ))
}

/// `IMAGE_DATA_DIRECTORY`: an (RVA, size) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

pub fn parse_data_directory(i: &[u8]) -> IResult<&[u8], DataDirectory> {
    let (i, (virtual_address, size)) = tuple((le_u32, le_u32))(i)?;
    Ok((i, DataDirectory { virtual_address, size }))
}

/// `IMAGE_SECTION_HEADER` (40 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name_raw: [u8; SECTION_NAME_SIZE],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_line_numbers: u32,
    pub number_of_relocations: u16,
    pub number_of_line_numbers: u16,
    pub characteristics: SectionCharacteristics,
}

impl SectionHeader {
    /// The section's size as used for RVA range tests: `VirtualSize` if
    /// non-zero, else `SizeOfRawData`.
    pub fn effective_size(&self) -> u32 {
        if self.virtual_size != 0 {
            self.virtual_size
        } else {
            self.size_of_raw_data
        }
    }

    /// NUL-trimmed name, lossily decoded. The raw field is fixed 8 bytes
    /// and may or may not carry a trailing NUL.
    pub fn name(&self) -> String {
        let end = self
            .name_raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SECTION_NAME_SIZE);
        String::from_utf8_lossy(&self.name_raw[..end]).into_owned()
    }

    /// Copies the name into a caller-provided 9-byte buffer, NUL-terminated.
    pub fn write_name(&self, out: &mut [u8; SECTION_NAME_SIZE + 1]) {
        out[..SECTION_NAME_SIZE].copy_from_slice(&self.name_raw);
        out[SECTION_NAME_SIZE] = 0;
    }
}

pub fn parse_section_header(i: &[u8]) -> IResult<&[u8], SectionHeader> {
    let (i, name_slice) = nom::bytes::complete::take(SECTION_NAME_SIZE)(i)?;
    let (i, (virtual_size, virtual_address, size_of_raw_data, pointer_to_raw_data,
        pointer_to_relocations, pointer_to_line_numbers, number_of_relocations,
        number_of_line_numbers, characteristics)) =
        tuple((le_u32, le_u32, le_u32, le_u32, le_u32, le_u32, le_u16, le_u16, le_u32))(i)?;
    let mut name_raw = [0u8; SECTION_NAME_SIZE];
    name_raw.copy_from_slice(name_slice);
    Ok((
        i,
        SectionHeader {
            name_raw,
            virtual_size,
            virtual_address,
            size_of_raw_data,
            pointer_to_raw_data,
            pointer_to_relocations,
            pointer_to_line_numbers,
            number_of_relocations,
            number_of_line_numbers,
            characteristics: SectionCharacteristics::from_bits_truncate(characteristics),
        },
    ))
}
