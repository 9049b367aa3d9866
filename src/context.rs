//! Context & lifecycle: owns the mapping, the path, the parsed index, and
//! the extension cache; tears everything down on drop.
//!
//! A four-state lifecycle (empty, mapped, parsed, unloaded) collapses
//! under Rust's ownership rules: there is no way to observe an empty or
//! unloaded `Context` — `Context::load` either returns a live mapped
//! context or no context at all, and dropping a `Context` removes it from
//! existence rather than leaving a zeroed husk around. The parsed state is
//! represented by `self.parsed.is_some()`.

use std::path::{Path, PathBuf};

use crate::cache::{Cache, CacheSlot};
use crate::error::Result;
use crate::headers::{CoffHeader, DataDirectory, DosHeader, SectionHeader};
use crate::index::{OptionalHeader, ParsedIndex};
use crate::mapping::{LoadOptions, Mapping};
use crate::parser;
use crate::translate;

pub struct Context {
    path: PathBuf,
    mapping: Mapping,
    parsed: Option<ParsedIndex>,
    cache: Cache,
}

impl Context {
    /// Maps `path` into memory. Does not parse; call [`Context::parse`]
    /// next to reach the `Parsed` state.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_options(path, LoadOptions::empty())
    }

    pub fn load_with_options(path: impl AsRef<Path>, options: LoadOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mapping = Mapping::load(&path, options)?;
        Ok(Context {
            path,
            mapping,
            parsed: None,
            cache: Cache::new(),
        })
    }

    /// Walks the header chain and populates the parsed index. Leaves the
    /// context in its prior (unparsed) state on failure.
    pub fn parse(&mut self) -> Result<()> {
        let index = parser::parse(&self.mapping)?;
        self.parsed = Some(index);
        Ok(())
    }

    /// Consumes the context, releasing the mapping and every cached
    /// payload. Equivalent to letting the context drop, but surfaces a
    /// result for callers that want to treat teardown failure as a bug
    /// report.
    pub fn unload(mut self) -> Result<()> {
        self.cache.clear();
        // Dropping `self` below runs `Mapping`'s own drop glue; `memmap2`
        // does not expose a fallible unmap, so there is no `MunmapFailed`
        // to propagate from this path in practice. The variant remains in
        // `PeError` for API stability with lower-level embedders.
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.mapping.is_loaded()
    }

    pub fn file_size(&self) -> u64 {
        self.mapping.file_size()
    }

    pub fn contains(&self, ptr: usize, len: usize) -> bool {
        self.mapping.contains(ptr, len)
    }

    fn parsed(&self) -> Option<&ParsedIndex> {
        self.parsed.as_ref()
    }

    pub fn is_pe(&self) -> bool {
        self.parsed().map(|p| p.is_pe()).unwrap_or(false)
    }

    pub fn is_dll(&self) -> bool {
        self.parsed().map(|p| p.is_dll()).unwrap_or(false)
    }

    pub fn dos_header(&self) -> Option<&DosHeader> {
        self.parsed().map(|p| &p.dos_header)
    }

    pub fn coff_header(&self) -> Option<&CoffHeader> {
        self.parsed().map(|p| &p.coff_header)
    }

    pub fn optional_header(&self) -> Option<&OptionalHeader> {
        self.parsed().map(|p| &p.optional_header)
    }

    pub fn entrypoint(&self) -> Option<u64> {
        self.parsed().map(|p| p.entrypoint)
    }

    pub fn imagebase(&self) -> Option<u64> {
        self.parsed().map(|p| p.imagebase)
    }

    pub fn directories_count(&self) -> u32 {
        self.parsed().map(|p| p.num_directories).unwrap_or(0)
    }

    pub fn directory_by_entry(&self, entry: usize) -> Option<DataDirectory> {
        let index = self.parsed()?;
        translate::directory_by_entry(index, &self.mapping, entry)
    }

    pub fn directories(&self) -> Vec<DataDirectory> {
        match self.parsed() {
            Some(index) => (0..index.directory_offsets.len())
                .filter_map(|i| translate::directory_by_entry(index, &self.mapping, i))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn sections_count(&self) -> u32 {
        self.parsed().map(|p| p.num_sections).unwrap_or(0)
    }

    pub fn sections(&self) -> Vec<SectionHeader> {
        match self.parsed() {
            Some(index) => (0..index.section_offsets.len())
                .filter_map(|i| translate::section_at(index, &self.mapping, i))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn section_by_name(&self, name: &str) -> Option<SectionHeader> {
        let index = self.parsed()?;
        translate::section_by_name(index, &self.mapping, name)
    }

    /// Copies the section name into a caller-provided 9-byte buffer,
    /// NUL-terminated. `section_hdr` must be one obtained from this
    /// context (e.g. via [`Context::sections`]).
    ///
    /// # Panics
    /// In debug builds, panics if `out` is shorter than 9 bytes. `out`'s
    /// type fixes its length, so this can never actually trip; the
    /// assertion documents the invariant for embedders who change the
    /// buffer type.
    pub fn section_name(&self, section_hdr: &SectionHeader, out: &mut [u8; 9]) {
        debug_assert!(out.len() >= 9);
        section_hdr.write_name(out);
    }

    pub fn rva_to_section(&self, rva: u64) -> Option<SectionHeader> {
        let index = self.parsed()?;
        translate::rva_to_section(index, &self.mapping, rva)
    }

    pub fn rva_to_offset(&self, rva: u64) -> u64 {
        match self.parsed() {
            Some(index) => translate::rva_to_offset(index, &self.mapping, rva),
            None => rva,
        }
    }

    pub fn offset_to_rva(&self, ofs: u64) -> u64 {
        match self.parsed() {
            Some(index) => translate::offset_to_rva(index, &self.mapping, ofs),
            None => 0,
        }
    }

    pub fn section_data(&self, section: &SectionHeader) -> Option<&[u8]> {
        translate::section_data(&self.mapping, section)
    }

    pub fn cache_insert<T: std::any::Any + Send + Sync>(&mut self, slot: CacheSlot, value: T) {
        self.cache.insert(slot, value);
    }

    pub fn cache_get<T: std::any::Any + Send + Sync>(&self, slot: CacheSlot) -> Option<&T> {
        self.cache.get(slot)
    }

    pub fn cache_remove(&mut self, slot: CacheSlot) {
        self.cache.remove(slot);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.cache.clear();
    }
}
