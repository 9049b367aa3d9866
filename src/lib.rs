//! `libpe` — a bounds-checked structural parser for PE32 / PE32+ images.
//!
//! The crate maps a file into memory, walks the DOS → NT signature → COFF
//! → Optional → Data Directories → Section Table header chain, and exposes
//! safe navigation between RVAs and raw file offsets. Every read through
//! the mapping is guarded by a bounds-check primitive
//! ([`mapping::Mapping::contains`]) before it happens — the file on disk is
//! assumed adversarial throughout.
//!
//! Imports/exports/resources/relocations/TLS/certificate-table parsing,
//! hashing, and human-readable name tables for enumerated constants are
//! out of scope: those belong to external collaborators, which can stash
//! their derived artifacts in a [`Context`]'s extension cache
//! ([`cache::CacheSlot`]) without the core ever inspecting them.
//!
//! ```no_run
//! use libpe::Context;
//!
//! let mut ctx = Context::load("sample.exe")?;
//! ctx.parse()?;
//! if ctx.is_pe() {
//!     println!("entrypoint: {:#x}", ctx.entrypoint().unwrap());
//! }
//! # Ok::<(), libpe::PeError>(())
//! ```

pub mod cache;
pub mod context;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod headers;
pub mod index;
pub mod mapping;
pub mod parser;
pub mod translate;

pub use cache::CacheSlot;
pub use context::Context;
pub use error::{PeError, Result};
pub use index::{OptionalHeader, OptionalKind, ParsedIndex, MAX_DIRECTORIES, MAX_SECTIONS};
pub use mapping::LoadOptions;
