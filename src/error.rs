use std::io;

/// Flat error taxonomy for the mapping layer, the structural parser, and
/// the lifecycle operations built on top of them. None of these are
/// retried or recovered from internally.
#[derive(Debug, thiserror::Error)]
pub enum PeError {
    #[error("failed to allocate memory for parsed structures")]
    AllocationFailure,

    #[error("failed to open file")]
    OpenFailed(#[source] io::Error),

    #[error("failed to wrap file descriptor in a buffered stream")]
    FdopenFailed(#[source] io::Error),

    #[error("failed to stat file")]
    FstatFailed(#[source] io::Error),

    #[error("path does not refer to a regular file")]
    NotAFile,

    #[error("failed to map file into memory")]
    MmapFailed(#[source] io::Error),

    #[error("failed to unmap file from memory")]
    MunmapFailed(#[source] io::Error),

    #[error("failed to close file descriptor")]
    CloseFailed(#[source] io::Error),

    #[error("not a PE file (missing MZ signature)")]
    NotAPEFile,

    #[error("e_lfanew points outside the mapped file")]
    InvalidLfanew,

    #[error("invalid NT signature")]
    InvalidSignature,

    #[error("COFF header is missing or truncated")]
    MissingCOFFHeader,

    #[error("optional header is missing or truncated")]
    MissingOptionalHeader,

    #[error("unsupported image type (ROM or unknown optional-header magic)")]
    UnsupportedImage,

    #[error("too many data directories ({0} > {max})", max = crate::index::MAX_DIRECTORIES)]
    TooManyDirectories(u32),

    #[error("too many sections ({0} > {max})", max = crate::index::MAX_SECTIONS)]
    TooManySections(u32),
}

pub type Result<T> = std::result::Result<T, PeError>;
