//! Unified error type for iwa-core.
//!
//! Mirrors the enumerated error surface of the engine: structural corruption
//! (bad framing, out-of-bounds reads) is fatal, per-record schema decode
//! failures are reported through `tracing` and never reach this type.

use thiserror::Error;

/// Errors produced while locating, opening, or reading an iWork package.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The document path does not exist.
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// The path's extension did not match any known iWork package kind.
    #[error("unknown document type: .{ext}")]
    UnknownDocumentType { ext: String },

    /// A modern package was recognised but its `Index.zip` (or `Index/`
    /// entries) could not be located.
    #[error("missing index archive")]
    MissingIndexArchive,

    /// The kind re-derived from decoded records disagrees with the kind
    /// derived from the file extension.
    #[error("document type mismatch: expected {expected:?}, found {found:?}")]
    DocumentTypeMismatch {
        expected: crate::document::PackageKind,
        found: crate::document::PackageKind,
    },

    /// A `ContentStore` entry exists but could not be read in full.
    #[error("failed to read entry: {path}")]
    EntryReadFailed { path: String },

    /// A `ContentStore` entry was requested but does not exist.
    #[error("entry not found: {path}")]
    EntryNotFound { path: String },

    /// Snappy decompression of an IWA chunk failed.
    #[error("snappy decompression failed: {reason}")]
    SnappyDecompressionFailed { reason: String },

    /// An IWA framing chunk declared a type other than `0`.
    #[error("invalid IWA header: expected chunk type {expected}, found {found}")]
    InvalidIwaHeader { expected: u8, found: u8 },

    /// The decompressed IWA byte stream violates a structural invariant
    /// (e.g. a declared length runs past the end of the buffer).
    #[error("invalid archive structure: {reason}")]
    InvalidArchiveStructure { reason: String },

    /// A metadata property list could not be parsed.
    #[error("failed to parse metadata file: {file}")]
    MetadataParsingFailed { file: String },

    /// Reserved for legacy (pre-2013) XML metadata; not exercised by the
    /// modern-format path this crate implements.
    #[error("XML parsing failed: {reason}")]
    XmlParsingFailed { reason: String },

    /// The package was recognised as a legacy (pre-2013) XML format, which
    /// this engine does not parse.
    #[error("legacy iWork format is not implemented")]
    LegacyNotImplemented,

    /// A schema-specific decoder (outside this crate) failed on a record.
    #[error("protobuf decoding failed for record {identifier} (type {type_tag})")]
    ProtobufDecodingFailed { identifier: u64, type_tag: u32 },

    /// No `FileDescriptorProto` candidates were found in the scanned input.
    #[error("no protobuf descriptors found")]
    NoProtobufDescriptors,

    /// Topological sort of scanned descriptors failed.
    #[error("dependency sorting failed: {underlying}")]
    DependencySortingFailed { underlying: String },

    /// A dependency named by a descriptor was not present in the scanned set.
    #[error("missing dependency: {path}")]
    MissingDependency { path: String },

    /// The scanned descriptor set contains an import cycle.
    #[error("circular dependency among scanned descriptors")]
    CircularDependency,

    /// Rendering a `.proto` source file from a descriptor failed.
    #[error("source generation failed for {path}")]
    SourceGenerationFailed { path: String },

    /// A wire-format primitive failed: truncated input.
    #[error("unexpected end of buffer")]
    UnexpectedEof,

    /// A varint exceeded the 10-byte limit for a 64-bit value.
    #[error("varint too long")]
    VarintTooLong,

    /// `skip_field` encountered a wire type it does not know how to skip.
    #[error("unknown wire type: {0}")]
    UnknownWireType(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
