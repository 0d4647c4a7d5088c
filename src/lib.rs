//! iwa-core: the core engine for reading Apple iWork (Pages, Numbers,
//! Keynote) document packages in their modern (2013+) container form.
//!
//! This crate turns an opaque package on disk into a random-access record
//! graph. It does not know what any given record *means* — schema-specific
//! decoding of Pages/Numbers/Keynote message types is delegated to an
//! injected [`registry::TypeRegistry`], so this crate can be fuzzed and
//! tested without any concrete iWork schema at all.
//!
//! ## Quick start
//!
//! ```no_run
//! use iwa_core::document::DocumentOpener;
//! use iwa_core::registry::{Message, RegistryError, TypeRegistry};
//! use iwa_core::document::PackageKind;
//!
//! struct NoopRegistry;
//! impl TypeRegistry for NoopRegistry {
//!     fn decode(&self, _kind: PackageKind, _type_tag: u32, _payload: &[u8]) -> Option<Box<dyn Message>> {
//!         None
//!     }
//!     fn merge(&self, _existing: &mut dyn Message, _kind: PackageKind, _type_tag: u32, _delta: &[u8]) -> Result<(), RegistryError> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> iwa_core::error::Result<()> {
//! let doc = DocumentOpener::open("document.pages", &NoopRegistry)?;
//! for (identifier, (type_tag, _value)) in doc.records()? {
//!     println!("record {identifier} has type {type_tag}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Package layout
//!
//! A modern iWork package is either a single ZIP file (entries
//! `Metadata/…`, `Index/*.iwa`) or a directory bundle (`Metadata/` plus an
//! `Index.zip`). Each `.iwa` entry is a concatenation of IWA-framed Snappy
//! chunks; decompressed, the stream is a sequence of
//! `{ varint length; ArchiveInfo header; concatenated MessageInfo payloads }`
//! blocks. [`document::DocumentOpener::open`] drives the whole pipeline:
//! detect package kind → pick a [`content_store::ContentStore`] backend →
//! parse [`metadata::Metadata`] → load every `Index/*.iwa` entry through
//! [`iwa_reader::load_records`]'s two-pass merge protocol.
//!
//! ## Descriptor reconstruction
//!
//! A second, loosely related tool lives in [`descriptor_scanner`]: given an
//! arbitrary binary blob (typically a compiled executable that statically
//! links protobuf schemas), it locates embedded `FileDescriptorProto`
//! messages, topologically sorts them by `import` edges, and re-emits
//! `.proto` source text. It shares the wire-format primitives in
//! [`wire::WireReader`] with the IWA reader but is otherwise independent.
//!
//! ## Module map
//!
//! - [`wire`] — protobuf wire-format primitives (varint, tag, skip-field).
//! - [`snappy`] — standard Snappy block codec plus the IWA chunk framing.
//! - [`content_store`] — the ZIP/directory container abstraction.
//! - [`archive`] — `ArchiveInfo`/`MessageInfo` header parsing.
//! - [`iwa_reader`] — the two-pass record loader.
//! - [`registry`] — the injected `TypeRegistry` contract.
//! - [`document`] — `DocumentOpener`, `Document`, `PackageKind`.
//! - [`metadata`] — bundle property-list metadata.
//! - [`descriptor_scanner`] — the binary descriptor scanner and `.proto` emitter.
//! - [`error`] — the unified error enum.

pub mod archive;
pub mod content_store;
pub mod descriptor_scanner;
pub mod document;
pub mod error;
pub mod iwa_reader;
pub mod metadata;
pub mod registry;
pub mod snappy;
pub mod wire;

pub use document::{Document, DocumentOpener, FormatGeneration, PackageKind};
pub use error::{Error, Result};
pub use iwa_reader::RecordMap;
pub use registry::{Message, TypeRegistry};
