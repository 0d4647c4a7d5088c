//! `DocumentOpener`: detects package kind and format generation, orchestrates
//! metadata parsing and record loading, and returns a `Document` handle.

use std::path::Path;

use crate::content_store::{ContentStore, DirectoryBackend, ZipBackend};
use crate::error::{Error, Result};
use crate::iwa_reader::{RecordMap, load_records};
use crate::metadata::Metadata;
use crate::registry::TypeRegistry;

/// The three iWork package kinds this engine recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    Pages,
    Numbers,
    Keynote,
}

impl PackageKind {
    /// Derives a package kind from a file extension, stripping an optional
    /// `-tef` (Text Edit Format?) suffix some bundles carry.
    fn from_extension(ext: &str) -> Option<Self> {
        let stripped = ext.strip_suffix("-tef").unwrap_or(ext);
        match stripped {
            "pages" => Some(PackageKind::Pages),
            "numbers" => Some(PackageKind::Numbers),
            "key" => Some(PackageKind::Keynote),
            _ => None,
        }
    }
}

/// Whether a package is the modern (2013+) indexed-protobuf container or
/// the legacy (pre-2013) XML container. Only `Modern` is parsed beyond
/// detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatGeneration {
    Modern,
    Legacy,
}

/// A successfully opened iWork document.
pub struct Document {
    pub kind: PackageKind,
    pub generation: FormatGeneration,
    pub metadata: Metadata,
    content_store: Box<dyn ContentStore>,
    records: Option<RecordMap>,
}

impl Document {
    /// The document's decoded record map. Fails with
    /// [`Error::LegacyNotImplemented`] for legacy-generation documents,
    /// which are recognised at open time but not parsed further.
    pub fn records(&self) -> Result<&RecordMap> {
        self.records.as_ref().ok_or(Error::LegacyNotImplemented)
    }

    /// The `ContentStore` backing this document, for reading unread
    /// entries (preview assets, media) outside the record map.
    pub fn content_store(&self) -> &dyn ContentStore {
        self.content_store.as_ref()
    }
}

/// Orchestrates opening an iWork package: kind/generation detection,
/// backend selection, metadata parsing, and record loading.
pub struct DocumentOpener;

impl DocumentOpener {
    /// Opens the iWork package at `path`, decoding records with `registry`.
    pub fn open(path: impl AsRef<Path>, registry: &dyn TypeRegistry) -> Result<Document> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound { path: path.display().to_string() });
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| Error::UnknownDocumentType { ext: String::new() })?;
        let expected_kind = PackageKind::from_extension(extension)
            .ok_or_else(|| Error::UnknownDocumentType { ext: extension.to_string() })?;

        if path.is_dir() {
            Self::open_directory(path, expected_kind, registry)
        } else {
            Self::open_zip_file(path, expected_kind, registry)
        }
    }

    fn open_directory(
        path: &Path,
        expected_kind: PackageKind,
        registry: &dyn TypeRegistry,
    ) -> Result<Document> {
        let is_legacy = path.join("index.xml.gz").exists() || path.join("index.apxl.gz").exists();
        if is_legacy {
            return Ok(Document {
                kind: expected_kind,
                generation: FormatGeneration::Legacy,
                metadata: Metadata::default(),
                content_store: Box::new(DirectoryBackend::open(path)?),
                records: None,
            });
        }

        let index_zip = path.join("Index.zip");
        if !index_zip.exists() {
            return Err(Error::MissingIndexArchive);
        }

        let metadata_dir = path.join("Metadata");
        let metadata = Metadata::from_directory(&metadata_dir);

        let index_bytes = std::fs::read(&index_zip)?;
        let index_store = ZipBackend::open(index_bytes)?;
        let records = load_records(&index_store, expected_kind, registry)?;
        let bundle_store = DirectoryBackend::open(path)?;

        Self::finish(expected_kind, metadata, Box::new(bundle_store), records, registry)
    }

    fn open_zip_file(
        path: &Path,
        expected_kind: PackageKind,
        registry: &dyn TypeRegistry,
    ) -> Result<Document> {
        let bytes = std::fs::read(path)?;
        let store = ZipBackend::open(bytes)?;

        let is_modern = store.contains("Index/Document.iwa");
        let is_legacy = store.contains("index.xml") || store.contains("index.apxl");

        if !is_modern {
            if is_legacy {
                return Ok(Document {
                    kind: expected_kind,
                    generation: FormatGeneration::Legacy,
                    metadata: Metadata::default(),
                    content_store: Box::new(store),
                    records: None,
                });
            }
            return Err(Error::MissingIndexArchive);
        }

        let metadata = Metadata::from_zip_prefix(&store, "Metadata/");
        let records = load_records(&store, expected_kind, registry)?;

        Self::finish(expected_kind, metadata, Box::new(store), records, registry)
    }

    fn finish(
        expected_kind: PackageKind,
        metadata: Metadata,
        content_store: Box<dyn ContentStore>,
        records: RecordMap,
        registry: &dyn TypeRegistry,
    ) -> Result<Document> {
        let type_tags: Vec<u32> = records.values().map(|(type_tag, _)| *type_tag).collect();
        if let Some(found_kind) = registry.root_package_kind(&type_tags) {
            if found_kind != expected_kind {
                return Err(Error::DocumentTypeMismatch { expected: expected_kind, found: found_kind });
            }
        }

        Ok(Document {
            kind: expected_kind,
            generation: FormatGeneration::Modern,
            metadata,
            content_store,
            records: Some(records),
        })
    }
}
