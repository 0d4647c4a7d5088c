//! `TypeRegistry`: the injected, schema-aware collaborator.
//!
//! This crate treats record payloads as opaque bytes plus a numeric type
//! tag; it never hard-codes Pages/Numbers/Keynote message types. Callers
//! supply a `TypeRegistry` implementation that knows how to decode and
//! merge the concrete schema for a given `PackageKind`.

use std::fmt;

use crate::document::PackageKind;

/// An opaque decoded record value. The core never inspects a message's
/// fields; it only stores, overwrites, and hands values back to the
/// registry for merging.
pub trait Message: fmt::Debug + Send + Sync {
    /// Supports downcasting back to a concrete message type in callers
    /// that know the schema, mirroring `prost::Message` implementors
    /// being `Any`-compatible in practice.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable counterpart of [`Message::as_any`], used by `merge`
    /// implementations to downcast and mutate a message's fields in place.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// An error from a registry-level decode or merge operation, distinct from
/// [`crate::error::Error`] since registries are external collaborators and
/// may have their own failure causes.
#[derive(Debug)]
pub struct RegistryError(pub String);

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RegistryError {}

/// Injected dispatcher: `(document_kind, type_tag, payload) -> decoded
/// message`. Implementations must be safe to call concurrently for both
/// `decode` and `merge`, since record loading parallelizes across files.
pub trait TypeRegistry: Send + Sync {
    /// Decodes one payload. Returns `None` for an unrecognised tag or a
    /// malformed payload; the IWA reader treats this exactly like a decode
    /// failure — logged, and the record omitted or left unchanged.
    fn decode(
        &self,
        document_kind: PackageKind,
        type_tag: u32,
        payload: &[u8],
    ) -> Option<Box<dyn Message>>;

    /// Merges `delta` into `existing` in place, mirroring protobuf
    /// `Message::merge` semantics: repeated fields concatenated, scalars
    /// overwritten, sub-messages merged recursively. A merge failure
    /// leaves `existing` untouched and is reported to the caller, which
    /// logs it and keeps the prior value per the merge-failure contract.
    fn merge(
        &self,
        existing: &mut dyn Message,
        document_kind: PackageKind,
        type_tag: u32,
        delta: &[u8],
    ) -> std::result::Result<(), RegistryError>;

    /// Re-derives the package kind from the set of type tags seen across a
    /// loaded document's records, for the kind-mismatch check in
    /// `DocumentOpener`. Returns `None` when the registry can't or won't
    /// offer an opinion (the default), in which case re-derivation is
    /// skipped rather than treated as a mismatch.
    fn root_package_kind(&self, _type_tags: &[u32]) -> Option<PackageKind> {
        None
    }
}
