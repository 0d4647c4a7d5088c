//! Two-pass IWA record loader, producing the document's record map.
//!
//! Pass one walks every `Index/*.iwa` entry decoding non-merging blocks
//! (last write wins per identifier); pass two walks them again, merging
//! merging blocks into the bases pass one established. Decoding itself is
//! driven entirely by the injected `TypeRegistry`.

use std::collections::HashMap;

use crate::archive::{self};
use crate::content_store::ContentStore;
use crate::document::PackageKind;
use crate::error::{Error, Result};
use crate::registry::{Message, TypeRegistry};
use crate::snappy;

/// Mapping from record identifier to its current type tag and decoded
/// value. Written only during [`load_records`]; immutable thereafter.
pub type RecordMap = HashMap<u64, (u32, Box<dyn Message>)>;

/// Loads every record from the `Index/*.iwa` entries of `store`, applying
/// the two-pass merge protocol per file, in `store`'s stable lexicographic
/// order.
pub fn load_records(
    store: &dyn ContentStore,
    kind: PackageKind,
    registry: &dyn TypeRegistry,
) -> Result<RecordMap> {
    let mut files: Vec<String> =
        store.list(".iwa").into_iter().filter(|p| p.starts_with("Index/")).collect();
    files.sort();

    let mut records: RecordMap = HashMap::new();

    for path in &files {
        let compressed = store.read(path)?;
        if compressed.is_empty() {
            return Err(Error::EntryReadFailed { path: path.clone() });
        }
        let decompressed = snappy::decompress_framed(&compressed)?;
        let blocks = archive::walk_blocks(&decompressed)?;

        run_pass_one(&blocks, path, kind, registry, &mut records);
        run_pass_two(&blocks, path, kind, registry, &mut records);
    }

    Ok(records)
}

/// Pass 1 ("non-merging"): decodes every payload of every non-merging
/// block, overwriting any prior value under its identifier.
fn run_pass_one(
    blocks: &[archive::ArchiveBlock<'_>],
    path: &str,
    kind: PackageKind,
    registry: &dyn TypeRegistry,
    records: &mut RecordMap,
) {
    for block in blocks {
        if block.info.should_merge {
            continue;
        }
        let Some(identifier) = block.info.identifier else { continue };
        for (message_info, payload) in block.info.message_infos.iter().zip(block.payloads.iter()) {
            let type_tag = message_info.type_;
            match registry.decode(kind, type_tag, payload) {
                Some(value) => {
                    records.insert(identifier, (type_tag, value));
                },
                None => {
                    tracing::debug!(
                        identifier,
                        type_tag,
                        file = path,
                        "pass 1: decode failed, dropping record"
                    );
                },
            }
        }
    }
}

/// Pass 2 ("merging"): merges every payload of every merging block into
/// its identifier's existing value, or establishes a base value from the
/// first payload if none exists yet.
fn run_pass_two(
    blocks: &[archive::ArchiveBlock<'_>],
    path: &str,
    kind: PackageKind,
    registry: &dyn TypeRegistry,
    records: &mut RecordMap,
) {
    for block in blocks {
        if !block.info.should_merge {
            continue;
        }
        let Some(identifier) = block.info.identifier else { continue };
        for (message_info, payload) in block.info.message_infos.iter().zip(block.payloads.iter()) {
            let type_tag = message_info.type_;
            if let Some((_, existing)) = records.get_mut(&identifier) {
                if let Err(e) = registry.merge(existing.as_mut(), kind, type_tag, payload) {
                    tracing::warn!(
                        identifier,
                        type_tag,
                        file = path,
                        error = %e,
                        "pass 2: merge failed, keeping prior value"
                    );
                }
            } else {
                match registry.decode(kind, type_tag, payload) {
                    Some(value) => {
                        records.insert(identifier, (type_tag, value));
                    },
                    None => {
                        tracing::debug!(
                            identifier,
                            type_tag,
                            file = path,
                            "pass 2: no base record and decode of first payload failed, skipping"
                        );
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;

    /// Test registry whose "decoded" value is the payload bytes, and whose
    /// merge concatenates bytes — enough to exercise the two-pass protocol
    /// without any real iWork schema.
    struct BytesRegistry;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Bytes(Vec<u8>);

    impl Message for Bytes {
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl TypeRegistry for BytesRegistry {
        fn decode(&self, _kind: PackageKind, _type_tag: u32, payload: &[u8]) -> Option<Box<dyn Message>> {
            Some(Box::new(Bytes(payload.to_vec())))
        }

        fn merge(
            &self,
            existing: &mut dyn Message,
            _kind: PackageKind,
            _type_tag: u32,
            delta: &[u8],
        ) -> std::result::Result<(), RegistryError> {
            let existing = existing
                .as_any_mut()
                .downcast_mut::<Bytes>()
                .ok_or_else(|| RegistryError("type mismatch".to_string()))?;
            existing.0.extend_from_slice(delta);
            Ok(())
        }
    }

    fn encode_varint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if value == 0 {
                break;
            }
        }
        out
    }

    fn build_block(identifier: u64, should_merge: bool, type_tag: u32, payload: &[u8]) -> Vec<u8> {
        let mut archive_info = Vec::new();
        archive_info.extend(encode_varint(1 << 3));
        archive_info.extend(encode_varint(identifier));
        let message_info_data = {
            let mut d = Vec::new();
            d.extend(encode_varint(1 << 3));
            d.extend(encode_varint(type_tag as u64));
            d.extend(encode_varint(3 << 3));
            d.extend(encode_varint(payload.len() as u64));
            d
        };
        archive_info.extend(encode_varint((2 << 3) | 2));
        archive_info.extend(encode_varint(message_info_data.len() as u64));
        archive_info.extend(message_info_data);
        if should_merge {
            archive_info.extend(encode_varint((3 << 3) | 0));
            archive_info.extend(encode_varint(1));
        }

        let mut block = Vec::new();
        block.extend(encode_varint(archive_info.len() as u64));
        block.extend(archive_info);
        block.extend_from_slice(payload);
        block
    }

    #[test]
    fn two_pass_protocol_applies_merge_after_base() {
        let mut stream = build_block(7, false, 42, &[0xAB, 0xCD]);
        stream.extend(build_block(7, true, 42, &[0xEE]));

        let blocks = archive::walk_blocks(&stream).unwrap();
        let registry = BytesRegistry;
        let mut records = RecordMap::new();
        run_pass_one(&blocks, "Index/Document.iwa", PackageKind::Pages, &registry, &mut records);
        run_pass_two(&blocks, "Index/Document.iwa", PackageKind::Pages, &registry, &mut records);

        let (type_tag, value) = records.get(&7).expect("record 7 present");
        assert_eq!(*type_tag, 42);
        let bytes = value.as_any().downcast_ref::<Bytes>().unwrap();
        assert_eq!(bytes.0, vec![0xAB, 0xCD, 0xEE]);
    }

    #[test]
    fn non_merging_block_overwrites_prior_value() {
        let mut stream = build_block(1, false, 5, &[0x01]);
        stream.extend(build_block(1, false, 5, &[0x02]));
        let blocks = archive::walk_blocks(&stream).unwrap();
        let registry = BytesRegistry;
        let mut records = RecordMap::new();
        run_pass_one(&blocks, "Index/Document.iwa", PackageKind::Pages, &registry, &mut records);

        let (_, value) = records.get(&1).unwrap();
        assert_eq!(value.as_any().downcast_ref::<Bytes>().unwrap().0, vec![0x02]);
    }

    #[test]
    fn zero_length_entry_is_entry_read_failed() {
        struct EmptyStore;
        impl ContentStore for EmptyStore {
            fn read(&self, _path: &str) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            fn size(&self, _path: &str) -> Result<u64> {
                Ok(0)
            }
            fn contains(&self, _path: &str) -> bool {
                true
            }
            fn list(&self, _suffix: &str) -> Vec<String> {
                vec!["Index/Document.iwa".to_string()]
            }
        }

        let registry = BytesRegistry;
        let err = load_records(&EmptyStore, PackageKind::Pages, &registry).unwrap_err();
        assert!(matches!(err, Error::EntryReadFailed { .. }));
    }
}
