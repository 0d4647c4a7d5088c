//! `ArchiveInfo`/`MessageInfo`: the protobuf headers framing each logical
//! record block within a decompressed IWA stream.

use crate::error::{Error, Result};
use crate::wire::WireReader;

/// Header framing one record block in an IWA stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveInfo {
    /// Record identifier this block contributes to, if set.
    pub identifier: Option<u64>,
    /// One entry per payload that follows this header in the stream.
    pub message_infos: Vec<MessageInfo>,
    /// Whether payloads in this block are protobuf-merged into an
    /// existing record rather than overwriting it.
    pub should_merge: bool,
}

/// One payload's type tag and byte length, as declared by `ArchiveInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageInfo {
    pub type_: u32,
    pub versions: Vec<u32>,
    pub length: u32,
}

impl ArchiveInfo {
    /// Parses an `ArchiveInfo` message from its serialized bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data);
        let mut info = ArchiveInfo::default();

        while !reader.is_empty() {
            let (field_number, wire_type) = reader.read_tag()?;
            match (field_number, wire_type) {
                (1, 0) => info.identifier = Some(reader.read_varint()?),
                (2, 2) => {
                    let bytes = reader.read_length_delimited()?;
                    info.message_infos.push(MessageInfo::parse(bytes)?);
                },
                (3, 0) => info.should_merge = reader.read_varint()? != 0,
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(info)
    }
}

impl MessageInfo {
    /// Parses a `MessageInfo` message from its serialized bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data);
        let mut info = MessageInfo::default();

        while !reader.is_empty() {
            let (field_number, wire_type) = reader.read_tag()?;
            match (field_number, wire_type) {
                (1, 0) => info.type_ = reader.read_varint()? as u32,
                (2, 0) => info.versions.push(reader.read_varint()? as u32),
                (3, 0) => info.length = reader.read_varint()? as u32,
                _ => reader.skip_field(wire_type)?,
            }
        }

        Ok(info)
    }
}

/// One `ArchiveInfo` header plus the raw payload bytes of its
/// `message_infos`, as located in a decompressed IWA stream.
#[derive(Debug, Clone)]
pub struct ArchiveBlock<'a> {
    pub info: ArchiveInfo,
    pub payloads: Vec<&'a [u8]>,
}

/// Walks a decompressed IWA byte buffer, yielding one `ArchiveBlock` per
/// `{ varint L; L-byte ArchiveInfo; concatenated MessageInfo payloads }`
/// record. Every byte of a valid stream is accounted for by exactly one
/// header length prefix, one serialized `ArchiveInfo`, and its payloads.
pub fn walk_blocks(data: &[u8]) -> Result<Vec<ArchiveBlock<'_>>> {
    let mut blocks = Vec::new();
    let mut reader = WireReader::new(data);

    while !reader.is_empty() {
        let header_bytes = reader.read_length_delimited().map_err(|_| {
            Error::InvalidArchiveStructure { reason: "truncated ArchiveInfo header".to_string() }
        })?;
        let info = ArchiveInfo::parse(header_bytes)?;

        let mut payloads = Vec::with_capacity(info.message_infos.len());
        for message_info in &info.message_infos {
            let payload = reader.read_bytes(message_info.length as usize).map_err(|_| {
                Error::InvalidArchiveStructure {
                    reason: format!(
                        "declared payload length {} exceeds remaining buffer",
                        message_info.length
                    ),
                }
            })?;
            payloads.push(payload);
        }

        blocks.push(ArchiveBlock { info, payloads });
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn parses_archive_info_with_identifier_and_message_info() {
        let mut data = Vec::new();
        data.extend(encode_varint(1 << 3)); // field 1, varint
        data.extend(encode_varint(123));

        let message_info_data = vec![0x08, 0x01, 0x18, 0x05]; // type=1, length=5
        data.extend(encode_varint((2 << 3) | 2)); // field 2, length-delimited
        data.extend(encode_varint(message_info_data.len() as u64));
        data.extend(message_info_data);

        let info = ArchiveInfo::parse(&data).unwrap();
        assert_eq!(info.identifier, Some(123));
        assert_eq!(info.message_infos.len(), 1);
        assert_eq!(info.message_infos[0].type_, 1);
        assert_eq!(info.message_infos[0].length, 5);
        assert!(!info.should_merge);
    }

    #[test]
    fn parses_should_merge_field() {
        let mut data = Vec::new();
        data.extend(encode_varint((3 << 3) | 0)); // field 3, varint
        data.extend(encode_varint(1));
        let info = ArchiveInfo::parse(&data).unwrap();
        assert!(info.should_merge);
    }

    #[test]
    fn parses_message_info() {
        let data = vec![0x08, 0x2A, 0x10, 0x01, 0x18, 0x0A];
        let info = MessageInfo::parse(&data).unwrap();
        assert_eq!(info.type_, 42);
        assert_eq!(info.versions, vec![1]);
        assert_eq!(info.length, 10);
    }

    #[test]
    fn walk_blocks_end_to_end_scenario() {
        // identifier=7, should_merge=false, one MessageInfo{type=42,
        // length=2}, payload 0xAB 0xCD.
        let mut archive_info = Vec::new();
        archive_info.extend(encode_varint(1 << 3));
        archive_info.extend(encode_varint(7));
        let message_info_data = vec![0x08, 0x2A, 0x18, 0x02]; // type=42, length=2
        archive_info.extend(encode_varint((2 << 3) | 2));
        archive_info.extend(encode_varint(message_info_data.len() as u64));
        archive_info.extend(message_info_data);

        let mut stream = Vec::new();
        stream.extend(encode_varint(archive_info.len() as u64));
        stream.extend(archive_info);
        stream.extend([0xAB, 0xCD]);

        let blocks = walk_blocks(&stream).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].info.identifier, Some(7));
        assert_eq!(blocks[0].payloads, vec![&[0xABu8, 0xCD][..]]);
    }

    #[test]
    fn truncated_payload_is_invalid_archive_structure() {
        let mut archive_info = Vec::new();
        let message_info_data = vec![0x08, 0x2A, 0x18, 0x05]; // declares length 5
        archive_info.extend(encode_varint((2 << 3) | 2));
        archive_info.extend(encode_varint(message_info_data.len() as u64));
        archive_info.extend(message_info_data);

        let mut stream = Vec::new();
        stream.extend(encode_varint(archive_info.len() as u64));
        stream.extend(archive_info);
        stream.extend([0xAB]); // only 1 byte instead of declared 5

        let err = walk_blocks(&stream).unwrap_err();
        assert!(matches!(err, Error::InvalidArchiveStructure { .. }));
    }
}
