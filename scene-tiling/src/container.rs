/// Binary tile container: a 28-byte header followed by padded table sections and the model payload.
use constants::container::{SECTION_ALIGNMENT, TILE_FORMAT_VERSION, TILE_HEADER_LENGTH, TILE_MAGIC};
use serde_json::{Map, Value};

use crate::error::{TilingError, TilingResult};

/// Raw header fields, all little-endian on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub byte_length: u32,
    pub feature_table_json_byte_length: u32,
    pub feature_table_binary_byte_length: u32,
    pub batch_table_json_byte_length: u32,
    pub batch_table_binary_byte_length: u32,
}

impl TileHeader {
    /// Parse the fixed header without validating the payload.
    pub fn read(bytes: &[u8]) -> TilingResult<Self> {
        if bytes.len() < TILE_HEADER_LENGTH {
            return Err(TilingError::MalformedContainer(format!(
                "{} bytes is shorter than the {TILE_HEADER_LENGTH}-byte header",
                bytes.len()
            )));
        }

        let field = |index: usize| {
            let start = 4 + index * 4;
            u32::from_le_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]])
        };

        Ok(Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: field(0),
            byte_length: field(1),
            feature_table_json_byte_length: field(2),
            feature_table_binary_byte_length: field(3),
            batch_table_json_byte_length: field(4),
            batch_table_binary_byte_length: field(5),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic);
        for value in [
            self.version,
            self.byte_length,
            self.feature_table_json_byte_length,
            self.feature_table_binary_byte_length,
            self.batch_table_json_byte_length,
            self.batch_table_binary_byte_length,
        ] {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Sum of the four table sections, padding included.
    pub fn tables_length(&self) -> usize {
        self.feature_table_json_byte_length as usize
            + self.feature_table_binary_byte_length as usize
            + self.batch_table_json_byte_length as usize
            + self.batch_table_binary_byte_length as usize
    }
}

/// Decoded (or to-be-encoded) tile contents.
#[derive(Debug, Clone, PartialEq)]
pub struct TileContainer {
    pub feature_table: Value,
    pub feature_table_binary: Vec<u8>,
    pub batch_table: Value,
    pub batch_table_binary: Vec<u8>,
    pub model: Vec<u8>,
}

impl TileContainer {
    /// Container with only a feature table and a model payload.
    pub fn new(feature_table: Value, model: Vec<u8>) -> Self {
        Self {
            feature_table,
            feature_table_binary: Vec::new(),
            batch_table: Value::Object(Map::new()),
            batch_table_binary: Vec::new(),
            model,
        }
    }

    pub fn encode(&self) -> TilingResult<Vec<u8>> {
        let mut offset = TILE_HEADER_LENGTH;

        let feature_json = json_section("featureTableJSON", &self.feature_table, &mut offset)?;
        let feature_bin = binary_section(&self.feature_table_binary, &mut offset);
        let batch_json = json_section("batchTableJSON", &self.batch_table, &mut offset)?;
        let batch_bin = binary_section(&self.batch_table_binary, &mut offset);

        let total = offset + self.model.len();
        let header = TileHeader {
            magic: *TILE_MAGIC,
            version: TILE_FORMAT_VERSION,
            byte_length: section_length("byteLength", total)?,
            feature_table_json_byte_length: section_length("featureTableJSON", feature_json.len())?,
            feature_table_binary_byte_length: section_length("featureTableBinary", feature_bin.len())?,
            batch_table_json_byte_length: section_length("batchTableJSON", batch_json.len())?,
            batch_table_binary_byte_length: section_length("batchTableBinary", batch_bin.len())?,
        };

        let mut bytes = Vec::with_capacity(total);
        header.write(&mut bytes);
        bytes.extend_from_slice(&feature_json);
        bytes.extend_from_slice(&feature_bin);
        bytes.extend_from_slice(&batch_json);
        bytes.extend_from_slice(&batch_bin);
        bytes.extend_from_slice(&self.model);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> TilingResult<Self> {
        let header = TileHeader::read(bytes)?;

        if &header.magic != TILE_MAGIC {
            return Err(TilingError::MalformedContainer(format!(
                "unexpected magic {:?}",
                String::from_utf8_lossy(&header.magic)
            )));
        }
        if header.version != TILE_FORMAT_VERSION {
            return Err(TilingError::MalformedContainer(format!(
                "unsupported version {}",
                header.version
            )));
        }
        if header.byte_length as usize != bytes.len() {
            return Err(TilingError::MalformedContainer(format!(
                "header declares {} bytes, buffer holds {}",
                header.byte_length,
                bytes.len()
            )));
        }
        if TILE_HEADER_LENGTH + header.tables_length() > bytes.len() {
            return Err(TilingError::MalformedContainer(
                "section lengths exceed the buffer".to_string(),
            ));
        }

        let mut cursor = TILE_HEADER_LENGTH;
        let feature_table = parse_json_section(take(
            bytes,
            &mut cursor,
            header.feature_table_json_byte_length,
        ))?;
        let feature_table_binary =
            take(bytes, &mut cursor, header.feature_table_binary_byte_length).to_vec();
        let batch_table = parse_json_section(take(
            bytes,
            &mut cursor,
            header.batch_table_json_byte_length,
        ))?;
        let batch_table_binary =
            take(bytes, &mut cursor, header.batch_table_binary_byte_length).to_vec();
        let model = bytes[TILE_HEADER_LENGTH + header.tables_length()..].to_vec();

        Ok(Self {
            feature_table,
            feature_table_binary,
            batch_table,
            batch_table_binary,
            model,
        })
    }
}

/// Wrap a model payload with a feature table into container bytes.
pub fn encode_tile(feature_table: &Value, model: &[u8]) -> TilingResult<Vec<u8>> {
    TileContainer::new(feature_table.clone(), model.to_vec()).encode()
}

pub fn decode_tile(bytes: &[u8]) -> TilingResult<TileContainer> {
    TileContainer::decode(bytes)
}

fn padding(offset: usize, length: usize) -> usize {
    (SECTION_ALIGNMENT - (offset + length) % SECTION_ALIGNMENT) % SECTION_ALIGNMENT
}

fn json_section(name: &'static str, value: &Value, offset: &mut usize) -> TilingResult<Vec<u8>> {
    let is_empty = match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Ok(Vec::new());
    }
    if !value.is_object() {
        return Err(TilingError::MalformedContainer(format!(
            "{name} must be a JSON object"
        )));
    }

    let mut text = serde_json::to_vec(value)?;
    text.resize(text.len() + padding(*offset, text.len()), b' ');
    *offset += text.len();
    Ok(text)
}

fn binary_section(data: &[u8], offset: &mut usize) -> Vec<u8> {
    let mut section = data.to_vec();
    section.resize(data.len() + padding(*offset, data.len()), 0);
    *offset += section.len();
    section
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, length: u32) -> &'a [u8] {
    let section = &bytes[*cursor..*cursor + length as usize];
    *cursor += length as usize;
    section
}

fn section_length(section: &'static str, length: usize) -> TilingResult<u32> {
    u32::try_from(length).map_err(|_| TilingError::SerializationOverflow { section, length })
}

fn parse_json_section(bytes: &[u8]) -> TilingResult<Value> {
    if bytes.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|e| TilingError::MalformedContainer(format!("JSON section is not UTF-8: {e}")))?;
    Ok(serde_json::from_str(text.trim_end_matches(' '))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(length: usize) -> Vec<u8> {
        (0..length).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn feature_table_is_padded_against_running_offset() {
        let table = json!({"BATCH_LENGTH": 0});
        let bytes = encode_tile(&table, &model(5)).unwrap();
        let header = TileHeader::read(&bytes).unwrap();

        // 18 bytes of JSON after the 28-byte header, padded up to offset 48.
        assert_eq!(header.feature_table_json_byte_length, 20);
        assert_eq!(&bytes[46..48], b"  ");
        assert_eq!((TILE_HEADER_LENGTH + header.tables_length()) % SECTION_ALIGNMENT, 0);
        assert_eq!(header.byte_length as usize, bytes.len());
        assert_eq!(bytes.len(), 48 + 5);
    }

    #[test]
    fn header_layout_matches_format() {
        let bytes = encode_tile(&json!({"BATCH_LENGTH": 0}), &model(16)).unwrap();
        assert_eq!(&bytes[0..4], b"b3dm");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
        assert_eq!(
            u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize,
            bytes.len()
        );
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 0);
    }

    #[test]
    fn empty_feature_table_writes_no_section() {
        let bytes = encode_tile(&json!({}), &model(3)).unwrap();
        let header = TileHeader::read(&bytes).unwrap();
        assert_eq!(header.feature_table_json_byte_length, 0);
        assert_eq!(bytes.len(), TILE_HEADER_LENGTH + 3);

        let decoded = decode_tile(&bytes).unwrap();
        assert_eq!(decoded.feature_table, json!({}));
        assert_eq!(decoded.model, model(3));
    }

    #[test]
    fn model_bytes_survive_aligned_and_unaligned_lengths() {
        for table in [json!({}), json!({"BATCH_LENGTH": 0, "RTC_CENTER": [1.5, 2.0, -3.0]})] {
            for length in [0, 8, 13, 64] {
                let bytes = encode_tile(&table, &model(length)).unwrap();
                let decoded = decode_tile(&bytes).unwrap();
                assert_eq!(decoded.feature_table, table);
                assert_eq!(decoded.model, model(length), "length {length}");
            }
        }
    }

    #[test]
    fn binary_sections_are_zero_padded() {
        let mut tile = TileContainer::new(json!({"BATCH_LENGTH": 0}), model(4));
        tile.feature_table_binary = vec![1, 2, 3];
        let bytes = tile.encode().unwrap();
        let header = TileHeader::read(&bytes).unwrap();

        assert_eq!(header.feature_table_binary_byte_length, 8);
        let start = TILE_HEADER_LENGTH + header.feature_table_json_byte_length as usize;
        assert_eq!(&bytes[start..start + 8], &[1, 2, 3, 0, 0, 0, 0, 0]);

        let decoded = decode_tile(&bytes).unwrap();
        assert_eq!(&decoded.feature_table_binary[..3], &[1, 2, 3]);
        assert_eq!(decoded.model, model(4));
    }

    #[test]
    fn decode_rejects_bad_magic_and_length() {
        let mut bytes = encode_tile(&json!({"BATCH_LENGTH": 0}), &model(8)).unwrap();

        let mut truncated = bytes.clone();
        truncated.pop();
        assert!(matches!(
            decode_tile(&truncated),
            Err(TilingError::MalformedContainer(_))
        ));

        bytes[0] = b'x';
        assert!(matches!(
            decode_tile(&bytes),
            Err(TilingError::MalformedContainer(_))
        ));

        assert!(TileHeader::read(&bytes[..10]).is_err());
    }

    #[test]
    fn non_object_table_is_rejected() {
        assert!(encode_tile(&json!([1, 2]), &[]).is_err());
    }
}
