/// ASCII tag at offset 0 of every tile container
pub const TILE_MAGIC: &[u8; 4] = b"b3dm";

/// Container format version written at offset 4
pub const TILE_FORMAT_VERSION: u32 = 1;

/// Fixed header size: magic + six u32 fields
pub const TILE_HEADER_LENGTH: usize = 28;

/// Every JSON and binary section ends on this boundary
pub const SECTION_ALIGNMENT: usize = 8;

/// Extension of tile container files
pub const TILE_EXTENSION: &str = "tile";

/// Manifest schema version written to `asset.version`
pub const TILESET_ASSET_VERSION: &str = "1.0";

/// Up axis of the model payloads, written to `asset.gltfUpAxis`
pub const TILESET_UP_AXIS: &str = "Z";

/// GLB header magic of the bundled model payload
pub const GLB_MAGIC: &[u8; 4] = b"glTF";

/// GLB container version
pub const GLB_VERSION: u32 = 2;

/// GLB chunk type tags ("JSON" and "BIN\0" little-endian)
pub const GLB_CHUNK_JSON: u32 = 0x4E4F_534A;
pub const GLB_CHUNK_BIN: u32 = 0x004E_4942;

/// GLB chunks end on this boundary
pub const GLB_ALIGNMENT: usize = 4;
