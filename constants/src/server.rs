/// Default bind address of the tile server
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default port of the tile server
pub const DEFAULT_PORT: u16 = 8999;

/// Default directory holding one sub-directory per scene
pub const DEFAULT_STORE_DIR: &str = "resources/3dtiles_scene";

/// URL prefix the store directory is served under
pub const STATIC_SCENE_PREFIX: &str = "/3dtiles_scene";

/// Multipart field carrying tile container files
pub const TILE_UPLOAD_FIELD: &str = "b3dm";

/// Largest request body accepted by the tile server, uploads included
pub const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;
