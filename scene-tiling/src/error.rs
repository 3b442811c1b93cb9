/// Error taxonomy for tiling, versioning and storage operations.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TilingError {
    /// A version with this tag already exists in the scene's graph.
    #[error("duplicate version tag: {0:?}")]
    DuplicateTag(String),

    /// A parent tag or id referenced by a commit or merge is not in the graph.
    #[error("unknown parent version: {0:?}")]
    UnknownParentVersion(String),

    #[error("a version takes at most two parents, got {0}")]
    TooManyParents(usize),

    /// Tileset JSON is missing required fields or is not a tileset at all.
    #[error("malformed tileset manifest: {0}")]
    MalformedManifest(String),

    /// A section length does not fit the container's u32 header fields.
    #[error("tile container section too large: {section} is {length} bytes")]
    SerializationOverflow { section: &'static str, length: usize },

    #[error("malformed tile container: {0}")]
    MalformedContainer(String),

    #[error("malformed versions file: {0}")]
    MalformedVersionFile(String),

    #[error("object {id} does not fit inside the octree root")]
    ObjectOutsideRoot { id: u64 },

    #[error("object {0} is not in the octree")]
    UnknownObject(u64),

    #[error("no common ancestor between {left:?} and {right:?}")]
    NoCommonAncestor { left: String, right: String },

    #[error("tile {0:?} is not referenced by the tileset")]
    UnknownTile(String),

    /// Tags become part of file names, so they must be plain names.
    #[error("invalid version tag: {0:?}")]
    InvalidTag(String),

    #[error("invalid scene name: {0:?}")]
    InvalidSceneName(String),

    #[error("model payload for object {id} is missing")]
    MissingModel { id: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type TilingResult<T> = Result<T, TilingError>;
