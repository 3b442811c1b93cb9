/// Scene tiling and version control: octree bucketing, tile containers, tileset manifests,
/// version graphs and three-way manifest merges.
pub mod bounds;
pub mod container;
pub mod encoder;
pub mod error;
pub mod generator;
pub mod manifest;
pub mod merge;
pub mod octree;
pub mod registry;
pub mod scene;
pub mod store;
pub mod update;
pub mod versions;

pub use bounds::Aabb;
pub use container::{TileContainer, TileHeader, decode_tile, encode_tile};
pub use encoder::{GlbBundler, ModelEncoder};
pub use error::{TilingError, TilingResult};
pub use generator::{GeneratedTileset, TileFile, TileGenerator};
pub use manifest::{OrientedBox, Refine, TileContent, TileNode, Tileset, fit_bounds};
pub use merge::{ConflictKind, MergeConflict, MergeResult, merge, merge_tilesets};
pub use octree::{NodeId, ObjectId, ObjectRef, OctreeConfig, OctreeNode, SpatialOctree};
pub use registry::{SceneRegistry, timestamp_tag};
pub use scene::{Scene, SceneObject};
pub use store::{FsVersionStore, VersionStore};
pub use update::{TileUpdate, apply_tile_updates};
pub use versions::{Version, VersionFile, VersionGraph, VersionId};
