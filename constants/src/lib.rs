/// Shared constants for scene tiling, tile containers and version storage
pub mod container;
pub mod octree;
pub mod server;
pub mod store;
