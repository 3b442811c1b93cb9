/// Maximum subdivision depth of the scene octree
pub const DEPTH_MAX: u32 = 10;

/// Max number of objects a node holds before it splits
pub const OBJECTS_THRESHOLD: usize = 50;

/// Fraction of a node's radius its test volume is expanded by (0 = no overlap)
pub const OVERLAP_PCT: f64 = 0.0;

/// Half-width of the root cell when the caller does not size it
pub const ROOT_RADIUS: f64 = 10.0;

/// Number of octants per node
pub const OCTANT_COUNT: usize = 8;
