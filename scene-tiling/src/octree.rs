//! Bounded-depth octree bucketing scene objects by their world-space bounds.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]; each node keeps
//! its parent and the octant it occupies in that parent, so a node's path
//! from the root can be rebuilt without owning back-references.
//!
//! Octant numbering: bit 0 = +X, bit 1 = +Y, bit 2 = +Z.

use std::collections::HashMap;
use std::path::Path;

use constants::octree::{DEPTH_MAX, OBJECTS_THRESHOLD, OCTANT_COUNT, OVERLAP_PCT, ROOT_RADIUS};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::bounds::Aabb;
use crate::error::{TilingError, TilingResult};

/// Opaque handle of a scene object. The octree never owns the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object handle plus its world-space bounds at insertion time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectRef {
    pub id: ObjectId,
    pub bounds: Aabb,
}

impl ObjectRef {
    pub fn new(id: ObjectId, bounds: Aabb) -> Self {
        Self { id, bounds }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Subdivision policy of the octree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// Nodes at this depth never split.
    pub depth_max: u32,
    /// A leaf splits once it holds more objects than this.
    pub objects_threshold: usize,
    /// Fraction of a node's radius its test volume grows by.
    pub overlap_pct: f64,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            depth_max: DEPTH_MAX,
            objects_threshold: OBJECTS_THRESHOLD,
            overlap_pct: OVERLAP_PCT,
        }
    }
}

impl OctreeConfig {
    pub fn from_toml_str(text: &str) -> TilingResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> TilingResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// One spatial cell of the tree.
#[derive(Debug, Clone)]
pub struct OctreeNode {
    pub center: DVec3,
    /// Half-width of the node's cubic cell.
    pub radius: f64,
    pub depth: u32,
    /// Index of this node in its parent's `children`; `None` for the root.
    pub octant: Option<u8>,
    pub children: [Option<NodeId>; OCTANT_COUNT],
    pub objects: Vec<ObjectRef>,
    pub parent: Option<NodeId>,
    live: bool,
}

impl OctreeNode {
    fn new(center: DVec3, radius: f64, depth: u32, parent: Option<NodeId>, octant: Option<u8>) -> Self {
        Self {
            center,
            radius,
            depth,
            octant,
            children: [None; OCTANT_COUNT],
            objects: Vec::new(),
            parent,
            live: true,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(Option::is_none)
    }

    /// Nominal cell of the node, without overlap.
    pub fn cell(&self) -> Aabb {
        Aabb::from_center_half(self.center, self.radius)
    }

    pub fn child_center(&self, octant: u8) -> DVec3 {
        let offset = self.radius * 0.5;
        let sign = |bit: u8| if octant & bit != 0 { offset } else { -offset };
        self.center + DVec3::new(sign(1), sign(2), sign(4))
    }

    /// Existing children with their octant index, in octant order.
    pub fn child_ids(&self) -> impl Iterator<Item = (u8, NodeId)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(octant, child)| child.map(|id| (octant as u8, id)))
    }

    fn holds(&self, id: ObjectId) -> bool {
        self.objects.iter().any(|o| o.id == id)
    }
}

/// Arena-backed octree of object references.
#[derive(Debug, Clone)]
pub struct SpatialOctree {
    config: OctreeConfig,
    nodes: Vec<OctreeNode>,
    free: Vec<NodeId>,
    root: NodeId,
    /// Every node an object currently sits in.
    locations: HashMap<ObjectId, SmallVec<[NodeId; 2]>>,
}

impl SpatialOctree {
    /// Octree whose root cell is centred on the origin with the default radius.
    pub fn new(config: OctreeConfig) -> Self {
        Self::with_root(config, DVec3::ZERO, ROOT_RADIUS)
    }

    pub fn with_root(config: OctreeConfig, center: DVec3, radius: f64) -> Self {
        Self {
            config,
            nodes: vec![OctreeNode::new(center, radius, 0, None, None)],
            free: Vec::new(),
            root: NodeId(0),
            locations: HashMap::new(),
        }
    }

    /// Octree whose root cube encloses `bounds`.
    pub fn enclosing(config: OctreeConfig, bounds: &Aabb) -> Self {
        if bounds.is_empty() {
            return Self::new(config);
        }
        let half = bounds.dimensions().max_element() * 0.5;
        // Degenerate scenes still get a non-zero cell.
        let radius = if half > 0.0 { half } else { 1.0 };
        Self::with_root(config, bounds.center(), radius)
    }

    pub fn config(&self) -> &OctreeConfig {
        &self.config
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_node(&self) -> &OctreeNode {
        self.node_ref(self.root)
    }

    /// Look up a live node.
    pub fn node(&self, id: NodeId) -> Option<&OctreeNode> {
        self.nodes.get(id.index()).filter(|node| node.live)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.locations.contains_key(&id)
    }

    /// Nodes currently holding the object.
    pub fn locations(&self, id: ObjectId) -> &[NodeId] {
        self.locations.get(&id).map(|l| l.as_slice()).unwrap_or(&[])
    }

    /// Number of distinct objects in the tree.
    pub fn object_count(&self) -> usize {
        self.locations.len()
    }

    /// Number of (object, node) placements; exceeds `object_count` under overlap.
    pub fn membership_count(&self) -> usize {
        self.locations.values().map(|l| l.len()).sum()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Insert an object, replacing any previous placement of the same id.
    pub fn insert(&mut self, object: ObjectRef) -> TilingResult<()> {
        let root = self.root_node();
        let volume = Aabb::from_center_half(root.center, self.expanded(root.radius));
        if !volume.contains(&object.bounds) {
            return Err(TilingError::ObjectOutsideRoot { id: object.id.0 });
        }

        if self.contains(object.id) {
            self.remove(object.id)?;
        }

        self.insert_at(self.root, object);
        Ok(())
    }

    /// Remove every placement of the object and prune emptied nodes.
    pub fn remove(&mut self, id: ObjectId) -> TilingResult<ObjectRef> {
        let holders = self
            .locations
            .remove(&id)
            .ok_or(TilingError::UnknownObject(id.0))?;

        let mut removed = None;
        for &holder in &holders {
            let node = self.node_mut(holder);
            if let Some(pos) = node.objects.iter().position(|o| o.id == id) {
                removed = Some(node.objects.remove(pos));
            }
        }

        for &holder in &holders {
            self.collapse_upward(holder);
        }

        removed.ok_or(TilingError::UnknownObject(id.0))
    }

    /// Visit every live node depth-first, parents before children, in octant order.
    pub fn for_each_node(&self, mut visit: impl FnMut(NodeId, &OctreeNode)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node_ref(id);
            visit(id, node);
            // Reverse so octant 0 is popped first.
            stack.extend(node.children.iter().rev().flatten().copied());
        }
    }

    /// Deterministic identifier built from the octant path: `root`, `root_3`, `root_3_5`.
    pub fn path_id(&self, id: NodeId) -> String {
        let mut octants = Vec::new();
        let mut current = self.node_ref(id);
        while let (Some(octant), Some(parent)) = (current.octant, current.parent) {
            octants.push(octant);
            current = self.node_ref(parent);
        }

        let mut name = String::from("root");
        for octant in octants.iter().rev() {
            name.push('_');
            name.push_str(&octant.to_string());
        }
        name
    }

    /// Objects held by the node and all of its descendants, counting every placement.
    pub fn subtree_membership(&self, id: NodeId) -> usize {
        let node = self.node_ref(id);
        node.objects.len()
            + node
                .child_ids()
                .map(|(_, child)| self.subtree_membership(child))
                .sum::<usize>()
    }

    fn expanded(&self, radius: f64) -> f64 {
        radius * (1.0 + self.config.overlap_pct)
    }

    fn node_ref(&self, id: NodeId) -> &OctreeNode {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut OctreeNode {
        &mut self.nodes[id.index()]
    }

    fn insert_at(&mut self, id: NodeId, object: ObjectRef) {
        if !self.node_ref(id).is_leaf() {
            self.route(id, object);
            return;
        }

        self.store(id, object);

        let node = self.node_ref(id);
        if node.objects.len() > self.config.objects_threshold && node.depth < self.config.depth_max {
            self.split(id);
        }
    }

    /// Send the object to every child whose test volume contains it, or keep it here.
    fn route(&mut self, id: NodeId, object: ObjectRef) {
        let octants = self.fitting_octants(id, &object.bounds);
        if octants.is_empty() {
            self.store(id, object);
            return;
        }
        for octant in octants {
            let child = self.child_or_create(id, octant);
            self.insert_at(child, object);
        }
    }

    fn fitting_octants(&self, id: NodeId, bounds: &Aabb) -> SmallVec<[u8; OCTANT_COUNT]> {
        let node = self.node_ref(id);
        let half = self.expanded(node.radius * 0.5);
        (0..OCTANT_COUNT as u8)
            .filter(|&octant| Aabb::from_center_half(node.child_center(octant), half).contains(bounds))
            .collect()
    }

    fn split(&mut self, id: NodeId) {
        let objects = std::mem::take(&mut self.node_mut(id).objects);
        debug!(
            depth = self.node_ref(id).depth,
            objects = objects.len(),
            "splitting octree node"
        );
        for object in &objects {
            self.forget_location(object.id, id);
        }
        for object in objects {
            self.route(id, object);
        }
    }

    fn store(&mut self, id: NodeId, object: ObjectRef) {
        let node = self.node_mut(id);
        if node.holds(object.id) {
            return;
        }
        node.objects.push(object);
        let holders = self.locations.entry(object.id).or_default();
        if !holders.contains(&id) {
            holders.push(id);
        }
    }

    fn forget_location(&mut self, object: ObjectId, node: NodeId) {
        if let Some(holders) = self.locations.get_mut(&object) {
            holders.retain(|h| *h != node);
            if holders.is_empty() {
                self.locations.remove(&object);
            }
        }
    }

    fn child_or_create(&mut self, id: NodeId, octant: u8) -> NodeId {
        if let Some(child) = self.node_ref(id).children[octant as usize] {
            return child;
        }

        let parent = self.node_ref(id);
        let child = OctreeNode::new(
            parent.child_center(octant),
            parent.radius * 0.5,
            parent.depth + 1,
            Some(id),
            Some(octant),
        );

        let child_id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot.index()] = child;
                slot
            }
            None => {
                self.nodes.push(child);
                NodeId((self.nodes.len() - 1) as u32)
            }
        };
        self.node_mut(id).children[octant as usize] = Some(child_id);
        child_id
    }

    fn free_node(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        if !node.live {
            return;
        }
        node.live = false;
        node.objects.clear();
        node.children = [None; OCTANT_COUNT];
        if let (Some(parent), Some(octant)) = (node.parent, node.octant) {
            self.nodes[parent.index()].children[octant as usize] = None;
        }
        self.free.push(id);
    }

    /// Walk from `start` to the root, pruning empty leaves and merging sparse subtrees.
    fn collapse_upward(&mut self, start: NodeId) {
        let mut current = Some(start);
        while let Some(id) = current {
            let Some(node) = self.node(id) else {
                break;
            };
            let parent = node.parent;

            if node.is_leaf() && node.objects.is_empty() && parent.is_some() {
                self.free_node(id);
            } else if !node.is_leaf() {
                self.try_merge(id);
            }
            current = parent;
        }
    }

    /// Absorb leaf children back into `id` when the subtree fits under the threshold.
    fn try_merge(&mut self, id: NodeId) -> bool {
        let node = self.node_ref(id);
        let children: SmallVec<[NodeId; OCTANT_COUNT]> = node.child_ids().map(|(_, c)| c).collect();
        if children.iter().any(|&c| !self.node_ref(c).is_leaf()) {
            return false;
        }

        let mut merged: Vec<ObjectRef> = node.objects.clone();
        for &child in &children {
            for object in &self.node_ref(child).objects {
                if !merged.iter().any(|o| o.id == object.id) {
                    merged.push(*object);
                }
            }
        }
        if merged.len() > self.config.objects_threshold {
            return false;
        }

        for &child in &children {
            let objects = std::mem::take(&mut self.node_mut(child).objects);
            for object in objects {
                self.forget_location(object.id, child);
            }
            self.free_node(child);
        }

        self.node_mut(id).objects.clear();
        for object in merged {
            self.forget_location(object.id, id);
            self.store(id, object);
        }
        debug!(node = ?id, "merged octree children back into parent");
        true
    }
}
