/// Three-way structural merge of tileset manifests against their common ancestor.
///
/// Children are aligned by index. Each field takes the side that changed relative to
/// the base; when both sides changed a field differently, the right side wins and the
/// clash is reported as a [`MergeConflict`].
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::manifest::{TileNode, Tileset, fit_bounds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    BoundingVolume,
    GeometricError,
    Refine,
    Content,
    Extra,
}

/// Both sides changed the same field of the same node to different values.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConflict {
    /// Child indices from the root.
    pub path: Vec<usize>,
    pub kind: ConflictKind,
}

impl std::fmt::Display for MergeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "root")?;
        for index in &self.path {
            write!(f, "/{index}")?;
        }
        write!(f, " ({:?})", self.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub root: TileNode,
    /// Every content URI of the merged tree; `true` when it came out of a content conflict
    /// and the tile should be re-serialized.
    pub replacements: BTreeMap<String, bool>,
    pub conflicts: Vec<MergeConflict>,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Default)]
struct MergeState {
    conflicts: Vec<MergeConflict>,
    conflicted_uris: BTreeSet<String>,
}

impl MergeState {
    /// Three-way pick of one field.
    fn pick<T: PartialEq + Clone>(
        &mut self,
        path: &[usize],
        kind: ConflictKind,
        base: &T,
        left: &T,
        right: &T,
    ) -> T {
        if left == right || base == left {
            right.clone()
        } else if base == right {
            left.clone()
        } else {
            self.conflict(path, kind);
            right.clone()
        }
    }

    fn conflict(&mut self, path: &[usize], kind: ConflictKind) {
        self.conflicts.push(MergeConflict {
            path: path.to_vec(),
            kind,
        });
    }
}

/// Merge `left` and `right` against their common ancestor `base`, then refit bounds bottom-up.
pub fn merge(base: &TileNode, left: &TileNode, right: &TileNode) -> MergeResult {
    let mut state = MergeState::default();
    let mut path = Vec::new();
    let merged = merge_node(base, left, right, &mut path, &mut state);
    let root = fit_bounds(&merged);

    let mut replacements = BTreeMap::new();
    root.walk(&mut |node| {
        if let Some(uri) = node.content_uri() {
            replacements.insert(uri.to_string(), state.conflicted_uris.contains(uri));
        }
    });

    for conflict in &state.conflicts {
        warn!(node = %conflict, "both sides changed the same field, keeping the right side");
    }

    MergeResult {
        root,
        replacements,
        conflicts: state.conflicts,
    }
}

/// Merge whole manifests: base's top-level fields with the merged root.
pub fn merge_tilesets(base: &Tileset, left: &Tileset, right: &Tileset) -> (Tileset, MergeResult) {
    let result = merge(&base.root, &left.root, &right.root);
    info!(
        tiles = result.replacements.len(),
        conflicts = result.conflicts.len(),
        "merged tilesets"
    );
    let tileset = Tileset {
        root: result.root.clone(),
        ..base.clone()
    };
    (tileset, result)
}

fn merge_node(
    base: &TileNode,
    left: &TileNode,
    right: &TileNode,
    path: &mut Vec<usize>,
    state: &mut MergeState,
) -> TileNode {
    let bounding_volume = state.pick(
        path,
        ConflictKind::BoundingVolume,
        &base.bounding_volume,
        &left.bounding_volume,
        &right.bounding_volume,
    );
    let geometric_error = state.pick(
        path,
        ConflictKind::GeometricError,
        &base.geometric_error,
        &left.geometric_error,
        &right.geometric_error,
    );
    let refine = state.pick(path, ConflictKind::Refine, &base.refine, &left.refine, &right.refine);

    let content = if left.content == right.content || base.content == left.content {
        right.content.clone()
    } else if base.content == right.content {
        left.content.clone()
    } else {
        state.conflict(path, ConflictKind::Content);
        let chosen = right.content.clone().or_else(|| left.content.clone());
        if let Some(content) = &chosen {
            state.conflicted_uris.insert(content.uri.clone());
        }
        chosen
    };

    let extra = merge_extra(&base.extra, &left.extra, &right.extra, path, state);

    let slots = left.children.len().max(right.children.len());
    let mut children = Vec::with_capacity(slots);
    for index in 0..slots {
        path.push(index);
        let merged = merge_slot(
            base.children.get(index),
            left.children.get(index),
            right.children.get(index),
            path,
            state,
        );
        path.pop();
        children.extend(merged);
    }

    TileNode {
        bounding_volume,
        children,
        content,
        geometric_error,
        refine,
        extra,
    }
}

fn merge_slot(
    base: Option<&TileNode>,
    left: Option<&TileNode>,
    right: Option<&TileNode>,
    path: &mut Vec<usize>,
    state: &mut MergeState,
) -> Option<TileNode> {
    match (left, right) {
        (Some(left), Some(right)) => {
            let empty = TileNode::default();
            Some(merge_node(base.unwrap_or(&empty), left, right, path, state))
        }
        // One side dropped a slot the other left as it was in base.
        (Some(side), None) | (None, Some(side)) if base == Some(side) => None,
        (Some(side), None) | (None, Some(side)) => Some(side.clone()),
        (None, None) => None,
    }
}

fn merge_extra(
    base: &Map<String, Value>,
    left: &Map<String, Value>,
    right: &Map<String, Value>,
    path: &[usize],
    state: &mut MergeState,
) -> Map<String, Value> {
    let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    let mut merged = Map::new();
    for key in keys {
        let picked = state.pick(
            path,
            ConflictKind::Extra,
            &base.get(key),
            &left.get(key),
            &right.get(key),
        );
        if let Some(value) = picked {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{OrientedBox, TileContent};
    use glam::DVec3;
    use serde_json::json;

    fn node(center: [f64; 3], half: f64, uri: Option<&str>) -> TileNode {
        let mut node = TileNode::with_box(OrientedBox::axis_aligned(
            DVec3::from_array(center),
            DVec3::splat(half),
        ));
        node.content = uri.map(TileContent::new);
        node
    }

    /// Root with two populated children, already fitted.
    fn base_tree() -> TileNode {
        let mut root = node([0.0, 0.0, 0.0], 10.0, None);
        root.children.push(node([5.0, 5.0, 5.0], 5.0, Some("./root_7.tile")));
        root.children.push(node([-5.0, 5.0, 5.0], 5.0, Some("./root_6.tile")));
        root.children[1]
            .children
            .push(node([-7.5, 7.5, 7.5], 2.5, Some("./root_6_7.tile")));
        root
    }

    #[test]
    fn one_sided_changes_are_preserved_exactly() {
        let base = base_tree();
        let mut left = base_tree();
        left.children[0].content = Some(TileContent::new("./root_7_v2.tile"));
        left.children[1].children.clear();
        left.children.push(node([5.0, -5.0, -5.0], 5.0, Some("./root_1.tile")));

        let merged = merge(&base, &left, &base);
        assert_eq!(merged.root, left);
        assert!(merged.conflicts.is_empty());

        let merged = merge(&base, &base, &left);
        assert_eq!(merged.root, left);
    }

    #[test]
    fn independent_edits_on_both_sides_combine() {
        let base = base_tree();
        let mut left = base_tree();
        left.children[0].content = Some(TileContent::new("./root_7_L.tile"));
        let mut right = base_tree();
        right.children[1].geometric_error = 4.0;

        let result = merge(&base, &left, &right);
        assert_eq!(result.root.children[0].content_uri(), Some("./root_7_L.tile"));
        assert_eq!(result.root.children[1].geometric_error, 4.0);
        assert_eq!(result.root.children[0].geometric_error, 0.0);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.replacements.get("./root_7_L.tile"), Some(&false));
        assert_eq!(result.replacements.len(), 3);
    }

    #[test]
    fn content_conflict_prefers_right_and_is_reported() {
        let base = base_tree();
        let mut left = base_tree();
        left.children[0].content = Some(TileContent::new("./root_7_L.tile"));
        let mut right = base_tree();
        right.children[0].content = Some(TileContent::new("./root_7_R.tile"));

        let result = merge(&base, &left, &right);
        assert_eq!(result.root.children[0].content_uri(), Some("./root_7_R.tile"));
        assert_eq!(
            result.conflicts,
            vec![MergeConflict {
                path: vec![0],
                kind: ConflictKind::Content
            }]
        );
        assert_eq!(result.replacements.get("./root_7_R.tile"), Some(&true));
        assert_eq!(result.replacements.get("./root_6.tile"), Some(&false));
        assert_eq!(result.conflicts[0].to_string(), "root/0 (Content)");
    }

    #[test]
    fn content_removed_on_right_falls_back_to_left() {
        let base = base_tree();
        let mut left = base_tree();
        left.children[0].content = Some(TileContent::new("./root_7_L.tile"));
        let mut right = base_tree();
        right.children[0].content = None;

        let result = merge(&base, &left, &right);
        assert_eq!(result.root.children[0].content_uri(), Some("./root_7_L.tile"));
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn field_conflict_keeps_right() {
        let base = base_tree();
        let mut left = base_tree();
        left.children[1].geometric_error = 2.0;
        let mut right = base_tree();
        right.children[1].geometric_error = 3.0;

        let result = merge(&base, &left, &right);
        assert_eq!(result.root.children[1].geometric_error, 3.0);
        assert_eq!(result.conflicts[0].kind, ConflictKind::GeometricError);
        assert_eq!(result.conflicts[0].path, vec![1]);
    }

    #[test]
    fn merged_bounds_contain_grown_children() {
        let base = base_tree();
        let mut left = base_tree();
        left.children[0].children.push(node([9.0, 9.0, 14.0], 2.0, Some("./tall.tile")));
        let mut right = base_tree();
        right.children.push(node([-12.0, 0.0, 0.0], 3.0, Some("./wide.tile")));

        let result = merge(&base, &left, &right);
        assert!(result.root.bounds_contain_children());
        assert_eq!(result.root.children.len(), 3);
        let half = result.root.bounding_volume.bbox.half_extents();
        assert_eq!(half, DVec3::new(15.0, 11.0, 16.0));
    }

    #[test]
    fn extras_merge_per_key() {
        let mut base = base_tree();
        base.extra.insert("transform".into(), json!([1, 0, 0, 1]));
        let mut left = base.clone();
        left.extra.insert("name".into(), json!("left"));
        let mut right = base.clone();
        right.extra.remove("transform");

        let result = merge(&base, &left, &right);
        assert_eq!(result.root.extra.get("name"), Some(&json!("left")));
        assert!(result.root.extra.get("transform").is_none());
    }

    #[test]
    fn tileset_merge_keeps_base_top_level() {
        let mut base = Tileset::new(base_tree());
        base.extra.insert("properties".into(), json!({}));
        let mut left = base.clone();
        left.root.children[0].geometric_error = 1.0;
        let right = base.clone();

        let (tileset, result) = merge_tilesets(&base, &left, &right);
        assert!(tileset.extra.contains_key("properties"));
        assert_eq!(tileset.root, result.root);
        assert_eq!(tileset.root.children[0].geometric_error, 1.0);
    }
}
