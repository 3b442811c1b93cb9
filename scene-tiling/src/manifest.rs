/// Tileset manifest model: the JSON tree that links tile containers into a hierarchy.
/// Unknown fields are kept so manifests written by other tools survive a round trip.
use constants::container::{TILESET_ASSET_VERSION, TILESET_UP_AXIS};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bounds::Aabb;
use crate::error::{TilingError, TilingResult};

/// Slack allowed when checking that refit boxes contain their children.
const CONTAINMENT_EPSILON: f64 = 1e-9;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gltf_up_axis: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Asset {
    fn default() -> Self {
        Self {
            version: TILESET_ASSET_VERSION.to_string(),
            gltf_up_axis: Some(TILESET_UP_AXIS.to_string()),
            extra: Map::new(),
        }
    }
}

/// Top-level manifest document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
    pub asset: Asset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometric_error: Option<f64>,
    pub root: TileNode,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tileset {
    pub fn new(root: TileNode) -> Self {
        Self {
            asset: Asset::default(),
            geometric_error: None,
            root,
            extra: Map::new(),
        }
    }

    pub fn from_json(text: &str) -> TilingResult<Self> {
        serde_json::from_str(text).map_err(|e| TilingError::MalformedManifest(e.to_string()))
    }

    pub fn from_slice(bytes: &[u8]) -> TilingResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| TilingError::MalformedManifest(e.to_string()))
    }

    pub fn from_value(value: Value) -> TilingResult<Self> {
        serde_json::from_value(value).map_err(|e| TilingError::MalformedManifest(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> TilingResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Content URIs of every node, depth-first.
    pub fn content_uris(&self) -> Vec<String> {
        let mut uris = Vec::new();
        self.root.walk(&mut |node| {
            if let Some(content) = &node.content {
                uris.push(content.uri.clone());
            }
        });
        uris
    }
}

/// One node of the manifest tree.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TileNode {
    pub bounding_volume: BoundingVolume,
    #[serde(default)]
    pub children: Vec<TileNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TileContent>,
    pub geometric_error: f64,
    #[serde(default)]
    pub refine: Refine,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TileNode {
    fn default() -> Self {
        Self {
            bounding_volume: BoundingVolume::default(),
            children: Vec::new(),
            content: None,
            geometric_error: 0.0,
            refine: Refine::Add,
            extra: Map::new(),
        }
    }
}

impl TileNode {
    pub fn with_box(bbox: OrientedBox) -> Self {
        Self {
            bounding_volume: BoundingVolume { bbox },
            ..Self::default()
        }
    }

    pub fn content_uri(&self) -> Option<&str> {
        self.content.as_ref().map(|c| c.uri.as_str())
    }

    /// Visit this node and every descendant, parents first.
    pub fn walk(&self, visit: &mut impl FnMut(&TileNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut TileNode)) {
        visit(self);
        for child in &mut self.children {
            child.walk_mut(visit);
        }
    }

    pub fn find_by_uri_mut(&mut self, uri: &str) -> Option<&mut TileNode> {
        if self.content_uri() == Some(uri) {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_uri_mut(uri))
    }

    /// True when every node's box contains the boxes of all its children, recursively.
    pub fn bounds_contain_children(&self) -> bool {
        let outer = self.bounding_volume.bbox.to_aabb();
        let slack = DVec3::splat(CONTAINMENT_EPSILON * outer.dimensions().max_element().max(1.0));
        self.children.iter().all(|child| {
            let inner = child.bounding_volume.bbox.to_aabb();
            (outer.min - slack).cmple(inner.min).all()
                && (outer.max + slack).cmpge(inner.max).all()
                && child.bounds_contain_children()
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BoundingVolume {
    #[serde(rename = "box")]
    pub bbox: OrientedBox,
}

/// Center followed by three half-axis vectors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientedBox(pub [f64; 12]);

impl OrientedBox {
    pub fn axis_aligned(center: DVec3, half: DVec3) -> Self {
        Self([
            center.x, center.y, center.z, half.x, 0.0, 0.0, 0.0, half.y, 0.0, 0.0, 0.0, half.z,
        ])
    }

    pub fn from_aabb(bounds: &Aabb) -> Self {
        Self::axis_aligned(bounds.center(), bounds.dimensions() * 0.5)
    }

    pub fn center(&self) -> DVec3 {
        DVec3::new(self.0[0], self.0[1], self.0[2])
    }

    /// Per-axis extent of the box from its center, whatever its orientation.
    pub fn half_extents(&self) -> DVec3 {
        let b = &self.0;
        DVec3::new(
            b[3].abs() + b[6].abs() + b[9].abs(),
            b[4].abs() + b[7].abs() + b[10].abs(),
            b[5].abs() + b[8].abs() + b[11].abs(),
        )
    }

    pub fn to_aabb(&self) -> Aabb {
        let center = self.center();
        let half = self.half_extents();
        Aabb::new(center - half, center + half)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TileContent {
    pub uri: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TileContent {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Refine {
    #[default]
    Add,
    Replace,
}

/// Recompute bounding volumes bottom-up so each box contains its children.
/// Returns a new tree; a node keeps its center and only ever grows.
/// Boxes that already contain their children are left untouched.
pub fn fit_bounds(node: &TileNode) -> TileNode {
    let children: Vec<TileNode> = node.children.iter().map(fit_bounds).collect();

    let center = node.bounding_volume.bbox.center();
    let own = node.bounding_volume.bbox.half_extents();
    let mut half = own;
    for child in &children {
        let needed = child.bounding_volume.bbox.to_aabb().max_deviation_from(center);
        half = half.max(needed);
    }

    let bbox = if half == own {
        node.bounding_volume.bbox
    } else {
        OrientedBox::axis_aligned(center, half)
    };

    TileNode {
        bounding_volume: BoundingVolume { bbox },
        children,
        content: node.content.clone(),
        geometric_error: node.geometric_error,
        refine: node.refine,
        extra: node.extra.clone(),
    }
}
