/// Tile generation: walks the octree depth-first, encodes one tile per populated node
/// and assembles the manifest tree mirroring the octree shape.
use constants::container::TILE_EXTENSION;
use glam::DVec3;
use rayon::prelude::*;
use serde_json::json;
use tracing::{debug, info};

use crate::container::encode_tile;
use crate::encoder::ModelEncoder;
use crate::error::TilingResult;
use crate::manifest::{BoundingVolume, OrientedBox, Refine, TileContent, TileNode, Tileset, fit_bounds};
use crate::octree::{NodeId, ObjectId, SpatialOctree};
use crate::scene::Scene;

/// Encoded tile ready to be written next to the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Manifest plus every tile file it references.
#[derive(Debug, Clone)]
pub struct GeneratedTileset {
    pub tileset: Tileset,
    pub files: Vec<TileFile>,
}

impl GeneratedTileset {
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.bytes.len()).sum()
    }
}

/// A tile still to be encoded: file name and the objects folded into it.
struct PendingTile {
    name: String,
    objects: Vec<ObjectId>,
}

pub struct TileGenerator<E: ModelEncoder> {
    encoder: E,
}

/// Relative URI the manifest uses for a tile file.
pub fn tile_uri(file_name: &str) -> String {
    format!("./{file_name}")
}

pub fn tile_file_name(path_id: &str) -> String {
    format!("{path_id}.{TILE_EXTENSION}")
}

impl<E: ModelEncoder> TileGenerator<E> {
    pub fn new(encoder: E) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Generate the full tileset for `octree`, resolving object payloads from `scene`.
    /// `progress` receives `(processed, total)` object placements; nothing is returned on failure.
    pub fn generate(
        &self,
        octree: &SpatialOctree,
        scene: &Scene,
        mut progress: impl FnMut(usize, usize),
    ) -> TilingResult<GeneratedTileset> {
        let total = octree.membership_count();
        let mut processed = 0;
        let mut pending = Vec::new();

        let built = self.build_node(octree, octree.root(), &mut pending, &mut |count| {
            processed += count;
            progress(processed, total);
        });
        let root = match built {
            Some(node) => node,
            None => {
                progress(0, total);
                let root = octree.root_node();
                TileNode::with_box(OrientedBox::axis_aligned(
                    root.center,
                    DVec3::splat(root.radius),
                ))
            }
        };
        let root = fit_bounds(&root);

        let feature_table = json!({ "BATCH_LENGTH": 0 });
        let files = pending
            .par_iter()
            .map(|tile| {
                let objects = tile
                    .objects
                    .iter()
                    .map(|id| scene.require(*id))
                    .collect::<TilingResult<Vec<_>>>()?;
                let model = self.encoder.encode(&objects)?;
                Ok(TileFile {
                    name: tile.name.clone(),
                    bytes: encode_tile(&feature_table, &model)?,
                })
            })
            .collect::<TilingResult<Vec<_>>>()?;

        let generated = GeneratedTileset {
            tileset: Tileset::new(root),
            files,
        };
        info!(
            tiles = generated.files.len(),
            objects = octree.object_count(),
            bytes = generated.total_bytes(),
            "generated tileset"
        );
        Ok(generated)
    }

    /// Manifest node for `id` and its populated descendants, or `None` for an empty subtree.
    fn build_node(
        &self,
        octree: &SpatialOctree,
        id: NodeId,
        pending: &mut Vec<PendingTile>,
        folded: &mut dyn FnMut(usize),
    ) -> Option<TileNode> {
        let node = octree.node(id)?;

        let mut half = DVec3::splat(node.radius);
        let mut content = None;
        if !node.objects.is_empty() {
            let path_id = octree.path_id(id);
            let name = tile_file_name(&path_id);
            let mut objects = Vec::with_capacity(node.objects.len());
            for object in &node.objects {
                half = half.max(object.bounds.max_deviation_from(node.center));
                objects.push(object.id);
                folded(1);
            }
            debug!(node = %path_id, objects = objects.len(), "folded node objects");
            content = Some(TileContent::new(tile_uri(&name)));
            pending.push(PendingTile { name, objects });
        }

        let children: Vec<TileNode> = node
            .child_ids()
            .filter_map(|(_, child)| self.build_node(octree, child, pending, folded))
            .collect();

        if content.is_none() && children.is_empty() {
            return None;
        }

        Some(TileNode {
            bounding_volume: BoundingVolume {
                bbox: OrientedBox::axis_aligned(node.center, half),
            },
            children,
            content,
            geometric_error: 0.0,
            refine: Refine::Add,
            ..TileNode::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Aabb;
    use crate::container::decode_tile;
    use crate::encoder::GlbBundler;
    use crate::octree::OctreeConfig;
    use crate::scene::SceneObject;

    fn scene_with(objects: &[(u64, [f64; 3], f64)]) -> Scene {
        let mut scene = Scene::new();
        for &(id, center, half) in objects {
            let bounds = Aabb::from_center_half(DVec3::from_array(center), half);
            scene.insert(SceneObject::new(id, format!("o{id}"), bounds, vec![id as u8; 3]));
        }
        scene
    }

    fn octree_for(scene: &Scene, config: OctreeConfig) -> SpatialOctree {
        let mut octree = SpatialOctree::new(config);
        for object in scene.iter() {
            octree.insert(object.object_ref()).unwrap();
        }
        octree
    }

    #[test]
    fn same_octant_objects_emit_only_populated_children() {
        let scene = scene_with(&[
            (1, [5.0, 5.0, 5.0], 1.0),
            (2, [5.5, 5.0, 5.0], 1.0),
            (3, [5.0, 5.5, 5.0], 1.0),
        ]);
        let config = OctreeConfig {
            depth_max: 2,
            objects_threshold: 2,
            overlap_pct: 0.0,
        };
        let octree = octree_for(&scene, config);

        let generated = TileGenerator::new(GlbBundler)
            .generate(&octree, &scene, |_, _| {})
            .unwrap();
        let root = &generated.tileset.root;

        assert!(root.content.is_none());
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].content_uri(), Some("./root_7.tile"));
        assert_eq!(generated.files.len(), 1);
        assert_eq!(generated.files[0].name, "root_7.tile");
        assert!(root.bounds_contain_children());
    }

    #[test]
    fn boxes_expand_to_straddling_content() {
        // The large object straddles the centre planes and overhangs the root cell.
        let scene = scene_with(&[(1, [0.0, 0.0, 0.0], 12.0), (2, [6.0, 6.0, 6.0], 1.0)]);
        let config = OctreeConfig {
            depth_max: 3,
            objects_threshold: 1,
            overlap_pct: 0.5,
        };
        let octree = octree_for(&scene, config);
        let generated = TileGenerator::new(GlbBundler)
            .generate(&octree, &scene, |_, _| {})
            .unwrap();

        let root = &generated.tileset.root;
        assert_eq!(root.content_uri(), Some("./root.tile"));
        assert_eq!(root.bounding_volume.bbox.half_extents(), DVec3::splat(12.0));
        assert_eq!(root.children[0].content_uri(), Some("./root_7.tile"));
        assert!(root.bounds_contain_children());
    }

    #[test]
    fn progress_counts_every_placement() {
        let scene = scene_with(&[
            (1, [5.0, 5.0, 5.0], 1.0),
            (2, [-5.0, 5.0, 5.0], 1.0),
            (3, [0.0, 5.0, 5.0], 1.0),
        ]);
        let config = OctreeConfig {
            depth_max: 2,
            objects_threshold: 0,
            overlap_pct: 0.5,
        };
        let octree = octree_for(&scene, config);
        let total = octree.membership_count();
        assert!(total > 3);

        let mut reports = Vec::new();
        let generated = TileGenerator::new(GlbBundler)
            .generate(&octree, &scene, |done, all| reports.push((done, all)))
            .unwrap();

        assert_eq!(reports.len(), total);
        assert_eq!(reports.last(), Some(&(total, total)));
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));

        // One file per manifest content entry, names unique.
        let uris = generated.tileset.content_uris();
        assert_eq!(uris.len(), generated.files.len());
        for file in &generated.files {
            assert!(uris.contains(&tile_uri(&file.name)));
            let tile = decode_tile(&file.bytes).unwrap();
            assert_eq!(tile.feature_table, json!({"BATCH_LENGTH": 0}));
        }
    }

    #[test]
    fn empty_octree_yields_bare_root() {
        let scene = Scene::new();
        let octree = SpatialOctree::new(OctreeConfig::default());
        let mut reports = Vec::new();
        let generated = TileGenerator::new(GlbBundler)
            .generate(&octree, &scene, |done, all| reports.push((done, all)))
            .unwrap();

        assert!(generated.files.is_empty());
        assert!(generated.tileset.root.content.is_none());
        assert!(generated.tileset.root.children.is_empty());
        assert_eq!(reports, vec![(0, 0)]);
    }

    #[test]
    fn object_missing_from_scene_fails_generation() {
        let scene = scene_with(&[(1, [1.0, 1.0, 1.0], 0.5)]);
        let octree = octree_for(&scene, OctreeConfig::default());
        let empty = Scene::new();
        assert!(
            TileGenerator::new(GlbBundler)
                .generate(&octree, &empty, |_, _| {})
                .is_err()
        );
    }
}
