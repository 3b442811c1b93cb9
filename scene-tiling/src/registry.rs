/// Scene registry: per-scene version graphs kept in sync with a [`VersionStore`].
/// Every mutation is validated on a copy of the graph before anything is written.
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use constants::store::ROOT_VERSION_TAG;
use tracing::info;

use crate::encoder::ModelEncoder;
use crate::error::{TilingError, TilingResult};
use crate::generator::{GeneratedTileset, TileFile, TileGenerator, tile_uri};
use crate::manifest::{TileNode, Tileset};
use crate::merge::{MergeResult, merge_tilesets};
use crate::octree::SpatialOctree;
use crate::scene::Scene;
use crate::store::VersionStore;
use crate::update::{TileUpdate, apply_tile_updates, versioned_file_name};
use crate::versions::{VersionGraph, VersionId};

pub struct SceneRegistry<S: VersionStore> {
    store: S,
    graphs: HashMap<String, VersionGraph>,
}

/// Tag for an automatic merge version: current time in milliseconds, hex encoded.
pub fn timestamp_tag() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{millis:x}")
}

fn check_tag(tag: &str) -> TilingResult<()> {
    let plain = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if tag.is_empty() || !plain || Path::new(tag).file_name().is_none() {
        return Err(TilingError::InvalidTag(tag.to_string()));
    }
    Ok(())
}

impl<S: VersionStore> SceneRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            graphs: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scenes(&self) -> TilingResult<Vec<String>> {
        self.store.list_scenes()
    }

    /// Version graph of `scene`, loaded from the store on first use.
    pub fn versions(&mut self, scene: &str) -> TilingResult<&VersionGraph> {
        self.graph(scene).map(|graph| &*graph)
    }

    fn graph(&mut self, scene: &str) -> TilingResult<&mut VersionGraph> {
        match self.graphs.entry(scene.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(self.store.load_versions(scene)?)),
        }
    }

    /// Record `new` as a child of `current`, writing its tiles and manifest first.
    pub fn update_tiles_version(
        &mut self,
        scene: &str,
        current: &str,
        new: &str,
        tileset: &Tileset,
        tiles: &[TileFile],
    ) -> TilingResult<VersionId> {
        check_tag(new)?;
        let mut next = self.graph(scene)?.clone();
        let id = next.commit(current, new)?;

        self.store.write_tiles(scene, tiles)?;
        self.store.write_tileset(scene, new, tileset)?;
        self.store.save_versions(scene, &next)?;
        self.graphs.insert(scene.to_string(), next);

        info!(scene, from = %current, to = %new, tiles = tiles.len(), "committed version");
        Ok(id)
    }

    /// Record an already merged manifest as `merged`, child of `left` then `right`.
    pub fn merge_versions(
        &mut self,
        scene: &str,
        left: &str,
        right: &str,
        merged: &str,
        tileset: &Tileset,
    ) -> TilingResult<VersionId> {
        check_tag(merged)?;
        let mut next = self.graph(scene)?.clone();
        let id = next.merge(left, right, merged)?;

        self.store.write_tileset(scene, merged, tileset)?;
        self.store.save_versions(scene, &next)?;
        self.graphs.insert(scene.to_string(), next);

        info!(scene, left = %left, right = %right, merged = %merged, "recorded merge");
        Ok(id)
    }

    /// Regenerate every tile from `octree` and commit the result as `new`.
    /// Tile files carry the tag so earlier versions keep their own tiles.
    #[allow(clippy::too_many_arguments)]
    pub fn commit<E: ModelEncoder>(
        &mut self,
        scene: &str,
        current: &str,
        new: &str,
        octree: &SpatialOctree,
        objects: &Scene,
        generator: &TileGenerator<E>,
        progress: impl FnMut(usize, usize),
    ) -> TilingResult<GeneratedTileset> {
        check_tag(new)?;
        // Reject a doomed commit before encoding anything.
        self.graph(scene)?.clone().commit(current, new)?;

        let generated = tag_files(generator.generate(octree, objects, progress)?, new)?;
        self.update_tiles_version(scene, current, new, &generated.tileset, &generated.files)?;
        Ok(generated)
    }

    /// Re-encode only the changed tiles of `current` and commit the result as `new`.
    pub fn commit_updates(
        &mut self,
        scene: &str,
        current: &str,
        new: &str,
        updates: &[TileUpdate],
    ) -> TilingResult<VersionId> {
        check_tag(new)?;
        self.graph(scene)?.require(current)?;
        let base = self.store.read_tileset(scene, current)?;
        let (tileset, files) = apply_tile_updates(&base, updates, new)?;
        self.update_tiles_version(scene, current, new, &tileset, &files)
    }

    /// Three-way merge of `left` and `right` against their common ancestor, recorded as `merged`.
    pub fn merge(
        &mut self,
        scene: &str,
        left: &str,
        right: &str,
        merged: &str,
    ) -> TilingResult<MergeResult> {
        check_tag(merged)?;
        let graph = self.graph(scene)?;
        if graph.id_of(merged).is_some() {
            return Err(TilingError::DuplicateTag(merged.to_string()));
        }
        let base_tag = graph
            .common_ancestor_by_tag(left, right)?
            .and_then(|id| graph.tag(id))
            .map(str::to_string)
            .ok_or_else(|| TilingError::NoCommonAncestor {
                left: left.to_string(),
                right: right.to_string(),
            })?;

        let base = match self.store.read_tileset(scene, &base_tag) {
            // Branches forked from the root version merge against an empty manifest.
            Err(TilingError::Io(e))
                if base_tag == ROOT_VERSION_TAG && e.kind() == ErrorKind::NotFound =>
            {
                Tileset::new(TileNode::default())
            }
            other => other?,
        };
        let left_tileset = self.store.read_tileset(scene, left)?;
        let right_tileset = self.store.read_tileset(scene, right)?;

        let (tileset, result) = merge_tilesets(&base, &left_tileset, &right_tileset);
        self.merge_versions(scene, left, right, merged, &tileset)?;
        Ok(result)
    }

    /// Merge the first two leaves of the scene's graph.
    pub fn merge_leaves(&mut self, scene: &str, merged: &str) -> TilingResult<MergeResult> {
        let leaves: Vec<String> = self
            .graph(scene)?
            .leaf_tags()
            .into_iter()
            .map(str::to_string)
            .collect();

        match leaves.as_slice() {
            [left, right, ..] => self.merge(scene, left, right, merged),
            _ => Err(TilingError::NoCommonAncestor {
                left: leaves.first().cloned().unwrap_or_default(),
                right: String::new(),
            }),
        }
    }
}

/// Suffix every tile of a generated tileset with `tag`.
fn tag_files(mut generated: GeneratedTileset, tag: &str) -> TilingResult<GeneratedTileset> {
    let mut failed = None;
    generated.tileset.root.walk_mut(&mut |node| {
        if let Some(content) = &mut node.content {
            match versioned_file_name(&content.uri, tag) {
                Ok(name) => content.uri = tile_uri(&name),
                Err(e) => failed = Some(e),
            }
        }
    });
    if let Some(e) = failed {
        return Err(e);
    }

    for file in &mut generated.files {
        file.name = versioned_file_name(&file.name, tag)?;
    }
    Ok(generated)
}
