/// Durable storage of version graphs, manifests and tiles, one directory per scene.
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use constants::store::{VERSIONS_FILE, tileset_file_name};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{TilingError, TilingResult};
use crate::generator::TileFile;
use crate::manifest::Tileset;
use crate::versions::{VersionFile, VersionGraph};

/// Read/write contract the registry persists through.
pub trait VersionStore: Send + Sync {
    /// Known scene names, sorted.
    fn list_scenes(&self) -> TilingResult<Vec<String>>;

    /// Version graph of `scene`; a scene without one starts from its root version.
    fn load_versions(&self, scene: &str) -> TilingResult<VersionGraph>;

    fn save_versions(&self, scene: &str, graph: &VersionGraph) -> TilingResult<()>;

    fn write_tiles(&self, scene: &str, tiles: &[TileFile]) -> TilingResult<()>;

    fn write_tileset(&self, scene: &str, tag: &str, tileset: &Tileset) -> TilingResult<()>;

    fn read_tileset(&self, scene: &str, tag: &str) -> TilingResult<Tileset>;
}

/// Filesystem layout: `<root>/<scene>/versions.json`, `tileset[_<tag>].json` and tile files.
#[derive(Debug, Clone)]
pub struct FsVersionStore {
    root: PathBuf,
}

/// True when `name` is exactly one normal path component.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Write to a sibling temp file, then rename it over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> TilingResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl FsVersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a scene. Nothing is created.
    pub fn scene_dir(&self, scene: &str) -> TilingResult<PathBuf> {
        if !is_plain_name(scene) {
            return Err(TilingError::InvalidSceneName(scene.to_string()));
        }
        Ok(self.root.join(scene))
    }

    fn scene_file(&self, scene: &str, name: &str) -> TilingResult<PathBuf> {
        if !is_plain_name(name) {
            return Err(TilingError::UnknownTile(name.to_string()));
        }
        Ok(self.scene_dir(scene)?.join(name))
    }

    /// Like `scene_file`, creating the scene directory for a write.
    fn writable_file(&self, scene: &str, name: &str) -> TilingResult<PathBuf> {
        let path = self.scene_file(scene, name)?;
        fs::create_dir_all(self.scene_dir(scene)?)?;
        Ok(path)
    }
}

impl VersionStore for FsVersionStore {
    fn list_scenes(&self) -> TilingResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut scenes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    scenes.push(name.to_string());
                }
            }
        }
        scenes.sort();
        Ok(scenes)
    }

    fn load_versions(&self, scene: &str) -> TilingResult<VersionGraph> {
        let path = self.scene_file(scene, VERSIONS_FILE)?;
        // Unknown scenes stay unknown until their first write.
        if !self.scene_dir(scene)?.is_dir() {
            return VersionGraph::from_file(&VersionFile::default());
        }
        if !path.exists() {
            let file = VersionFile::default();
            write_atomic(&path, serde_json::to_string_pretty(&file)?.as_bytes())?;
            info!(scene, "created versions file");
            return VersionGraph::from_file(&file);
        }
        VersionGraph::from_json(&fs::read_to_string(&path)?)
    }

    fn save_versions(&self, scene: &str, graph: &VersionGraph) -> TilingResult<()> {
        let path = self.writable_file(scene, VERSIONS_FILE)?;
        write_atomic(&path, graph.to_json_pretty()?.as_bytes())?;
        debug!(scene, versions = graph.len(), "saved versions");
        Ok(())
    }

    fn write_tiles(&self, scene: &str, tiles: &[TileFile]) -> TilingResult<()> {
        let paths = tiles
            .iter()
            .map(|tile| self.writable_file(scene, &tile.name))
            .collect::<TilingResult<Vec<_>>>()?;

        paths
            .par_iter()
            .zip(tiles.par_iter())
            .try_for_each(|(path, tile)| write_atomic(path, &tile.bytes))?;

        debug!(scene, tiles = tiles.len(), "wrote tiles");
        Ok(())
    }

    fn write_tileset(&self, scene: &str, tag: &str, tileset: &Tileset) -> TilingResult<()> {
        let path = self.writable_file(scene, &tileset_file_name(tag))?;
        write_atomic(&path, tileset.to_json_pretty()?.as_bytes())
    }

    fn read_tileset(&self, scene: &str, tag: &str) -> TilingResult<Tileset> {
        let path = self.scene_file(scene, &tileset_file_name(tag))?;
        Tileset::from_slice(&fs::read(&path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{OrientedBox, TileNode};
    use glam::DVec3;

    #[test]
    fn missing_versions_file_is_created_with_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVersionStore::new(dir.path());
        fs::create_dir(dir.path().join("park")).unwrap();

        let graph = store.load_versions("park").unwrap();
        assert_eq!(graph.leaf_tags(), vec![""]);

        let written = fs::read_to_string(dir.path().join("park").join(VERSIONS_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value, serde_json::json!({"nodes": [{"tagName": ""}], "links": []}));
    }

    #[test]
    fn versions_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVersionStore::new(dir.path());
        let mut graph = store.load_versions("park").unwrap();
        graph.commit("", "a").unwrap();
        store.save_versions("park", &graph).unwrap();

        assert_eq!(store.load_versions("park").unwrap(), graph);
    }

    #[test]
    fn tilesets_and_tiles_land_in_scene_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVersionStore::new(dir.path());
        let tileset = Tileset::new(TileNode::with_box(OrientedBox::axis_aligned(
            DVec3::ZERO,
            DVec3::ONE,
        )));

        store.write_tileset("park", "", &tileset).unwrap();
        store.write_tileset("park", "v1", &tileset).unwrap();
        store
            .write_tiles(
                "park",
                &[
                    TileFile {
                        name: "root.tile".into(),
                        bytes: vec![1, 2],
                    },
                    TileFile {
                        name: "root_0.tile".into(),
                        bytes: vec![3],
                    },
                ],
            )
            .unwrap();

        let scene = dir.path().join("park");
        assert!(scene.join("tileset.json").exists());
        assert!(scene.join("tileset_v1.json").exists());
        assert_eq!(fs::read(scene.join("root_0.tile")).unwrap(), vec![3]);
        assert_eq!(store.read_tileset("park", "v1").unwrap(), tileset);
        assert_eq!(store.list_scenes().unwrap(), vec!["park".to_string()]);
    }

    #[test]
    fn path_escapes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVersionStore::new(dir.path());

        for scene in ["", "..", "a/b", "/etc"] {
            assert!(
                matches!(
                    store.load_versions(scene),
                    Err(TilingError::InvalidSceneName(_))
                ),
                "accepted {scene:?}"
            );
        }

        let escape = TileFile {
            name: "../evil.tile".into(),
            bytes: Vec::new(),
        };
        assert!(matches!(
            store.write_tiles("park", &[escape]),
            Err(TilingError::UnknownTile(_))
        ));
    }

    #[test]
    fn reads_leave_unknown_scenes_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVersionStore::new(dir.path());

        assert_eq!(store.load_versions("typo").unwrap().leaf_tags(), vec![""]);
        assert!(matches!(
            store.read_tileset("typo", "v1"),
            Err(TilingError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound
        ));
        assert!(!dir.path().join("typo").exists());
        assert!(store.list_scenes().unwrap().is_empty());
    }

    #[test]
    fn empty_store_lists_no_scenes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsVersionStore::new(dir.path().join("absent"));
        assert!(store.list_scenes().unwrap().is_empty());
    }
}
