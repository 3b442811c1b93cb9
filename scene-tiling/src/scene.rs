/// In-memory scene objects and the JSON scene description the CLI loads them from.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use glam::DVec3;
use serde::Deserialize;
use tracing::debug;

use crate::bounds::Aabb;
use crate::error::{TilingError, TilingResult};
use crate::octree::{ObjectId, ObjectRef, OctreeConfig, SpatialOctree};

/// One editable object: identity, world bounds and its opaque model payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub id: ObjectId,
    pub name: String,
    pub bounds: Aabb,
    pub model: Vec<u8>,
}

impl SceneObject {
    pub fn new(id: u64, name: impl Into<String>, bounds: Aabb, model: Vec<u8>) -> Self {
        Self {
            id: ObjectId(id),
            name: name.into(),
            bounds,
            model,
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.id, self.bounds)
    }
}

/// Objects keyed by id, iterated in id order.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    objects: BTreeMap<ObjectId, SceneObject>,
}

#[derive(Deserialize)]
struct SceneDescription {
    objects: Vec<ObjectDescription>,
}

#[derive(Deserialize)]
struct ObjectDescription {
    id: u64,
    #[serde(default)]
    name: String,
    min: [f64; 3],
    max: [f64; 3],
    model: Option<PathBuf>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a scene description; model paths resolve against the description's directory.
    pub fn load(path: &Path) -> TilingResult<Self> {
        let text = fs::read_to_string(path)?;
        let description: SceneDescription = serde_json::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut scene = Scene::new();
        for object in description.objects {
            let model = match &object.model {
                Some(model_path) => fs::read(base.join(model_path))?,
                None => Vec::new(),
            };
            let bounds = Aabb::new(DVec3::from_array(object.min), DVec3::from_array(object.max));
            scene.insert(SceneObject::new(object.id, object.name, bounds, model));
        }

        debug!(objects = scene.len(), path = %path.display(), "loaded scene description");
        Ok(scene)
    }

    /// Add or replace an object, returning the previous one.
    pub fn insert(&mut self, object: SceneObject) -> Option<SceneObject> {
        self.objects.insert(object.id, object)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    /// Lookup that fails with `MissingModel` for unknown ids.
    pub fn require(&self, id: ObjectId) -> TilingResult<&SceneObject> {
        self.get(id).ok_or(TilingError::MissingModel { id: id.0 })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Union of every object's bounds; empty for an empty scene.
    pub fn bounds(&self) -> Aabb {
        self.iter()
            .fold(Aabb::empty(), |acc, object| acc.union(&object.bounds))
    }

    /// Octree sized to enclose the whole scene, with every object inserted.
    pub fn build_octree(&self, config: OctreeConfig) -> TilingResult<SpatialOctree> {
        let mut octree = SpatialOctree::enclosing(config, &self.bounds());
        for object in self.iter() {
            octree.insert(object.object_ref())?;
        }
        Ok(octree)
    }
}
