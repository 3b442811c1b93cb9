/// Model document encoding: folds a node's objects into one interchange-format payload.
use constants::container::{GLB_ALIGNMENT, GLB_CHUNK_BIN, GLB_CHUNK_JSON, GLB_MAGIC, GLB_VERSION};
use serde::Serialize;

use crate::error::{TilingError, TilingResult};
use crate::scene::SceneObject;

/// Turns the objects of one octree node into the model bytes of its tile.
pub trait ModelEncoder: Sync {
    fn encode(&self, objects: &[&SceneObject]) -> TilingResult<Vec<u8>>;
}

/// Bundles each object's payload into a binary glTF 2.0 container.
/// Payloads are stored as opaque buffer views; an `extras.objects` table maps them back to ids.
#[derive(Debug, Clone, Default)]
pub struct GlbBundler;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GltfDocument<'a> {
    asset: GltfAsset,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    buffers: Vec<GltfBuffer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    buffer_views: Vec<GltfBufferView>,
    extras: GltfExtras<'a>,
}

#[derive(Serialize)]
struct GltfAsset {
    version: &'static str,
    generator: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GltfBuffer {
    byte_length: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GltfBufferView {
    buffer: usize,
    byte_offset: usize,
    byte_length: usize,
}

#[derive(Serialize)]
struct GltfExtras<'a> {
    objects: Vec<BundledObject<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundledObject<'a> {
    id: u64,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    buffer_view: Option<usize>,
}

impl ModelEncoder for GlbBundler {
    fn encode(&self, objects: &[&SceneObject]) -> TilingResult<Vec<u8>> {
        let mut bin = Vec::new();
        let mut views = Vec::new();
        let mut table = Vec::with_capacity(objects.len());

        for object in objects {
            let buffer_view = if object.model.is_empty() {
                None
            } else {
                views.push(GltfBufferView {
                    buffer: 0,
                    byte_offset: bin.len(),
                    byte_length: object.model.len(),
                });
                bin.extend_from_slice(&object.model);
                bin.resize(align(bin.len()), 0);
                Some(views.len() - 1)
            };
            table.push(BundledObject {
                id: object.id.0,
                name: &object.name,
                buffer_view,
            });
        }

        let document = GltfDocument {
            asset: GltfAsset {
                version: "2.0",
                generator: env!("CARGO_PKG_NAME"),
            },
            buffers: if bin.is_empty() {
                Vec::new()
            } else {
                vec![GltfBuffer {
                    byte_length: bin.len(),
                }]
            },
            buffer_views: views,
            extras: GltfExtras { objects: table },
        };

        let mut json = serde_json::to_vec(&document)?;
        json.resize(align(json.len()), b' ');

        let mut total = 12 + 8 + json.len();
        if !bin.is_empty() {
            total += 8 + bin.len();
        }
        let length = |section: &'static str, value: usize| {
            u32::try_from(value).map_err(|_| TilingError::SerializationOverflow {
                section,
                length: value,
            })
        };

        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(GLB_MAGIC);
        glb.extend_from_slice(&GLB_VERSION.to_le_bytes());
        glb.extend_from_slice(&length("glb", total)?.to_le_bytes());

        glb.extend_from_slice(&length("glbJSON", json.len())?.to_le_bytes());
        glb.extend_from_slice(&GLB_CHUNK_JSON.to_le_bytes());
        glb.extend_from_slice(&json);

        if !bin.is_empty() {
            glb.extend_from_slice(&length("glbBIN", bin.len())?.to_le_bytes());
            glb.extend_from_slice(&GLB_CHUNK_BIN.to_le_bytes());
            glb.extend_from_slice(&bin);
        }

        Ok(glb)
    }
}

fn align(length: usize) -> usize {
    length.div_ceil(GLB_ALIGNMENT) * GLB_ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Aabb;
    use glam::DVec3;
    use serde_json::Value;

    fn object(id: u64, model: &[u8]) -> SceneObject {
        SceneObject::new(
            id,
            format!("object-{id}"),
            Aabb::from_center_half(DVec3::ZERO, 1.0),
            model.to_vec(),
        )
    }

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn bundles_payloads_into_glb_chunks() {
        let a = object(7, b"abcde");
        let b = object(9, b"xyz");
        let glb = GlbBundler.encode(&[&a, &b]).unwrap();

        assert_eq!(&glb[0..4], b"glTF");
        assert_eq!(read_u32(&glb, 4), 2);
        assert_eq!(read_u32(&glb, 8) as usize, glb.len());

        let json_length = read_u32(&glb, 12) as usize;
        assert_eq!(read_u32(&glb, 16), GLB_CHUNK_JSON);
        assert_eq!(json_length % 4, 0);
        let document: Value = serde_json::from_slice(&glb[20..20 + json_length]).unwrap();
        assert_eq!(document["asset"]["version"], "2.0");
        assert_eq!(document["bufferViews"][1]["byteOffset"], 8);
        assert_eq!(document["extras"]["objects"][0]["id"], 7);
        assert_eq!(document["extras"]["objects"][1]["bufferView"], 1);

        let bin_start = 20 + json_length;
        assert_eq!(read_u32(&glb, bin_start + 4), GLB_CHUNK_BIN);
        let bin = &glb[bin_start + 8..];
        assert_eq!(bin.len(), read_u32(&glb, bin_start) as usize);
        assert_eq!(&bin[0..5], b"abcde");
        assert_eq!(&bin[8..11], b"xyz");
    }

    #[test]
    fn empty_payloads_skip_the_binary_chunk() {
        let a = object(1, b"");
        let glb = GlbBundler.encode(&[&a]).unwrap();
        let json_length = read_u32(&glb, 12) as usize;
        assert_eq!(glb.len(), 20 + json_length);

        let document: Value = serde_json::from_slice(&glb[20..]).unwrap();
        assert!(document.get("buffers").is_none());
        assert!(document["extras"]["objects"][0].get("bufferView").is_none());
    }
}
