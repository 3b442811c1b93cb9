/// Incremental commits: re-encode only the tiles whose objects changed.
use std::path::Path;

use constants::container::TILE_EXTENSION;
use rayon::prelude::*;
use serde_json::json;
use tracing::{debug, info};

use crate::bounds::Aabb;
use crate::container::encode_tile;
use crate::error::{TilingError, TilingResult};
use crate::generator::{TileFile, tile_uri};
use crate::manifest::{BoundingVolume, OrientedBox, TileContent, Tileset, fit_bounds};

/// New model payload for one tile already referenced by the manifest.
#[derive(Debug, Clone)]
pub struct TileUpdate {
    /// Content URI as written in the manifest, e.g. `./root_3.tile`.
    pub uri: String,
    /// World bounds of the updated content.
    pub bounds: Aabb,
    pub model: Vec<u8>,
}

/// File name a tile takes once re-encoded for version `tag`: `root_3.tile` -> `root_3_<tag>.tile`.
pub fn versioned_file_name(uri: &str, tag: &str) -> TilingResult<String> {
    let stem = Path::new(uri)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TilingError::UnknownTile(uri.to_string()))?;
    Ok(format!("{stem}_{tag}.{TILE_EXTENSION}"))
}

/// Re-encode the updated tiles under new names and refit the manifest bottom-up.
/// The input manifest is left untouched; on error nothing is produced.
pub fn apply_tile_updates(
    tileset: &Tileset,
    updates: &[TileUpdate],
    tag: &str,
) -> TilingResult<(Tileset, Vec<TileFile>)> {
    let mut updated = tileset.clone();

    for update in updates {
        let node = updated
            .root
            .find_by_uri_mut(&update.uri)
            .ok_or_else(|| TilingError::UnknownTile(update.uri.clone()))?;

        let name = versioned_file_name(&update.uri, tag)?;
        let bbox = node.bounding_volume.bbox;
        let center = bbox.center();
        let half = bbox.half_extents().max(update.bounds.max_deviation_from(center));
        if half != bbox.half_extents() {
            node.bounding_volume = BoundingVolume {
                bbox: OrientedBox::axis_aligned(center, half),
            };
        }
        node.content = Some(TileContent::new(tile_uri(&name)));
        debug!(from = %update.uri, to = %name, "re-encoding tile");
    }

    let feature_table = json!({ "BATCH_LENGTH": 0 });
    let files = updates
        .par_iter()
        .map(|update| {
            Ok(TileFile {
                name: versioned_file_name(&update.uri, tag)?,
                bytes: encode_tile(&feature_table, &update.model)?,
            })
        })
        .collect::<TilingResult<Vec<_>>>()?;

    updated.root = fit_bounds(&updated.root);
    info!(tiles = files.len(), version = %tag, "applied tile updates");
    Ok((updated, files))
}
