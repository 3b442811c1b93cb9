/// Version graph file kept next to each scene's tiles
pub const VERSIONS_FILE: &str = "versions.json";

/// Tag of the root version every scene starts from
pub const ROOT_VERSION_TAG: &str = "";

/// Manifest of the root version; other versions use `tileset_<tag>.json`
pub const ROOT_TILESET_FILE: &str = "tileset.json";

/// Build the manifest filename for a version tag.
pub fn tileset_file_name(tag: &str) -> String {
    if tag.is_empty() {
        ROOT_TILESET_FILE.to_string()
    } else {
        format!("tileset_{}.json", tag)
    }
}
