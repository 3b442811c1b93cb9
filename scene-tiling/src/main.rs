/// Scene tiling command line: local tileset export plus commits and merges against a scene store
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use constants::container::GLB_MAGIC;
use constants::server::DEFAULT_STORE_DIR;
use constants::store::ROOT_TILESET_FILE;
use eyre::{Result, WrapErr};
use glam::DVec3;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use scene_tiling::{
    Aabb, FsVersionStore, GeneratedTileset, GlbBundler, MergeResult, OctreeConfig, Scene,
    SceneRegistry, TileGenerator, TileHeader, TileUpdate, decode_tile, timestamp_tag,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "scene-tiling",
    about = "Tile scenes into versioned 3D tilesets"
)]
struct Cli {
    /// TOML file overriding octree settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding one sub-directory per scene
    #[arg(long, global = true, env = "TILE_STORE_DIR", default_value = DEFAULT_STORE_DIR)]
    store: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tile a scene description into a standalone tileset directory
    Generate {
        scene: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Regenerate all tiles of a scene and record them as a new version
    Commit {
        name: String,
        scene: PathBuf,
        #[arg(long, default_value = "")]
        from: String,
        #[arg(long)]
        tag: String,
    },
    /// Re-encode changed tiles listed in an updates file as a new version
    Update {
        name: String,
        updates: PathBuf,
        #[arg(long, default_value = "")]
        from: String,
        #[arg(long)]
        tag: String,
    },
    /// Merge two versions; without explicit versions the first two leaves are merged
    Merge {
        name: String,
        left: Option<String>,
        right: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    /// Print a scene's version graph
    Versions { name: String },
    /// List scenes in the store
    Scenes,
    /// Print the header and tables of a tile file
    Inspect { file: PathBuf },
}

/// `{"tiles": [{"uri", "min", "max", "model"}]}`, model paths relative to the file.
#[derive(Deserialize)]
struct UpdatesFile {
    tiles: Vec<UpdateEntry>,
}

#[derive(Deserialize)]
struct UpdateEntry {
    uri: String,
    min: [f64; 3],
    max: [f64; 3],
    model: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => OctreeConfig::load(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?,
        None => OctreeConfig::default(),
    };
    let mut registry = SceneRegistry::new(FsVersionStore::new(&cli.store));

    match cli.command {
        Command::Generate { scene, out } => generate(&scene, &out, config),
        Command::Commit {
            name,
            scene,
            from,
            tag,
        } => {
            let objects = Scene::load(&scene)?;
            let octree = objects.build_octree(config)?;
            let pb = progress_bar(octree.membership_count(), "Folding objects into tiles");
            let generated = registry.commit(
                &name,
                &from,
                &tag,
                &octree,
                &objects,
                &TileGenerator::new(GlbBundler),
                |done, _| pb.set_position(done as u64),
            )?;
            pb.finish_with_message("Tiles encoded");
            println!("Committed version {tag:?} of scene {name:?} on top of {from:?}");
            print_tileset_summary(&generated);
            Ok(())
        }
        Command::Update {
            name,
            updates,
            from,
            tag,
        } => {
            let updates = load_updates(&updates)?;
            registry.commit_updates(&name, &from, &tag, &updates)?;
            println!(
                "Committed version {tag:?} of scene {name:?}: {} tiles re-encoded",
                updates.len()
            );
            Ok(())
        }
        Command::Merge {
            name,
            left,
            right,
            tag,
        } => {
            let tag = tag.unwrap_or_else(timestamp_tag);
            let result = match (left, right) {
                (Some(left), Some(right)) => registry.merge(&name, &left, &right, &tag)?,
                (None, None) => registry.merge_leaves(&name, &tag)?,
                _ => eyre::bail!("pass both versions to merge, or neither to merge the leaves"),
            };
            println!("Merged into version {tag:?} of scene {name:?}");
            print_merge_summary(&result);
            Ok(())
        }
        Command::Versions { name } => {
            let graph = registry.versions(&name)?;
            println!("{}", serde_json::to_string_pretty(&graph.to_file())?);
            println!("Leaves: {:?}", graph.leaf_tags());
            Ok(())
        }
        Command::Scenes => {
            for scene in registry.scenes()? {
                println!("{scene}");
            }
            Ok(())
        }
        Command::Inspect { file } => inspect(&file),
    }
}

fn progress_bar(total: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{bar:40.cyan/blue}] {pos}/{len} objects ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("▉▊▋▌▍▎▏ "));
    }
    pb.set_message(message);
    pb
}

/// Tile a scene description into `out` without touching the store.
fn generate(scene_path: &Path, out: &Path, config: OctreeConfig) -> Result<()> {
    let scene = Scene::load(scene_path)
        .wrap_err_with(|| format!("loading scene {}", scene_path.display()))?;
    let octree = scene.build_octree(config)?;
    println!(
        "Scene: {} objects, {} octree nodes",
        scene.len(),
        octree.node_count()
    );

    let pb = progress_bar(octree.membership_count(), "Folding objects into tiles");
    let generated = TileGenerator::new(GlbBundler).generate(&octree, &scene, |done, _| {
        pb.set_position(done as u64)
    })?;
    pb.finish_with_message("Tiles encoded");

    fs::create_dir_all(out)?;
    generated
        .files
        .par_iter()
        .try_for_each(|file| fs::write(out.join(&file.name), &file.bytes))?;
    let manifest_path = out.join(ROOT_TILESET_FILE);
    fs::write(&manifest_path, generated.tileset.to_json_pretty()?)?;

    println!("Generated tileset: {}", manifest_path.display());
    print_tileset_summary(&generated);
    Ok(())
}

fn load_updates(path: &Path) -> Result<Vec<TileUpdate>> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("reading updates {}", path.display()))?;
    let file: UpdatesFile = serde_json::from_str(&text)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    file.tiles
        .into_iter()
        .map(|entry| -> Result<TileUpdate> {
            let model = fs::read(base.join(&entry.model))
                .wrap_err_with(|| format!("reading model {}", entry.model.display()))?;
            Ok(TileUpdate {
                uri: entry.uri,
                bounds: Aabb::new(DVec3::from_array(entry.min), DVec3::from_array(entry.max)),
                model,
            })
        })
        .collect()
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let header = TileHeader::read(&bytes)?;

    println!("Tile: {}", path.display());
    println!("  Magic: {}", String::from_utf8_lossy(&header.magic));
    println!("  Version: {}", header.version);
    println!("  Byte length: {}", header.byte_length);
    println!(
        "  Feature table: {} JSON + {} binary bytes",
        header.feature_table_json_byte_length, header.feature_table_binary_byte_length
    );
    println!(
        "  Batch table: {} JSON + {} binary bytes",
        header.batch_table_json_byte_length, header.batch_table_binary_byte_length
    );

    let tile = decode_tile(&bytes)?;
    println!("  Feature table JSON: {}", tile.feature_table);
    let kind = if tile.model.starts_with(GLB_MAGIC) {
        "glTF binary"
    } else {
        "opaque"
    };
    println!("  Model: {} bytes ({kind})", tile.model.len());
    Ok(())
}

/// Prints tileset summary for verification and debugging.
fn print_tileset_summary(generated: &GeneratedTileset) {
    let root = &generated.tileset.root;
    let center = root.bounding_volume.bbox.center();
    let half = root.bounding_volume.bbox.half_extents();
    let mut nodes = 0;
    root.walk(&mut |_| nodes += 1);

    println!("Tileset Summary:");
    println!("  Manifest nodes: {nodes}");
    println!(
        "  Tile files: {} ({} bytes)",
        generated.files.len(),
        generated.total_bytes()
    );
    println!(
        "  Root bounds: ({:.2}, {:.2}, {:.2}) to ({:.2}, {:.2}, {:.2})",
        center.x - half.x,
        center.y - half.y,
        center.z - half.z,
        center.x + half.x,
        center.y + half.y,
        center.z + half.z
    );
}

fn print_merge_summary(result: &MergeResult) {
    let replaced = result.replacements.values().filter(|r| **r).count();
    println!("Merge Summary:");
    println!("  Tiles referenced: {}", result.replacements.len());
    println!("  Tiles needing re-serialization: {replaced}");
    if result.conflicts.is_empty() {
        println!("  No conflicts");
    } else {
        println!("  Conflicts resolved to the right side:");
        for conflict in &result.conflicts {
            println!("    {conflict}");
        }
    }
}
