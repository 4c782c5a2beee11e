use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;

use crate::cli::{Cli, ExportArgs, InfoArgs, RouteArgs, SearchArgs, TileArgs};
use crate::progress::Progress;
use crate::query::RouteOptions;
use crate::spatial::Bbox;
use crate::store::{BuildOptions, Store};
use crate::tile::{RasterOptions, TileId};

fn load_store(path: &Path, verbose: u8) -> Result<Store> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut options = BuildOptions::default();
    if verbose > 0 {
        options.progress = Progress::new(|msg| eprintln!("[ingest] {msg}"));
    }
    Store::from_pbf(BufReader::new(file), options)
        .with_context(|| format!("failed to ingest {}", path.display()))
}

fn parse_bbox(spec: &str) -> Result<Bbox> {
    let parts: Vec<f64> = spec
        .split(',')
        .map(|p| p.trim().parse().map_err(|_| anyhow!("bad bbox component {p:?}")))
        .collect::<Result<_>>()?;
    if parts.len() != 4 {
        bail!("bbox must be min_lon,min_lat,max_lon,max_lat");
    }
    Ok(Bbox::new(parts[0], parts[1], parts[2], parts[3]))
}

pub fn info(cli: &Cli, args: &InfoArgs) -> Result<()> {
    let store = load_store(&args.input, cli.verbose)?;
    let info = store.info();
    let summary = json!({
        "stats": store.stats(),
        "bbox": store.bbox(),
        "partial": info.partial,
        "writing_program": info.writing_program,
        "required_features": info.required_features,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn search(cli: &Cli, args: &SearchArgs) -> Result<()> {
    let store = load_store(&args.input, cli.verbose)?;
    let (key, value) = match args.tag.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (args.tag.as_str(), None),
    };

    let mut shown = 0usize;
    for (kind, index) in store.search_tag(key, value) {
        if shown >= args.limit {
            eprintln!("... truncated at {} matches", args.limit);
            break;
        }
        let id = match kind {
            crate::error::EntityKind::Node => store.nodes().id(index),
            crate::error::EntityKind::Way => store.ways().id(index),
            crate::error::EntityKind::Relation => store.relations().id(index),
        };
        if let Some(feature) = store.to_geojson_feature(kind, id).unwrap_or(None) {
            println!("{feature}");
        } else {
            println!("{kind}/{id}");
        }
        shown += 1;
    }
    Ok(())
}

pub fn route(cli: &Cli, args: &RouteArgs) -> Result<()> {
    let store = load_store(&args.input, cli.verbose)?;
    let (from, from_m) = store
        .nearest_routable_node(args.from_lon, args.from_lat, args.snap_m)
        .ok_or_else(|| anyhow!("no routable node within {} m of the origin", args.snap_m))?;
    let (to, to_m) = store
        .nearest_routable_node(args.to_lon, args.to_lat, args.snap_m)
        .ok_or_else(|| anyhow!("no routable node within {} m of the destination", args.snap_m))?;
    if cli.verbose > 0 {
        eprintln!("[route] snapped origin {from_m:.1} m, destination {to_m:.1} m");
    }

    let route = store.route(from, to, &RouteOptions::default())?;
    println!("{}", serde_json::to_string_pretty(&route)?);
    Ok(())
}

pub fn export(cli: &Cli, args: &ExportArgs) -> Result<()> {
    let store = load_store(&args.input, cli.verbose)?;
    let bbox = args.bbox.as_deref().map(parse_bbox).transpose()?;
    let collection = store.to_geojson_collection(bbox.as_ref())?;
    let body = serde_json::to_string(&collection)?;

    match &args.output {
        Some(path) if path.as_os_str() != "-" => {
            File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?
                .write_all(body.as_bytes())?;
            if cli.verbose > 0 {
                eprintln!("[export] wrote {} bytes to {}", body.len(), path.display());
            }
        }
        _ => println!("{body}"),
    }
    Ok(())
}

pub fn tile(cli: &Cli, args: &TileArgs) -> Result<()> {
    let store = load_store(&args.input, cli.verbose)?;
    let tile = TileId::new(args.z, args.x, args.y);
    let bytes = if args.vector {
        store.vector_tile(&args.dataset, tile)?
    } else {
        store.raster_tile(tile, &RasterOptions::default())
    };
    File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?
        .write_all(&bytes)?;
    if cli.verbose > 0 {
        eprintln!("[tile] wrote {} bytes for {tile:?}", bytes.len());
    }
    Ok(())
}
