use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

/// Osmix CLI (argument schema only)
#[derive(Parser, Debug)]
#[command(name = "osmix", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize a PBF extract (counts, bbox, header facts)
    Info(InfoArgs),

    /// List entities carrying a tag
    Search(SearchArgs),

    /// Route between two coordinates over the highway graph
    Route(RouteArgs),

    /// Export GeoJSON for the whole extract or a bbox
    Export(ExportArgs),

    /// Render a single raster or vector tile
    Tile(TileArgs),
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Input .osm.pbf file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Input .osm.pbf file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Tag to match: "key" or "key=value"
    pub tag: String,

    /// Stop after this many matches
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Input .osm.pbf file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    #[arg(long)]
    pub from_lon: f64,
    #[arg(long)]
    pub from_lat: f64,
    #[arg(long)]
    pub to_lon: f64,
    #[arg(long)]
    pub to_lat: f64,

    /// How far to snap endpoints onto the road network, in meters
    #[arg(long, default_value_t = 1000.0)]
    pub snap_m: f64,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Input .osm.pbf file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Restrict to "min_lon,min_lat,max_lon,max_lat"
    #[arg(long)]
    pub bbox: Option<String>,

    /// Output file ("-"/absent writes to stdout)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TileArgs {
    /// Input .osm.pbf file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    pub z: u8,
    pub x: u32,
    pub y: u32,

    /// Emit a Mapbox Vector Tile instead of raw RGBA pixels
    #[arg(long)]
    pub vector: bool,

    /// Dataset id stamped into vector layer names
    #[arg(long, default_value = "osmix")]
    pub dataset: String,

    /// Output file
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}
