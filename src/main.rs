use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use log::info;
use tessera_io::{ChunkStore, RegionFileStore};
use tessera_runtime::{
    ChangeWatcher, RegionFileWatcher, RenderService, ServiceStats, TesseraConfig,
};
use tessera_tiles::TileCache;
use tessera_world::{RegionCoord, TileKey};

#[derive(Parser)]
#[command(name = "tessera", about = "Render a voxel world into cached 3D map tiles")]
struct Cli {
    /// TOML config; defaults apply when omitted
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the tile cache up to date, then exit
    Render {
        /// Re-render every region instead of only missing and stale ones
        #[arg(long)]
        full: bool,
    },
    /// Render, then keep tiles fresh as region files change
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Summarize the tile cache without rendering
    Status {
        /// Show every level of one region, as `x,z`
        #[arg(long, value_parser = parse_region, allow_hyphen_values = true)]
        region: Option<RegionCoord>,
    },
}

fn parse_region(s: &str) -> Result<RegionCoord, String> {
    let (x, z) = s
        .split_once(',')
        .ok_or_else(|| format!("expected `x,z`, got `{s}`"))?;
    let x = x.trim().parse().map_err(|e| format!("bad x `{x}`: {e}"))?;
    let z = z.trim().parse().map_err(|e| format!("bad z `{z}`: {e}"))?;
    Ok(RegionCoord::new(x, z))
}

fn init_logging(level: Option<&str>) {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stderr)
        .parse_filters(level.unwrap_or("info"))
        .parse_env("RUST_LOG")
        .init();
}

fn print_stats(stats: &ServiceStats) {
    let s = &stats.scheduler;
    println!(
        "renders: {} done, {} incomplete, {} failed, {} retried",
        s.completed, s.incomplete, s.failed, s.retries
    );
    let c = &stats.cache;
    println!(
        "tiles: {} written, {} hits, {} stale, {} misses",
        c.writes, c.hits, c.stale_hits, c.misses
    );
    let r = &stats.reader;
    println!(
        "chunks: {} loaded, {} cache hits, {} evicted",
        r.misses, r.hits, r.evictions
    );
}

fn wait_until_idle(svc: &RenderService) {
    while !svc.wait_idle(Duration::from_secs(60)) {
        let s = svc.stats().scheduler;
        info!("still rendering: {} queued, {} in flight", s.queued + s.parked, s.rendering);
    }
}

fn render(cfg: &TesseraConfig, full: bool) -> Result<(), Box<dyn Error>> {
    let svc = RenderService::from_config(cfg)?;
    let t0 = Instant::now();
    if full {
        svc.render_all()?;
    } else {
        svc.reconcile_startup()?;
    }
    wait_until_idle(&svc);
    info!("done in {:.1}s", t0.elapsed().as_secs_f64());
    print_stats(&svc.stats());
    for (key, error) in svc.scheduler().failures() {
        println!("failed {key}: {error}");
    }
    svc.shutdown();
    Ok(())
}

fn watch(cfg: &TesseraConfig, seconds: Option<u64>) -> Result<(), Box<dyn Error>> {
    let svc = Arc::new(RenderService::from_config(cfg)?);
    svc.reconcile_startup()?;
    let mut changes = ChangeWatcher::spawn(cfg.watch.channel_capacity, svc.clone())?;
    let mut files = RegionFileWatcher::start(
        &cfg.world.region_dir,
        cfg.layout,
        Duration::from_millis(cfg.watch.debounce_ms),
        Arc::new(changes.handle()),
    )?;
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while deadline.is_none_or(|d| Instant::now() < d) {
        thread::sleep(Duration::from_millis(250));
    }
    files.stop();
    changes.shutdown();
    wait_until_idle(&svc);
    print_stats(&svc.stats());
    svc.shutdown();
    Ok(())
}

fn status(cfg: &TesseraConfig, region: Option<RegionCoord>) -> Result<(), Box<dyn Error>> {
    let cache = TileCache::open(&cfg.cache, cfg.lod)?;
    if let Some(region) = region {
        let base = TileKey::base(region);
        for key in std::iter::once(base).chain(base.ancestors(&cfg.lod)) {
            match cache.get(key).tile() {
                Some(tile) => println!(
                    "{key}: v{} {} rendered_at_ms={} children={}{}",
                    tile.version,
                    if cache.is_stale(key, 0) { "stale" } else { "fresh" },
                    tile.rendered_at_ms,
                    tile.coverage.count(),
                    if tile.incomplete { " incomplete" } else { "" }
                ),
                None => println!("{key}: missing"),
            }
        }
        return Ok(());
    }

    let store = RegionFileStore::new(&cfg.world.region_dir);
    let chunks = store.list_chunks()?;
    let mut regions: Vec<RegionCoord> = chunks
        .iter()
        .map(|&c| cfg.layout.region_of_chunk(c))
        .collect();
    regions.sort();
    regions.dedup();
    println!(
        "world: {} chunks in {} regions ({})",
        chunks.len(),
        regions.len(),
        cfg.world.region_dir.display()
    );
    let missing = regions
        .iter()
        .filter(|r| cache.state(TileKey::base(**r)).is_none_or(|s| s.stored.is_none()))
        .count();
    println!("level 0: {missing} regions without a tile");
    for level in 0..=cfg.lod.max_level {
        let keys = cache.keys_at(level);
        let stale = keys.iter().filter(|k| cache.is_stale(**k, 0)).count();
        println!("level {level}: {} tiles, {stale} stale", keys.len());
    }
    println!("version high-water mark: {}", cache.high_water_mark());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => TesseraConfig::from_path(path)?,
        None => TesseraConfig::default(),
    };
    init_logging(cfg.log_level.as_deref());
    match cli.command {
        Command::Render { full } => render(&cfg, full),
        Command::Watch { seconds } => watch(&cfg, seconds),
        Command::Status { region } => status(&cfg, region),
    }
}
