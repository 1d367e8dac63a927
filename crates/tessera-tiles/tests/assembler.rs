use std::sync::Arc;

use tessera_blocks::{Block, BlockRegistry};
use tessera_chunk::Chunk;
use tessera_io::{ChunkReader, MemoryChunkStore};
use tessera_tiles::TileAssembler;
use tessera_world::{ChunkCoord, Face, LodPolicy, RegionCoord, TileKey, VersionClock, WorldLayout};

const LAYOUT: WorldLayout = WorldLayout::new(4, 2);
const LOD: LodPolicy = LodPolicy {
    ratio: 2,
    max_level: 2,
};

fn ground(coord: ChunkCoord, top: i32) -> Chunk {
    Chunk::from_fn(coord, 4, 0, 8, |_, y, _| {
        if y < top { Block::new(1) } else { Block::AIR }
    })
}

fn setup(chunks: impl IntoIterator<Item = (ChunkCoord, i32)>) -> (Arc<MemoryChunkStore>, ChunkReader, TileAssembler) {
    setup_with_budget(chunks, usize::MAX)
}

fn setup_with_budget(
    chunks: impl IntoIterator<Item = (ChunkCoord, i32)>,
    budget: usize,
) -> (Arc<MemoryChunkStore>, ChunkReader, TileAssembler) {
    let store = Arc::new(MemoryChunkStore::new());
    for (c, top) in chunks {
        store.put(&ground(c, top));
    }
    let reader = ChunkReader::new(store.clone(), LAYOUT, Arc::new(VersionClock::new()), budget);
    let assembler = TileAssembler::new(LAYOUT, LOD, Arc::new(BlockRegistry::builtin()));
    (store, reader, assembler)
}

fn world_4x4() -> Vec<(ChunkCoord, i32)> {
    let mut out = Vec::new();
    for cz in 0..4 {
        for cx in 0..4 {
            out.push((ChunkCoord::new(cx, cz), 2 + cx));
        }
    }
    out
}

#[test]
fn base_tile_version_is_the_highest_stamp_seen() {
    let (_, reader, assembler) = setup(world_4x4());
    let region = RegionCoord::new(0, 0);
    let tile = assembler.render_base(&reader, region);
    assert_eq!(tile.key, TileKey::base(region));
    assert_eq!(tile.version, reader.region_source_version(region));
    assert!(!tile.incomplete);
    assert!(!tile.batch.is_empty());

    let bumped = reader.invalidate(ChunkCoord::new(2, 1));
    let again = assembler.render_base(&reader, region);
    assert_eq!(again.version, bumped);
}

#[test]
fn chunks_stay_resident_while_a_render_reads_them() {
    let one = ground(ChunkCoord::new(0, 0), 2).approx_bytes();
    let (store, reader, assembler) = setup_with_budget(world_4x4(), one);
    let region = RegionCoord::new(0, 0);

    let source = assembler.snapshot_region(&reader, region);
    let stats = reader.stats();
    assert!(source.pins.len() > LAYOUT.chunks_in_region(region).len());
    assert_eq!(stats.pinned, source.pins.len());
    assert_eq!(stats.entries, source.pins.len());
    assert_eq!(stats.evictions, 0);
    // one storage read per coordinate, absent neighbors included
    let read = LAYOUT.chunks_in_region(region).len() + LAYOUT.ring_chunks(region).len();
    assert_eq!(store.reads() as usize, read);
    drop(source);
    assert_eq!(reader.stats().pinned, 0);

    // released chunks give way to the next load
    reader.load_chunk(ChunkCoord::new(3, 3)).unwrap();
    let stats = reader.stats();
    assert!(stats.evictions > 0);
    assert_eq!(stats.entries, 1);
    assert!(stats.bytes <= one);

    let (_, reader, assembler) = setup_with_budget(world_4x4(), one);
    let tile = assembler.render_base(&reader, region);
    assert!(!tile.incomplete);
    assert_eq!(reader.stats().evictions, 0);
    assert_eq!(reader.stats().pinned, 0);
}

#[test]
fn corrupt_chunks_become_gaps_and_failures_make_placeholders() {
    let (store, reader, assembler) = setup(world_4x4());
    store.put_raw(ChunkCoord::new(1, 1), b"garbage".to_vec());
    let region = RegionCoord::new(0, 0);
    let source = assembler.snapshot_region(&reader, region);
    assert_eq!(source.corrupt, vec![ChunkCoord::new(1, 1)]);
    assert!(!source.snapshot.is_incomplete());

    store.fail_reads(ChunkCoord::new(2, 0));
    reader.invalidate(ChunkCoord::new(2, 0));
    let tile = assembler.render_base(&reader, region);
    assert!(tile.incomplete);
    // faces toward the unreadable neighbor are kept and tagged
    assert!(
        tile.batch
            .quads()
            .filter(|q| q.face == Face::PosX && q.origin[0] == 8 && q.origin[2] < 4)
            .all(|q| q.boundary)
    );

    store.heal(ChunkCoord::new(2, 0));
    reader.invalidate(ChunkCoord::new(2, 0));
    assert!(!assembler.render_base(&reader, region).incomplete);
}

#[test]
fn parent_tile_covers_existing_children_only() {
    let (_, reader, assembler) = setup(world_4x4());
    let children: Vec<_> = [(0, 0), (1, 0), (0, 1), (1, 1)]
        .into_iter()
        .map(|(x, z)| Arc::new(assembler.render_base(&reader, RegionCoord::new(x, z))))
        .collect();
    let parent_key = TileKey::new(RegionCoord::new(0, 0), 1);
    let full = assembler.assemble_parent(parent_key, &children);
    assert!(full.coverage.is_full(2));
    assert_eq!(full.version, children.iter().map(|c| c.version).max().unwrap());
    assert_eq!(full.batch.level(), 1);
    assert!(full.batch.quads().any(|q| q.face == Face::PosY));

    let partial = assembler.assemble_parent(parent_key, &children[..2]);
    assert_eq!(partial.coverage.count(), 2);
    assert!(partial.coverage.has(0) && partial.coverage.has(1));

    // a tile from elsewhere contributes nothing
    let stranger = Arc::new(assembler.render_base(&reader, RegionCoord::new(5, 5)));
    let ignored = assembler.assemble_parent(parent_key, &[stranger]);
    assert_eq!(ignored.coverage.count(), 0);
    assert!(ignored.batch.is_empty());

    let mut broken = (*children[3]).clone();
    broken.incomplete = true;
    let mut mixed = children[..3].to_vec();
    mixed.push(Arc::new(broken));
    assert!(assembler.assemble_parent(parent_key, &mixed).incomplete);
}
