use proptest::prelude::*;
use tessera_mesh_cpu::{MeshBatch, TileBounds};
use tessera_tiles::{Coverage, PutOutcome, Tile, TileCache, TileLookup};
use tessera_world::{LodPolicy, RegionCoord, TileKey};

const LOD: LodPolicy = LodPolicy {
    ratio: 2,
    max_level: 2,
};

#[derive(Clone, Debug)]
enum Op {
    Put { version: u64, incomplete: bool },
    Invalidate { version: u64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u64..40, any::<bool>()).prop_map(|(version, incomplete)| Op::Put { version, incomplete }),
        1 => (0u64..40).prop_map(|version| Op::Invalidate { version }),
    ]
}

fn tile(key: TileKey, version: u64, incomplete: bool) -> Tile {
    Tile {
        key,
        version,
        rendered_at_ms: version,
        incomplete,
        coverage: Coverage::SELF,
        batch: MeshBatch::empty(TileBounds {
            level: 0,
            origin: [0, 0],
            edge: 8,
            resolution: 8,
        }),
    }
}

/// What a single-threaded caller should observe after the same operations.
#[derive(Default)]
struct Expected {
    stored: Option<(u64, bool)>,
    required: u64,
    invalidated: bool,
}

proptest! {
    // the newest version wins and staleness follows invalidations and requirements
    #[test]
    fn lookups_follow_the_newest_write(ops in prop::collection::vec(op(), 1..40)) {
        let cache = TileCache::in_memory(4, LOD);
        let region = RegionCoord::new(-2, 7);
        let key = TileKey::base(region);
        let mut expected = Expected::default();

        for op in ops {
            match op {
                Op::Put { version, incomplete } => {
                    let outcome = cache.put(tile(key, version, incomplete)).unwrap();
                    match expected.stored {
                        Some((stored, _)) if stored > version => {
                            prop_assert_eq!(outcome, PutOutcome::Superseded { stored });
                        }
                        _ => {
                            prop_assert_eq!(outcome, PutOutcome::Stored);
                            expected.stored = Some((version, incomplete));
                            if !incomplete && version >= expected.required {
                                expected.invalidated = false;
                            }
                        }
                    }
                }
                Op::Invalidate { version } => {
                    cache.invalidate_to(region, version);
                    expected.required = expected.required.max(version);
                    expected.invalidated = true;
                }
            }

            let lookup = cache.get(key);
            match expected.stored {
                None => prop_assert!(matches!(lookup, TileLookup::Miss)),
                Some((version, incomplete)) => {
                    let stale = expected.invalidated || incomplete || version < expected.required;
                    prop_assert_eq!(lookup.tile().map(|t| t.version), Some(version));
                    prop_assert_eq!(!lookup.is_hit(), stale);
                    let served = cache.get_tile(region, 0).unwrap();
                    prop_assert_eq!(served.is_stale(), stale);
                }
            }
        }
    }
}
