use std::collections::BTreeMap;
use std::path::Path;

use proptest::prelude::*;
use tessera_io::region_file::REGION_FILE_CHUNKS;
use tessera_io::{
    ChunkStore, Compression, RegionFileCoord, RegionFileStore, RegionFileWriter,
    region_coord_from_path,
};
use tessera_world::ChunkCoord;

fn slot() -> impl Strategy<Value = usize> {
    0usize..(REGION_FILE_CHUNKS * REGION_FILE_CHUNKS) as usize
}

fn write() -> impl Strategy<Value = (usize, Vec<u8>, bool, u32)> {
    (
        slot(),
        prop::collection::vec(any::<u8>(), 1..6000),
        any::<bool>(),
        1u32..=u32::MAX,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // every chunk reads back the payload and timestamp of its last write
    #[test]
    fn last_write_wins_for_every_chunk(writes in prop::collection::vec(write(), 1..12)) {
        let dir = tempfile::tempdir().unwrap();
        let store = RegionFileStore::new(dir.path());
        let file = RegionFileCoord { x: -1, z: 2 };
        let mut expected: BTreeMap<ChunkCoord, (Vec<u8>, u32)> = BTreeMap::new();

        for (index, payload, zlib, timestamp) in writes {
            let compression = if zlib { Compression::Zlib } else { Compression::None };
            let coord = file.chunk_at(index);
            RegionFileWriter::new(dir.path(), compression)
                .write_chunk(coord, &payload, timestamp)
                .unwrap();
            expected.insert(coord, (payload, timestamp));
        }

        for (coord, (payload, timestamp)) in &expected {
            prop_assert_eq!(&store.read_chunk(*coord).unwrap(), payload);
            prop_assert_eq!(store.modified_at(*coord).unwrap(), Some(u64::from(*timestamp)));
        }
        let listed = store.list_chunks().unwrap();
        prop_assert_eq!(listed, expected.keys().copied().collect::<Vec<_>>());
    }

    #[test]
    fn chunks_map_to_their_file_and_back(cx in -1_000_000i32..=1_000_000, cz in -1_000_000i32..=1_000_000) {
        let coord = ChunkCoord::new(cx, cz);
        let file = RegionFileCoord::of_chunk(coord);
        let n = REGION_FILE_CHUNKS;
        let index = (cz.rem_euclid(n) * n + cx.rem_euclid(n)) as usize;
        prop_assert_eq!(file.chunk_at(index), coord);
        let name = file.file_name();
        prop_assert_eq!(region_coord_from_path(Path::new(&name)), Some(file));
    }
}
