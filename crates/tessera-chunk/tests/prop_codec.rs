use proptest::prelude::*;
use tessera_blocks::Block;
use tessera_chunk::{Chunk, decode_chunk, encode_chunk};
use tessera_world::ChunkCoord;

fn chunk_strategy() -> impl Strategy<Value = Chunk> {
    (1usize..5, 1usize..10, -20i32..20, prop::collection::vec(0u16..6, 1..64)).prop_map(
        |(size, height, min_y, ids)| {
            let mut i = 0usize;
            Chunk::from_fn(ChunkCoord::new(1, -2), size, min_y, height, |_, _, _| {
                let id = ids[i % ids.len()];
                i += 1;
                Block::new(id)
            })
        },
    )
}

proptest! {
    #[test]
    fn any_truncated_prefix_errors_without_panicking(chunk in chunk_strategy(), cut in 0usize..1000) {
        let bytes = encode_chunk(&chunk);
        let cut = cut % bytes.len();
        prop_assert!(decode_chunk(&bytes[..cut]).is_err());
    }

    #[test]
    fn decoded_chunk_answers_world_lookups_like_the_original(chunk in chunk_strategy()) {
        let back = decode_chunk(&encode_chunk(&chunk)).unwrap();
        let (bx, bz) = chunk.origin();
        for lz in 0..chunk.size as i32 {
            for lx in 0..chunk.size as i32 {
                for y in chunk.min_y - 1..chunk.max_y() + 1 {
                    prop_assert_eq!(
                        back.block_world(bx + lx, y, bz + lz),
                        chunk.block_world(bx + lx, y, bz + lz)
                    );
                }
            }
        }
    }
}
