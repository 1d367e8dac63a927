//! World addressing: chunk/region coordinates, tile keys, faces and version stamps.
#![forbid(unsafe_code)]

mod coords;
mod face;
mod layout;
mod version;

pub use coords::{ChunkCoord, RegionCoord};
pub use face::{Axis, Face};
pub use layout::{LodPolicy, TileKey, WorldLayout};
pub use version::VersionClock;

/// Detail level of a tile; 0 is the finest.
pub type DetailLevel = u8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_reads_from_toml_with_defaults() {
        let layout: WorldLayout = toml::from_str("region_chunks = 8").unwrap();
        assert_eq!(layout.chunk_size, 16);
        assert_eq!(layout.region_chunks, 8);
        assert_eq!(layout.region_blocks(), 128);
    }

    #[test]
    fn negative_blocks_map_to_negative_chunks() {
        let layout = WorldLayout::new(16, 4);
        assert_eq!(layout.chunk_of_block(-1, 0), ChunkCoord::new(-1, 0));
        assert_eq!(layout.chunk_of_block(-16, 15), ChunkCoord::new(-1, 0));
        assert_eq!(layout.chunk_of_block(-17, 16), ChunkCoord::new(-2, 1));
        assert_eq!(
            layout.region_of_chunk(ChunkCoord::new(-1, -4)),
            RegionCoord::new(-1, -1)
        );
        assert_eq!(
            layout.region_of_chunk(ChunkCoord::new(-5, 3)),
            RegionCoord::new(-2, 0)
        );
    }

    #[test]
    fn ring_has_one_strip_per_side() {
        let layout = WorldLayout::new(16, 2);
        let ring = layout.ring_chunks(RegionCoord::new(0, 0));
        assert_eq!(
            ring,
            vec![
                ChunkCoord::new(-1, 0),
                ChunkCoord::new(-1, 1),
                ChunkCoord::new(2, 0),
                ChunkCoord::new(2, 1),
                ChunkCoord::new(0, -1),
                ChunkCoord::new(1, -1),
                ChunkCoord::new(0, 2),
                ChunkCoord::new(1, 2),
            ]
        );
        for c in &ring {
            assert!(layout.regions_reading_chunk(*c).contains(&RegionCoord::new(0, 0)));
        }
    }

    #[test]
    fn interior_chunk_is_read_by_its_region_only() {
        let layout = WorldLayout::new(16, 4);
        assert_eq!(
            layout.regions_reading_chunk(ChunkCoord::new(1, 2)),
            vec![RegionCoord::new(0, 0)]
        );
        let corner = layout.regions_reading_chunk(ChunkCoord::new(0, 0));
        assert_eq!(
            corner,
            vec![
                RegionCoord::new(0, 0),
                RegionCoord::new(-1, 0),
                RegionCoord::new(0, -1)
            ]
        );
    }

    #[test]
    fn ancestors_stop_at_max_level() {
        let lod = LodPolicy {
            ratio: 2,
            max_level: 3,
        };
        let key = TileKey::base(RegionCoord::new(5, -3));
        let chain = key.ancestors(&lod);
        assert_eq!(
            chain,
            vec![
                TileKey::new(RegionCoord::new(2, -2), 1),
                TileKey::new(RegionCoord::new(1, -1), 2),
                TileKey::new(RegionCoord::new(0, -1), 3),
            ]
        );
        assert!(chain[2].covers(RegionCoord::new(5, -3), &lod));
        assert!(TileKey::new(RegionCoord::new(0, 0), lod.max_level)
            .ancestors(&lod)
            .is_empty());
    }

    #[test]
    fn level_zero_has_no_children() {
        assert!(TileKey::base(RegionCoord::new(0, 0)).children(2).is_empty());
    }
}
