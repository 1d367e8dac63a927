use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_tiles::TileCacheConfig;
use tessera_world::{LodPolicy, WorldLayout};

use crate::error::ConfigError;
use crate::scheduler::SchedulerConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Directory of `r.<x>.<z>.tsr` region files.
    pub region_dir: PathBuf,
    /// Block and material definitions; the builtin registry is used when
    /// either is unset.
    pub blocks: Option<PathBuf>,
    pub materials: Option<PathBuf>,
    /// Memory budget of the decoded chunk cache.
    pub reader_budget_mb: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            region_dir: PathBuf::from("world/region"),
            blocks: None,
            materials: None,
            reader_budget_mb: 256,
        }
    }
}

impl WorldConfig {
    pub fn reader_budget_bytes(&self) -> usize {
        self.reader_budget_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay between a region file change and the diff of its header.
    pub debounce_ms: u64,
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            channel_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub world: WorldConfig,
    pub layout: WorldLayout,
    pub lod: LodPolicy,
    pub cache: TileCacheConfig,
    pub scheduler: SchedulerConfig,
    pub watch: WatchConfig,
    /// `env_logger` filter used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

impl TesseraConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: TesseraConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.layout.chunk_size == 0 || self.layout.region_chunks == 0 {
            return invalid(format!(
                "layout needs non-zero sizes, got chunk_size {} region_chunks {}",
                self.layout.chunk_size, self.layout.region_chunks
            ));
        }
        if !self.lod.is_valid() {
            return invalid(format!(
                "lod ratio must be 2..={} and max_level at most {}, got {:?}",
                LodPolicy::MAX_RATIO,
                LodPolicy::MAX_LEVELS,
                self.lod
            ));
        }
        if self.scheduler.queue_capacity == 0 {
            return invalid("scheduler.queue_capacity must be positive".into());
        }
        if self.scheduler.retry.max_attempts == 0 {
            return invalid("scheduler.retry.max_attempts must be positive".into());
        }
        if self.watch.channel_capacity == 0 {
            return invalid("watch.channel_capacity must be positive".into());
        }
        if self.cache.memory_tiles == 0 {
            return invalid("cache.memory_tiles must be positive".into());
        }
        if self.world.blocks.is_some() != self.world.materials.is_some() {
            return invalid("world.blocks and world.materials must be set together".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = TesseraConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, TesseraConfig::default());
        assert_eq!(cfg.lod.ratio, 2);
        assert_eq!(cfg.lod.max_level, 4);
        assert!(cfg.cache.root.is_none());
    }

    #[test]
    fn sections_override_selected_fields() {
        let cfg = TesseraConfig::from_toml_str(
            r#"
            log_level = "debug"

            [world]
            region_dir = "/srv/world/region"
            reader_budget_mb = 64

            [layout]
            region_chunks = 8

            [lod]
            max_level = 6

            [cache]
            root = "/srv/tiles"

            [scheduler]
            workers = 2
            retry = { base_ms = 50, max_attempts = 3 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.world.region_dir, PathBuf::from("/srv/world/region"));
        assert_eq!(cfg.world.reader_budget_bytes(), 64 << 20);
        assert_eq!(cfg.layout.chunk_size, 16);
        assert_eq!(cfg.layout.region_chunks, 8);
        assert_eq!(cfg.lod.max_level, 6);
        assert_eq!(cfg.cache.root, Some(PathBuf::from("/srv/tiles")));
        assert_eq!(cfg.cache.memory_tiles, 512);
        assert_eq!(cfg.scheduler.workers, 2);
        assert_eq!(cfg.scheduler.retry.base_ms, 50);
        assert_eq!(cfg.scheduler.retry.max_ms, 30_000);
        assert_eq!(cfg.scheduler.retry.max_attempts, 3);
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn bad_values_are_rejected() {
        for doc in [
            "[lod]\nratio = 1",
            "[lod]\nmax_level = 40",
            "[layout]\nchunk_size = 0",
            "[scheduler]\nqueue_capacity = 0",
            "[world]\nblocks = \"blocks.toml\"",
        ] {
            assert!(
                matches!(TesseraConfig::from_toml_str(doc), Err(ConfigError::Invalid(_))),
                "{doc}"
            );
        }
        assert!(matches!(
            TesseraConfig::from_toml_str("[lod]\nratio = \"two\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = TesseraConfig::from_path("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
