//! On-disk tile tier: `<root>/<level>/<x>/<z>.tile`, published atomically.
//!
//! File layout (little-endian): magic `TSTL`, format `u16`, level `u8`,
//! `x: i32`, `z: i32`, `version: u64`, `rendered_at_ms: u64`, flags `u8`,
//! `coverage: u64`, `body_len: u32`, then the postcard-encoded mesh batch.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::NamedTempFile;
use tessera_mesh_cpu::MeshBatch;
use tessera_world::{RegionCoord, TileKey};

use crate::error::TileCacheError;
use crate::tile::{Coverage, Tile};

const MAGIC: &[u8; 4] = b"TSTL";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 44;
const FLAG_INCOMPLETE: u8 = 1;
const TILE_EXT: &str = "tile";
const STALE_EXT: &str = "stale";
const HWM_FILE: &str = "version.hwm";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileHeader {
    pub key: TileKey,
    pub version: u64,
    pub rendered_at_ms: u64,
    pub incomplete: bool,
    pub coverage: Coverage,
    body_len: u32,
}

impl TileHeader {
    fn of(tile: &Tile, body_len: u32) -> Self {
        Self {
            key: tile.key,
            version: tile.version,
            rendered_at_ms: tile.rendered_at_ms,
            incomplete: tile.incomplete,
            coverage: tile.coverage,
            body_len,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.push(self.key.level);
        out.extend_from_slice(&self.key.region.x.to_le_bytes());
        out.extend_from_slice(&self.key.region.z.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.rendered_at_ms.to_le_bytes());
        out.push(if self.incomplete { FLAG_INCOMPLETE } else { 0 });
        out.extend_from_slice(&self.coverage.0.to_le_bytes());
        out.extend_from_slice(&self.body_len.to_le_bytes());
    }

    fn parse(b: &[u8]) -> Result<Self, String> {
        if b.len() < HEADER_LEN {
            return Err(format!("header truncated at {} bytes", b.len()));
        }
        if &b[0..4] != MAGIC {
            return Err("bad magic".into());
        }
        let format = u16::from_le_bytes([b[4], b[5]]);
        if format != FORMAT_VERSION {
            return Err(format!("unsupported format {format}"));
        }
        let i32_at = |o: usize| i32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);
        let u64_at = |o: usize| {
            let mut a = [0u8; 8];
            a.copy_from_slice(&b[o..o + 8]);
            u64::from_le_bytes(a)
        };
        Ok(Self {
            key: TileKey::new(RegionCoord::new(i32_at(7), i32_at(11)), b[6]),
            version: u64_at(15),
            rendered_at_ms: u64_at(23),
            incomplete: b[31] & FLAG_INCOMPLETE != 0,
            coverage: Coverage(u64_at(32)),
            body_len: u32::from_le_bytes([b[40], b[41], b[42], b[43]]),
        })
    }
}

pub fn encode_tile(tile: &Tile) -> Result<Vec<u8>, TileCacheError> {
    let body = tile.batch.encode()?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    TileHeader::of(tile, body.len() as u32).write_to(&mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_tile(path: &Path, bytes: &[u8]) -> Result<Tile, TileCacheError> {
    let corrupt = |reason: String| TileCacheError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let header = TileHeader::parse(bytes).map_err(corrupt)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() != header.body_len as usize {
        return Err(corrupt(format!(
            "body is {} bytes, header says {}",
            body.len(),
            header.body_len
        )));
    }
    let batch = MeshBatch::decode(body).map_err(|e| corrupt(e.to_string()))?;
    Ok(Tile {
        key: header.key,
        version: header.version,
        rendered_at_ms: header.rendered_at_ms,
        incomplete: header.incomplete,
        coverage: header.coverage,
        batch,
    })
}

/// A tile file found while scanning the cache root.
#[derive(Copy, Clone, Debug)]
pub struct ScanEntry {
    pub header: TileHeader,
    pub marked_stale: bool,
}

#[derive(Clone, Debug)]
pub struct DiskTier {
    root: PathBuf,
}

impl DiskTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_of(&self, key: TileKey) -> PathBuf {
        self.root
            .join(key.level.to_string())
            .join(key.region.x.to_string())
    }

    pub fn path_of(&self, key: TileKey) -> PathBuf {
        self.dir_of(key)
            .join(format!("{}.{TILE_EXT}", key.region.z))
    }

    pub fn marker_of(&self, key: TileKey) -> PathBuf {
        self.dir_of(key)
            .join(format!("{}.{STALE_EXT}", key.region.z))
    }

    /// Writes to a temp file beside the target, syncs it, then renames it
    /// over the target. Readers see the old tile or the new one, never a mix.
    pub fn write(&self, tile: &Tile) -> Result<(), TileCacheError> {
        let bytes = encode_tile(tile)?;
        let dir = self.dir_of(tile.key);
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_of(tile.key))?;
        Ok(())
    }

    pub fn read(&self, key: TileKey) -> Result<Option<Tile>, TileCacheError> {
        let path = self.path_of(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let tile = decode_tile(&path, &bytes)?;
        if tile.key != key {
            return Err(TileCacheError::Corrupt {
                path,
                reason: format!("file holds {}", tile.key),
            });
        }
        Ok(Some(tile))
    }

    pub fn mark_stale(&self, key: TileKey) -> Result<(), TileCacheError> {
        fs::create_dir_all(self.dir_of(key))?;
        File::create(self.marker_of(key))?.sync_all()?;
        Ok(())
    }

    pub fn clear_stale(&self, key: TileKey) -> Result<(), TileCacheError> {
        match fs::remove_file(self.marker_of(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn is_marked_stale(&self, key: TileKey) -> bool {
        self.marker_of(key).exists()
    }

    /// Walks the cache root, removing stray temp files left by interrupted
    /// writes. Unreadable tile headers are skipped.
    pub fn scan(&self) -> Result<Vec<ScanEntry>, TileCacheError> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for level_dir in subdirs(&self.root)? {
            let Some(level) = parse_name::<u8>(&level_dir) else {
                continue;
            };
            for x_dir in subdirs(&level_dir)? {
                let Some(x) = parse_name::<i32>(&x_dir) else {
                    continue;
                };
                for entry in fs::read_dir(&x_dir)? {
                    let path = entry?.path();
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                    if name.starts_with(".tmp") {
                        debug!("removing interrupted tile write {}", path.display());
                        if let Err(e) = fs::remove_file(&path) {
                            warn!("could not remove {}: {e}", path.display());
                        }
                        continue;
                    }
                    if path.extension().and_then(|e| e.to_str()) != Some(TILE_EXT) {
                        continue;
                    }
                    let Some(z) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<i32>().ok()) else {
                        continue;
                    };
                    let key = TileKey::new(RegionCoord::new(x, z), level);
                    match read_header(&path) {
                        Ok(header) if header.key == key => out.push(ScanEntry {
                            header,
                            marked_stale: self.is_marked_stale(key),
                        }),
                        Ok(header) => warn!("{} holds {}, ignoring", path.display(), header.key),
                        Err(e) => warn!("skipping {}: {e}", path.display()),
                    }
                }
            }
        }
        out.sort_by_key(|e| e.header.key);
        Ok(out)
    }

    pub fn read_high_water_mark(&self) -> Result<u64, TileCacheError> {
        let path = self.root.join(HWM_FILE);
        match fs::read_to_string(&path) {
            Ok(s) => s.trim().parse().map_err(|_| TileCacheError::Corrupt {
                path,
                reason: format!("bad version mark {:?}", s.trim()),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_high_water_mark(&self, version: u64) -> Result<(), TileCacheError> {
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        writeln!(tmp, "{version}")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(HWM_FILE))?;
        Ok(())
    }
}

fn read_header(path: &Path) -> Result<TileHeader, TileCacheError> {
    let mut buf = [0u8; HEADER_LEN];
    let mut f = File::open(path)?;
    let n = read_up_to(&mut f, &mut buf)?;
    TileHeader::parse(&buf[..n]).map_err(|reason| TileCacheError::Corrupt {
        path: path.to_path_buf(),
        reason,
    })
}

fn read_up_to(f: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match f.read(&mut buf[n..])? {
            0 => break,
            k => n += k,
        }
    }
    Ok(n)
}

fn subdirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            out.push(entry.path());
        }
    }
    Ok(out)
}

fn parse_name<T: std::str::FromStr>(path: &Path) -> Option<T> {
    path.file_name()?.to_str()?.parse().ok()
}
