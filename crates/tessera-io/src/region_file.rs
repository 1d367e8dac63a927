//! Sector-based region files (`r.<x>.<z>.tsr`), each holding 32×32 chunks.
//!
//! Layout: a 4 KiB location table (per chunk: 3-byte sector offset and 1-byte
//! sector count, big endian), a 4 KiB table of `u32` modification times, then
//! 4 KiB sectors. A chunk record is a `u32` BE length (payload + 1), a
//! compression byte and the payload.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression as ZlibLevel;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::debug;
use tessera_world::ChunkCoord;

use crate::error::StoreError;
use crate::store::ChunkStore;

pub const REGION_FILE_CHUNKS: i32 = 32;
pub const SECTOR_BYTES: usize = 4096;
const ENTRIES: usize = (REGION_FILE_CHUNKS * REGION_FILE_CHUNKS) as usize;
const HEADER_BYTES: usize = SECTOR_BYTES * 2;
const MAX_SECTORS_PER_CHUNK: usize = 255;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Compression {
    None = 1,
    Zlib = 2,
}

impl Compression {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Compression::None),
            2 => Some(Compression::Zlib),
            _ => None,
        }
    }
}

/// Coordinate of a region file (units of 32 chunks). Distinct from render
/// regions, whose size is configurable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionFileCoord {
    pub x: i32,
    pub z: i32,
}

impl RegionFileCoord {
    pub fn of_chunk(coord: ChunkCoord) -> Self {
        Self {
            x: coord.cx.div_euclid(REGION_FILE_CHUNKS),
            z: coord.cz.div_euclid(REGION_FILE_CHUNKS),
        }
    }

    pub fn file_name(self) -> String {
        format!("r.{}.{}.tsr", self.x, self.z)
    }

    pub fn chunk_at(self, index: usize) -> ChunkCoord {
        let lx = (index % REGION_FILE_CHUNKS as usize) as i32;
        let lz = (index / REGION_FILE_CHUNKS as usize) as i32;
        ChunkCoord::new(
            self.x * REGION_FILE_CHUNKS + lx,
            self.z * REGION_FILE_CHUNKS + lz,
        )
    }
}

#[inline]
fn entry_index(coord: ChunkCoord) -> usize {
    let lx = coord.cx.rem_euclid(REGION_FILE_CHUNKS) as usize;
    let lz = coord.cz.rem_euclid(REGION_FILE_CHUNKS) as usize;
    lz * REGION_FILE_CHUNKS as usize + lx
}

/// Parses `r.<x>.<z>.tsr`.
pub fn region_coord_from_path(path: &Path) -> Option<RegionFileCoord> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix("r.")?.strip_suffix(".tsr")?;
    let (x, z) = rest.split_once('.')?;
    Some(RegionFileCoord {
        x: x.parse().ok()?,
        z: z.parse().ok()?,
    })
}

/// Location and timestamp tables of one region file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionHeader {
    pub locations: Vec<u32>,
    pub timestamps: Vec<u32>,
}

impl Default for RegionHeader {
    fn default() -> Self {
        Self {
            locations: vec![0; ENTRIES],
            timestamps: vec![0; ENTRIES],
        }
    }
}

impl RegionHeader {
    /// Reads whatever part of the header lies in `bytes`; missing entries read
    /// as empty.
    fn parse(bytes: &[u8]) -> Self {
        let mut h = RegionHeader::default();
        for i in 0..ENTRIES {
            let at = i * 4;
            if let Some(b) = bytes.get(at..at + 4) {
                h.locations[i] = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
            }
            let at = SECTOR_BYTES + i * 4;
            if let Some(b) = bytes.get(at..at + 4) {
                h.timestamps[i] = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
            }
        }
        h
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let mut buf = Vec::with_capacity(HEADER_BYTES);
        File::open(path)?
            .take(HEADER_BYTES as u64)
            .read_to_end(&mut buf)?;
        Ok(Self::parse(&buf))
    }

    #[inline]
    fn sector_offset(&self, index: usize) -> usize {
        (self.locations[index] >> 8) as usize
    }

    #[inline]
    fn sector_count(&self, index: usize) -> usize {
        (self.locations[index] & 0xFF) as usize
    }

    pub fn present(&self) -> impl Iterator<Item = usize> + '_ {
        (0..ENTRIES).filter(|i| self.locations[*i] != 0)
    }

    /// Indices whose location or timestamp differ from `older`.
    pub fn changed_since(&self, older: &RegionHeader) -> Vec<usize> {
        (0..ENTRIES)
            .filter(|i| {
                self.locations[*i] != older.locations[*i]
                    || self.timestamps[*i] != older.timestamps[*i]
            })
            .collect()
    }
}

fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt(reason.into())
}

fn decode_record(raw: &[u8]) -> Result<Vec<u8>, StoreError> {
    if raw.len() < 5 {
        return Err(corrupt("record shorter than its header"));
    }
    let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    if len <= 1 {
        return Err(corrupt("zero-length record"));
    }
    if 4 + len > raw.len() {
        return Err(corrupt(format!(
            "record length {len} exceeds its {} allocated bytes",
            raw.len() - 4
        )));
    }
    let payload = &raw[5..4 + len];
    match Compression::from_byte(raw[4]) {
        Some(Compression::None) => Ok(payload.to_vec()),
        Some(Compression::Zlib) => {
            let mut out = Vec::new();
            ZlibDecoder::new(payload)
                .read_to_end(&mut out)
                .map_err(|e| corrupt(format!("zlib: {e}")))?;
            Ok(out)
        }
        None => Err(corrupt(format!("unknown compression {}", raw[4]))),
    }
}

/// Directory of region files.
pub struct RegionFileStore {
    dir: PathBuf,
}

impl RegionFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, file: RegionFileCoord) -> PathBuf {
        self.dir.join(file.file_name())
    }

    pub fn region_files(&self) -> io::Result<Vec<RegionFileCoord>> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e),
        };
        for entry in entries {
            if let Some(rc) = region_coord_from_path(&entry?.path()) {
                out.push(rc);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Chunks present in one region file.
    pub fn chunks_in_file(&self, file: RegionFileCoord) -> Result<Vec<ChunkCoord>, StoreError> {
        let header = match RegionHeader::read(&self.path_of(file)) {
            Ok(h) => h,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(header.present().map(|i| file.chunk_at(i)).collect())
    }
}

impl ChunkStore for RegionFileStore {
    fn read_chunk(&self, coord: ChunkCoord) -> Result<Vec<u8>, StoreError> {
        let path = self.path_of(RegionFileCoord::of_chunk(coord));
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len() as usize;
        let index = entry_index(coord);
        if (index + 1) * 4 > file_len {
            return Err(corrupt("location table truncated"));
        }
        let mut loc = [0u8; 4];
        file.seek(SeekFrom::Start((index * 4) as u64))?;
        file.read_exact(&mut loc)?;
        let location = u32::from_be_bytes(loc);
        if location == 0 {
            return Err(StoreError::NotFound);
        }
        let offset = (location >> 8) as usize;
        let count = (location & 0xFF) as usize;
        if offset < HEADER_BYTES / SECTOR_BYTES || count == 0 {
            return Err(corrupt(format!("bad location {offset}+{count}")));
        }
        let start = offset * SECTOR_BYTES;
        if start + 5 > file_len {
            return Err(corrupt("record starts past end of file"));
        }
        let end = (start + count * SECTOR_BYTES).min(file_len);
        let mut raw = vec![0u8; end - start];
        file.seek(SeekFrom::Start(start as u64))?;
        file.read_exact(&mut raw)?;
        decode_record(&raw)
    }

    fn list_chunks(&self) -> Result<Vec<ChunkCoord>, StoreError> {
        let mut out = Vec::new();
        for file in self.region_files()? {
            out.extend(self.chunks_in_file(file)?);
        }
        out.sort();
        Ok(out)
    }

    fn modified_at(&self, coord: ChunkCoord) -> Result<Option<u64>, StoreError> {
        let path = self.path_of(RegionFileCoord::of_chunk(coord));
        match RegionHeader::read(&path) {
            Ok(h) => {
                let t = h.timestamps[entry_index(coord)];
                Ok((t != 0).then_some(u64::from(t)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rewrites region files chunk by chunk. Each write produces a compact file and
/// replaces the old one atomically; intended for tooling and tests, not for
/// concurrent writers.
pub struct RegionFileWriter {
    dir: PathBuf,
    compression: Compression,
}

impl RegionFileWriter {
    pub fn new(dir: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            dir: dir.into(),
            compression,
        }
    }

    pub fn write_chunk(&self, coord: ChunkCoord, payload: &[u8], timestamp: u32) -> io::Result<()> {
        let record = match self.compression {
            Compression::None => payload.to_vec(),
            Compression::Zlib => {
                let mut enc = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
                enc.write_all(payload)?;
                enc.finish()?
            }
        };
        let mut raw = Vec::with_capacity(record.len() + 5);
        raw.extend_from_slice(&((record.len() + 1) as u32).to_be_bytes());
        raw.push(self.compression as u8);
        raw.extend_from_slice(&record);
        if raw.len().div_ceil(SECTOR_BYTES) > MAX_SECTORS_PER_CHUNK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("chunk {coord:?} needs more than {MAX_SECTORS_PER_CHUNK} sectors"),
            ));
        }
        self.update(RegionFileCoord::of_chunk(coord), |records| {
            records[entry_index(coord)] = Some((raw, timestamp));
        })
    }

    pub fn remove_chunk(&self, coord: ChunkCoord) -> io::Result<()> {
        self.update(RegionFileCoord::of_chunk(coord), |records| {
            records[entry_index(coord)] = None;
        })
    }

    fn update(
        &self,
        file: RegionFileCoord,
        edit: impl FnOnce(&mut Vec<Option<(Vec<u8>, u32)>>),
    ) -> io::Result<()> {
        let path = self.dir.join(file.file_name());
        let mut records = read_raw_records(&path)?;
        edit(&mut records);
        fs::create_dir_all(&self.dir)?;
        let tmp_path = self.dir.join(format!("{}.tmp", file.file_name()));
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            write_region(&mut writer, &records)?;
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|error| io::Error::other(error.to_string()))?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        debug!("rewrote region file {}", path.display());
        Ok(())
    }
}

fn read_raw_records(path: &Path) -> io::Result<Vec<Option<(Vec<u8>, u32)>>> {
    let mut out = vec![None; ENTRIES];
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e),
    };
    let header = RegionHeader::parse(&bytes);
    for i in header.present().collect::<Vec<_>>() {
        let start = header.sector_offset(i) * SECTOR_BYTES;
        let end = (start + header.sector_count(i) * SECTOR_BYTES).min(bytes.len());
        if start < HEADER_BYTES || start >= end {
            continue;
        }
        let raw = &bytes[start..end];
        if raw.len() < 4 {
            continue;
        }
        let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if 4 + len <= raw.len() {
            out[i] = Some((raw[..4 + len].to_vec(), header.timestamps[i]));
        }
    }
    Ok(out)
}

fn write_region<W: Write>(w: &mut W, records: &[Option<(Vec<u8>, u32)>]) -> io::Result<()> {
    let mut locations = vec![0u32; ENTRIES];
    let mut timestamps = vec![0u32; ENTRIES];
    let mut next_sector = (HEADER_BYTES / SECTOR_BYTES) as u32;
    for (i, rec) in records.iter().enumerate() {
        if let Some((raw, ts)) = rec {
            let sectors = raw.len().div_ceil(SECTOR_BYTES) as u32;
            locations[i] = (next_sector << 8) | sectors;
            timestamps[i] = *ts;
            next_sector += sectors;
        }
    }
    for l in &locations {
        w.write_all(&l.to_be_bytes())?;
    }
    for t in &timestamps {
        w.write_all(&t.to_be_bytes())?;
    }
    for (raw, _) in records.iter().flatten() {
        w.write_all(raw)?;
        let pad = raw.len().div_ceil(SECTOR_BYTES) * SECTOR_BYTES - raw.len();
        w.write_all(&vec![0u8; pad])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_parse_back() {
        let rc = RegionFileCoord { x: -3, z: 12 };
        let path = PathBuf::from("/tmp/world").join(rc.file_name());
        assert_eq!(region_coord_from_path(&path), Some(rc));
        assert_eq!(region_coord_from_path(Path::new("r.1.tsr")), None);
        assert_eq!(region_coord_from_path(Path::new("r.a.b.tsr")), None);
        assert_eq!(region_coord_from_path(Path::new("r.1.2.mca")), None);
    }

    #[test]
    fn chunk_index_wraps_negative_coords() {
        let c = ChunkCoord::new(-1, -33);
        let rc = RegionFileCoord::of_chunk(c);
        assert_eq!(rc, RegionFileCoord { x: -1, z: -2 });
        assert_eq!(rc.chunk_at(entry_index(c)), c);
    }

    #[test]
    fn zero_length_record_is_corrupt() {
        let raw = [0u8, 0, 0, 0, 1, 0, 0, 0];
        assert!(matches!(decode_record(&raw), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn unknown_compression_is_corrupt() {
        let raw = [0u8, 0, 0, 3, 9, 1, 2];
        assert!(matches!(decode_record(&raw), Err(StoreError::Corrupt(_))));
    }
}
