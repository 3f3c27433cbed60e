//! Splitting oversized files into independently compressed parts.
//!
//! Every part is a complete gzip member covering one consecutive byte range,
//! so concatenating the parts in order and decompressing restores the file:
//! `cat <name>.gz.* | gunzip > <name>`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::error::{DeliveryError, DeliveryResult};

const MIN_INDEX_WIDTH: usize = 3;

/// Writes one compressed part from a bounded byte source.
pub trait PartArchiver: Send + Sync {
    /// Extension placed between the file name and the part index.
    fn extension(&self) -> &'static str;

    /// Compress everything `source` yields into `destination`; returns the
    /// number of source bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while reading or writing.
    fn write_part(&self, source: &mut dyn Read, destination: &Path) -> io::Result<u64>;
}

/// Gzip member per part.
#[derive(Debug, Clone, Copy)]
pub struct GzipArchiver {
    level: Compression,
}

impl GzipArchiver {
    /// Archiver with an explicit compression level.
    #[must_use]
    pub const fn new(level: Compression) -> Self {
        Self { level }
    }
}

impl Default for GzipArchiver {
    // Payloads are mostly already-compressed media; favour speed.
    fn default() -> Self {
        Self::new(Compression::fast())
    }
}

impl PartArchiver for GzipArchiver {
    fn extension(&self) -> &'static str {
        "gz"
    }

    fn write_part(&self, source: &mut dyn Read, destination: &Path) -> io::Result<u64> {
        let file = File::create(destination)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), self.level);
        let consumed = io::copy(source, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        Ok(consumed)
    }
}

/// One part written by the splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPart {
    /// Position in the manifest, starting at 1.
    pub index: usize,
    /// Location of the part file.
    pub path: PathBuf,
    /// Size of the part file in bytes.
    pub size: u64,
}

impl ChunkPart {
    /// File name of the part.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Ordered parts produced from one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkManifest {
    /// Name of the original file.
    pub file_name: String,
    /// Archive extension used by the parts.
    pub extension: &'static str,
    /// Parts in ascending index order.
    pub parts: Vec<ChunkPart>,
}

impl ChunkManifest {
    /// Number of parts.
    #[must_use]
    pub fn total(&self) -> usize {
        self.parts.len()
    }

    /// Instructions for restoring the original from its parts.
    #[must_use]
    pub fn reconstruction_hint(&self) -> String {
        let first = self
            .parts
            .first()
            .map(ChunkPart::file_name)
            .unwrap_or_default();
        format!(
            "{name} was sent in {total} parts starting with {first}.\n\
             Download every part into one folder, then run:\n\
             cat {name}.{ext}.* | gunzip > {name}",
            name = self.file_name,
            total = self.total(),
            ext = self.extension,
        )
    }

    /// Delete every part still on disk; missing parts are ignored.
    pub fn cleanup(&self) {
        remove_parts(self.parts.iter().map(|part| part.path.as_path()));
    }
}

/// Number of parts a file of `file_size` bytes needs; never zero.
#[must_use]
pub const fn expected_parts(file_size: u64, chunk_size: u64) -> u64 {
    if file_size == 0 || chunk_size == 0 {
        return 1;
    }
    file_size.div_ceil(chunk_size)
}

/// Byte lengths of the consecutive ranges covering `file_size`.
#[must_use]
pub fn chunk_lengths(file_size: u64, chunk_size: u64) -> Vec<u64> {
    let chunk_size = chunk_size.max(1);
    let mut lengths = Vec::new();
    let mut remaining = file_size;
    loop {
        let length = remaining.min(chunk_size);
        lengths.push(length);
        remaining -= length;
        if remaining == 0 {
            return lengths;
        }
    }
}

/// Name of part `index` out of `total` for `file_name`.
#[must_use]
pub fn part_name(file_name: &str, extension: &str, index: usize, total: usize) -> String {
    let width = total.to_string().len().max(MIN_INDEX_WIDTH);
    format!("{file_name}.{extension}.{index:0width$}")
}

/// Splits files into parts of at most `chunk_size` source bytes.
#[derive(Clone)]
pub struct ChunkSplitter {
    chunk_size: u64,
    archiver: Arc<dyn PartArchiver>,
}

impl std::fmt::Debug for ChunkSplitter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChunkSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("extension", &self.archiver.extension())
            .finish()
    }
}

impl ChunkSplitter {
    /// Gzip splitter with the given range size.
    #[must_use]
    pub fn new(chunk_size: u64) -> Self {
        Self::with_archiver(chunk_size, Arc::new(GzipArchiver::default()))
    }

    /// Splitter with a custom part archiver.
    #[must_use]
    pub fn with_archiver(chunk_size: u64, archiver: Arc<dyn PartArchiver>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            archiver,
        }
    }

    /// Maximum source bytes per part.
    #[must_use]
    pub const fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Split `file_path` into parts written under `target_dir`.
    ///
    /// Blocking; async callers should use [`ChunkSplitter::split_blocking`].
    /// On failure every part written so far is removed.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Split`] on I/O failure and
    /// [`DeliveryError::SplitIncomplete`] when the source ends early.
    pub fn split(&self, file_path: &Path, target_dir: &Path) -> DeliveryResult<ChunkManifest> {
        let split_err = |source| DeliveryError::Split {
            path: file_path.to_path_buf(),
            source,
        };
        let file_name = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| split_err(io::Error::new(io::ErrorKind::InvalidInput, "no file name")))?;

        let file = File::open(file_path).map_err(split_err)?;
        let file_size = file.metadata().map_err(split_err)?.len();
        fs::create_dir_all(target_dir).map_err(split_err)?;

        let lengths = chunk_lengths(file_size, self.chunk_size);
        let total = lengths.len();
        let extension = self.archiver.extension();
        let mut reader = BufReader::new(file);
        let mut parts: Vec<ChunkPart> = Vec::with_capacity(total);

        for (offset, length) in lengths.iter().copied().enumerate() {
            let index = offset + 1;
            let path = target_dir.join(part_name(&file_name, extension, index, total));
            let written = self
                .archiver
                .write_part(&mut (&mut reader).take(length), &path)
                .and_then(|consumed| Ok((consumed, fs::metadata(&path)?.len())));

            match written {
                Ok((consumed, size)) if consumed == length => {
                    debug!(part = %path.display(), index, total, size, "split part written");
                    parts.push(ChunkPart { index, path, size });
                }
                Ok((consumed, _)) => {
                    warn!(
                        path = %file_path.display(),
                        index,
                        consumed,
                        length,
                        "source ended before the expected range"
                    );
                    remove_parts(parts.iter().map(|part| part.path.as_path()).chain([path.as_path()]));
                    return Err(DeliveryError::SplitIncomplete {
                        path: file_path.to_path_buf(),
                        produced: parts.len(),
                        expected: total,
                    });
                }
                Err(source) => {
                    remove_parts(parts.iter().map(|part| part.path.as_path()).chain([path.as_path()]));
                    return Err(split_err(source));
                }
            }
        }

        Ok(ChunkManifest {
            file_name,
            extension,
            parts,
        })
    }

    /// Run [`ChunkSplitter::split`] on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns the split error, or [`DeliveryError::Worker`] if the blocking
    /// task failed to complete.
    pub async fn split_blocking(
        &self,
        file_path: PathBuf,
        target_dir: PathBuf,
    ) -> DeliveryResult<ChunkManifest> {
        let splitter = self.clone();
        tokio::task::spawn_blocking(move || splitter.split(&file_path, &target_dir))
            .await
            .map_err(|source| DeliveryError::Worker {
                operation: "split",
                source,
            })?
    }
}

fn remove_parts<'a>(paths: impl IntoIterator<Item = &'a Path>) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(part = %path.display(), error = %err, "failed to remove split part"),
        }
    }
}
