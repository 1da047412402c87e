//! Numbered temporary files under a private per-aggregator directory.
//!
//! Files are addressed by a dense index handed out in increasing order.
//! The whole directory is removed when the store is dropped, so every exit
//! path (success, error, or early cancellation) cleans up after itself.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use tempfile::TempDir;
use tracing::debug;

use flowagg_types::error::{FlowAggError, Result};

const BUFFER_SIZE: usize = 64 * 1024;

/// Owner of the spill directory.
pub struct TempStore {
    dir: TempDir,
    compression: bool,
    next_index: usize,
}

enum Sink {
    Plain(BufWriter<File>),
    Lz4(FrameEncoder<BufWriter<File>>),
}

/// A spill file being written.
pub struct TempWriter {
    index: usize,
    sink: Sink,
    written: u64,
}

enum Source {
    Plain(BufReader<File>),
    Lz4(FrameDecoder<BufReader<File>>),
}

/// A spill file being read back.
pub struct TempReader {
    index: usize,
    source: Source,
}

impl TempStore {
    /// Create a private directory under `parent` (or the system temp dir).
    pub fn new(parent: Option<&Path>, compression: bool) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("flowagg.");
        let dir = match parent {
            Some(p) => builder.tempdir_in(p),
            None => builder.tempdir(),
        }
        .map_err(|source| FlowAggError::SpillWrite { index: 0, source })?;
        debug!(path = %dir.path().display(), compression, "created spill directory");
        Ok(TempStore {
            dir,
            compression,
            next_index: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("tmp.{:05}", index))
    }

    /// Number of indices handed out so far.
    pub fn indices_used(&self) -> usize {
        self.next_index
    }

    /// Create the next numbered file.
    pub fn create(&mut self) -> Result<TempWriter> {
        let index = self.next_index;
        let path = self.path(index);
        let file =
            File::create(&path).map_err(|source| FlowAggError::SpillWrite { index, source })?;
        self.next_index += 1;
        let buffered = BufWriter::with_capacity(BUFFER_SIZE, file);
        let sink = if self.compression {
            Sink::Lz4(FrameEncoder::new(buffered))
        } else {
            Sink::Plain(buffered)
        };
        debug!(index, "opened spill file for writing");
        Ok(TempWriter {
            index,
            sink,
            written: 0,
        })
    }

    /// Open a previously written file for reading.
    pub fn open(&self, index: usize) -> Result<TempReader> {
        let file = File::open(self.path(index))
            .map_err(|source| FlowAggError::SpillRead { index, source })?;
        let buffered = BufReader::with_capacity(BUFFER_SIZE, file);
        let source = if self.compression {
            Source::Lz4(FrameDecoder::new(buffered))
        } else {
            Source::Plain(buffered)
        };
        Ok(TempReader { index, source })
    }

    /// Delete a file whose content has been consumed. Missing files are ignored.
    pub fn remove(&self, index: usize) -> Result<()> {
        match fs::remove_file(self.path(index)) {
            Ok(()) => {
                debug!(index, "removed spill file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FlowAggError::SpillWrite { index, source }),
        }
    }

    /// Number of files currently present in the directory.
    pub fn live_files(&self) -> Result<usize> {
        Ok(fs::read_dir(self.dir.path())?.count())
    }
}

impl TempWriter {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Flush and close the file. Returns the uncompressed length.
    pub fn finish(self) -> Result<u64> {
        let index = self.index;
        let written = self.written;
        let mut buffered = match self.sink {
            Sink::Plain(w) => w,
            Sink::Lz4(enc) => enc
                .finish()
                .map_err(|e| FlowAggError::SpillWrite {
                    index,
                    source: io::Error::new(ErrorKind::Other, e.to_string()),
                })?,
        };
        buffered
            .flush()
            .map_err(|source| FlowAggError::SpillWrite { index, source })?;
        Ok(written)
    }
}

impl Write for TempWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match &mut self.sink {
            Sink::Plain(w) => w.write(buf)?,
            Sink::Lz4(w) => w.write(buf)?,
        };
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Plain(w) => w.flush(),
            Sink::Lz4(w) => w.flush(),
        }
    }
}

impl TempReader {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Read for TempReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            Source::Plain(r) => r.read(buf),
            Source::Lz4(r) => r.read(buf),
        }
    }
}

/// True if `err` means the process ran out of file descriptors or memory
/// while opening a file. Callers treat this as "open fewer files".
pub fn is_resource_exhausted(err: &FlowAggError) -> bool {
    let source = match err {
        FlowAggError::SpillRead { source, .. } | FlowAggError::SpillWrite { source, .. } => source,
        FlowAggError::Io(source) => source,
        _ => return false,
    };
    source.kind() == ErrorKind::OutOfMemory || is_too_many_open_files(source)
}

#[cfg(unix)]
fn is_too_many_open_files(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(not(unix))]
fn is_too_many_open_files(_err: &io::Error) -> bool {
    false
}
