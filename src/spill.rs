use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{self, Display};
use std::io;
use std::path::{Path, PathBuf};

use crate::buffer::Batch;
use crate::line_buffer::{BufferError, FileLines, LineBuffer};
use crate::merger::{BinaryHeapMerger, MergeError};

/// Spill error.
#[derive(Debug)]
pub enum SpillError {
    /// Temporary file creation error.
    TempFile(io::Error),
    /// Temporary file write error.
    IO(io::Error),
}

impl Error for SpillError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            SpillError::TempFile(err) => err,
            SpillError::IO(err) => err,
        })
    }
}

impl Display for SpillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SpillError::TempFile(err) => write!(f, "temporary file not created: {}", err),
            SpillError::IO(err) => write!(f, "temporary file write failed: {}", err),
        }
    }
}

/// Sorted batch persisted to a temporary file.
///
/// The file is removed when the value is dropped or [`SpillFile::remove`] is called.
pub struct SpillFile {
    path: tempfile::TempPath,
    lines: u64,
}

impl SpillFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of lines stored in the file.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Opens the file for reading.
    pub fn open(&self, buf_size: Option<usize>) -> Result<LineBuffer<FileLines>, BufferError> {
        LineBuffer::open(&self.path, buf_size)
    }

    /// Deletes the file from the file system.
    pub fn remove(self) -> io::Result<()> {
        self.path.close()
    }
}

/// Merges the sorted partitions of a batch into a new temporary file.
pub struct BatchSpiller {
    /// Directory temporary files are created in.
    tmp_dir: PathBuf,
    /// Temporary file write buffer size.
    rw_buf_size: Option<usize>,
}

impl BatchSpiller {
    pub fn new(tmp_dir: &Path, rw_buf_size: Option<usize>) -> Self {
        BatchSpiller {
            tmp_dir: tmp_dir.to_path_buf(),
            rw_buf_size,
        }
    }

    /// Merges batch partitions (each already sorted by `compare`) into a new temporary file.
    /// Partitions are drained, the batch keeps its allocated capacity.
    pub fn spill<F>(&self, batch: &mut Batch, compare: &F) -> Result<SpillFile, SpillError>
    where
        F: Fn(&str, &str) -> Ordering,
    {
        let tmp_file = tempfile::Builder::new()
            .prefix("sort-batch-")
            .suffix(".lines")
            .tempfile_in(&self.tmp_dir)
            .map_err(SpillError::TempFile)?;

        log::debug!("spilling {} lines to {}", batch.len(), tmp_file.path().display());

        let mut writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file),
            None => io::BufWriter::new(tmp_file),
        };

        let buffers = batch
            .partitions_mut()
            .iter_mut()
            .map(|partition| LineBuffer::from_partition(partition.drain(..)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| match err {
                BufferError::IO(err) => SpillError::IO(err),
                BufferError::Exhausted => SpillError::IO(io::ErrorKind::UnexpectedEof.into()),
            })?;

        let mut merger = BinaryHeapMerger::new(buffers, compare);
        let lines = merger.write_to(&mut writer, |_| {}).map_err(|err| match err {
            MergeError::Read(err) | MergeError::Write(err) => SpillError::IO(err),
        });
        merger.release();
        drop(merger);
        batch.clear();
        let lines = lines?;

        let tmp_file = writer.into_inner().map_err(|err| SpillError::IO(err.into_error()))?;

        return Ok(SpillFile {
            path: tmp_file.into_temp_path(),
            lines,
        });
    }
}
