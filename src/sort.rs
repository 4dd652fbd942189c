//! External sorter.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io::{self, prelude::*};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::buffer::Batch;
use crate::final_merge::FinalMerger;
use crate::lines::UniversalLines;
use crate::pool::{SortWorker, WorkerPool};
use crate::progress::{BatchStage, NoProgress, ProgressSink};
use crate::spill::{BatchSpiller, SpillError, SpillFile};

/// Default per-batch line ceiling.
pub const DEFAULT_BATCH_LINES: usize = 1_000_000;

/// Line comparison function type used when no custom comparator is set.
pub type Compare = fn(&str, &str) -> Ordering;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Sorter configuration is not valid.
    InvalidConfig(&'static str),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Temporary file creation error.
    TempDir(io::Error),
    /// Input file open or read error.
    Input(io::Error),
    /// Sort worker failure. The batch the partition belongs to is lost.
    Sort { partition: usize },
    /// Sorted batch write error.
    Spill(io::Error),
    /// Temporary file read error during the final merge.
    Merge(io::Error),
    /// Output file creation or write error.
    Output(io::Error),
    /// Temporary file removal error.
    Cleanup(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidConfig(_) => None,
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::TempDir(err) => Some(err),
            SortError::Input(err) => Some(err),
            SortError::Sort { .. } => None,
            SortError::Spill(err) => Some(err),
            SortError::Merge(err) => Some(err),
            SortError::Output(err) => Some(err),
            SortError::Cleanup(err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidConfig(msg) => write!(f, "invalid sorter configuration: {}", msg),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::TempDir(err) => write!(f, "temporary file not created: {}", err),
            SortError::Input(err) => write!(f, "input data read failed: {}", err),
            SortError::Sort { partition } => write!(f, "partition {} sorting failed", partition),
            SortError::Spill(err) => write!(f, "sorted batch spill failed: {}", err),
            SortError::Merge(err) => write!(f, "temporary data read failed during final merge: {}", err),
            SortError::Output(err) => write!(f, "output data write failed: {}", err),
            SortError::Cleanup(err) => write!(f, "temporary file removal failed: {}", err),
        }
    }
}

impl From<SpillError> for SortError {
    fn from(err: SpillError) -> Self {
        match err {
            SpillError::TempFile(err) => SortError::TempDir(err),
            SpillError::IO(err) => SortError::Spill(err),
        }
    }
}

/// Sorting run summary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of sorted lines.
    pub lines: u64,
    /// Number of batches spilled to temporary files.
    pub batches: usize,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
pub struct ExternalSorterBuilder<F = Compare> {
    /// Total input lines hint used for progress reporting.
    total_lines: u64,
    /// Maximum number of lines held in memory per batch.
    batch_lines: usize,
    /// Temporary and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Number of threads (and batch partitions) to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Line comparison function.
    compare: F,
    /// Progress notifications receiver.
    progress: Box<dyn ProgressSink>,
}

impl ExternalSorterBuilder<Compare> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }
}

impl<F> ExternalSorterBuilder<F>
where
    F: Fn(&str, &str) -> Ordering + Sync,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<F>, SortError> {
        ExternalSorter::new(
            self.total_lines,
            self.batch_lines,
            self.rw_buf_size,
            self.threads_number,
            self.compare,
            self.progress,
        )
    }

    /// Sets total input lines hint. It only affects progress reporting.
    pub fn with_total_lines(mut self, total_lines: u64) -> ExternalSorterBuilder<F> {
        self.total_lines = total_lines;
        return self;
    }

    /// Sets maximum number of lines held in memory per batch.
    pub fn with_batch_lines(mut self, batch_lines: usize) -> ExternalSorterBuilder<F> {
        self.batch_lines = batch_lines;
        return self;
    }

    /// Sets temporary and output file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<F> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets number of threads to be used to sort data in parallel.
    /// Each batch is split into the same number of partitions. `1` sorts on the calling thread.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<F> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets progress notifications receiver.
    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> ExternalSorterBuilder<F> {
        self.progress = progress;
        return self;
    }

    /// Sets line comparison function. It must define a total order.
    pub fn with_comparator<G>(self, compare: G) -> ExternalSorterBuilder<G>
    where
        G: Fn(&str, &str) -> Ordering + Sync,
    {
        ExternalSorterBuilder {
            total_lines: self.total_lines,
            batch_lines: self.batch_lines,
            rw_buf_size: self.rw_buf_size,
            threads_number: self.threads_number,
            compare,
            progress: self.progress,
        }
    }
}

impl Default for ExternalSorterBuilder<Compare> {
    fn default() -> Self {
        ExternalSorterBuilder {
            total_lines: 0,
            batch_lines: DEFAULT_BATCH_LINES,
            rw_buf_size: None,
            threads_number: None,
            compare: |a, b| a.cmp(b),
            progress: Box::new(NoProgress),
        }
    }
}

/// External sorter.
pub struct ExternalSorter<F = Compare> {
    /// Sorting thread pool. [`None`] if sorting is done on the calling thread.
    workers: Option<WorkerPool>,
    /// Number of partitions each batch is split into.
    partitions_number: usize,
    /// Total input lines hint used for progress reporting.
    total_lines: u64,
    /// Maximum number of lines held in memory per batch.
    batch_lines: usize,
    /// Temporary and output file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Line comparison function.
    compare: F,
    /// Progress notifications receiver.
    progress: Mutex<Box<dyn ProgressSink>>,
}

impl<F> ExternalSorter<F>
where
    F: Fn(&str, &str) -> Ordering + Sync,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `total_lines` - Total input lines hint. Only used to compute progress percentage.
    /// * `batch_lines` - Maximum number of lines held in memory per batch.
    /// * `rw_buf_size` - Temporary and output file read/write buffer size.
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `compare` - Function to be used to compare lines
    /// * `progress` - Progress notifications receiver
    pub fn new(
        total_lines: u64,
        batch_lines: usize,
        rw_buf_size: Option<usize>,
        threads_number: Option<usize>,
        compare: F,
        progress: Box<dyn ProgressSink>,
    ) -> Result<Self, SortError> {
        if batch_lines == 0 {
            return Err(SortError::InvalidConfig("batch lines must be positive"));
        }
        if threads_number == Some(0) {
            return Err(SortError::InvalidConfig("threads number must be positive"));
        }
        if rw_buf_size == Some(0) {
            return Err(SortError::InvalidConfig("read/write buffer size must be positive"));
        }

        let workers = match threads_number {
            Some(1) => {
                log::info!("sorting on the calling thread");
                None
            }
            threads_number => Some(WorkerPool::new(threads_number).map_err(SortError::ThreadPoolBuildError)?),
        };
        let partitions_number = workers.as_ref().map_or(1, WorkerPool::threads_number);

        log::info!(
            "batch limit: {} lines, partitions per batch: {}",
            batch_lines,
            partitions_number
        );

        return Ok(ExternalSorter {
            workers,
            partitions_number,
            total_lines,
            batch_lines,
            rw_buf_size,
            compare,
            progress: Mutex::new(progress),
        });
    }

    /// Sorts lines of the `input` file writing them to the `output` file.
    /// The output file is created or truncated.
    ///
    /// # Arguments
    /// * `input` - File to be sorted
    /// * `output` - File the sorted lines are written to
    /// * `tmp_dir` - Directory to be used to store temporary files. If the parameter is [`None`] default OS
    ///   temporary directory will be used.
    pub fn sort_file(&self, input: &Path, output: &Path, tmp_dir: Option<&Path>) -> Result<SortSummary, SortError> {
        let result = self.open_and_sort(input, output, tmp_dir);

        match &result {
            Ok(summary) => log::info!(
                "{} sorted into {} ({} lines, {} batches)",
                input.display(),
                output.display(),
                summary.lines,
                summary.batches
            ),
            Err(err) => log::error!("{} sorting failed: {}", input.display(), err),
        }

        return result;
    }

    fn open_and_sort(&self, input: &Path, output: &Path, tmp_dir: Option<&Path>) -> Result<SortSummary, SortError> {
        let input_file = fs::File::open(input).map_err(SortError::Input)?;
        let input_reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input_file),
            None => io::BufReader::new(input_file),
        };

        let output_file = fs::File::create(output).map_err(SortError::Output)?;
        let mut output_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output_file),
            None => io::BufWriter::new(output_file),
        };

        return self.sort_lines(input_reader, &mut output_writer, tmp_dir);
    }

    /// Sorts lines of the `input` stream writing them to the `output` stream.
    ///
    /// # Arguments
    /// * `input` - Input stream lines are read from
    /// * `output` - Output stream the sorted lines are written to. It is flushed on success.
    /// * `tmp_dir` - Directory to be used to store temporary files. If the parameter is [`None`] default OS
    ///   temporary directory will be used.
    pub fn sort_lines<R, W>(&self, input: R, output: &mut W, tmp_dir: Option<&Path>) -> Result<SortSummary, SortError>
    where
        R: BufRead,
        W: Write,
    {
        let tmp_dir = tmp_dir.map_or_else(std::env::temp_dir, PathBuf::from);
        log::info!("using {} as a temporary directory", tmp_dir.display());

        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);

        let spiller = BatchSpiller::new(&tmp_dir, self.rw_buf_size);
        let files = self.sort_in_batches(input, &spiller, &mut **progress)?;
        let batches = files.len();
        log::debug!("external sort preparation done ({} temporary files)", batches);

        let merger = FinalMerger::new(self.rw_buf_size, self.total_lines);
        let lines = merger.merge(files, output, &self.compare, &mut **progress)?;

        return Ok(SortSummary { lines, batches });
    }

    /// Reads the input batch by batch distributing lines round-robin across partitions,
    /// then sorts and spills every batch. Returns the spilled files.
    fn sort_in_batches<R: BufRead>(
        &self,
        input: R,
        spiller: &BatchSpiller,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<SpillFile>, SortError> {
        let expected_batches = match self.total_lines {
            0 => 0,
            total_lines => ((total_lines - 1) / self.batch_lines as u64 + 1) as usize,
        };

        let mut batch = Batch::new(self.batch_lines, self.partitions_number);
        let mut files = Vec::new();
        let mut lines = UniversalLines::new(input).peekable();

        while lines.peek().is_some() {
            progress.batch(files.len() + 1, expected_batches, BatchStage::Reading);
            while !batch.is_full() {
                match lines.next() {
                    Some(line) => batch.push(line.map_err(SortError::Input)?),
                    None => break,
                }
            }

            progress.batch(files.len() + 1, expected_batches, BatchStage::Sorting);
            files.push(self.create_spill_file(&mut batch, spiller)?);
        }

        return Ok(files);
    }

    fn create_spill_file(&self, batch: &mut Batch, spiller: &BatchSpiller) -> Result<SpillFile, SortError> {
        log::debug!("sorting batch data ({} lines) ...", batch.len());

        match &self.workers {
            Some(workers) => {
                let failed = workers.sort_partitions(batch.partitions_mut(), &self.compare);
                if let Some(&partition) = failed.first() {
                    return Err(SortError::Sort { partition });
                }
            }
            None => {
                for (idx, partition) in batch.partitions_mut().iter_mut().enumerate() {
                    let worker = SortWorker::new(partition);
                    panic::catch_unwind(AssertUnwindSafe(|| worker.run(&self.compare)))
                        .map_err(|_| SortError::Sort { partition: idx })?;
                }
            }
        }

        log::debug!("saving batch data");
        let spill_file = spiller.spill(batch, &self.compare)?;

        return Ok(spill_file);
    }
}
