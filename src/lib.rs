//! `ext-line-sort` sorts line-oriented text files that do not fit into memory.
//!
//! It implements the classic external merge sort. The input is read in batches bounded by a
//! configured number of lines. Each batch is split round-robin into partitions that are sorted
//! in parallel, merged together and spilled to a temporary file. Finally all temporary files
//! are merged into the output in a single k-way merge holding only one line per file in memory.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   at most `batch_lines` input lines are held in memory at any time.
//! * **Multithreading support:**
//!   every batch partition is sorted on its own worker thread.
//! * **Custom ordering:**
//!   lines are compared with any total order supplied as `Fn(&str, &str) -> Ordering`.
//! * **Progress reporting:**
//!   an optional [`ProgressSink`] receives batch and merge checkpoints.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_line_sort::ExternalSorterBuilder;
//!
//! fn main() {
//!     let sorter = ExternalSorterBuilder::new()
//!         .with_batch_lines(500_000)
//!         .with_threads_number(4)
//!         .with_rw_buf_size(64 * 1024)
//!         .with_comparator(|a: &str, b: &str| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter
//!         .sort_file(Path::new("input.txt"), Path::new("output.txt"), Some(Path::new("./")))
//!         .unwrap();
//!
//!     println!("sorted {} lines in {} batches", summary.lines, summary.batches);
//! }
//! ```

pub mod buffer;
pub mod final_merge;
pub mod line_buffer;
pub mod lines;
pub mod merger;
pub mod pool;
pub mod progress;
pub mod sort;
pub mod spill;

pub use buffer::Batch;
pub use final_merge::FinalMerger;
pub use line_buffer::{BufferError, LineBuffer};
pub use lines::UniversalLines;
pub use merger::{BinaryHeapMerger, MergeError};
pub use pool::{JoinBarrier, SortWorker, WorkerPool};
pub use progress::{BatchStage, LogProgress, NoProgress, ProgressSink};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortSummary};
pub use spill::{BatchSpiller, SpillError, SpillFile};
