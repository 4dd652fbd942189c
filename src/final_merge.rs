//! Final merge of spilled batches.

use std::cmp::Ordering;
use std::io::{self, prelude::*};

use crate::line_buffer::BufferError;
use crate::merger::{BinaryHeapMerger, MergeError};
use crate::progress::{MergeProgress, ProgressSink};
use crate::sort::SortError;
use crate::spill::SpillFile;

/// Merges all spilled batch files into the output and removes them.
pub struct FinalMerger {
    /// Temporary file read buffer size.
    rw_buf_size: Option<usize>,
    /// Total lines hint, only used for progress reporting.
    total_lines: u64,
}

impl FinalMerger {
    pub fn new(rw_buf_size: Option<usize>, total_lines: u64) -> Self {
        FinalMerger {
            rw_buf_size,
            total_lines,
        }
    }

    /// Merges `files` into `writer` according to `compare`.
    /// Returns the number of lines written.
    ///
    /// The writer is flushed before the files are removed. Files are removed on failure too,
    /// by dropping them.
    pub fn merge<F, W>(
        &self,
        files: Vec<SpillFile>,
        writer: &mut W,
        compare: &F,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, SortError>
    where
        F: Fn(&str, &str) -> Ordering,
        W: Write,
    {
        let expected: u64 = files.iter().map(SpillFile::lines).sum();
        log::debug!("merging {} temporary files ({} lines)", files.len(), expected);

        let buffers = files
            .iter()
            .map(|file| file.open(self.rw_buf_size))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| match err {
                BufferError::IO(err) => SortError::Merge(err),
                BufferError::Exhausted => SortError::Merge(io::ErrorKind::UnexpectedEof.into()),
            })?;

        let mut checkpoints = MergeProgress::new(self.total_lines);
        let mut merger = BinaryHeapMerger::new(buffers, compare);
        log::trace!("{} non-empty temporary files to merge", merger.pending());
        let result = merger.write_to(writer, |lines| {
            if let Some(percent) = checkpoints.advance(lines) {
                progress.merged(percent);
            }
        });
        merger.release();

        let lines = result.map_err(|err| match err {
            MergeError::Read(err) => SortError::Merge(err),
            MergeError::Write(err) => SortError::Output(err),
        })?;
        if lines != expected {
            return Err(SortError::Merge(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} lines merged, {} lines spilled", lines, expected),
            )));
        }
        writer.flush().map_err(SortError::Output)?;
        progress.finished();

        for file in files {
            file.remove().map_err(SortError::Cleanup)?;
        }

        log::debug!("{} lines merged", lines);

        return Ok(lines);
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, Write};

    use rstest::*;

    use super::FinalMerger;
    use crate::buffer::Batch;
    use crate::progress::{NoProgress, ProgressSink};
    use crate::sort::SortError;
    use crate::spill::{BatchSpiller, SpillFile};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn spill(spiller: &BatchSpiller, lines: &[&str]) -> SpillFile {
        let mut batch = Batch::new(lines.len(), 1);
        for line in lines {
            batch.push(line.to_string());
        }

        spiller.spill(&mut batch, &|a: &str, b: &str| a.cmp(b)).unwrap()
    }

    #[derive(Default)]
    struct RecordingProgress {
        percents: Vec<u64>,
        finished: bool,
    }

    impl ProgressSink for RecordingProgress {
        fn merged(&mut self, percent: u64) {
            self.percents.push(percent);
        }

        fn finished(&mut self) {
            self.finished = true;
        }
    }

    #[rstest]
    fn test_final_merge(tmp_dir: tempfile::TempDir) {
        let spiller = BatchSpiller::new(tmp_dir.path(), None);
        let files = vec![
            spill(&spiller, &["b", "e", "h"]),
            spill(&spiller, &["a", "d"]),
            spill(&spiller, &["c", "f", "g"]),
        ];
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 3);

        let mut output = Vec::new();
        let lines = FinalMerger::new(Some(8), 0)
            .merge(files, &mut output, &|a: &str, b: &str| a.cmp(b), &mut NoProgress)
            .unwrap();

        assert_eq!(lines, 8);
        assert_eq!(String::from_utf8(output).unwrap(), "a\nb\nc\nd\ne\nf\ng\nh\n");
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_final_merge_no_files() {
        let mut output = Vec::new();
        let lines = FinalMerger::new(None, 0)
            .merge(Vec::new(), &mut output, &|a: &str, b: &str| a.cmp(b), &mut NoProgress)
            .unwrap();

        assert_eq!(lines, 0);
        assert!(output.is_empty());
    }

    #[rstest]
    fn test_final_merge_progress(tmp_dir: tempfile::TempDir) {
        let spiller = BatchSpiller::new(tmp_dir.path(), None);
        let first: Vec<String> = (0..100).map(|i| format!("{:03}", i * 2)).collect();
        let second: Vec<String> = (0..100).map(|i| format!("{:03}", i * 2 + 1)).collect();
        let files = vec![
            spill(&spiller, &first.iter().map(String::as_str).collect::<Vec<_>>()),
            spill(&spiller, &second.iter().map(String::as_str).collect::<Vec<_>>()),
        ];

        let mut progress = RecordingProgress::default();
        let mut output = Vec::new();
        FinalMerger::new(None, 200)
            .merge(files, &mut output, &|a: &str, b: &str| a.cmp(b), &mut progress)
            .unwrap();

        assert_eq!(progress.percents, Vec::from_iter(1..=100));
        assert_eq!(progress.finished, true);
    }

    #[rstest]
    fn test_final_merge_missing_file(tmp_dir: tempfile::TempDir) {
        let spiller = BatchSpiller::new(tmp_dir.path(), None);
        let file = spill(&spiller, &["a"]);
        fs::remove_file(file.path()).unwrap();

        let mut output = Vec::new();
        let result = FinalMerger::new(None, 0).merge(vec![file], &mut output, &|a: &str, b: &str| a.cmp(b), &mut NoProgress);

        assert!(matches!(result, Err(SortError::Merge(_))));
    }

    /// Accepts `limit` bytes, then fails every write.
    struct LimitedWriter {
        limit: usize,
        written: Vec<u8>,
    }

    impl Write for LimitedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let available = self.limit - self.written.len();
            if available == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let len = buf.len().min(available);
            self.written.extend_from_slice(&buf[..len]);
            return Ok(len);
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    fn test_final_merge_write_failure(tmp_dir: tempfile::TempDir) {
        let spiller = BatchSpiller::new(tmp_dir.path(), None);
        let files = vec![
            spill(&spiller, &["b", "d", "f"]),
            spill(&spiller, &["a", "c", "e"]),
        ];

        let mut progress = RecordingProgress::default();
        let mut output = LimitedWriter { limit: 5, written: Vec::new() };
        let result = FinalMerger::new(Some(4), 6).merge(files, &mut output, &|a: &str, b: &str| a.cmp(b), &mut progress);

        assert!(matches!(result, Err(SortError::Output(_))));
        assert_eq!(output.written, b"a\nb\nc");
        assert_eq!(progress.finished, false);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_final_merge_lost_lines(tmp_dir: tempfile::TempDir) {
        let spiller = BatchSpiller::new(tmp_dir.path(), None);
        let files = vec![spill(&spiller, &["a", "c"]), spill(&spiller, &["b", "d"])];
        fs::write(files[1].path(), "b\n").unwrap();

        let mut output = Vec::new();
        let result = FinalMerger::new(None, 0).merge(files, &mut output, &|a: &str, b: &str| a.cmp(b), &mut NoProgress);

        assert!(matches!(result, Err(SortError::Merge(err)) if err.kind() == io::ErrorKind::InvalidData));
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }
}
