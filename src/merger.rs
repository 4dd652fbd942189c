//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};

use crate::line_buffer::{BufferError, LineBuffer};

/// Merge error.
#[derive(Debug)]
pub enum MergeError {
    /// Sorted source read error.
    Read(io::Error),
    /// Merge destination write error.
    Write(io::Error),
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            MergeError::Read(err) => err,
            MergeError::Write(err) => err,
        })
    }
}

impl Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MergeError::Read(err) => write!(f, "sorted source read failed: {}", err),
            MergeError::Write(err) => write!(f, "merged data write failed: {}", err),
        }
    }
}

struct HeapEntry<'a, S, F> {
    buffer: LineBuffer<S>,
    idx: usize,
    compare: &'a F,
}

impl<'a, S, F> HeapEntry<'a, S, F>
where
    S: Iterator<Item = io::Result<String>>,
{
    fn head(&self) -> &str {
        // empty buffers are never queued
        self.buffer.peek().unwrap_or_default()
    }
}

impl<'a, S, F> Ord for HeapEntry<'a, S, F>
where
    S: Iterator<Item = io::Result<String>>,
    F: Fn(&str, &str) -> Ordering,
{
    fn cmp(&self, other: &Self) -> Ordering {
        // binary heap is max-heap so the comparison is reversed to get min-heap
        (self.compare)(other.head(), self.head()).then_with(|| other.idx.cmp(&self.idx))
    }
}

impl<'a, S, F> PartialOrd for HeapEntry<'a, S, F>
where
    S: Iterator<Item = io::Result<String>>,
    F: Fn(&str, &str) -> Ordering,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, S, F> PartialEq for HeapEntry<'a, S, F>
where
    S: Iterator<Item = io::Result<String>>,
    F: Fn(&str, &str) -> Ordering,
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a, S, F> Eq for HeapEntry<'a, S, F>
where
    S: Iterator<Item = io::Result<String>>,
    F: Fn(&str, &str) -> Ordering,
{
}

/// Binary heap merger implementation.
/// Merges multiple sorted line buffers into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of lines,
/// *n* is the number of buffers (inputs). Only the current line of each buffer is held in memory.
pub struct BinaryHeapMerger<'a, S, F> {
    entries: BinaryHeap<HeapEntry<'a, S, F>>,
}

impl<'a, S, F> BinaryHeapMerger<'a, S, F>
where
    S: Iterator<Item = io::Result<String>>,
    F: Fn(&str, &str) -> Ordering,
{
    /// Creates an instance of a binary heap merger using line buffers as inputs.
    /// Buffers should be sorted according to `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `buffers` - Buffers to be merged in a single sorted one
    /// * `compare` - Function to be used to compare lines
    pub fn new<I>(buffers: I, compare: &'a F) -> Self
    where
        I: IntoIterator<Item = LineBuffer<S>>,
    {
        let entries = BinaryHeap::from_iter(
            buffers
                .into_iter()
                .enumerate()
                .filter(|(_, buffer)| !buffer.is_empty())
                .map(|(idx, buffer)| HeapEntry { buffer, idx, compare }),
        );

        return BinaryHeapMerger { entries };
    }

    /// Returns the number of buffers that still have lines.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Releases all buffers that have not been exhausted yet.
    pub fn release(&mut self) {
        let mut released = 0;
        for mut entry in self.entries.drain() {
            if !entry.buffer.is_released() {
                entry.buffer.release();
                released += 1;
            }
        }
        if released > 0 {
            log::debug!("{} unfinished line sources released", released);
        }
    }

    /// Writes every remaining line followed by a newline to `writer`.
    /// `on_line` is called with the running count after each line is written.
    /// Returns the number of written lines.
    pub fn write_to<W: Write>(&mut self, writer: &mut W, mut on_line: impl FnMut(u64)) -> Result<u64, MergeError> {
        let mut written = 0;

        while let Some(line) = self.next() {
            let line = line.map_err(MergeError::Read)?;
            writer.write_all(line.as_bytes()).map_err(MergeError::Write)?;
            writer.write_all(b"\n").map_err(MergeError::Write)?;

            written += 1;
            on_line(written);
        }

        return Ok(written);
    }
}

impl<'a, S, F> Iterator for BinaryHeapMerger<'a, S, F>
where
    S: Iterator<Item = io::Result<String>>,
    F: Fn(&str, &str) -> Ordering,
{
    type Item = io::Result<String>;

    /// Returns the next line from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        let mut entry = self.entries.pop()?;

        let result = match entry.buffer.pop() {
            Ok(line) => Ok(line),
            Err(BufferError::IO(err)) => return Some(Err(err)),
            Err(BufferError::Exhausted) => {
                return Some(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "line source exhausted")))
            }
        };

        if !entry.buffer.is_empty() {
            self.entries.push(entry);
        }

        return Some(result);
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::{BinaryHeapMerger, MergeError};
    use crate::line_buffer::LineBuffer;

    fn buffers(partitions: Vec<Vec<&str>>) -> Vec<LineBuffer<impl Iterator<Item = io::Result<String>>>> {
        partitions
            .into_iter()
            .map(|lines| LineBuffer::from_partition(lines.into_iter().map(String::from).collect::<Vec<_>>()).unwrap())
            .collect()
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec!["4", "5", "7"],
            vec!["1", "6"],
            vec!["3"],
            vec![],
        ],
        vec!["1", "3", "4", "5", "6", "7"],
    )]
    #[case(
        vec![
            vec!["a", "b"],
            vec!["a"],
            vec!["a", "c"],
        ],
        vec!["a", "a", "a", "b", "c"],
    )]
    fn test_merger(#[case] partitions: Vec<Vec<&str>>, #[case] expected_result: Vec<&str>) {
        let compare = |a: &str, b: &str| a.cmp(b);
        let merger = BinaryHeapMerger::new(buffers(partitions), &compare);

        let actual_result: Result<Vec<String>, _> = merger.collect();
        assert_eq!(actual_result.unwrap(), expected_result);
    }

    #[test]
    fn test_merger_custom_order() {
        let compare = |a: &str, b: &str| a.cmp(b).reverse();
        let merger = BinaryHeapMerger::new(buffers(vec![vec!["z", "m", "a"], vec!["y", "b"]]), &compare);

        let actual_result: Result<Vec<String>, _> = merger.collect();
        assert_eq!(actual_result.unwrap(), vec!["z", "y", "m", "b", "a"]);
    }

    #[test]
    fn test_merger_read_error() {
        let failing = vec![
            Ok("3".to_string()),
            Err(io::Error::new(ErrorKind::Other, "test error")),
        ];
        let sources: Vec<Box<dyn Iterator<Item = io::Result<String>>>> = vec![
            Box::new(failing.into_iter()),
            Box::new(vec![Ok("1".to_string()), Ok("2".to_string())].into_iter()),
        ];
        let compare = |a: &str, b: &str| a.cmp(b);
        let merger = BinaryHeapMerger::new(sources.into_iter().map(|s| LineBuffer::new(s).unwrap()), &compare);

        let actual_result: Vec<Result<String, io::Error>> = merger.collect();
        assert_eq!(actual_result.len(), 3);
        assert_eq!(actual_result[0].as_ref().unwrap(), "1");
        assert_eq!(actual_result[1].as_ref().unwrap(), "2");
        assert_eq!(actual_result[2].as_ref().unwrap_err().to_string(), "test error");
    }

    #[test]
    fn test_write_to() {
        let compare = |a: &str, b: &str| a.cmp(b);
        let mut merger = BinaryHeapMerger::new(buffers(vec![vec!["b", "d"], vec!["a", "c"]]), &compare);

        let mut output = Vec::new();
        let mut counts = Vec::new();
        let written = merger.write_to(&mut output, |count| counts.push(count)).unwrap();

        assert_eq!(written, 4);
        assert_eq!(counts, vec![1, 2, 3, 4]);
        assert_eq!(String::from_utf8(output).unwrap(), "a\nb\nc\nd\n");
        assert_eq!(merger.pending(), 0);
    }

    #[test]
    fn test_write_to_error() {
        struct FailingWriter;

        impl io::Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(ErrorKind::Other, "disk full"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let compare = |a: &str, b: &str| a.cmp(b);
        let mut merger = BinaryHeapMerger::new(buffers(vec![vec!["a", "b"], vec!["c"]]), &compare);

        let result = merger.write_to(&mut FailingWriter, |_| {});
        assert!(matches!(result, Err(MergeError::Write(_))));

        merger.release();
        assert_eq!(merger.pending(), 0);
    }
}
