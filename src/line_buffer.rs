//! One-line lookahead over a sorted line source.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

/// Line source backed by a sorted temporary file.
pub type FileLines = io::Lines<io::BufReader<fs::File>>;

/// Line source backed by a sorted in-memory partition.
pub type PartitionLines<I> = std::iter::Map<I, fn(String) -> io::Result<String>>;

/// Line buffer error.
#[derive(Debug)]
pub enum BufferError {
    /// The source has no more lines.
    Exhausted,
    /// Underlying source read error.
    IO(io::Error),
}

impl Error for BufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            BufferError::Exhausted => None,
            BufferError::IO(err) => Some(err),
        }
    }
}

impl Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            BufferError::Exhausted => write!(f, "line source exhausted"),
            BufferError::IO(err) => write!(f, "line source read failed: {}", err),
        }
    }
}

/// Lazy view over a sorted line source caching exactly the next unconsumed line.
///
/// The source (and the file handle it may own) is dropped as soon as it runs dry, fails,
/// or [`LineBuffer::release`] is called, whichever comes first.
pub struct LineBuffer<S> {
    source: Option<S>,
    head: Option<String>,
}

impl<S> LineBuffer<S>
where
    S: Iterator<Item = io::Result<String>>,
{
    /// Creates a buffer over `source` and reads its first line.
    pub fn new(source: S) -> Result<Self, BufferError> {
        let mut buffer = LineBuffer {
            source: Some(source),
            head: None,
        };
        buffer.refill()?;

        return Ok(buffer);
    }

    /// Returns the next unconsumed line without advancing.
    pub fn peek(&self) -> Result<&str, BufferError> {
        self.head.as_deref().ok_or(BufferError::Exhausted)
    }

    /// Consumes the current line and reads the following one from the source.
    pub fn pop(&mut self) -> Result<String, BufferError> {
        let line = self.head.take().ok_or(BufferError::Exhausted)?;
        self.refill()?;

        return Ok(line);
    }

    /// Checks if all lines have been consumed.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Drops the underlying source along with any lookahead. Calling it more than once is a no-op.
    pub fn release(&mut self) {
        if self.source.take().is_some() {
            log::trace!("line source released");
        }
        self.head = None;
    }

    /// Checks if the underlying source has been released.
    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }

    fn refill(&mut self) -> Result<(), BufferError> {
        let next = match self.source.as_mut() {
            Some(source) => source.next(),
            None => None,
        };

        match next {
            Some(Ok(line)) => self.head = Some(line),
            Some(Err(err)) => {
                self.release();
                return Err(BufferError::IO(err));
            }
            None => self.release(),
        }

        return Ok(());
    }
}

impl LineBuffer<FileLines> {
    /// Opens a sorted file and reads its first line.
    ///
    /// # Arguments
    /// * `path` - File to be read
    /// * `buf_size` - Read buffer size. If the parameter is [`None`] the default size is used.
    pub fn open(path: &Path, buf_size: Option<usize>) -> Result<Self, BufferError> {
        let file = fs::File::open(path).map_err(BufferError::IO)?;
        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return LineBuffer::new(reader.lines());
    }
}

impl<I> LineBuffer<PartitionLines<I>>
where
    I: Iterator<Item = String>,
{
    /// Creates a buffer over an already sorted in-memory partition.
    pub fn from_partition(lines: impl IntoIterator<Item = String, IntoIter = I>) -> Result<Self, BufferError> {
        let source: PartitionLines<I> = lines.into_iter().map(Ok as fn(String) -> io::Result<String>);

        return LineBuffer::new(source);
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind, Write};

    use rstest::*;

    use super::{BufferError, LineBuffer};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_partition_buffer() {
        let mut buffer = LineBuffer::from_partition(vec!["a".to_string(), "b".to_string()]).unwrap();

        assert_eq!(buffer.is_empty(), false);
        assert_eq!(buffer.peek().unwrap(), "a");
        assert_eq!(buffer.peek().unwrap(), "a");
        assert_eq!(buffer.pop().unwrap(), "a");
        assert_eq!(buffer.pop().unwrap(), "b");

        assert_eq!(buffer.is_empty(), true);
        assert_eq!(buffer.is_released(), true);
        assert!(matches!(buffer.peek(), Err(BufferError::Exhausted)));
        assert!(matches!(buffer.pop(), Err(BufferError::Exhausted)));
    }

    #[test]
    fn test_empty_partition_buffer() {
        let buffer = LineBuffer::from_partition(Vec::<String>::new()).unwrap();

        assert_eq!(buffer.is_empty(), true);
        assert_eq!(buffer.is_released(), true);
    }

    #[rstest]
    fn test_file_buffer(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("sorted.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"apple\r\nbanana\ncherry\n").unwrap();
        drop(file);

        let mut buffer = LineBuffer::open(&path, Some(4)).unwrap();
        let mut lines = Vec::new();
        while !buffer.is_empty() {
            lines.push(buffer.pop().unwrap());
        }

        assert_eq!(lines, vec!["apple", "banana", "cherry"]);
        assert_eq!(buffer.is_released(), true);
    }

    #[rstest]
    fn test_file_buffer_missing(tmp_dir: tempfile::TempDir) {
        let result = LineBuffer::open(&tmp_dir.path().join("missing.txt"), None);

        assert!(matches!(result, Err(BufferError::IO(_))));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut buffer = LineBuffer::from_partition(vec!["x".to_string(), "y".to_string()]).unwrap();

        buffer.release();
        assert_eq!(buffer.is_released(), true);
        assert_eq!(buffer.is_empty(), true);

        buffer.release();
        assert_eq!(buffer.is_released(), true);
    }

    #[test]
    fn test_source_error_releases_buffer() {
        let source = vec![
            Ok("a".to_string()),
            Err(io::Error::new(ErrorKind::Other, "test error")),
        ];
        let mut buffer = LineBuffer::new(source.into_iter()).unwrap();

        assert!(matches!(buffer.pop(), Err(BufferError::IO(_))));
        assert_eq!(buffer.is_released(), true);
        assert_eq!(buffer.is_empty(), true);
    }
}
