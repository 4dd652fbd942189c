//! Input line splitting.

use std::io::{self, prelude::*};

/// Iterator over the lines of a reader, ending a line at `\n`, `\r\n` or a lone `\r`.
///
/// Terminators are not included in the returned lines. A final line without a terminator is
/// still returned, an input ending with a terminator does not produce a trailing empty line.
pub struct UniversalLines<R> {
    reader: R,
    /// Previous line ended with `\r`, so a leading `\n` belongs to its terminator.
    skip_lf: bool,
}

impl<R: BufRead> UniversalLines<R> {
    pub fn new(reader: R) -> Self {
        UniversalLines { reader, skip_lf: false }
    }

    /// Appends the next line to `line`. Returns `false` if the reader is exhausted.
    fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        let mut found = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Ok(found);
            }

            if self.skip_lf {
                self.skip_lf = false;
                if available[0] == b'\n' {
                    self.reader.consume(1);
                    continue;
                }
            }

            match available.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(idx) => {
                    let ends_with_cr = available[idx] == b'\r';
                    line.extend_from_slice(&available[..idx]);
                    self.skip_lf = ends_with_cr;
                    self.reader.consume(idx + 1);
                    return Ok(true);
                }
                None => {
                    let len = available.len();
                    line.extend_from_slice(available);
                    self.reader.consume(len);
                    found = true;
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for UniversalLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = Vec::new();

        match self.read_line(&mut line) {
            Ok(false) => None,
            Ok(true) => Some(String::from_utf8(line).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))),
            Err(err) => Some(Err(err)),
        }
    }
}
