//! A reader over either FASTA or FASTQ data, determined automatically from
//! the first non-whitespace byte of the stream.

use crate::read::RecordFormat;
use std::io::{BufRead, ErrorKind};

/// A record of either format. Quality is present only for FASTQ input.
pub struct FastX {
    pub header:   String,
    pub sequence: Vec<u8>,
    pub quality:  Option<Vec<u8>>,
}

/// Streaming FASTA/FASTQ reader.
#[derive(Debug)]
pub struct FastXReader<R: BufRead> {
    reader: R,
    format: RecordFormat,
    /// Pending FASTA header consumed while scanning the previous record.
    pending: Option<String>,
    line:    String,
}

impl<R: BufRead> FastXReader<R> {
    /// Creates the reader, consuming leading whitespace to detect the format.
    ///
    /// ## Errors
    ///
    /// Will return `Err` if an IO error occurs, or if the first
    /// non-whitespace byte is neither `>` nor `@`. An empty stream is
    /// reported as [`ErrorKind::UnexpectedEof`].
    pub fn from_readable(mut reader: R) -> std::io::Result<FastXReader<R>> {
        let start = loop {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                break None;
            }
            match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(at) => {
                    let first = buf[at];
                    reader.consume(at);
                    break Some(first);
                }
                None => {
                    let len = buf.len();
                    reader.consume(len);
                }
            }
        };

        let format = match start {
            Some(b'>') => RecordFormat::Fasta,
            Some(b'@') => RecordFormat::Fastq,
            Some(_) => {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidData,
                    "unable to determine whether the input is FASTA or FASTQ",
                ));
            }
            None => return Err(std::io::Error::new(ErrorKind::UnexpectedEof, "empty reads input")),
        };

        Ok(FastXReader {
            reader,
            format,
            pending: None,
            line: String::new(),
        })
    }

    #[inline]
    pub fn format(&self) -> RecordFormat {
        self.format
    }

    fn read_line(&mut self) -> std::io::Result<Option<String>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn next_fasta(&mut self) -> std::io::Result<Option<FastX>> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => loop {
                match self.read_line()? {
                    None => return Ok(None),
                    Some(line) if line.is_empty() => continue,
                    Some(line) => match line.strip_prefix('>') {
                        Some(h) => break h.to_string(),
                        None => {
                            return Err(std::io::Error::new(
                                ErrorKind::InvalidData,
                                format!("expected a FASTA header, found: {line}"),
                            ));
                        }
                    },
                }
            },
        };

        let mut sequence = Vec::new();
        loop {
            match self.read_line()? {
                None => break,
                Some(line) => {
                    if let Some(next) = line.strip_prefix('>') {
                        self.pending = Some(next.to_string());
                        break;
                    }
                    sequence.extend(line.trim().bytes());
                }
            }
        }

        Ok(Some(FastX {
            header,
            sequence,
            quality: None,
        }))
    }

    fn next_fastq(&mut self) -> std::io::Result<Option<FastX>> {
        let header = loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(line) => match line.strip_prefix('@') {
                    Some(h) => break h.to_string(),
                    None => {
                        return Err(std::io::Error::new(
                            ErrorKind::InvalidData,
                            format!("expected a FASTQ header, found: {line}"),
                        ));
                    }
                },
            }
        };

        let truncated =
            || std::io::Error::new(ErrorKind::InvalidData, "FASTQ record truncated (not a multiple of 4 lines)");

        let sequence = self.read_line()?.ok_or_else(truncated)?.trim().as_bytes().to_vec();
        let plus = self.read_line()?.ok_or_else(truncated)?;
        if !plus.starts_with('+') {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("expected the FASTQ separator line, found: {plus}"),
            ));
        }
        let quality = self.read_line()?.ok_or_else(truncated)?.into_bytes();
        if quality.len() != sequence.len() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "FASTQ quality length {} does not match sequence length {}",
                    quality.len(),
                    sequence.len()
                ),
            ));
        }

        Ok(Some(FastX {
            header,
            sequence,
            quality: Some(quality),
        }))
    }
}

impl<R: BufRead> Iterator for FastXReader<R> {
    type Item = std::io::Result<FastX>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.format {
            RecordFormat::Fasta => self.next_fasta(),
            RecordFormat::Fastq => self.next_fastq(),
        };
        record.transpose()
    }
}
