pub mod fastx;
pub mod writers;

use flate2::read::MultiGzDecoder;
use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

/// Whether a path names a gzip file, by extension.
#[inline]
pub(crate) fn is_gz(path: impl AsRef<Path>) -> bool {
    path.as_ref().extension().is_some_and(|ext| ext == "gz")
}

/// An enum for the different input types: a regular file or a gzip
/// compressed file decoded lazily.
pub(crate) enum ReadFileZip {
    File(File),
    Zipped(MultiGzDecoder<File>),
}

impl Read for ReadFileZip {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadFileZip::File(inner) => inner.read(buf),
            ReadFileZip::Zipped(inner) => inner.read(buf),
        }
    }
}

impl ReadFileZip {
    /// Opens a reads file, decoding gzip when the extension (or the caller)
    /// says so.
    ///
    /// ## Errors
    ///
    /// Any IO errors when opening the file are propagated.
    pub fn open(path: impl AsRef<Path>, force_gz: bool) -> std::io::Result<ReadFileZip> {
        let file = File::open(&path)?;
        if force_gz || is_gz(&path) {
            Ok(ReadFileZip::Zipped(MultiGzDecoder::new(file)))
        } else {
            Ok(ReadFileZip::File(file))
        }
    }

    /// Opens a buffered [`fastx::FastXReader`] over this file.
    ///
    /// ## Errors
    ///
    /// Propagates open failures and format-detection failures.
    pub fn open_fastx(path: impl AsRef<Path>, force_gz: bool) -> std::io::Result<fastx::FastXReader<BufReader<ReadFileZip>>> {
        let inner = ReadFileZip::open(path, force_gz)?;
        fastx::FastXReader::from_readable(BufReader::new(inner))
    }
}
