//! The `.stats` sidecar written next to every index.
//!
//! Layout (all integers little-endian): the original FASTA size (u64), the
//! FASTA tag (u32 length + bytes), four f64 ACGT background frequencies, the
//! total reference length (u64), the seed window length (u32), the sequence
//! count (u32), the part count (u16), one `(start: u64, size: u64,
//! numseq: u32)` record per part, and finally the `@SQ` table (u32 count,
//! then u32 id length + id bytes + u32 sequence length per entry).

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

/// Location of one index part inside the reference FASTA.
#[derive(Clone, Copy, Debug)]
pub struct PartStats {
    pub start:  u64,
    pub size:   u64,
    pub numseq: u32,
}

/// Parsed contents of one `.stats` sidecar.
pub struct IndexStats {
    pub fasta_size: u64,
    pub fasta_tag:  String,
    pub background: [f64; 4],
    pub full_ref:   u64,
    pub lnwin:      u32,
    pub numseq:     u32,
    pub parts:      Vec<PartStats>,
    pub sq:         Vec<(String, u32)>,
}

impl IndexStats {
    /// Reads `<base>.stats`.
    ///
    /// ## Errors
    ///
    /// IO failures carry the sidecar path; a window length too short to admit
    /// the automaton is reported as an integrity error.
    pub fn load(base: &Path) -> Result<IndexStats> {
        let path = sidecar_path(base);
        let file = File::open(&path).map_err(|e| Error::io(&path, e))?;
        let mut rd = BufReader::new(file);
        Self::read_from(&mut rd, &path).map_err(|e| Error::io(&path, e))
    }

    fn read_from(rd: &mut impl Read, path: &Path) -> std::io::Result<IndexStats> {
        let fasta_size = rd.read_u64::<LittleEndian>()?;

        let tag_len = rd.read_u32::<LittleEndian>()? as usize;
        let mut tag = vec![0u8; tag_len];
        rd.read_exact(&mut tag)?;

        let mut background = [0f64; 4];
        for slot in background.iter_mut() {
            *slot = rd.read_f64::<LittleEndian>()?;
        }

        let full_ref = rd.read_u64::<LittleEndian>()?;
        let lnwin = rd.read_u32::<LittleEndian>()?;
        let numseq = rd.read_u32::<LittleEndian>()?;
        if lnwin < 8 || lnwin % 2 != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unusable seed window length {lnwin} in {}", path.display()),
            ));
        }

        let num_parts = rd.read_u16::<LittleEndian>()?;
        let mut parts = Vec::with_capacity(num_parts as usize);
        for _ in 0..num_parts {
            parts.push(PartStats {
                start:  rd.read_u64::<LittleEndian>()?,
                size:   rd.read_u64::<LittleEndian>()?,
                numseq: rd.read_u32::<LittleEndian>()?,
            });
        }

        let num_sq = rd.read_u32::<LittleEndian>()?;
        let mut sq = Vec::with_capacity(num_sq as usize);
        for _ in 0..num_sq {
            let id_len = rd.read_u32::<LittleEndian>()? as usize;
            let mut id = vec![0u8; id_len];
            rd.read_exact(&mut id)?;
            let seq_len = rd.read_u32::<LittleEndian>()?;
            sq.push((String::from_utf8_lossy(&id).into_owned(), seq_len));
        }

        Ok(IndexStats {
            fasta_size,
            fasta_tag: String::from_utf8_lossy(&tag).into_owned(),
            background,
            full_ref,
            lnwin,
            numseq,
            parts,
            sq,
        })
    }

    /// Verifies that the reference FASTA on disk is the file the index was
    /// built from, by size.
    pub fn check_fasta(&self, fasta: &Path) -> Result<()> {
        let meta = std::fs::metadata(fasta).map_err(|e| Error::io(fasta, e))?;
        if meta.len() != self.fasta_size {
            return Err(Error::IndexIntegrity {
                file:   fasta.to_path_buf(),
                reason: format!(
                    "file size {} does not match the size {} recorded at indexing time (index built from {})",
                    meta.len(),
                    self.fasta_size,
                    self.fasta_tag
                ),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn partialwin(&self) -> u32 {
        self.lnwin / 2
    }
}

pub fn sidecar_path(base: &Path) -> PathBuf {
    extend_path(base, ".stats")
}

pub fn kmer_path(base: &Path, part: u16) -> PathBuf {
    extend_path(base, &format!(".kmer_{part}.dat"))
}

pub fn bursttrie_path(base: &Path, part: u16) -> PathBuf {
    extend_path(base, &format!(".bursttrie_{part}.dat"))
}

pub fn pos_path(base: &Path, part: u16) -> PathBuf {
    extend_path(base, &format!(".pos_{part}.dat"))
}

fn extend_path(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
