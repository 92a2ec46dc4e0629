//! On-disk seed index: the 9-mer lookup table, the mini burst-tries, and the
//! seed positions table, loaded per index part and dropped before the next
//! part loads.

pub mod references;
pub mod stats;
pub mod trie;

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};
use trie::Trie;

/// One appearance of a seed in the reference database of the current part.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionEntry {
    pub ref_seq: u32,
    pub ref_pos: u32,
}

/// One half-window hash bucket: how many database positions carry this
/// prefix, and the forward/reverse tries rooted under it.
pub struct LookupEntry {
    pub count:  u32,
    pub trie_f: Option<Box<Trie>>,
    pub trie_r: Option<Box<Trie>>,
}

/// The seed index for one `(index, part)` iteration. Read-only once loaded;
/// shared by all worker threads.
pub struct SeedIndex {
    pub lookup:     Vec<LookupEntry>,
    pub positions:  Vec<Vec<PositionEntry>>,
    pub lnwin:      u32,
    pub partialwin: u32,
}

impl SeedIndex {
    /// Loads the `.kmer`, `.bursttrie` and `.pos` files of one part.
    ///
    /// ## Errors
    ///
    /// IO failures carry the offending path; structural problems (trie flags
    /// out of range, size mismatches, trailing bytes) are integrity errors
    /// naming the file.
    pub fn load(base: &Path, part: u16, lnwin: u32) -> Result<SeedIndex> {
        let kmer_path = stats::kmer_path(base, part);
        let counts = load_kmer_counts(&kmer_path, lnwin)?;

        let trie_path = stats::bursttrie_path(base, part);
        let lookup = load_tries(&trie_path, counts)?;

        let pos_path = stats::pos_path(base, part);
        let positions = load_positions(&pos_path)?;

        Ok(SeedIndex {
            lookup,
            positions,
            lnwin,
            partialwin: lnwin / 2,
        })
    }

    /// Hashes `partialwin` integer symbols into the lookup key: two bits per
    /// symbol, first symbol in the highest pair.
    #[inline]
    pub fn hash_half_window(&self, seq: &[u8]) -> u32 {
        let mut key = 0u32;
        for &nt in &seq[..self.partialwin as usize] {
            key = (key << 2) | nt as u32;
        }
        key
    }
}

fn load_kmer_counts(path: &Path, lnwin: u32) -> Result<Vec<u32>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut rd = BufReader::new(file);
    let entries = 1usize << lnwin;
    let mut counts = vec![0u32; entries];
    rd.read_u32_into::<LittleEndian>(&mut counts)
        .map_err(|e| Error::io(path, e))?;
    let mut probe = [0u8; 1];
    match rd.read(&mut probe) {
        Ok(0) => Ok(counts),
        Ok(_) => Err(Error::IndexIntegrity {
            file:   path.to_path_buf(),
            reason: format!("more than {entries} k-mer counts present"),
        }),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn load_tries(path: &Path, counts: Vec<u32>) -> Result<Vec<LookupEntry>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut rd = BufReader::new(file);

    let mut lookup = Vec::with_capacity(counts.len());
    for count in counts {
        if count == 0 {
            lookup.push(LookupEntry {
                count,
                trie_f: None,
                trie_r: None,
            });
            continue;
        }

        let size_f = rd.read_u32::<LittleEndian>().map_err(|e| Error::io(path, e))? as usize;
        let size_r = rd.read_u32::<LittleEndian>().map_err(|e| Error::io(path, e))? as usize;
        let trie_f = read_trie_blob(&mut rd, size_f, path)?;
        let trie_r = read_trie_blob(&mut rd, size_r, path)?;

        lookup.push(LookupEntry { count, trie_f, trie_r });
    }

    let mut probe = [0u8; 1];
    match rd.read(&mut probe) {
        Ok(0) => Ok(lookup),
        Ok(_) => Err(Error::IndexIntegrity {
            file:   path.to_path_buf(),
            reason: "trailing bytes after the last trie".into(),
        }),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn read_trie_blob(rd: &mut impl Read, size: usize, path: &Path) -> Result<Option<Box<Trie>>> {
    if size == 0 {
        return Ok(None);
    }
    let mut blob = vec![0u8; size];
    rd.read_exact(&mut blob).map_err(|e| Error::io(path, e))?;
    Ok(Some(Box::new(Trie::from_bytes(&blob, path)?)))
}

fn load_positions(path: &Path) -> Result<Vec<Vec<PositionEntry>>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut rd = BufReader::new(file);

    let total = rd.read_u32::<LittleEndian>().map_err(|e| Error::io(path, e))? as usize;
    let mut positions = Vec::with_capacity(total);
    for _ in 0..total {
        let n = rd.read_u32::<LittleEndian>().map_err(|e| Error::io(path, e))? as usize;
        let mut list = Vec::with_capacity(n);
        for _ in 0..n {
            let ref_seq = rd.read_u32::<LittleEndian>().map_err(|e| Error::io(path, e))?;
            let ref_pos = rd.read_u32::<LittleEndian>().map_err(|e| Error::io(path, e))?;
            list.push(PositionEntry { ref_seq, ref_pos });
        }
        positions.push(list);
    }
    Ok(positions)
}
