//! The reference block for one index part.
//!
//! Each part records a byte window into the reference FASTA; loading a part
//! seeks to that window and converts its sequences into the integer alphabet
//! used for alignment scoring (ambiguous symbols become 4 and score as N).

use crate::{
    error::{Error, Result},
    index::stats::PartStats,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, Seek, SeekFrom},
    path::Path,
};

/// One reference sequence: its header (without the leading `>`) and its
/// integer-alphabet symbols.
pub struct RefSeq {
    pub header: String,
    pub seq:    Vec<u8>,
}

/// All reference sequences of the currently loaded part, indexed by the
/// `ref_seq` field of the positions table.
pub struct References {
    pub seqs: Vec<RefSeq>,
}

#[inline]
fn encode_ref_nt(b: u8) -> u8 {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' | b'U' | b'u' => 3,
        _ => 4,
    }
}

impl References {
    /// Loads the sequences of one part from the reference FASTA.
    ///
    /// ## Errors
    ///
    /// IO failures carry the FASTA path; a part that does not begin at a
    /// FASTA header is an integrity error.
    pub fn load(fasta: &Path, part: &PartStats) -> Result<References> {
        let file = File::open(fasta).map_err(|e| Error::io(fasta, e))?;
        let mut rd = BufReader::new(file);
        rd.seek(SeekFrom::Start(part.start)).map_err(|e| Error::io(fasta, e))?;

        let mut seqs: Vec<RefSeq> = Vec::with_capacity(part.numseq as usize);
        let mut line = String::new();
        loop {
            if seqs.len() == part.numseq as usize {
                break;
            }
            line.clear();
            let n = rd.read_line(&mut line).map_err(|e| Error::io(fasta, e))?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                continue;
            }
            if let Some(header) = trimmed.strip_prefix('>') {
                seqs.push(RefSeq {
                    header: header.to_string(),
                    seq:    Vec::new(),
                });
            } else {
                let Some(current) = seqs.last_mut() else {
                    return Err(Error::IndexIntegrity {
                        file:   fasta.to_path_buf(),
                        reason: format!("part at offset {} does not begin at a FASTA header", part.start),
                    });
                };
                current.seq.extend(trimmed.bytes().map(encode_ref_nt));
            }
        }

        if seqs.len() != part.numseq as usize {
            return Err(Error::IndexIntegrity {
                file:   fasta.to_path_buf(),
                reason: format!("expected {} sequences in part, found {}", part.numseq, seqs.len()),
            });
        }

        Ok(References { seqs })
    }

    #[inline]
    pub fn get(&self, ref_seq: u32) -> &RefSeq {
        &self.seqs[ref_seq as usize]
    }
}
