//! One read record: the original bytes, the integer-alphabet encoding used
//! for seeding and alignment, and the match state that survives across index
//! parts through the key-value store.

use crate::{
    align::accumulator::{Alignment, AlignmentSet},
    search::traverse::SeedHit,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read as _};

/// Reads (and references) are scored over a five-symbol alphabet; symbol 4
/// is the ambiguous placeholder N.
pub const N_SYMBOL: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordFormat {
    Fasta,
    Fastq,
}

/// A read moving through the pipeline. Owned by exactly one worker at a
/// time; the alignment state inside is never shared.
pub struct Read {
    pub read_num:     usize,
    pub readfile_idx: usize,
    pub header:       String,
    pub sequence:     Vec<u8>,
    pub quality:      Option<Vec<u8>>,
    pub format:       RecordFormat,

    /// Sequence over {0,1,2,3}; ambiguous symbols fold to 0 with their
    /// positions recorded so they can be switched to 4 around alignment.
    pub isequence:    Vec<u8>,
    pub ambiguous_nt: Vec<u32>,
    /// Whether `isequence` currently holds the reverse complement.
    pub reversed:     bool,
    /// Whether the ambiguous positions currently read as 4.
    pub is04:         bool,

    // state persisted across index parts
    pub last_index:     u32,
    pub last_part:      u32,
    pub is_hit:         bool,
    pub is_new_hit:     bool,
    pub is_done:        bool,
    pub hit_denovo:     bool,
    pub max_sw_count:   u16,
    pub num_alignments: i32,
    pub best:           i32,
    pub c_yid_ycov:     u32,
    pub n_yid_ncov:     u32,
    pub n_nid_ycov:     u32,
    pub n_denovo:       u32,
    pub alignments:     AlignmentSet,

    // per-(index, part, strand) scratch, never persisted
    pub hit_seeds:   u32,
    pub id_win_hits: Vec<SeedHit>,
}

/// Reverse complement over the original character alphabet; ambiguous
/// symbols become N. Used when reporting reverse-strand alignments.
pub fn revcomp_chars(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' | b'a' => b'T',
            b'C' | b'c' => b'G',
            b'G' | b'g' => b'C',
            b'T' | b't' | b'U' | b'u' => b'A',
            _ => b'N',
        })
        .collect()
}

#[inline]
fn encode_nt(b: u8) -> Option<u8> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' | b'U' | b'u' => Some(3),
        _ => None,
    }
}

impl Read {
    pub fn new(
        readfile_idx: usize, read_num: usize, header: String, sequence: Vec<u8>, quality: Option<Vec<u8>>,
        format: RecordFormat,
    ) -> Read {
        let mut isequence = Vec::with_capacity(sequence.len());
        let mut ambiguous_nt = Vec::new();
        for (i, &b) in sequence.iter().enumerate() {
            match encode_nt(b) {
                Some(nt) => isequence.push(nt),
                None => {
                    ambiguous_nt.push(i as u32);
                    isequence.push(0);
                }
            }
        }

        Read {
            read_num,
            readfile_idx,
            header,
            sequence,
            quality,
            format,
            isequence,
            ambiguous_nt,
            reversed: false,
            is04: false,
            last_index: 0,
            last_part: 0,
            is_hit: false,
            is_new_hit: false,
            is_done: false,
            hit_denovo: false,
            max_sw_count: 0,
            num_alignments: 0,
            best: 0,
            c_yid_ycov: 0,
            n_yid_ncov: 0,
            n_nid_ycov: 0,
            n_denovo: 0,
            alignments: AlignmentSet::default(),
            hit_seeds: 0,
            id_win_hits: Vec::new(),
        }
    }

    /// Stable global identity: `readfile-number_read-number`.
    #[inline]
    pub fn id(&self) -> String {
        format!("{}_{}", self.readfile_idx, self.read_num)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Reverse-complements `isequence` in place. Applied lazily, at most
    /// once per strand switch. Ambiguous positions stay folded to 0: the
    /// complement of a placeholder is still a placeholder.
    pub fn rev_int_str(&mut self) {
        self.isequence.reverse();
        for nt in self.isequence.iter_mut() {
            if *nt < N_SYMBOL {
                *nt = 3 - *nt;
            }
        }
        let len = self.isequence.len();
        for &p in &self.ambiguous_nt {
            let at = if self.reversed { p as usize } else { len - 1 - p as usize };
            self.isequence[at] = 0;
        }
        self.reversed = !self.reversed;
    }

    /// Switches ambiguous positions to the N symbol for alignment scoring.
    /// Seed search requires the {0..3} alphabet, so [`Self::restore03`] must
    /// run before the next window search.
    pub fn flip_to_04(&mut self) {
        if self.is04 {
            return;
        }
        let len = self.isequence.len();
        for &p in &self.ambiguous_nt {
            let at = if self.reversed { len - 1 - p as usize } else { p as usize };
            self.isequence[at] = N_SYMBOL;
        }
        self.is04 = true;
    }

    /// Restores ambiguous positions to 0 after alignment.
    pub fn restore03(&mut self) {
        if !self.is04 {
            return;
        }
        let len = self.isequence.len();
        for &p in &self.ambiguous_nt {
            let at = if self.reversed { len - 1 - p as usize } else { p as usize };
            self.isequence[at] = 0;
        }
        self.is04 = false;
    }

    /// Resets the per-part scratch before a new search.
    pub fn clear_scratch(&mut self) {
        self.hit_seeds = 0;
        self.id_win_hits.clear();
    }

    /// Whether the accumulator saturated at the maximum attainable score.
    #[inline]
    pub fn saturated(&self, num_best_hits: u32) -> bool {
        num_best_hits != 0 && u32::from(self.max_sw_count) == num_best_hits
    }

    // ---- key-value codec -------------------------------------------------

    /// Serializes the persistent match state. The encoding is deterministic
    /// and version-stamped; it is an internal contract, not a public format.
    pub fn encode_state(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.alignments.len() * 48);
        buf.push(STATE_VERSION);
        buf.write_u32::<LittleEndian>(self.last_index).unwrap();
        buf.write_u32::<LittleEndian>(self.last_part).unwrap();
        let flags = (self.is_hit as u8) | (self.is_done as u8) << 1 | (self.hit_denovo as u8) << 2;
        buf.push(flags);
        buf.write_u16::<LittleEndian>(self.max_sw_count).unwrap();
        buf.write_i32::<LittleEndian>(self.num_alignments).unwrap();
        buf.write_u32::<LittleEndian>(self.c_yid_ycov).unwrap();
        buf.write_u32::<LittleEndian>(self.n_yid_ncov).unwrap();
        buf.write_u32::<LittleEndian>(self.n_nid_ycov).unwrap();
        buf.write_u32::<LittleEndian>(self.n_denovo).unwrap();

        buf.write_u32::<LittleEndian>(self.alignments.max_size).unwrap();
        buf.write_u32::<LittleEndian>(self.alignments.min_index as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.alignments.max_index as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.alignments.len() as u32).unwrap();
        for a in &self.alignments.alignments {
            buf.write_u32::<LittleEndian>(a.score).unwrap();
            buf.write_u32::<LittleEndian>(a.ref_seq).unwrap();
            buf.write_i32::<LittleEndian>(a.ref_begin).unwrap();
            buf.write_i32::<LittleEndian>(a.ref_end).unwrap();
            buf.write_i32::<LittleEndian>(a.read_begin).unwrap();
            buf.write_i32::<LittleEndian>(a.read_end).unwrap();
            buf.write_u32::<LittleEndian>(a.readlen).unwrap();
            buf.push(a.strand as u8);
            buf.write_u16::<LittleEndian>(a.index_num).unwrap();
            buf.write_u16::<LittleEndian>(a.part).unwrap();
            buf.write_u32::<LittleEndian>(a.cigar.len() as u32).unwrap();
            for &word in &a.cigar {
                buf.write_u32::<LittleEndian>(word).unwrap();
            }
        }
        buf
    }

    /// Restores the persistent match state saved by [`Self::encode_state`].
    ///
    /// ## Errors
    ///
    /// Fails on a version mismatch or a truncated value.
    pub fn decode_state(&mut self, value: &[u8]) -> io::Result<()> {
        let mut rd = value;
        let mut version = [0u8; 1];
        rd.read_exact(&mut version)?;
        if version[0] != STATE_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("read state version {} is not {STATE_VERSION}", version[0]),
            ));
        }

        self.last_index = rd.read_u32::<LittleEndian>()?;
        self.last_part = rd.read_u32::<LittleEndian>()?;
        let mut flags = [0u8; 1];
        rd.read_exact(&mut flags)?;
        self.is_hit = flags[0] & 1 != 0;
        self.is_done = flags[0] & 2 != 0;
        self.hit_denovo = flags[0] & 4 != 0;
        self.max_sw_count = rd.read_u16::<LittleEndian>()?;
        self.num_alignments = rd.read_i32::<LittleEndian>()?;
        self.c_yid_ycov = rd.read_u32::<LittleEndian>()?;
        self.n_yid_ncov = rd.read_u32::<LittleEndian>()?;
        self.n_nid_ycov = rd.read_u32::<LittleEndian>()?;
        self.n_denovo = rd.read_u32::<LittleEndian>()?;

        self.alignments.max_size = rd.read_u32::<LittleEndian>()?;
        self.alignments.min_index = rd.read_u32::<LittleEndian>()? as usize;
        self.alignments.max_index = rd.read_u32::<LittleEndian>()? as usize;
        let n = rd.read_u32::<LittleEndian>()? as usize;
        let mut alignments = Vec::with_capacity(n);
        for _ in 0..n {
            let score = rd.read_u32::<LittleEndian>()?;
            let ref_seq = rd.read_u32::<LittleEndian>()?;
            let ref_begin = rd.read_i32::<LittleEndian>()?;
            let ref_end = rd.read_i32::<LittleEndian>()?;
            let read_begin = rd.read_i32::<LittleEndian>()?;
            let read_end = rd.read_i32::<LittleEndian>()?;
            let readlen = rd.read_u32::<LittleEndian>()?;
            let mut strand = [0u8; 1];
            rd.read_exact(&mut strand)?;
            let index_num = rd.read_u16::<LittleEndian>()?;
            let part = rd.read_u16::<LittleEndian>()?;
            let cigar_len = rd.read_u32::<LittleEndian>()? as usize;
            let mut cigar = Vec::with_capacity(cigar_len);
            for _ in 0..cigar_len {
                cigar.push(rd.read_u32::<LittleEndian>()?);
            }
            alignments.push(Alignment {
                score,
                ref_seq,
                ref_begin,
                ref_end,
                read_begin,
                read_end,
                readlen,
                strand: strand[0] != 0,
                index_num,
                part,
                cigar,
            });
        }
        self.alignments.alignments = alignments;
        Ok(())
    }
}

const STATE_VERSION: u8 = 1;

#[cfg(test)]
mod test {
    use super::*;
    use crate::align::accumulator::cigar_pack;

    fn sample() -> Read {
        Read::new(
            0,
            7,
            "r7".into(),
            b"ACGNTACGT".to_vec(),
            Some(b"IIIIIIIII".to_vec()),
            RecordFormat::Fastq,
        )
    }

    #[test]
    fn encoding_folds_ambiguous_to_zero() {
        let read = sample();
        assert_eq!(read.isequence, vec![0, 1, 2, 0, 3, 0, 1, 2, 3]);
        assert_eq!(read.ambiguous_nt, vec![3]);
    }

    #[test]
    fn reverse_complement_round_trips() {
        let mut read = sample();
        let original = read.isequence.clone();
        read.rev_int_str();
        assert!(read.reversed);
        assert_eq!(read.isequence[0], 0); // T -> A at the front
        assert_eq!(read.isequence[9 - 1 - 3], 0); // N stays folded
        read.rev_int_str();
        assert!(!read.reversed);
        assert_eq!(read.isequence, original);
    }

    #[test]
    fn flip34_is_idempotent_and_respects_strand() {
        let mut read = sample();
        read.flip_to_04();
        assert_eq!(read.isequence[3], N_SYMBOL);
        read.flip_to_04();
        read.restore03();
        assert_eq!(read.isequence[3], 0);

        read.rev_int_str();
        read.flip_to_04();
        assert_eq!(read.isequence[9 - 1 - 3], N_SYMBOL);
        read.restore03();
        assert_eq!(read.isequence[9 - 1 - 3], 0);
    }

    #[test]
    fn state_codec_round_trips() {
        let mut read = sample();
        read.is_hit = true;
        read.last_index = 1;
        read.last_part = 3;
        read.max_sw_count = 2;
        read.c_yid_ycov = 5;
        read.alignments.insert(
            Alignment {
                score:      120,
                ref_seq:    9,
                ref_begin:  100,
                ref_end:    149,
                read_begin: 0,
                read_end:   49,
                readlen:    50,
                strand:     false,
                index_num:  1,
                part:       3,
                cigar:      vec![cigar_pack(50, 0)],
            },
            4,
        );

        let blob = read.encode_state();
        let mut restored = sample();
        restored.decode_state(&blob).unwrap();
        assert!(restored.is_hit);
        assert_eq!(restored.last_part, 3);
        assert_eq!(restored.max_sw_count, 2);
        assert_eq!(restored.c_yid_ycov, 5);
        assert_eq!(restored.alignments.len(), 1);
        assert_eq!(restored.alignments.alignments[0], read.alignments.alignments[0]);
        assert_eq!(restored.alignments.max_size, read.alignments.max_size);
    }

    #[test]
    fn stale_version_is_rejected() {
        let read = sample();
        let mut blob = read.encode_state();
        blob[0] = 99;
        let mut restored = sample();
        assert!(restored.decode_state(&blob).is_err());
    }
}
