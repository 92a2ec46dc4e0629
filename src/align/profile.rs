//! Query profiles for the striped Smith-Waterman kernels.
//!
//! The query is rearranged into `alphabet x seg_len` lane vectors so the
//! inner loop reads one vector per segment instead of gathering per-symbol
//! scores. The byte profile carries a bias that shifts the weight matrix
//! into the unsigned range; the word profile is unbiased.

use crate::align::matrix::{ALPHABET, ScoringMatrix};

pub const BYTE_LANES: usize = 16;
pub const WORD_LANES: usize = 8;

/// Lane-striped profiles over one query slice. The word profile is only
/// materialized when the byte pass saturates.
pub struct Profile<'a> {
    pub read: &'a [u8],
    pub mat:  &'a ScoringMatrix,
    pub bias: u8,
    byte:     Vec<[u8; BYTE_LANES]>,
    word:     Option<Vec<[i16; WORD_LANES]>>,
}

impl<'a> Profile<'a> {
    pub fn new(read: &'a [u8], mat: &'a ScoringMatrix) -> Profile<'a> {
        let bias = mat.bias();
        Profile {
            read,
            mat,
            bias,
            byte: byte_profile(read, mat, bias),
            word: None,
        }
    }

    #[inline]
    pub fn seg_byte(&self) -> usize {
        self.read.len().div_ceil(BYTE_LANES)
    }

    #[inline]
    pub fn seg_word(&self) -> usize {
        self.read.len().div_ceil(WORD_LANES)
    }

    #[inline]
    pub fn byte_rows(&self) -> &[[u8; BYTE_LANES]] {
        &self.byte
    }

    /// The word profile, built on first use.
    pub fn word_rows(&mut self) -> &[[i16; WORD_LANES]] {
        if self.word.is_none() {
            self.word = Some(word_profile(self.read, self.mat));
        }
        self.word.as_deref().unwrap()
    }
}

/// Builds a byte profile for an arbitrary (possibly reversed) query slice.
pub fn byte_profile(read: &[u8], mat: &ScoringMatrix, bias: u8) -> Vec<[u8; BYTE_LANES]> {
    let seg = read.len().div_ceil(BYTE_LANES);
    let mut rows = vec![[0u8; BYTE_LANES]; ALPHABET * seg];
    for nt in 0..ALPHABET {
        for i in 0..seg {
            let row = &mut rows[nt * seg + i];
            for (lane, slot) in row.iter_mut().enumerate() {
                let j = i + lane * seg;
                *slot = if j >= read.len() {
                    bias
                } else {
                    (mat.score(nt as u8, read[j]) as i16 + bias as i16) as u8
                };
            }
        }
    }
    rows
}

/// Builds a word profile for an arbitrary (possibly reversed) query slice.
pub fn word_profile(read: &[u8], mat: &ScoringMatrix) -> Vec<[i16; WORD_LANES]> {
    let seg = read.len().div_ceil(WORD_LANES);
    let mut rows = vec![[0i16; WORD_LANES]; ALPHABET * seg];
    for nt in 0..ALPHABET {
        for i in 0..seg {
            let row = &mut rows[nt * seg + i];
            for (lane, slot) in row.iter_mut().enumerate() {
                let j = i + lane * seg;
                *slot = if j >= read.len() {
                    0
                } else {
                    mat.score(nt as u8, read[j]) as i16
                };
            }
        }
    }
    rows
}
