//! Striped Smith-Waterman alignment of a read region against a reference
//! region.
//!
//! [`align`] is the single entry point: a byte-range striped pass scores the
//! region, falling back to the word-range pass on saturation; a reverse pass
//! with the reversed query locates the alignment beginning; a banded pass
//! reconstructs the CIGAR. Callers see only the final region alignment.

pub mod accumulator;
pub mod banded;
pub mod geometry;
pub mod matrix;
pub mod profile;
pub mod striped;

use crate::error::Result;
use profile::{Profile, byte_profile, word_profile};

/// Gap penalties, applied as positive costs.
#[derive(Clone, Copy, Debug)]
pub struct SwParams {
    pub gap_open: u8,
    pub gap_ext:  u8,
}

/// A scored local alignment within one region, in region-relative 0-based
/// coordinates.
#[derive(Clone, Debug)]
pub struct RegionAlignment {
    pub score:      u32,
    pub ref_begin:  i32,
    pub ref_end:    i32,
    pub read_begin: i32,
    pub read_end:   i32,
    pub cigar:      Vec<u32>,
}

/// Aligns the profile's query against `refseq`.
///
/// Returns `None` when no alignment reaches `min_score`; the byte-to-word
/// promotion on saturation is internal.
///
/// ## Errors
///
/// Propagates the banded pass failures (buffer overflow past the signed
/// 32-bit bound, traceback divergence).
pub fn align(profile: &mut Profile<'_>, refseq: &[u8], params: SwParams, min_score: u32) -> Result<Option<RegionAlignment>> {
    let read = profile.read;
    let bias = profile.bias;

    let mut end = striped::sw_byte(
        refseq,
        false,
        read.len(),
        params.gap_open,
        params.gap_ext,
        profile.byte_rows(),
        bias,
        None,
    );
    let mut word = false;
    if end.overflow {
        end = striped::sw_word(
            refseq,
            false,
            read.len(),
            params.gap_open,
            params.gap_ext,
            profile.word_rows(),
            None,
        );
        word = true;
    }

    if end.ref_end < 0 || end.score == 0 || (end.score as u32) < min_score {
        return Ok(None);
    }

    // reverse pass over the reversed query prefix pins the beginning
    let mut rev_read: Vec<u8> = read[..=end.read_end as usize].to_vec();
    rev_read.reverse();
    let fore = &refseq[..=end.ref_end as usize];
    let rev = if word {
        let rows = word_profile(&rev_read, profile.mat);
        striped::sw_word(
            fore,
            true,
            rev_read.len(),
            params.gap_open,
            params.gap_ext,
            &rows,
            Some(end.score),
        )
    } else {
        let rows = byte_profile(&rev_read, profile.mat, bias);
        striped::sw_byte(
            fore,
            true,
            rev_read.len(),
            params.gap_open,
            params.gap_ext,
            &rows,
            bias,
            Some(end.score as u8),
        )
    };

    let ref_begin = rev.ref_end;
    let read_begin = end.read_end - rev.read_end;

    let region_ref = &refseq[ref_begin as usize..=end.ref_end as usize];
    let region_read = &read[read_begin as usize..=end.read_end as usize];
    let band = (region_ref.len() as i32 - region_read.len() as i32).abs() + 1;
    let cigar = banded::banded_sw(
        region_ref,
        region_read,
        end.score as u32,
        params.gap_open,
        params.gap_ext,
        band,
        profile.mat,
    )?;

    Ok(Some(RegionAlignment {
        score: end.score as u32,
        ref_begin,
        ref_end: end.ref_end,
        read_begin,
        read_end: end.read_end,
        cigar,
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::align::{
        accumulator::{CIGAR_MATCH, cigar_unpack},
        matrix::ScoringMatrix,
    };

    const PARAMS: SwParams = SwParams { gap_open: 5, gap_ext: 2 };

    #[test]
    fn full_alignment_with_coordinates_and_cigar() {
        let mat = ScoringMatrix::new(2, -3, -3);
        let read: Vec<u8> = (0..50).map(|i| ((i * 7 + 3) % 4) as u8).collect();
        let mut refseq = vec![3u8; 200];
        refseq[120..170].copy_from_slice(&read);

        let mut profile = Profile::new(&read, &mat);
        let result = align(&mut profile, &refseq, PARAMS, 1).unwrap().unwrap();
        assert_eq!(result.score, 100);
        assert_eq!(result.ref_begin, 120);
        assert_eq!(result.ref_end, 169);
        assert_eq!(result.read_begin, 0);
        assert_eq!(result.read_end, 49);
        assert_eq!(result.cigar.len(), 1);
        assert_eq!(cigar_unpack(result.cigar[0]), (50, CIGAR_MATCH));
    }

    #[test]
    fn score_below_minimum_is_rejected() {
        let mat = ScoringMatrix::new(2, -3, -3);
        let read = vec![0u8, 1, 2, 3];
        let refseq = vec![0u8, 1, 2, 3];
        let mut profile = Profile::new(&read, &mat);
        assert!(align(&mut profile, &refseq, PARAMS, 9).unwrap().is_none());
        assert!(align(&mut profile, &refseq, PARAMS, 8).unwrap().is_some());
    }

    #[test]
    fn saturating_scores_promote_to_word_mode() {
        let mat = ScoringMatrix::new(120, -3, -3);
        let read = vec![1u8; 40];
        let mut refseq = vec![0u8; 80];
        refseq[20..60].copy_from_slice(&read);

        let mut profile = Profile::new(&read, &mat);
        let result = align(&mut profile, &refseq, PARAMS, 1).unwrap().unwrap();
        assert_eq!(result.score, 40 * 120);
        assert_eq!(result.ref_begin, 20);
        assert_eq!(result.ref_end, 59);
    }

    #[test]
    fn mismatch_keeps_single_match_run() {
        let mat = ScoringMatrix::new(2, -3, -3);
        let mut read: Vec<u8> = (0..30).map(|i| (i % 4) as u8).collect();
        let mut refseq = vec![3u8; 100];
        refseq[40..70].copy_from_slice(&read);
        read[15] = (read[15] + 2) % 4;

        let mut profile = Profile::new(&read, &mat);
        let result = align(&mut profile, &refseq, PARAMS, 1).unwrap().unwrap();
        assert_eq!(result.score, 58 - 3);
        assert_eq!(cigar_unpack(result.cigar[0]), (30, CIGAR_MATCH));
    }
}
