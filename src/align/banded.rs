//! Banded Smith-Waterman over the region located by the striped passes,
//! reconstructing the CIGAR by traceback.
//!
//! The band starts at `|refLen - readLen| + 1` and doubles until the banded
//! score reaches the striped score. Direction entries live in a
//! `(2*band + 1) x readLen x 3` cube; growth of that cube beyond the signed
//! 32-bit bound is a fatal error.

use crate::{
    align::{
        accumulator::{CIGAR_DEL, CIGAR_INS, CIGAR_MATCH, cigar_pack},
        matrix::ScoringMatrix,
    },
    error::{Error, Result},
};

#[inline]
fn band_col(band: i32, i: i32, j: i32) -> usize {
    let x = (i - band).max(0);
    (j - x + 1) as usize
}

#[inline]
fn band_dir(band: i32, i: i32, j: i32, plane: i32) -> usize {
    let x = (i - band).max(0);
    ((j - x) * 3 + plane) as usize
}

/// Fills the banded matrix and walks the traceback.
///
/// `refseq` and `read` are the exact alignment region (begin..=end on both
/// axes); `score` is the striped score the band must reproduce.
///
/// ## Errors
///
/// [`Error::BandedOverflow`] when the direction cube would exceed the signed
/// 32-bit bound; [`Error::TracebackDiverged`] when the recorded directions do
/// not reach the origin (an internal inconsistency).
pub fn banded_sw(
    refseq: &[u8], read: &[u8], score: u32, gap_open: u8, gap_ext: u8, band_width: i32, mat: &ScoringMatrix,
) -> Result<Vec<u32>> {
    let ref_len = refseq.len() as i32;
    let read_len = read.len() as i32;
    let go = gap_open as i32;
    let ge = gap_ext as i32;

    let mut band = band_width;
    let mut max = 0i32;
    let mut direction: Vec<i8> = Vec::new();
    let mut width_d;

    loop {
        let width = band * 2 + 3;
        width_d = band * 2 + 1;

        let cube = width_d as i64 * read_len as i64 * 3;
        if cube >= i32::MAX as i64 {
            return Err(Error::BandedOverflow);
        }
        direction.clear();
        direction.resize(cube as usize, 0);

        let mut h_b = vec![0i32; width as usize];
        let mut e_b = vec![0i32; width as usize];
        let mut h_c = vec![0i32; width as usize];

        for i in 0..read_len {
            let beg = (i - band).max(0);
            let end = (i + band).min(ref_len - 1);
            let edge = (end + 1).min(width - 1);
            let mut f = 0i32;
            h_b[0] = 0;
            e_b[0] = 0;
            h_b[edge as usize] = 0;
            e_b[edge as usize] = 0;
            h_c[0] = 0;

            let dir_row = (width_d * i * 3) as usize;
            let mut u = 0usize;

            for j in beg..=end {
                u = band_col(band, i, j);
                let up = band_col(band, i - 1, j);
                let left = band_col(band, i, j - 1);
                let diag = band_col(band, i - 1, j - 1);
                let de = dir_row + band_dir(band, i, j, 0);
                let df = dir_row + band_dir(band, i, j, 1);
                let dh = dir_row + band_dir(band, i, j, 2);

                let temp1 = if i == 0 { -go } else { h_b[up] - go };
                let temp2 = if i == 0 { -ge } else { e_b[up] - ge };
                e_b[u] = temp1.max(temp2);
                direction[de] = if temp1 > temp2 { 3 } else { 2 };

                let temp1 = h_c[left] - go;
                let temp2 = f - ge;
                f = temp1.max(temp2);
                direction[df] = if temp1 > temp2 { 5 } else { 4 };

                let e1 = e_b[u].max(0);
                let f1 = f.max(0);
                let temp1 = e1.max(f1);
                let temp2 = h_b[diag] + mat.score(refseq[j as usize], read[i as usize]) as i32;
                h_c[u] = temp1.max(temp2);
                if h_c[u] > max {
                    max = h_c[u];
                }

                direction[dh] = if temp1 <= temp2 {
                    1
                } else if e1 > f1 {
                    direction[de]
                } else {
                    direction[df]
                };
            }
            for j in 1..=u {
                h_b[j] = h_c[j];
            }
        }

        if max >= score as i32 {
            break;
        }
        band *= 2;
    }

    // traceback from the lower-right corner of the region
    let mut i = read_len - 1;
    let mut j = ref_len - 1;
    let mut plane = 2i32;
    let mut run = 0u32;
    let mut op = CIGAR_MATCH;
    let mut prev_op = CIGAR_MATCH;
    let mut cigar: Vec<u32> = Vec::new();

    while i > 0 {
        let idx = (width_d * i * 3) as usize + band_dir(band, i, j, plane);
        match direction[idx] {
            1 => {
                i -= 1;
                j -= 1;
                plane = 2;
                op = CIGAR_MATCH;
            }
            2 => {
                i -= 1;
                plane = 0;
                op = CIGAR_INS;
            }
            3 => {
                i -= 1;
                plane = 2;
                op = CIGAR_INS;
            }
            4 => {
                j -= 1;
                plane = 1;
                op = CIGAR_DEL;
            }
            5 => {
                j -= 1;
                plane = 2;
                op = CIGAR_DEL;
            }
            _ => return Err(Error::TracebackDiverged),
        }
        if op == prev_op {
            run += 1;
        } else {
            cigar.push(cigar_pack(run, prev_op));
            prev_op = op;
            run = 1;
        }
    }

    if op == CIGAR_MATCH {
        cigar.push(cigar_pack(run + 1, CIGAR_MATCH));
    } else {
        cigar.push(cigar_pack(run, op));
        cigar.push(cigar_pack(1, CIGAR_MATCH));
    }

    cigar.reverse();
    Ok(cigar)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::align::accumulator::cigar_unpack;

    fn ops(cigar: &[u32]) -> Vec<(u32, u32)> {
        cigar.iter().map(|&w| cigar_unpack(w)).collect()
    }

    #[test]
    fn exact_region_is_all_match() {
        let mat = ScoringMatrix::new(2, -3, -3);
        let seq = vec![0u8, 1, 2, 3, 0, 1, 2, 3, 0, 1];
        let cigar = banded_sw(&seq, &seq, 20, 5, 2, 1, &mat).unwrap();
        assert_eq!(ops(&cigar), vec![(10, CIGAR_MATCH)]);
    }

    #[test]
    fn substitution_stays_within_a_match_run() {
        let mat = ScoringMatrix::new(2, -3, -3);
        let refseq = vec![0u8, 1, 2, 3, 0, 1, 2, 3, 0, 1];
        let mut read = refseq.clone();
        read[4] = 3;
        let cigar = banded_sw(&refseq, &read, 15, 5, 2, 1, &mat).unwrap();
        assert_eq!(ops(&cigar), vec![(10, CIGAR_MATCH)]);
    }

    #[test]
    fn reference_insertion_becomes_a_deletion_op() {
        let mat = ScoringMatrix::new(2, -3, -3);
        let read = vec![0u8, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3];
        let mut refseq = read.clone();
        refseq.insert(8, 3);
        let cigar = banded_sw(&refseq, &read, 32 - 5, 5, 2, 2, &mat).unwrap();
        let parsed = ops(&cigar);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], (1, CIGAR_DEL));
        assert_eq!(parsed[0].1, CIGAR_MATCH);
        assert_eq!(parsed[2].1, CIGAR_MATCH);
        assert_eq!(parsed[0].0 + parsed[2].0, 16); // every read symbol consumed
    }

    #[test]
    fn read_insertion_becomes_an_insertion_op() {
        let mat = ScoringMatrix::new(2, -3, -3);
        let refseq = vec![0u8, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3];
        let mut read = refseq.clone();
        read.insert(8, 3);
        let cigar = banded_sw(&refseq, &read, 32 - 5, 5, 2, 2, &mat).unwrap();
        let parsed = ops(&cigar);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[1], (1, CIGAR_INS));
        assert_eq!(parsed[0].0 + parsed[2].0, 16); // every reference symbol consumed
    }

    #[test]
    fn band_doubles_until_the_score_is_reproduced() {
        // a 3-symbol reference insertion needs a band wider than the initial 1
        let mat = ScoringMatrix::new(2, -3, -3);
        let read: Vec<u8> = (0..24).map(|i| (i % 4) as u8).collect();
        let mut refseq = read.clone();
        for _ in 0..3 {
            refseq.insert(12, 3);
        }
        let score = 48 - 5 - 2 * 2;
        let cigar = banded_sw(&refseq, &read, score as u32, 5, 2, 1, &mat).unwrap();
        let parsed = ops(&cigar);
        assert!(parsed.contains(&(3, CIGAR_DEL)));
    }
}
