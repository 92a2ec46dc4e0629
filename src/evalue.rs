//! Gumbel statistics for local alignment scores: the minimum score implied
//! by the E-value threshold, and bitscore / E-value for reported alignments.

/// Gumbel model over one index, corrected for the expected length of a
/// random local alignment.
#[derive(Clone, Debug)]
pub struct EvalueModel {
    lambda:    f64,
    k:         f64,
    full_ref:  f64,
    full_read: f64,
    min_score: u32,
}

impl EvalueModel {
    /// Builds the model for one index.
    ///
    /// `full_ref` is the total reference length recorded in the sidecar,
    /// `full_read` the total read corpus length; both are shrunk by the
    /// expected random-alignment length `ln(K * ref * read) / H`, where `H`
    /// is the Shannon entropy of the reference background distribution.
    pub fn new(
        lambda: f64, k: f64, full_ref: u64, full_read: u64, n_ref_seqs: u64, n_reads: u64, background: [f64; 4],
        evalue_threshold: f64,
    ) -> EvalueModel {
        let entropy: f64 = -background
            .iter()
            .filter(|&&f| f > 0.0)
            .map(|&f| f * f.log2())
            .sum::<f64>();

        let expect_len = ((k * full_ref as f64 * full_read as f64).ln() / entropy) as u64;

        let mut ref_corrected = full_ref;
        if full_ref > expect_len * n_ref_seqs {
            ref_corrected = full_ref - expect_len * n_ref_seqs;
        }
        let read_corrected = full_read.saturating_sub(expect_len * n_reads).max(1);

        let space = k * ref_corrected as f64 * read_corrected as f64;
        let min_score = ((evalue_threshold / space).ln() / -lambda).ceil() as u32;

        EvalueModel {
            lambda,
            k,
            full_ref: ref_corrected as f64,
            full_read: read_corrected as f64,
            min_score,
        }
    }

    /// Minimum Smith-Waterman score an alignment must reach to stay under
    /// the E-value threshold.
    #[inline]
    pub fn min_score(&self) -> u32 {
        self.min_score
    }

    #[inline]
    pub fn bitscore(&self, score: u32) -> u32 {
        ((self.lambda * score as f64 - self.k.ln()) / std::f64::consts::LN_2) as u32
    }

    #[inline]
    pub fn evalue(&self, score: u32) -> f64 {
        self.k * self.full_ref * self.full_read * (-self.lambda * score as f64).exp()
    }
}
