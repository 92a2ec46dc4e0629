//! Command-line surface and its validation into [`Runopts`].

use crate::{
    align::geometry::Edges,
    error::{Error, Result},
    io::writers::BlastFormat,
};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ribosieve", version, about = "Filter nucleotide reads against ribosomal RNA reference indexes.")]
#[command(rename_all = "snake_case")]
pub struct Cli {
    /// Reference FASTA and index base path pairs, as `fasta,index`; separate
    /// multiple databases with `:`.
    #[arg(long = "ref", value_name = "FASTA,INDEX", required = true, value_delimiter = ':')]
    pub refs: Vec<String>,

    /// Reads file (FASTA or FASTQ; `.gz` detected by extension).
    #[arg(long)]
    pub reads: Option<PathBuf>,

    /// Reads file, forced through the gzip decoder.
    #[arg(long = "reads-gz")]
    pub reads_gz: Option<PathBuf>,

    /// Base path for output over aligned reads.
    #[arg(long)]
    pub aligned: Option<PathBuf>,

    /// Base path for output over reads that did not align.
    #[arg(long)]
    pub other: Option<PathBuf>,

    /// Write aligned/other reads in their input FASTA/FASTQ format.
    #[arg(long)]
    pub fastx: bool,

    /// Write SAM output.
    #[arg(long)]
    pub sam: bool,

    /// Include @SQ lines in the SAM header.
    #[arg(long = "SQ")]
    pub sq: bool,

    /// Write BLAST-like output: `0` (pairwise) or `1` (tabular), optionally
    /// with `cigar`, `qcov`, `qstrand` columns.
    #[arg(long, value_name = "FMT")]
    pub blast: Option<String>,

    /// Write a run statistics log.
    #[arg(long)]
    pub log: bool,

    /// Report the first INT alignments per read (0 = all).
    #[arg(long, value_name = "INT")]
    pub num_alignments: Option<i32>,

    /// Keep the INT highest-scoring alignments per read.
    #[arg(long, value_name = "INT")]
    pub best: Option<u32>,

    /// Search the references with the INT longest seed chains.
    #[arg(long, value_name = "INT")]
    pub min_lis: Option<i32>,

    /// Report unaligned reads too (null SAM/BLAST rows).
    #[arg(long)]
    pub print_all_reads: bool,

    /// Route both mates of a pair to the aligned output if either aligns.
    #[arg(long)]
    pub paired_in: bool,

    /// Route both mates of a pair to the other output if either fails.
    #[arg(long)]
    pub paired_out: bool,

    /// Match reward.
    #[arg(long = "match", value_name = "INT", default_value_t = 2, allow_hyphen_values = true)]
    pub match_score: i8,

    /// Mismatch penalty (negative).
    #[arg(long, value_name = "INT", default_value_t = -3, allow_hyphen_values = true)]
    pub mismatch: i8,

    /// Gap open penalty (positive).
    #[arg(long, value_name = "INT", default_value_t = 5)]
    pub gap_open: u8,

    /// Gap extension penalty (positive).
    #[arg(long, value_name = "INT", default_value_t = 2)]
    pub gap_ext: u8,

    /// Score for pairings involving N (negative).
    #[arg(short = 'N', value_name = "INT", default_value_t = -3, allow_hyphen_values = true)]
    pub score_n: i8,

    /// Search the forward strand only.
    #[arg(short = 'F')]
    pub forward_only: bool,

    /// Search the reverse-complement strand only.
    #[arg(short = 'R')]
    pub reverse_only: bool,

    /// Number of processing threads.
    #[arg(short = 'a', value_name = "INT")]
    pub threads: Option<usize>,

    /// E-value threshold.
    #[arg(short = 'e', value_name = "DOUBLE", default_value_t = 1.0)]
    pub evalue: f64,

    /// Reads buffer budget in megabytes (advisory with the streaming reader).
    #[arg(short = 'm', value_name = "MB", default_value_t = 3072)]
    pub map_mb: usize,

    /// Minimum %identity (as a fraction) to count an alignment toward the
    /// identity/coverage totals.
    #[arg(long, value_name = "DOUBLE", default_value_t = 0.97)]
    pub id: f64,

    /// Minimum %query coverage (as a fraction).
    #[arg(long, value_name = "DOUBLE", default_value_t = 0.97)]
    pub coverage: f64,

    /// Write reads failing %id/%coverage (but passing E-value) for de novo
    /// clustering.
    #[arg(long)]
    pub de_novo_otu: bool,

    /// Write the OTU map.
    #[arg(long)]
    pub otu_map: bool,

    /// Seed-search interval lengths for the three passes, e.g. `18,9,3`.
    #[arg(long, value_name = "INT,INT,INT", value_delimiter = ',')]
    pub passes: Option<Vec<i64>>,

    /// Reference padding around the seed chain; append `%` for a percentage
    /// of the read length.
    #[arg(long, value_name = "INT[%]")]
    pub edges: Option<String>,

    /// Number of seed hits required before chaining a reference.
    #[arg(long, value_name = "INT", default_value_t = 2)]
    pub num_seeds: u32,

    /// Keep searching a bucket after an exact seed match.
    #[arg(long)]
    pub full_search: bool,

    /// Append the process id to every output name.
    #[arg(long)]
    pub pid: bool,

    /// Re-align every sub-chain of a reference window instead of assuming
    /// equal-scoring alignments.
    #[arg(long)]
    pub no_chain_shortcut: bool,

    /// Gumbel lambda for the E-value model.
    #[arg(long, value_name = "DOUBLE", default_value_t = 0.6166)]
    pub lambda: f64,

    /// Gumbel K for the E-value model.
    #[arg(long, value_name = "DOUBLE", default_value_t = 0.3717)]
    pub gumbel_k: f64,
}

/// How alignments are retained and reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportMode {
    /// Keep the N best-scoring alignments (0 = unbounded).
    Best { num_best: u32 },
    /// Report the first N accepted alignments in discovery order (0 = all).
    All { cap: i32 },
}

/// One `--ref` entry.
#[derive(Clone, Debug)]
pub struct RefPair {
    pub fasta: PathBuf,
    pub index: PathBuf,
}

/// Validated run configuration threaded through the pipeline.
#[derive(Clone, Debug)]
pub struct Runopts {
    pub refs:            Vec<RefPair>,
    pub reads:           PathBuf,
    pub reads_gz:        bool,
    pub aligned:         Option<PathBuf>,
    pub other:           Option<PathBuf>,
    pub fastx:           bool,
    pub sam:             bool,
    pub sam_sq:          bool,
    pub blast:           Option<BlastFormat>,
    pub log:             bool,
    pub mode:            ReportMode,
    pub min_lis:         i32,
    pub print_all_reads: bool,
    pub paired_in:       bool,
    pub paired_out:      bool,
    pub match_score:     i8,
    pub mismatch:        i8,
    pub gap_open:        u8,
    pub gap_ext:         u8,
    pub score_n:         i8,
    pub forward:         bool,
    pub reverse:         bool,
    pub threads:         usize,
    pub evalue:          f64,
    pub map_mb:          usize,
    pub id_ratio:        f64,
    pub cov_ratio:       f64,
    pub de_novo_otu:     bool,
    pub otu_map:         bool,
    pub passes:          Option<[u32; 3]>,
    pub edges:           Edges,
    pub seed_hits:       u32,
    pub full_search:     bool,
    pub pid:             Option<u32>,
    pub chain_shortcut:  bool,
    pub lambda:          f64,
    pub gumbel_k:        f64,
}

impl Runopts {
    /// Validates the raw CLI into run options. Nonsensical flag combinations
    /// are rejected here, before any file is touched.
    pub fn from_cli(cli: Cli) -> Result<Runopts> {
        let refs = cli
            .refs
            .iter()
            .map(|entry| {
                let (fasta, index) = entry
                    .split_once(',')
                    .ok_or_else(|| Error::Usage(format!("--ref entry {entry:?} is not of the form fasta,index")))?;
                Ok(RefPair {
                    fasta: PathBuf::from(fasta),
                    index: PathBuf::from(index),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (reads, reads_gz) = match (cli.reads, cli.reads_gz) {
            (Some(_), Some(_)) => return Err(Error::Usage("--reads and --reads-gz are mutually exclusive".into())),
            (Some(path), None) => {
                let gz = crate::io::is_gz(&path);
                (path, gz)
            }
            (None, Some(path)) => (path, true),
            (None, None) => return Err(Error::Usage("one of --reads or --reads-gz is required".into())),
        };

        if cli.best.is_some() && cli.num_alignments.is_some() {
            return Err(Error::Usage("--best and --num_alignments are mutually exclusive".into()));
        }
        if cli.paired_in && cli.paired_out {
            return Err(Error::Usage("--paired_in and --paired_out are mutually exclusive".into()));
        }
        if cli.forward_only && cli.reverse_only {
            return Err(Error::Usage("-F and -R are mutually exclusive; omit both to search both strands".into()));
        }

        let blast = cli.blast.as_deref().map(BlastFormat::parse).transpose()?;
        let has_output = cli.fastx || cli.sam || blast.is_some();

        let mode = match cli.num_alignments {
            Some(cap) => {
                if cap < 0 {
                    return Err(Error::Usage("--num_alignments must be non-negative".into()));
                }
                if !has_output {
                    return Err(Error::Usage(
                        "--num_alignments requires an output format (--fastx, --sam or --blast)".into(),
                    ));
                }
                if cli.otu_map {
                    return Err(Error::Usage(
                        "--otu_map requires best-alignment mode, not --num_alignments".into(),
                    ));
                }
                ReportMode::All { cap }
            }
            None => ReportMode::Best {
                num_best: cli.best.unwrap_or(1),
            },
        };

        if (cli.fastx || cli.sam || blast.is_some() || cli.log || cli.otu_map || cli.de_novo_otu) && cli.aligned.is_none()
        {
            return Err(Error::Usage("output formats require --aligned <base>".into()));
        }

        let passes = match cli.passes {
            None => None,
            Some(values) => {
                if values.len() != 3 {
                    return Err(Error::Usage("--passes takes exactly three interval lengths".into()));
                }
                if values.iter().any(|&v| v <= 0) {
                    None // fall back to the per-index defaults
                } else {
                    Some([values[0] as u32, values[1] as u32, values[2] as u32])
                }
            }
        };

        let edges = match cli.edges.as_deref() {
            None => Edges::Absolute(4),
            Some(raw) => {
                let (digits, percent) = match raw.strip_suffix('%') {
                    Some(digits) => (digits, true),
                    None => (raw, false),
                };
                let value: u32 = digits
                    .parse()
                    .map_err(|_| Error::Usage(format!("--edges value {raw:?} is not an integer")))?;
                if percent { Edges::Percent(value) } else { Edges::Absolute(value) }
            }
        };

        if cli.num_seeds == 0 {
            return Err(Error::Usage("--num_seeds must be at least 1".into()));
        }

        Ok(Runopts {
            refs,
            reads,
            reads_gz,
            aligned: cli.aligned,
            other: cli.other,
            fastx: cli.fastx,
            sam: cli.sam,
            sam_sq: cli.sq,
            blast,
            log: cli.log,
            mode,
            min_lis: cli.min_lis.unwrap_or(2),
            print_all_reads: cli.print_all_reads,
            paired_in: cli.paired_in,
            paired_out: cli.paired_out,
            match_score: cli.match_score,
            mismatch: cli.mismatch,
            gap_open: cli.gap_open,
            gap_ext: cli.gap_ext,
            score_n: cli.score_n,
            forward: !cli.reverse_only,
            reverse: !cli.forward_only,
            threads: cli.threads.unwrap_or_else(num_cpus::get).max(1),
            evalue: cli.evalue,
            map_mb: cli.map_mb,
            id_ratio: cli.id,
            cov_ratio: cli.coverage,
            de_novo_otu: cli.de_novo_otu,
            otu_map: cli.otu_map,
            passes,
            edges,
            seed_hits: cli.num_seeds,
            full_search: cli.full_search,
            pid: cli.pid.then(std::process::id),
            chain_shortcut: !cli.no_chain_shortcut,
            lambda: cli.lambda,
            gumbel_k: cli.gumbel_k,
        })
    }

    /// Skip lengths for the three passes on one index.
    #[inline]
    pub fn skiplengths(&self, lnwin: u32) -> [u32; 3] {
        self.passes.unwrap_or([lnwin, lnwin / 2, 3])
    }

    #[inline]
    pub fn num_best_hits(&self) -> u32 {
        match self.mode {
            ReportMode::Best { num_best } => num_best,
            ReportMode::All { .. } => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Result<Runopts> {
        let mut full = vec!["ribosieve"];
        full.extend_from_slice(args);
        Runopts::from_cli(Cli::try_parse_from(full).unwrap())
    }

    #[test]
    fn minimal_invocation() {
        let opts = parse(&["--ref", "db.fasta,db", "--reads", "reads.fq"]).unwrap();
        assert_eq!(opts.refs.len(), 1);
        assert_eq!(opts.refs[0].index, PathBuf::from("db"));
        assert!(opts.forward && opts.reverse);
        assert_eq!(opts.mode, ReportMode::Best { num_best: 1 });
        assert_eq!(opts.min_lis, 2);
        assert_eq!(opts.skiplengths(18), [18, 9, 3]);
    }

    #[test]
    fn multiple_refs_split_on_colon() {
        let opts = parse(&["--ref", "a.fasta,a:b.fasta,b", "--reads", "r.fq"]).unwrap();
        assert_eq!(opts.refs.len(), 2);
        assert_eq!(opts.refs[1].fasta, PathBuf::from("b.fasta"));
    }

    #[test]
    fn exclusive_pairs_are_rejected() {
        assert!(
            parse(&[
                "--ref",
                "a,a",
                "--reads",
                "r",
                "--best",
                "2",
                "--num_alignments",
                "3",
                "--sam",
                "--aligned",
                "o"
            ])
            .is_err()
        );
        assert!(parse(&["--ref", "a,a", "--reads", "r", "--paired_in", "--paired_out"]).is_err());
        assert!(parse(&["--ref", "a,a", "--reads", "r", "-F", "-R"]).is_err());
    }

    #[test]
    fn num_alignments_needs_an_output_format() {
        assert!(parse(&["--ref", "a,a", "--reads", "r", "--num_alignments", "1"]).is_err());
        assert!(parse(&["--ref", "a,a", "--reads", "r", "--num_alignments", "1", "--sam", "--aligned", "out"]).is_ok());
    }

    #[test]
    fn otu_map_conflicts_with_num_alignments() {
        assert!(
            parse(&["--ref", "a,a", "--reads", "r", "--num_alignments", "1", "--sam", "--aligned", "o", "--otu_map"])
                .is_err()
        );
    }

    #[test]
    fn edges_accepts_percent() {
        let opts = parse(&["--ref", "a,a", "--reads", "r", "--edges", "8%"]).unwrap();
        assert!(matches!(opts.edges, Edges::Percent(8)));
        let opts = parse(&["--ref", "a,a", "--reads", "r", "--edges", "6"]).unwrap();
        assert!(matches!(opts.edges, Edges::Absolute(6)));
    }

    #[test]
    fn non_positive_passes_fall_back_to_defaults() {
        let opts = parse(&["--ref", "a,a", "--reads", "r", "--passes", "18,0,3"]).unwrap();
        assert!(opts.passes.is_none());
        assert_eq!(opts.skiplengths(14), [14, 7, 3]);
    }

    #[test]
    fn strand_flags() {
        let opts = parse(&["--ref", "a,a", "--reads", "r", "-F"]).unwrap();
        assert!(opts.forward && !opts.reverse);
        let opts = parse(&["--ref", "a,a", "--reads", "r", "-R"]).unwrap();
        assert!(!opts.forward && opts.reverse);
    }
}
