//! Run orchestration: the (index, part, strand) loop, the bounded
//! reader/worker/writer topology per pass, and the report stage.

pub mod cascade;
pub mod report;
pub mod worker;

use crate::{
    align::matrix::ScoringMatrix,
    args::{ReportMode, Runopts},
    error::{Error, Result},
    evalue::EvalueModel,
    index::{SeedIndex, references::References, stats::IndexStats},
    io::{ReadFileZip, writers},
    kvstore::KvStore,
    read::{Read, RecordFormat},
    stats::ReadStats,
};
use crossbeam_channel::bounded;
use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::Mutex,
    time::Instant,
};
use tracing::{info, warn};

/// Capacity of the read and write queues.
const QUEUE_CAPACITY: usize = 100;

/// Longest read the CIGAR packing can represent.
const MAX_READ_LEN: usize = (1 << 28) - 1;

/// Read-only context shared by the workers of one (index, part, strand)
/// pass.
pub struct PartContext<'a> {
    pub index:     &'a SeedIndex,
    pub refs:      &'a References,
    pub index_num: u16,
    pub part:      u16,
    pub forward:   bool,
    pub min_score: u32,
    pub matrix:    &'a ScoringMatrix,
    pub opts:      &'a Runopts,
}

/// Resolved output paths for the run.
pub struct OutputPaths {
    pub fastx_aligned: Option<PathBuf>,
    pub fastx_other:   Option<PathBuf>,
    pub sam:           Option<PathBuf>,
    pub blast:         Option<PathBuf>,
    pub log:           Option<PathBuf>,
    pub otu:           Option<PathBuf>,
    pub denovo:        Option<PathBuf>,
}

impl OutputPaths {
    fn new(opts: &Runopts, format: RecordFormat) -> OutputPaths {
        let suffix = match format {
            RecordFormat::Fasta => ".fasta",
            RecordFormat::Fastq => ".fastq",
        };
        let base = opts.aligned.as_deref();
        let with = |enabled: bool, suffix: &str| {
            (enabled && base.is_some()).then(|| writers::report_path(base.unwrap(), opts.pid, suffix))
        };

        OutputPaths {
            fastx_aligned: with(opts.fastx, suffix),
            fastx_other:   opts
                .other
                .as_deref()
                .filter(|_| opts.fastx)
                .map(|other| writers::report_path(other, opts.pid, suffix)),
            sam:           with(opts.sam, ".sam"),
            blast:         with(opts.blast.is_some(), ".blast"),
            log:           with(opts.log, ".log"),
            otu:           with(opts.otu_map, "_otus.txt"),
            denovo:        with(opts.de_novo_otu, &format!("_denovo{suffix}")),
        }
    }
}

/// Corpus-wide facts gathered from the initial scan of the reads file.
struct Corpus {
    format: RecordFormat,
}

/// Top-level entry: runs the whole classification and writes every report.
pub fn run(mut opts: Runopts, command_line: &str) -> Result<()> {
    let stats = Mutex::new(ReadStats::new(opts.refs.len()));

    let corpus = scan_reads(&opts, &stats)?;
    let format = corpus.as_ref().map(|c| c.format).unwrap_or(RecordFormat::Fasta);
    let outputs = OutputPaths::new(&opts, format);

    // load every sidecar before touching outputs so usage and integrity
    // errors surface first
    let mut databases = Vec::with_capacity(opts.refs.len());
    for pair in &opts.refs {
        let index_stats = IndexStats::load(&pair.index)?;
        index_stats.check_fasta(&pair.fasta)?;
        databases.push(index_stats);
    }

    demote_odd_paired(&mut opts, &stats);
    create_outputs(&opts, &outputs, &databases, command_line)?;

    if corpus.is_none() {
        finish_empty(&opts, &outputs, "the reads file is empty")?;
        return Ok(());
    }
    if let Some(empty) = databases.iter().position(|d| d.numseq == 0) {
        finish_empty(
            &opts,
            &outputs,
            &format!("reference database {} is empty", opts.refs[empty].fasta.display()),
        )?;
        return Ok(());
    }

    let (number_total_read, full_read) = {
        let s = stats.lock().unwrap();
        (s.number_total_read, s.full_read)
    };
    let models: Vec<EvalueModel> = databases
        .iter()
        .map(|d| {
            EvalueModel::new(
                opts.lambda,
                opts.gumbel_k,
                d.full_ref,
                full_read,
                d.numseq as u64,
                number_total_read,
                d.background,
                opts.evalue,
            )
        })
        .collect();

    let matrix = ScoringMatrix::new(opts.match_score, opts.mismatch, opts.score_n);
    let kv = Mutex::new(KvStore::new());
    info!(
        reads = number_total_read,
        threads = opts.threads,
        buffer_mb = opts.map_mb,
        "starting alignment"
    );

    for (index_num, (pair, index_stats)) in opts.refs.iter().zip(&databases).enumerate() {
        info!(
            database = %pair.index.display(),
            parts = index_stats.parts.len(),
            min_score = models[index_num].min_score(),
            "searching database"
        );
        for (part, part_stats) in index_stats.parts.iter().enumerate() {
            let started = Instant::now();
            let index = SeedIndex::load(&pair.index, part as u16, index_stats.lnwin)?;
            let refs = References::load(&pair.fasta, part_stats)?;
            info!(part, elapsed = ?started.elapsed(), "index part loaded");

            for forward in strand_order(&opts) {
                let ctx = PartContext {
                    index: &index,
                    refs: &refs,
                    index_num: index_num as u16,
                    part: part as u16,
                    forward,
                    min_score: models[index_num].min_score(),
                    matrix: &matrix,
                    opts: &opts,
                };
                part_pass(&opts, &ctx, &kv, &stats)?;
            }
        }
    }

    report::write_reports(&opts, &outputs, &databases, &models, &kv, &stats)?;
    Ok(())
}

fn strand_order(opts: &Runopts) -> Vec<bool> {
    let mut strands = Vec::new();
    if opts.forward {
        strands.push(true);
    }
    if opts.reverse {
        strands.push(false);
    }
    strands
}

/// Streams the reads file once for corpus statistics; `None` when empty.
fn scan_reads(opts: &Runopts, stats: &Mutex<ReadStats>) -> Result<Option<Corpus>> {
    let reader = match ReadFileZip::open_fastx(&opts.reads, opts.reads_gz) {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::io(&opts.reads, e)),
    };
    let format = reader.format();

    let mut totals = stats.lock().unwrap();
    for (num, record) in reader.enumerate() {
        let record = record.map_err(|e| Error::MalformedReads(format!("{}: {e}", opts.reads.display())))?;
        if record.sequence.len() > MAX_READ_LEN {
            return Err(Error::ReadTooLong {
                id:  format!("0_{num}"),
                len: record.sequence.len(),
                max: MAX_READ_LEN,
            });
        }
        totals.number_total_read += 1;
        totals.full_read += record.sequence.len() as u64;
        totals.observe_read_len(record.sequence.len() as u32);
    }
    Ok(Some(Corpus { format }))
}

/// Paired output needs an even read count; demote the flags otherwise.
fn demote_odd_paired(opts: &mut Runopts, stats: &Mutex<ReadStats>) {
    let total = stats.lock().unwrap().number_total_read;
    if total % 2 != 0 && (opts.paired_in || opts.paired_out) {
        warn!(
            total,
            "--paired_in/--paired_out need an even number of reads; reads will be routed individually"
        );
        opts.paired_in = false;
        opts.paired_out = false;
    }
}

/// Creates (truncates) every configured report file and writes the SAM
/// header.
fn create_outputs(
    opts: &Runopts, outputs: &OutputPaths, databases: &[IndexStats], command_line: &str,
) -> Result<()> {
    for path in [
        &outputs.fastx_aligned,
        &outputs.fastx_other,
        &outputs.blast,
        &outputs.log,
        &outputs.otu,
        &outputs.denovo,
    ]
    .into_iter()
    .flatten()
    {
        writers::create_report(path)?;
    }

    if let Some(sam) = &outputs.sam {
        writers::create_report(sam)?;
        let mut out = writers::open_append(sam)?;
        let sq: Vec<(String, u32)> = databases.iter().flat_map(|d| d.sq.iter().cloned()).collect();
        writers::write_sam_header(&mut out, opts.sam_sq.then_some(sq.as_slice()), command_line)
            .map_err(|e| Error::io(sam, e))?;
    }
    Ok(())
}

/// Empty input: the outputs already exist (empty); note the cause in the
/// log and leave success behind.
fn finish_empty(opts: &Runopts, outputs: &OutputPaths, note: &str) -> Result<()> {
    warn!(note, "nothing to align");
    if opts.log
        && let Some(log) = &outputs.log
    {
        let mut out = writers::open_append(log)?;
        use std::io::Write;
        writeln!(out, " Results:\n    {note}; no alignment was attempted").map_err(|e| Error::io(log, e))?;
    }
    Ok(())
}

/// One reader, `opts.threads` workers, one writer over bounded queues.
/// Workers never block each other; the writer owns the KV store for the
/// duration of the pass.
fn part_pass(opts: &Runopts, ctx: &PartContext<'_>, kv: &Mutex<KvStore>, stats: &Mutex<ReadStats>) -> Result<()> {
    let (read_tx, read_rx) = bounded::<Read>(QUEUE_CAPACITY);
    let (write_tx, write_rx) = bounded::<Read>(QUEUE_CAPACITY);

    std::thread::scope(|scope| -> Result<()> {
        let reader = scope.spawn(move || -> Result<()> {
            let mut reader =
                ReadFileZip::open_fastx(&opts.reads, opts.reads_gz).map_err(|e| Error::io(&opts.reads, e))?;
            let format = reader.format();
            for (num, record) in reader.by_ref().enumerate() {
                let record = record.map_err(|e| Error::MalformedReads(format!("{}: {e}", opts.reads.display())))?;
                let mut read = Read::new(0, num, record.header, record.sequence, record.quality, format);
                init_read_state(&mut read, opts, kv)?;
                if read_tx.send(read).is_err() {
                    break; // a worker failed; its error is joined below
                }
            }
            Ok(())
        });

        let mut workers = Vec::with_capacity(opts.threads);
        for _ in 0..opts.threads {
            let read_rx = read_rx.clone();
            let write_tx = write_tx.clone();
            workers.push(scope.spawn(move || -> Result<()> {
                while let Ok(mut read) = read_rx.recv() {
                    worker::process_read(&mut read, ctx, stats)?;
                    if write_tx.send(read).is_err() {
                        break;
                    }
                }
                Ok(())
            }));
        }
        drop(read_rx);
        drop(write_tx);

        let writer = scope.spawn(move || {
            while let Ok(mut read) = write_rx.recv() {
                read.last_index = ctx.index_num as u32;
                read.last_part = ctx.part as u32;
                kv.lock().unwrap().put(read.id(), read.encode_state());
            }
        });

        let mut result = reader.join().unwrap();
        for handle in workers {
            let worker_result = handle.join().unwrap();
            if result.is_ok() {
                result = worker_result;
            }
        }
        writer.join().unwrap();
        result
    })
}

fn init_read_state(read: &mut Read, opts: &Runopts, kv: &Mutex<KvStore>) -> Result<()> {
    read.best = opts.min_lis;
    if let ReportMode::All { cap } = opts.mode {
        read.num_alignments = cap;
    }
    let guard = kv.lock().unwrap();
    if let Some(value) = guard.get(&read.id()) {
        read.decode_state(value)
            .map_err(|e| Error::MalformedReads(format!("stored state for read {}: {e}", read.id())))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{align::geometry::Edges, args::RefPair, io::writers::BlastFormat};
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::{collections::BTreeMap, fs::File, io::Write as _, path::Path};

    const LNWIN: u32 = 8;
    const W: usize = 4;

    fn to_chars(ints: &[u8]) -> String {
        ints.iter().map(|&n| ['A', 'C', 'G', 'T'][n as usize]).collect()
    }

    fn hash(ints: &[u8]) -> u32 {
        ints.iter().take(W).fold(0, |k, &n| (k << 2) | n as u32)
    }

    /// Builds a one-part index on disk whose seeds are the half-windows of
    /// `ref_ints` at the given positions (forward tries only).
    fn write_index(dir: &Path, ref_ints: &[u8], seed_positions: &[usize]) -> (std::path::PathBuf, std::path::PathBuf) {
        let fasta = dir.join("refs.fasta");
        let mut f = File::create(&fasta).unwrap();
        writeln!(f, ">ref1 synthetic").unwrap();
        writeln!(f, "{}", to_chars(ref_ints)).unwrap();
        drop(f);
        let fasta_size = std::fs::metadata(&fasta).unwrap().len();

        let base = dir.join("db");
        let mut stats = Vec::new();
        stats.write_u64::<LittleEndian>(fasta_size).unwrap();
        stats.write_u32::<LittleEndian>(4).unwrap();
        stats.extend_from_slice(b"refs");
        for _ in 0..4 {
            stats.write_f64::<LittleEndian>(0.25).unwrap();
        }
        stats.write_u64::<LittleEndian>(ref_ints.len() as u64).unwrap();
        stats.write_u32::<LittleEndian>(LNWIN).unwrap();
        stats.write_u32::<LittleEndian>(1).unwrap();
        stats.write_u16::<LittleEndian>(1).unwrap();
        stats.write_u64::<LittleEndian>(0).unwrap();
        stats.write_u64::<LittleEndian>(0).unwrap();
        stats.write_u32::<LittleEndian>(1).unwrap();
        stats.write_u32::<LittleEndian>(1).unwrap();
        stats.write_u32::<LittleEndian>(4).unwrap();
        stats.extend_from_slice(b"ref1");
        stats.write_u32::<LittleEndian>(ref_ints.len() as u32).unwrap();
        std::fs::write(crate::index::stats::sidecar_path(&base), stats).unwrap();

        // one trie entry per seed: the slot symbol plus a 4-symbol suffix
        // (half-window continuation and one context symbol)
        let mut counts = vec![0u32; 1 << LNWIN];
        let mut by_key: BTreeMap<u32, BTreeMap<u8, Vec<(u32, u32)>>> = BTreeMap::new();
        for (id, &pos) in seed_positions.iter().enumerate() {
            let key = hash(&ref_ints[pos..]);
            let slot = ref_ints[pos + W];
            let mut suffix = 0u32;
            for (j, &nt) in ref_ints[pos + W + 1..pos + 2 * W + 1].iter().enumerate() {
                suffix |= (nt as u32) << (2 * j);
            }
            counts[key as usize] += 1;
            by_key.entry(key).or_default().entry(slot).or_default().push((suffix, id as u32));
        }

        let mut kmer = Vec::new();
        for &count in &counts {
            kmer.write_u32::<LittleEndian>(count).unwrap();
        }
        std::fs::write(crate::index::stats::kmer_path(&base, 0), kmer).unwrap();

        let mut tries = Vec::new();
        for slots in by_key.values() {
            let mut blob = Vec::new();
            let mut flags = [0u8; 4];
            for &slot in slots.keys() {
                flags[slot as usize] = 2;
            }
            blob.extend_from_slice(&flags);
            for entries in slots.values() {
                blob.write_u32::<LittleEndian>((entries.len() * 8) as u32).unwrap();
                for &(suffix, id) in entries {
                    blob.write_u32::<LittleEndian>(suffix).unwrap();
                    blob.write_u32::<LittleEndian>(id).unwrap();
                }
            }
            tries.write_u32::<LittleEndian>(blob.len() as u32).unwrap();
            tries.write_u32::<LittleEndian>(0).unwrap();
            tries.extend_from_slice(&blob);
        }
        std::fs::write(crate::index::stats::bursttrie_path(&base, 0), tries).unwrap();

        let mut pos_file = Vec::new();
        pos_file.write_u32::<LittleEndian>(seed_positions.len() as u32).unwrap();
        for &pos in seed_positions {
            pos_file.write_u32::<LittleEndian>(1).unwrap();
            pos_file.write_u32::<LittleEndian>(0).unwrap();
            pos_file.write_u32::<LittleEndian>(pos as u32).unwrap();
        }
        std::fs::write(crate::index::stats::pos_path(&base, 0), pos_file).unwrap();

        (fasta, base)
    }

    fn read_ints() -> Vec<u8> {
        vec![
            0, 2, 1, 3, 0, 1, 2, 3, 3, 1, 0, 2, 2, 0, 3, 1, 1, 3, 2, 0, 0, 1, 1, 2, 3, 0, 2, 1, 3, 3, 0, 0, 2, 3, 1,
            2, 0, 3, 1, 1,
        ]
    }

    fn reference_ints() -> Vec<u8> {
        let mut ref_ints = vec![
            1, 0, 3, 2, 1, 1, 0, 0, 3, 3, 2, 2, 1, 0, 1, 2, 3, 0, 3, 1, 2, 2, 3, 0, 1, 3, 0, 2, 3, 3,
        ];
        ref_ints.extend(read_ints());
        for _ in 0..10 {
            ref_ints.extend_from_slice(&[2, 0, 1, 3, 1]);
        }
        ref_ints
    }

    fn base_opts(fasta: std::path::PathBuf, index: std::path::PathBuf, reads: std::path::PathBuf, aligned: std::path::PathBuf) -> Runopts {
        Runopts {
            refs: vec![RefPair { fasta, index }],
            reads,
            reads_gz: false,
            aligned: Some(aligned),
            other: None,
            fastx: false,
            sam: false,
            sam_sq: false,
            blast: None,
            log: false,
            mode: ReportMode::Best { num_best: 1 },
            min_lis: 2,
            print_all_reads: false,
            paired_in: false,
            paired_out: false,
            match_score: 2,
            mismatch: -3,
            gap_open: 5,
            gap_ext: 2,
            score_n: -3,
            forward: true,
            reverse: true,
            threads: 1,
            evalue: 1.0,
            map_mb: 3072,
            id_ratio: 0.97,
            cov_ratio: 0.97,
            de_novo_otu: false,
            otu_map: false,
            passes: None,
            edges: Edges::Absolute(4),
            seed_hits: 2,
            full_search: false,
            pid: None,
            chain_shortcut: true,
            lambda: 0.6166,
            gumbel_k: 0.3717,
        }
    }

    #[test]
    fn exact_read_yields_one_sam_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let ref_ints = reference_ints();
        let windows: Vec<usize> = [0usize, 8, 16, 24, 32].iter().map(|p| p + 30).collect();
        let (fasta, base) = write_index(dir.path(), &ref_ints, &windows);

        let reads = dir.path().join("reads.fasta");
        std::fs::write(&reads, format!(">read1 sample\n{}\n", to_chars(&read_ints()))).unwrap();

        let mut opts = base_opts(fasta, base, reads, dir.path().join("out"));
        opts.sam = true;
        run(opts, "ribosieve test").unwrap();

        let sam = std::fs::read_to_string(dir.path().join("out.sam")).unwrap();
        assert!(sam.starts_with("@HD\tVN:1.0\tSO:unsorted\n"));
        assert!(sam.contains("@PG\tID:ribosieve"));
        let line = sam.lines().find(|l| !l.starts_with('@')).expect("one alignment line");
        let cols: Vec<&str> = line.split('\t').collect();
        assert_eq!(cols[0], "read1");
        assert_eq!(cols[1], "0");
        assert_eq!(cols[2], "ref1");
        assert_eq!(cols[3], "31");
        assert_eq!(cols[5], "40M");
        assert_eq!(cols[9], to_chars(&read_ints()));
        assert_eq!(cols[11], "AS:i:80");
        assert_eq!(cols[12], "NM:i:0");
        assert_eq!(sam.lines().filter(|l| !l.starts_with('@')).count(), 1);
    }

    #[test]
    fn mismatched_read_reports_blast_identity() {
        let dir = tempfile::tempdir().unwrap();
        let ref_ints = reference_ints();
        let windows: Vec<usize> = [0usize, 8, 16, 24, 32].iter().map(|p| p + 30).collect();
        let (fasta, base) = write_index(dir.path(), &ref_ints, &windows);

        let mut read = read_ints();
        read[20] = (read[20] + 1) % 4;
        let reads = dir.path().join("reads.fasta");
        std::fs::write(&reads, format!(">read1\n{}\n", to_chars(&read))).unwrap();

        let mut opts = base_opts(fasta, base, reads, dir.path().join("out"));
        opts.blast = Some(BlastFormat::parse("1").unwrap());
        opts.reverse = false;
        run(opts, "ribosieve test").unwrap();

        let blast = std::fs::read_to_string(dir.path().join("out.blast")).unwrap();
        let cols: Vec<&str> = blast.lines().next().expect("one row").split('\t').collect();
        assert_eq!(cols[0], "read1");
        assert_eq!(cols[1], "ref1");
        assert_eq!(cols[2], "97.500");
        assert_eq!(cols[3], "40");
        assert_eq!(cols[4], "1");
        assert_eq!(cols[5], "0");
        assert_eq!(cols[6], "1");
        assert_eq!(cols[7], "40");
        assert_eq!(cols[8], "31");
        assert_eq!(cols[9], "70");
    }

    #[test]
    fn unaligned_read_goes_to_other_output() {
        let dir = tempfile::tempdir().unwrap();
        let ref_ints = reference_ints();
        let windows: Vec<usize> = [0usize, 8, 16, 24, 32].iter().map(|p| p + 30).collect();
        let (fasta, base) = write_index(dir.path(), &ref_ints, &windows);

        // a read sharing nothing with the indexed seeds
        let stranger: Vec<u8> = (0..40).map(|i| ((i / 3) % 4) as u8).collect();
        let reads = dir.path().join("reads.fasta");
        std::fs::write(&reads, format!(">lone\n{}\n", to_chars(&stranger))).unwrap();

        let mut opts = base_opts(fasta, base, reads, dir.path().join("out"));
        opts.fastx = true;
        opts.other = Some(dir.path().join("rejected"));
        run(opts, "ribosieve test").unwrap();

        let aligned = std::fs::read_to_string(dir.path().join("out.fasta")).unwrap();
        let other = std::fs::read_to_string(dir.path().join("rejected.fasta")).unwrap();
        assert!(aligned.is_empty());
        assert!(other.starts_with(">lone\n"));
    }
}
