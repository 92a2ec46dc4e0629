//! Report writers: BLAST-like (pairwise and tabular), SAM, FASTA/FASTQ
//! passthrough, the OTU map, and the run log.
//!
//! All report files are created empty up front and opened in append mode per
//! part so results accumulate across index parts. A single writer thread
//! owns every handle.

use crate::{
    align::accumulator::{CIGAR_INS, CIGAR_MATCH, Alignment, cigar_unpack},
    error::{Error, Result},
    read::{Read, RecordFormat},
};
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

const TO_CHAR: [u8; 5] = *b"ACGTN";

/// Columns requested through `--blast`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlastFormat {
    pub tabular: bool,
    pub cigar:   bool,
    pub qcov:    bool,
    pub qstrand: bool,
}

impl BlastFormat {
    /// Parses the `--blast` format string: a leading `0` (pairwise) or `1`
    /// (tabular), optionally followed by `cigar`, `qcov` and `qstrand`.
    pub fn parse(fmt: &str) -> Result<BlastFormat> {
        let mut out = BlastFormat::default();
        let mut tokens = fmt.split_whitespace();
        match tokens.next() {
            Some("0") => out.tabular = false,
            Some("1") => out.tabular = true,
            other => {
                return Err(Error::Usage(format!(
                    "--blast format must start with 0 or 1, got {:?}",
                    other.unwrap_or("")
                )));
            }
        }
        for token in tokens {
            match token {
                "cigar" => out.cigar = true,
                "qcov" => out.qcov = true,
                "qstrand" => out.qstrand = true,
                other => return Err(Error::Usage(format!("unknown --blast column {other:?}"))),
            }
        }
        if !out.tabular && (out.cigar || out.qcov || out.qstrand) {
            return Err(Error::Usage("optional --blast columns require the tabular format".into()));
        }
        Ok(out)
    }
}

/// Mismatch/gap/identity figures derived from one alignment's CIGAR.
#[derive(Clone, Copy, Debug)]
pub struct AlignmentStats {
    pub matches:    u32,
    pub mismatches: u32,
    pub gaps:       u32,
    pub align_len:  u32,
    pub id_ratio:   f64,
    pub cov_ratio:  f64,
}

/// Walks the CIGAR against the aligned sequences. `read_ints` must be in
/// the orientation that was aligned (reverse-complemented for reverse-strand
/// alignments).
pub fn alignment_stats(a: &Alignment, ref_ints: &[u8], read_ints: &[u8]) -> AlignmentStats {
    let mut matches = 0u32;
    let mut mismatches = 0u32;
    let mut gaps = 0u32;
    let mut qb = a.ref_begin as usize;
    let mut pb = a.read_begin as usize;

    for &word in &a.cigar {
        let (len, op) = cigar_unpack(word);
        match op {
            CIGAR_MATCH => {
                for _ in 0..len {
                    if ref_ints[qb] == read_ints[pb] {
                        matches += 1;
                    } else {
                        mismatches += 1;
                    }
                    qb += 1;
                    pb += 1;
                }
            }
            CIGAR_INS => {
                pb += len as usize;
                gaps += len;
            }
            _ => {
                qb += len as usize;
                gaps += len;
            }
        }
    }

    let align_len = (a.read_end + 1 - a.read_begin).unsigned_abs();
    let total = matches + mismatches + gaps;
    AlignmentStats {
        matches,
        mismatches,
        gaps,
        align_len,
        id_ratio: if total == 0 { 0.0 } else { matches as f64 / total as f64 },
        cov_ratio: if a.readlen == 0 { 0.0 } else { align_len as f64 / a.readlen as f64 },
    }
}

#[inline]
fn first_field(name: &str) -> &str {
    name.split([' ', '\t']).next().unwrap_or(name)
}

/// The soft-clip mask lengths implied by the aligned read span.
#[inline]
fn clip_masks(a: &Alignment) -> (u32, u32) {
    (a.read_begin as u32, a.readlen - a.read_end as u32 - 1)
}

fn write_cigar(out: &mut impl Write, a: &Alignment) -> std::io::Result<()> {
    let (lead, trail) = clip_masks(a);
    if lead != 0 {
        write!(out, "{lead}S")?;
    }
    for &word in &a.cigar {
        let (len, op) = cigar_unpack(word);
        let letter = match op {
            CIGAR_MATCH => 'M',
            CIGAR_INS => 'I',
            _ => 'D',
        };
        write!(out, "{len}{letter}")?;
    }
    if trail != 0 {
        write!(out, "{trail}S")?;
    }
    Ok(())
}

/// One BLAST tabular (m8) row, plus the optional columns of the format.
#[allow(clippy::too_many_arguments)]
pub fn report_blast_tabular(
    out: &mut impl Write, fmt: BlastFormat, a: &Alignment, read_name: &str, ref_name: &str, stats: &AlignmentStats,
    evalue: f64, bitscore: u32,
) -> std::io::Result<()> {
    write!(
        out,
        "{}\t{}\t{:.3}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.3e}\t{}",
        first_field(read_name),
        first_field(ref_name),
        stats.id_ratio * 100.0,
        stats.align_len,
        stats.mismatches,
        stats.gaps,
        a.read_begin + 1,
        a.read_end + 1,
        a.ref_begin + 1,
        a.ref_end + 1,
        evalue,
        bitscore
    )?;
    if fmt.cigar {
        write!(out, "\t")?;
        write_cigar(out, a)?;
    }
    if fmt.qcov {
        write!(out, "\t{:.3}", stats.cov_ratio * 100.0)?;
    }
    if fmt.qstrand {
        write!(out, "\t{}", if a.strand { '+' } else { '-' })?;
    }
    writeln!(out)
}

/// Null tabular row for an unaligned read under `--print_all_reads`.
pub fn report_blast_null(out: &mut impl Write, fmt: BlastFormat, read_name: &str) -> std::io::Result<()> {
    write!(out, "{}\t*\t0\t0\t0\t0\t0\t0\t0\t0\t0\t0", first_field(read_name))?;
    if fmt.cigar {
        write!(out, "\t*")?;
    }
    if fmt.qcov {
        write!(out, "\t0")?;
    }
    if fmt.qstrand {
        write!(out, "\t*")?;
    }
    writeln!(out)
}

/// Human-readable pairwise alignment blocks, 60 columns wide, coordinates
/// 1-based inclusive.
#[allow(clippy::too_many_arguments)]
pub fn report_blast_pairwise(
    out: &mut impl Write, a: &Alignment, read_name: &str, ref_name: &str, read_ints: &[u8], ref_ints: &[u8],
    evalue: f64, bitscore: u32,
) -> std::io::Result<()> {
    writeln!(out, "Sequence ID: {ref_name}")?;
    writeln!(out, "Query ID: {read_name}")?;
    write!(out, "Score: {} bits ({bitscore})\t", a.score)?;
    write!(out, "Expect: {evalue:.3e}\t")?;
    writeln!(out, "strand: {}\n", if a.strand { '+' } else { '-' })?;

    // expand the cigar into three parallel rows, then fold into 60-column
    // blocks with running coordinates
    let mut target = Vec::new();
    let mut middle = Vec::new();
    let mut query = Vec::new();
    let mut q = a.ref_begin as usize;
    let mut p = a.read_begin as usize;
    for &word in &a.cigar {
        let (len, op) = cigar_unpack(word);
        for _ in 0..len {
            match op {
                CIGAR_MATCH => {
                    target.push(TO_CHAR[ref_ints[q] as usize]);
                    query.push(TO_CHAR[read_ints[p] as usize]);
                    middle.push(if ref_ints[q] == read_ints[p] { b'|' } else { b'*' });
                    q += 1;
                    p += 1;
                }
                CIGAR_INS => {
                    target.push(b'-');
                    query.push(TO_CHAR[read_ints[p] as usize]);
                    middle.push(b' ');
                    p += 1;
                }
                _ => {
                    target.push(TO_CHAR[ref_ints[q] as usize]);
                    query.push(b'-');
                    middle.push(b' ');
                    q += 1;
                }
            }
        }
    }

    let mut tpos = a.ref_begin as usize;
    let mut ppos = a.read_begin as usize;
    for start in (0..target.len()).step_by(60) {
        let end = (start + 60).min(target.len());
        let t = &target[start..end];
        let m = &middle[start..end];
        let qch = &query[start..end];
        let t_advance = t.iter().filter(|&&c| c != b'-').count();
        let p_advance = qch.iter().filter(|&&c| c != b'-').count();

        writeln!(
            out,
            "Target: {:>8}    {}    {}",
            tpos + 1,
            String::from_utf8_lossy(t),
            tpos + t_advance
        )?;
        writeln!(out, "{:>20}{}", " ", String::from_utf8_lossy(m))?;
        writeln!(
            out,
            "Query: {:>9}    {}    {}\n",
            ppos + 1,
            String::from_utf8_lossy(qch),
            ppos + p_advance
        )?;
        tpos += t_advance;
        ppos += p_advance;
    }
    Ok(())
}

/// One SAM alignment line. `seq` and `qual` must already be oriented for
/// the aligned strand (sequence reverse-complemented and quality reversed
/// for reverse alignments).
#[allow(clippy::too_many_arguments)]
pub fn report_sam(
    out: &mut impl Write, a: &Alignment, read_name: &str, ref_name: &str, seq: &[u8], qual: Option<&[u8]>,
    edit_distance: u32,
) -> std::io::Result<()> {
    write!(out, "{}\t", first_field(read_name))?;
    write!(out, "{}\t", if a.strand { 0 } else { 16 })?;
    write!(out, "{}\t", first_field(ref_name))?;
    write!(out, "{}\t255\t", a.ref_begin + 1)?;
    write_cigar(out, a)?;
    write!(out, "\t*\t0\t0\t")?;
    out.write_all(seq)?;
    write!(out, "\t")?;
    match qual {
        Some(q) => out.write_all(q)?,
        None => write!(out, "*")?,
    }
    writeln!(out, "\tAS:i:{}\tNM:i:{edit_distance}", a.score)
}

/// Null SAM line (`FLAG = 4`) for an unaligned read under
/// `--print_all_reads`.
pub fn report_sam_null(out: &mut impl Write, read_name: &str) -> std::io::Result<()> {
    writeln!(out, "{}\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*", first_field(read_name))
}

/// SAM header: `@HD`, optional `@SQ` table, `@PG` with the command line.
pub fn write_sam_header(
    out: &mut impl Write, sq: Option<&[(String, u32)]>, command_line: &str,
) -> std::io::Result<()> {
    writeln!(out, "@HD\tVN:1.0\tSO:unsorted")?;
    if let Some(entries) = sq {
        for (name, len) in entries {
            writeln!(out, "@SQ\tSN:{name}\tLN:{len}")?;
        }
    }
    writeln!(out, "@PG\tID:ribosieve\tVN:1.0\tCL:{command_line}")
}

/// Writes one read in its original format, preserving header and quality.
pub fn write_fastx_record(out: &mut impl Write, read: &Read) -> std::io::Result<()> {
    match read.format {
        RecordFormat::Fasta => {
            writeln!(out, ">{}", read.header)?;
            out.write_all(&read.sequence)?;
            writeln!(out)
        }
        RecordFormat::Fastq => {
            writeln!(out, "@{}", read.header)?;
            out.write_all(&read.sequence)?;
            writeln!(out, "\n+")?;
            out.write_all(read.quality.as_deref().unwrap_or(b""))?;
            writeln!(out)
        }
    }
}

/// One line per reference with aligned reads: `ref_id <TAB> read_id ...`.
pub fn write_otu_map(out: &mut impl Write, otu_map: &BTreeMap<String, Vec<String>>) -> std::io::Result<()> {
    for (reference, reads) in otu_map {
        write!(out, "{reference}")?;
        for read in reads {
            write!(out, "\t{read}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Creates (truncates) a report file; subsequent opens append.
pub fn create_report(path: &Path) -> Result<()> {
    File::create(path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

/// Opens a report file for appending.
pub fn open_append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    Ok(BufWriter::new(file))
}

/// Derives an output path from a base, an optional pid tag, and a suffix.
pub fn report_path(base: &Path, pid: Option<u32>, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    if let Some(pid) = pid {
        name.push(format!("_{pid}"));
    }
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::align::accumulator::{CIGAR_DEL, cigar_pack};

    fn alignment() -> Alignment {
        Alignment {
            score:      100,
            ref_seq:    0,
            ref_begin:  1200,
            ref_end:    1249,
            read_begin: 0,
            read_end:   49,
            readlen:    50,
            strand:     true,
            index_num:  0,
            part:       0,
            cigar:      vec![cigar_pack(50, CIGAR_MATCH)],
        }
    }

    #[test]
    fn blast_format_strings() {
        assert_eq!(BlastFormat::parse("1").unwrap().tabular, true);
        let fmt = BlastFormat::parse("1 cigar qcov qstrand").unwrap();
        assert!(fmt.cigar && fmt.qcov && fmt.qstrand);
        assert!(!BlastFormat::parse("0").unwrap().tabular);
        assert!(BlastFormat::parse("2").is_err());
        assert!(BlastFormat::parse("0 cigar").is_err());
        assert!(BlastFormat::parse("1 qlen").is_err());
    }

    #[test]
    fn tabular_row_has_twelve_columns_and_fixed_precision() {
        let a = alignment();
        let stats = AlignmentStats {
            matches:    50,
            mismatches: 0,
            gaps:       0,
            align_len:  50,
            id_ratio:   0.99,
            cov_ratio:  1.0,
        };
        let mut out = Vec::new();
        report_blast_tabular(
            &mut out,
            BlastFormat::parse("1").unwrap(),
            &a,
            "read1 extra",
            "ref1 desc",
            &stats,
            1.5e-20,
            92,
        )
        .unwrap();
        let line = String::from_utf8(out).unwrap();
        let cols: Vec<&str> = line.trim_end().split('\t').collect();
        assert_eq!(cols.len(), 12);
        assert_eq!(cols[0], "read1");
        assert_eq!(cols[1], "ref1");
        assert_eq!(cols[2], "99.000");
        assert_eq!(cols[6], "1");
        assert_eq!(cols[8], "1201");
        assert_eq!(cols[11], "92");
    }

    #[test]
    fn sam_line_fields() {
        let a = alignment();
        let mut out = Vec::new();
        report_sam(&mut out, &a, "read1", "ref1", b"ACGT", Some(b"IIII"), 0).unwrap();
        let line = String::from_utf8(out).unwrap();
        let cols: Vec<&str> = line.trim_end().split('\t').collect();
        assert_eq!(cols[1], "0");
        assert_eq!(cols[3], "1201");
        assert_eq!(cols[4], "255");
        assert_eq!(cols[5], "50M");
        assert_eq!(cols[6], "*");
        assert_eq!(cols[9], "ACGT");
        assert_eq!(cols[11], "AS:i:100");
        assert_eq!(cols[12], "NM:i:0");
    }

    #[test]
    fn sam_soft_clips_surround_the_cigar() {
        let mut a = alignment();
        a.read_begin = 3;
        a.read_end = 44;
        a.cigar = vec![cigar_pack(42, CIGAR_MATCH)];
        let mut out = Vec::new();
        report_sam(&mut out, &a, "r", "s", b"A", None, 1).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.contains("\t3S42M5S\t"));
    }

    #[test]
    fn null_rows() {
        let mut out = Vec::new();
        report_sam_null(&mut out, "r1 tail").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "r1\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n");

        let mut out = Vec::new();
        report_blast_null(&mut out, BlastFormat::parse("1 cigar qcov").unwrap(), "r1").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "r1\t*\t0\t0\t0\t0\t0\t0\t0\t0\t0\t0\t*\t0\n");
    }

    #[test]
    fn stats_walk_counts_mismatches_and_gaps() {
        let mut a = alignment();
        a.ref_begin = 0;
        a.ref_end = 10;
        a.read_begin = 0;
        a.read_end = 9;
        a.readlen = 10;
        a.cigar = vec![cigar_pack(4, CIGAR_MATCH), cigar_pack(1, CIGAR_DEL), cigar_pack(6, CIGAR_MATCH)];
        let refseq = vec![0u8, 1, 2, 3, 3, 0, 1, 2, 3, 0, 1];
        let read = vec![0u8, 1, 2, 3, 0, 1, 2, 3, 0, 2];
        let stats = alignment_stats(&a, &refseq, &read);
        assert_eq!(stats.gaps, 1);
        assert_eq!(stats.mismatches, 1);
        assert_eq!(stats.matches, 9);
        assert_eq!(stats.align_len, 10);
        assert!((stats.cov_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn pairwise_blocks_carry_coordinates() {
        let a = Alignment {
            score:      12,
            ref_seq:    0,
            ref_begin:  2,
            ref_end:    7,
            read_begin: 0,
            read_end:   5,
            readlen:    6,
            strand:     false,
            index_num:  0,
            part:       0,
            cigar:      vec![cigar_pack(6, CIGAR_MATCH)],
        };
        let refseq = vec![3u8, 3, 0, 1, 2, 3, 0, 1];
        let read = vec![0u8, 1, 2, 3, 0, 1];
        let mut out = Vec::new();
        report_blast_pairwise(&mut out, &a, "q", "s", &read, &refseq, 0.5, 10).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("strand: -"));
        // 1-based inclusive coordinates on both rows
        assert!(text.contains("3    ACGTAC    8"));
        assert!(text.contains("1    ACGTAC    6"));
        assert!(text.contains("||||||"));
    }

    #[test]
    fn otu_map_lines_are_tab_joined() {
        let mut map = BTreeMap::new();
        map.insert("refA".to_string(), vec!["r1".to_string(), "r2".to_string()]);
        let mut out = Vec::new();
        write_otu_map(&mut out, &map).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "refA\tr1\tr2\n");
    }

    #[test]
    fn report_paths_compose() {
        let base = PathBuf::from("/tmp/out/aligned");
        assert_eq!(report_path(&base, None, ".sam"), PathBuf::from("/tmp/out/aligned.sam"));
        assert_eq!(
            report_path(&base, Some(42), "_otus.txt"),
            PathBuf::from("/tmp/out/aligned_42_otus.txt")
        );
    }
}
