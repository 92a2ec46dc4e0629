//! The report stage: after every part has been searched, re-walk the reads
//! against each part's references to emit BLAST/SAM rows, assemble the OTU
//! map, route reads to the FASTA/FASTQ outputs, and write the log.

use crate::{
    args::Runopts,
    error::{Error, Result},
    evalue::EvalueModel,
    index::{references::References, stats::IndexStats},
    io::{ReadFileZip, writers},
    kvstore::KvStore,
    read::{Read, revcomp_chars},
    stats::ReadStats,
    pipeline::OutputPaths,
};
use std::{
    collections::BTreeMap,
    io::Write,
    path::Path,
    sync::Mutex,
};

pub fn write_reports(
    opts: &Runopts, outputs: &OutputPaths, databases: &[IndexStats], models: &[EvalueModel], kv: &Mutex<KvStore>,
    stats: &Mutex<ReadStats>,
) -> Result<()> {
    let mut otu_map: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (index_num, (pair, index_stats)) in opts.refs.iter().zip(databases).enumerate() {
        for (part, part_stats) in index_stats.parts.iter().enumerate() {
            let refs = References::load(&pair.fasta, part_stats)?;
            report_part(
                opts,
                outputs,
                &models[index_num],
                &refs,
                index_num as u16,
                part as u16,
                kv,
                &mut otu_map,
            )?;
        }
    }

    if let Some(otu) = &outputs.otu {
        let mut out = writers::open_append(otu)?;
        writers::write_otu_map(&mut out, &otu_map).map_err(|e| Error::io(otu, e))?;
        stats.lock().unwrap().otu_total = otu_map.len() as u64;
    }

    final_pass(opts, outputs, kv, stats)?;
    write_log(opts, outputs, stats)?;
    Ok(())
}

/// Emits every stored alignment belonging to `(index_num, part)` and
/// updates the per-read identity/coverage counters.
#[allow(clippy::too_many_arguments)]
fn report_part(
    opts: &Runopts, outputs: &OutputPaths, model: &EvalueModel, refs: &References, index_num: u16, part: u16,
    kv: &Mutex<KvStore>, otu_map: &mut BTreeMap<String, Vec<String>>,
) -> Result<()> {
    let mut sam_out = outputs.sam.as_deref().map(writers::open_append).transpose()?;
    let mut blast_out = outputs.blast.as_deref().map(writers::open_append).transpose()?;

    let reader = ReadFileZip::open_fastx(&opts.reads, opts.reads_gz).map_err(|e| Error::io(&opts.reads, e))?;
    let record_format = reader.format();

    for (num, record) in reader.enumerate() {
        let record = record.map_err(|e| Error::MalformedReads(format!("{}: {e}", opts.reads.display())))?;
        let mut read = Read::new(0, num, record.header, record.sequence, record.quality, record_format);
        let id = read.id();
        {
            let guard = kv.lock().unwrap();
            let Some(state) = guard.get(&id) else { continue };
            read.decode_state(state)
                .map_err(|e| Error::MalformedReads(format!("stored state for read {id}: {e}")))?;
        }

        let in_part: Vec<usize> = (0..read.alignments.len())
            .filter(|&i| {
                let a = &read.alignments.alignments[i];
                a.index_num == index_num && a.part == part
            })
            .collect();
        if in_part.is_empty() {
            continue;
        }

        for i in in_part {
            let alignment = read.alignments.alignments[i].clone();
            orient(&mut read, alignment.strand);
            read.flip_to_04();

            let reference = refs.get(alignment.ref_seq);
            let line_stats = writers::alignment_stats(&alignment, &reference.seq, &read.isequence);
            let passes_id = line_stats.id_ratio >= opts.id_ratio;
            let passes_cov = line_stats.cov_ratio >= opts.cov_ratio;
            match (passes_id, passes_cov) {
                (true, true) => read.c_yid_ycov += 1,
                (true, false) => read.n_yid_ncov += 1,
                (false, true) => read.n_nid_ycov += 1,
                (false, false) => read.n_denovo += 1,
            }

            let evalue = model.evalue(alignment.score);
            let bitscore = model.bitscore(alignment.score);

            if let Some(out) = blast_out.as_mut() {
                let fmt = opts.blast.unwrap_or_default();
                if fmt.tabular {
                    writers::report_blast_tabular(
                        out,
                        fmt,
                        &alignment,
                        &read.header,
                        &reference.header,
                        &line_stats,
                        evalue,
                        bitscore,
                    )
                } else {
                    writers::report_blast_pairwise(
                        out,
                        &alignment,
                        &read.header,
                        &reference.header,
                        &read.isequence,
                        &reference.seq,
                        evalue,
                        bitscore,
                    )
                }
                .map_err(|e| Error::io(outputs.blast.as_deref().unwrap_or(Path::new("blast")), e))?;
            }

            if let Some(out) = sam_out.as_mut() {
                let (seq, qual);
                if alignment.strand {
                    seq = read.sequence.clone();
                    qual = read.quality.clone();
                } else {
                    seq = revcomp_chars(&read.sequence);
                    qual = read.quality.as_ref().map(|q| {
                        let mut q = q.clone();
                        q.reverse();
                        q
                    });
                }
                writers::report_sam(
                    out,
                    &alignment,
                    &read.header,
                    &reference.header,
                    &seq,
                    qual.as_deref(),
                    line_stats.mismatches + line_stats.gaps,
                )
                .map_err(|e| Error::io(outputs.sam.as_deref().unwrap_or(Path::new("sam")), e))?;
            }

            if outputs.otu.is_some() && i == read.alignments.max_index && passes_id && passes_cov {
                otu_map
                    .entry(first_field(&reference.header).to_string())
                    .or_default()
                    .push(first_field(&read.header).to_string());
            }
        }

        kv.lock().unwrap().put(id, read.encode_state());
    }
    Ok(())
}

/// Final per-read routing: identity/coverage totals, de novo flags, null
/// rows for unaligned reads, and the FASTA/FASTQ passthrough with pairing.
fn final_pass(opts: &Runopts, outputs: &OutputPaths, kv: &Mutex<KvStore>, stats: &Mutex<ReadStats>) -> Result<()> {
    let mut aligned_out = outputs.fastx_aligned.as_deref().map(writers::open_append).transpose()?;
    let mut other_out = outputs.fastx_other.as_deref().map(writers::open_append).transpose()?;
    let mut denovo_out = outputs.denovo.as_deref().map(writers::open_append).transpose()?;
    let mut sam_out = if opts.print_all_reads {
        outputs.sam.as_deref().map(writers::open_append).transpose()?
    } else {
        None
    };
    let mut blast_out = if opts.print_all_reads {
        outputs.blast.as_deref().map(writers::open_append).transpose()?
    } else {
        None
    };

    let reader = ReadFileZip::open_fastx(&opts.reads, opts.reads_gz).map_err(|e| Error::io(&opts.reads, e))?;
    let record_format = reader.format();
    let paired = opts.paired_in || opts.paired_out;
    let mut pending: Option<Read> = None;

    for (num, record) in reader.enumerate() {
        let record = record.map_err(|e| Error::MalformedReads(format!("{}: {e}", opts.reads.display())))?;
        let mut read = Read::new(0, num, record.header, record.sequence, record.quality, record_format);
        if let Some(state) = kv.lock().unwrap().get(&read.id()) {
            read.decode_state(state)
                .map_err(|e| Error::MalformedReads(format!("stored state for read {}: {e}", read.id())))?;
        }

        read.hit_denovo = read.is_hit && read.c_yid_ycov == 0;
        {
            let mut totals = stats.lock().unwrap();
            if read.c_yid_ycov > 0 {
                totals.total_reads_mapped_cov += 1;
            }
            if read.hit_denovo && opts.de_novo_otu {
                totals.total_reads_denovo += 1;
            }
        }

        if !read.is_hit {
            if let Some(out) = sam_out.as_mut() {
                writers::report_sam_null(out, &read.header)
                    .map_err(|e| Error::io(outputs.sam.as_deref().unwrap_or(Path::new("sam")), e))?;
            }
            if let Some(out) = blast_out.as_mut() {
                writers::report_blast_null(out, opts.blast.unwrap_or_default(), &read.header)
                    .map_err(|e| Error::io(outputs.blast.as_deref().unwrap_or(Path::new("blast")), e))?;
            }
        }

        if opts.de_novo_otu
            && read.hit_denovo
            && let Some(out) = denovo_out.as_mut()
        {
            writers::write_fastx_record(out, &read)
                .map_err(|e| Error::io(outputs.denovo.as_deref().unwrap_or(Path::new("denovo")), e))?;
        }

        if !paired {
            route_single(&read, read.is_hit, &mut aligned_out, &mut other_out, outputs)?;
            continue;
        }

        match pending.take() {
            None => pending = Some(read),
            Some(mate) => {
                let to_aligned = match (mate.is_hit, read.is_hit) {
                    (true, true) => true,
                    (false, false) => false,
                    _ => opts.paired_in, // split pair: --paired_in keeps both
                };
                route_single(&mate, to_aligned, &mut aligned_out, &mut other_out, outputs)?;
                route_single(&read, to_aligned, &mut aligned_out, &mut other_out, outputs)?;
            }
        }
    }

    // odd trailing read with paired flags demoted earlier; still route it
    if let Some(read) = pending {
        route_single(&read, read.is_hit, &mut aligned_out, &mut other_out, outputs)?;
    }
    Ok(())
}

fn route_single(
    read: &Read, to_aligned: bool, aligned_out: &mut Option<impl Write>, other_out: &mut Option<impl Write>,
    outputs: &OutputPaths,
) -> Result<()> {
    if to_aligned {
        if let Some(out) = aligned_out.as_mut() {
            writers::write_fastx_record(out, read)
                .map_err(|e| Error::io(outputs.fastx_aligned.as_deref().unwrap_or(Path::new("aligned")), e))?;
        }
    } else if let Some(out) = other_out.as_mut() {
        writers::write_fastx_record(out, read)
            .map_err(|e| Error::io(outputs.fastx_other.as_deref().unwrap_or(Path::new("other")), e))?;
    }
    Ok(())
}

fn write_log(opts: &Runopts, outputs: &OutputPaths, stats: &Mutex<ReadStats>) -> Result<()> {
    let Some(log) = &outputs.log else { return Ok(()) };
    let totals = stats.lock().unwrap();
    let mut out = writers::open_append(log)?;
    let total = totals.number_total_read.max(1);

    let write = |out: &mut dyn Write| -> std::io::Result<()> {
        writeln!(out, " Results:")?;
        writeln!(out, "    Total reads = {}", totals.number_total_read)?;
        if opts.de_novo_otu {
            writeln!(out, "    Total reads for de novo clustering = {}", totals.total_reads_denovo)?;
        }
        writeln!(
            out,
            "    Total reads passing E-value threshold = {} ({:.2}%)",
            totals.total_reads_mapped,
            totals.total_reads_mapped as f64 / total as f64 * 100.0
        )?;
        writeln!(
            out,
            "    Total reads failing E-value threshold = {} ({:.2}%)",
            totals.number_total_read - totals.total_reads_mapped,
            (total - totals.total_reads_mapped) as f64 / total as f64 * 100.0
        )?;
        writeln!(out, "    Minimum read length = {}", totals.min_read_len)?;
        writeln!(out, "    Maximum read length = {}", totals.max_read_len)?;
        writeln!(out, "    Mean read length    = {}", totals.mean_read_len())?;
        writeln!(out, " By database:")?;
        for (pair, matched) in opts.refs.iter().zip(&totals.reads_matched_per_db) {
            writeln!(
                out,
                "    {}\t\t{:.2}%",
                pair.fasta.display(),
                *matched as f64 / total as f64 * 100.0
            )?;
        }
        if opts.otu_map {
            writeln!(
                out,
                " Total reads passing %id and %coverage thresholds = {}",
                totals.total_reads_mapped_cov
            )?;
            writeln!(out, " Total OTUs = {}", totals.otu_total)?;
        }
        writeln!(out, "\n {}", chrono::Local::now().format("%a %b %e %T %Y"))?;
        Ok(())
    };
    write(&mut out).map_err(|e| Error::io(log, e))?;
    Ok(())
}

#[inline]
fn first_field(name: &str) -> &str {
    name.split([' ', '\t']).next().unwrap_or(name)
}

/// Flips the working sequence to the strand an alignment was made on.
fn orient(read: &mut Read, strand: bool) {
    if strand == read.reversed {
        read.restore03();
        read.rev_int_str();
    }
}
