//! The per-read candidate cascade: group seed hits by reference, chain them
//! with the LIS, align the anchored region, and accumulate the result.

use crate::{
    align::{
        self, SwParams,
        accumulator::{Alignment, Inserted},
        geometry::align_region,
        profile::Profile,
    },
    args::ReportMode,
    error::Result,
    pipeline::PartContext,
    read::Read,
    search::lis::{candidate_refs, find_lis, hits_on_ref},
    stats::ReadStats,
};
use std::{collections::VecDeque, sync::Mutex};

/// Runs the chain-and-align cascade over every candidate reference for one
/// read. Clears `search` once an alignment is accepted so the caller stops
/// granulating seed passes.
pub fn align_candidates(read: &mut Read, ctx: &PartContext<'_>, stats: &Mutex<ReadStats>, search: &mut bool) -> Result<()> {
    let opts = ctx.opts;
    if read.hit_seeds < opts.seed_hits {
        return Ok(());
    }

    let readlen = read.len() as u32;
    let max_sw_score = readlen * opts.match_score.max(0) as u32;
    let num_best = opts.num_best_hits();
    let candidates = candidate_refs(read, ctx.index, opts.seed_hits);
    let mut aligned = false;

    for (k, &(count, ref_id)) in candidates.iter().enumerate() {
        if read.saturated(num_best) {
            break;
        }
        if count < opts.seed_hits {
            break;
        }
        // spend one reference budget slot when descending to a weaker
        // candidate after a success
        if opts.min_lis > 0 && aligned && k > 0 && count < candidates[k - 1].0 {
            read.best -= 1;
            if read.best < 1 {
                break;
            }
        }
        if let ReportMode::All { cap } = opts.mode
            && cap > 0
            && read.num_alignments <= 0
        {
            break;
        }

        let hits = hits_on_ref(read, ctx.index, ref_id);
        let ref_seq = &ctx.refs.get(ref_id).seq;
        let reflen = ref_seq.len() as u32;

        let mut window: VecDeque<(u32, u32)> = VecDeque::new();
        let mut next = 0usize;
        let mut begin = hits[0].0;

        while next < hits.len() {
            let stop = begin + readlen - ctx.index.lnwin + 1;
            let mut pushed = false;
            while next < hits.len() && hits[next].0 <= stop {
                window.push_back(hits[next]);
                pushed = true;
                next += 1;
            }

            // once a window aligned, its sub-chains are assumed to yield the
            // same score; drain instead of re-aligning
            let drain = opts.chain_shortcut && !pushed && aligned;
            if !drain {
                aligned = false;
            }

            if !drain && window.len() >= opts.seed_hits as usize {
                let chain = find_lis(&window);
                if chain.len() >= opts.seed_hits as usize {
                    let (lcs_ref_start, lcs_que_start) = window[chain[0] as usize];
                    let edges = opts.edges.resolve(readlen);
                    let region = align_region(lcs_ref_start, lcs_que_start, readlen, reflen, edges);

                    let ref_end = (region.ref_start + region.ref_len).min(reflen) as usize;
                    let read_end = (region.read_start + region.read_len) as usize;
                    if ref_end > region.ref_start as usize && read_end > region.read_start as usize {
                        if !read.ambiguous_nt.is_empty() {
                            read.flip_to_04();
                        }
                        let query = &read.isequence[region.read_start as usize..read_end];
                        let target = &ref_seq[region.ref_start as usize..ref_end];
                        let mut profile = Profile::new(query, ctx.matrix);
                        let params = SwParams {
                            gap_open: opts.gap_open,
                            gap_ext:  opts.gap_ext,
                        };

                        if let Some(hit) = align::align(&mut profile, target, params, ctx.min_score)? {
                            aligned = true;
                            *search = false;
                            let alignment = Alignment {
                                score:      hit.score,
                                ref_seq:    ref_id,
                                ref_begin:  hit.ref_begin + region.ref_start as i32,
                                ref_end:    hit.ref_end + region.ref_start as i32,
                                read_begin: hit.read_begin + region.read_start as i32,
                                read_end:   hit.read_end + region.read_start as i32,
                                readlen,
                                strand:     ctx.forward,
                                index_num:  ctx.index_num,
                                part:       ctx.part,
                                cigar:      hit.cigar,
                            };
                            accept(read, alignment, ctx, stats, max_sw_score);

                            if read.saturated(num_best) {
                                break;
                            }
                            if let ReportMode::All { cap } = opts.mode
                                && cap > 0
                                && read.num_alignments <= 0
                            {
                                break;
                            }
                        }
                    }
                }
            }

            if !window.is_empty() {
                window.pop_front();
            }
            match window.front() {
                Some(&(front, _)) => begin = front,
                None => {
                    if next < hits.len() {
                        begin = hits[next].0;
                    } else {
                        break;
                    }
                }
            }
        }
    }

    read.restore03();
    Ok(())
}

/// Records an accepted alignment: run totals under the shared mutex, then
/// the per-read accumulator.
fn accept(read: &mut Read, alignment: Alignment, ctx: &PartContext<'_>, stats: &Mutex<ReadStats>, max_sw_score: u32) {
    let mut totals = stats.lock().unwrap();
    if !read.is_hit {
        read.is_hit = true;
        totals.total_reads_mapped += 1;
        totals.reads_matched_per_db[ctx.index_num as usize] += 1;
    }
    read.is_new_hit = true;

    let score = alignment.score;
    match ctx.opts.mode {
        ReportMode::Best { num_best } => match read.alignments.insert(alignment, num_best) {
            Inserted::Appended => {
                if score == max_sw_score {
                    read.max_sw_count += 1;
                }
            }
            Inserted::Replaced { evicted_index_num } => {
                totals.reads_matched_per_db[evicted_index_num as usize] -= 1;
                totals.reads_matched_per_db[ctx.index_num as usize] += 1;
                if score == max_sw_score {
                    read.max_sw_count += 1;
                }
            }
            Inserted::Discarded => {}
        },
        ReportMode::All { cap } => {
            read.alignments.insert(alignment, 0);
            if cap > 0 {
                read.num_alignments -= 1;
            }
        }
    }
    read.is_done = read.saturated(ctx.opts.num_best_hits());
}
