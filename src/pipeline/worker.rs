//! Per-read seed search: iterate k-mer windows across the read in up to
//! three granulation passes, walking the forward and reverse tries for each
//! unvisited window, and fire the chain-and-align cascade at the final
//! window of every pass.

use crate::{
    args::ReportMode,
    error::Result,
    pipeline::{PartContext, cascade::align_candidates},
    read::Read,
    search::{bitvector::WindowBitvectors, traverse::traversetrie_align},
    stats::ReadStats,
};
use std::sync::Mutex;
use tracing::warn;

pub fn process_read(read: &mut Read, ctx: &PartContext<'_>, stats: &Mutex<ReadStats>) -> Result<()> {
    let opts = ctx.opts;
    let num_best = opts.num_best_hits();

    // the reverse strand re-visits reads the forward strand finished
    if !ctx.forward {
        match opts.mode {
            ReportMode::All { cap } if cap > 0 && read.num_alignments < 0 => return Ok(()),
            ReportMode::Best { .. } if opts.min_lis > 0 && read.saturated(num_best) => return Ok(()),
            _ => {}
        }
    }

    let lnwin = ctx.index.lnwin;
    let partialwin = ctx.index.partialwin as usize;
    if (read.len() as u32) < lnwin {
        warn!(
            read = %read.id(),
            len = read.len(),
            lnwin,
            "read shorter than the seed window, skipped"
        );
        return Ok(());
    }

    if !ctx.forward && !read.reversed {
        read.rev_int_str();
    }

    read.clear_scratch();
    let skiplengths = opts.skiplengths(lnwin);
    let mut windowshift = skiplengths[0];
    let mut visited = vec![false; read.len()];
    let mut pass_n = 0usize;
    let mut search = true;

    while search {
        let numwin = (read.len() as u32 - lnwin + windowshift) / windowshift;
        let mut win_index = 0u32;

        for win_num in 0..numwin {
            // a window is searched once across all passes
            if !visited[win_index as usize] {
                visited[win_index as usize] = true;
                search_window(read, ctx, win_index, partialwin);
            }

            if win_num == numwin - 1 {
                align_candidates(read, ctx, stats, &mut search)?;
                // not accepted at this granulation: shrink the interval
                if search {
                    if pass_n == 2 {
                        search = false;
                    } else {
                        while pass_n < 2 && skiplengths[pass_n] == skiplengths[pass_n + 1] {
                            pass_n += 1;
                        }
                        pass_n += 1;
                        if pass_n > 2 {
                            search = false;
                        } else {
                            windowshift = skiplengths[pass_n];
                        }
                    }
                }
                break; // never offset past the final window
            }
            win_index += windowshift;
        }
    }

    Ok(())
}

/// One k-mer window: hash both half-windows, walk the forward trie, and walk
/// the reverse trie only when no exact match ended the forward walk.
fn search_window(read: &mut Read, ctx: &PartContext<'_>, win_index: u32, partialwin: usize) {
    let seq = &read.isequence;
    let win = win_index as usize;
    let mut accept_zero_kmer = false;
    let mut hits = Vec::new();

    let keyf = ctx.index.hash_half_window(&seq[win..]);
    let entry = &ctx.index.lookup[keyf as usize];
    if entry.count > 0
        && let Some(trie_f) = entry.trie_f.as_deref()
    {
        let bv = WindowBitvectors::forward(seq, win + partialwin, partialwin);
        traversetrie_align(
            trie_f,
            &bv,
            partialwin,
            win_index,
            ctx.opts.full_search,
            &mut accept_zero_kmer,
            &mut hits,
        );
    }

    if !accept_zero_kmer {
        let keyr = ctx.index.hash_half_window(&seq[win + partialwin..]);
        let entry = &ctx.index.lookup[keyr as usize];
        if entry.count > 0
            && let Some(trie_r) = entry.trie_r.as_deref()
        {
            let bv = WindowBitvectors::reverse(seq, win + partialwin - 1, partialwin);
            traversetrie_align(
                trie_r,
                &bv,
                partialwin,
                win_index,
                ctx.opts.full_search,
                &mut accept_zero_kmer,
                &mut hits,
            );
        }
    }

    if !hits.is_empty() {
        read.id_win_hits.extend(hits);
        read.hit_seeds += 1;
    }
}
