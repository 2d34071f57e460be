//! Recombiners: ranked hits back into a bounded, ordered result.
//!
//! All three consume hits lazily in relevance order, so they pair naturally
//! with [`Collection::iterative_search`](crate::collection::Collection::iterative_search).
//! Each hit is mapped back to its source item through `metadata.index`.

use std::collections::{BTreeSet, HashSet};

use memloop_core::token::Tokenizer;
use tracing::{debug, warn};

use crate::chunk::TextPiece;
use crate::collection::SearchHit;

#[derive(Debug, Clone, Default)]
pub struct ArrayOptions {
    /// Skip hits whose text was already taken.
    pub dedupe: bool,
    /// Keep at most this many items.
    pub max_count: Option<usize>,
    /// Return items in source order instead of relevance order.
    pub restore_order: bool,
}

/// Map hits back to the `items` they were built from.
pub fn recombine_array<'a, T: Clone>(
    hits: impl IntoIterator<Item = SearchHit<'a>>,
    items: &[T],
    options: &ArrayOptions,
) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut picked: Vec<usize> = Vec::new();

    for hit in hits {
        if options.max_count.is_some_and(|max| picked.len() >= max) {
            break;
        }
        let index = hit.document.metadata.index;
        if index >= items.len() {
            warn!(index, items = items.len(), "Hit points past the source items, skipping");
            continue;
        }
        if options.dedupe && !seen.insert(hit.document.text.as_str()) {
            continue;
        }
        picked.push(index);
    }

    if options.restore_order {
        picked.sort_unstable();
    }
    picked.into_iter().map(|i| items[i].clone()).collect()
}

#[derive(Debug, Clone)]
pub struct WindowOptions {
    /// Characters of context kept on each side of a hit.
    pub surrounding_chars: usize,
    /// Placed between consecutive windows.
    pub separator: String,
    /// Hard ceiling on the joined result, in tokens.
    pub token_limit: usize,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            surrounding_chars: 200,
            separator: "\n...\n".into(),
            token_limit: 1024,
        }
    }
}

/// Overlap-trimmed view of an ordered run of pieces, addressed by absolute
/// character offset into the reassembled text.
struct Layout<'p> {
    pieces: &'p [TextPiece],
    /// Absolute offset where each piece's fresh (non-overlap) text begins.
    starts: Vec<usize>,
    total: usize,
}

impl<'p> Layout<'p> {
    fn new(pieces: &'p [TextPiece]) -> Self {
        let mut starts = Vec::with_capacity(pieces.len());
        let mut total = 0;
        for piece in pieces {
            starts.push(total);
            total += piece.fresh().chars().count();
        }
        Self { pieces, starts, total }
    }

    /// Absolute range covered by piece `k`, overlap included.
    fn span(&self, k: usize) -> (usize, usize) {
        let fresh = self.pieces[k].fresh().chars().count();
        let start = self.starts[k].saturating_sub(self.pieces[k].overlap);
        (start, self.starts[k] + fresh)
    }

    /// Text in `[lo, hi)`, gathered by walking back from piece `k` to the
    /// first piece touching `lo`, then forward until `hi`.
    fn extract(&self, k: usize, lo: usize, hi: usize) -> String {
        let mut first = k;
        while first > 0 && self.starts[first] > lo {
            first -= 1;
        }

        let mut out = String::new();
        for j in first..self.pieces.len() {
            let start = self.starts[j];
            if start >= hi {
                break;
            }
            let skip = lo.saturating_sub(start);
            let take = hi - start.max(lo);
            out.extend(self.pieces[j].fresh().chars().skip(skip).take(take));
        }
        out
    }
}

/// Rebuild a bounded excerpt of a chunked text around each hit.
///
/// Each hit's piece index (from `metadata.index`) is widened by
/// `surrounding_chars` on both sides, clamped to the text's start and end.
/// Windows already covered by an earlier window are skipped. Joining stops
/// the moment the next window would push the result over `token_limit`.
pub fn recombine_windowed_text<'a>(
    hits: impl IntoIterator<Item = SearchHit<'a>>,
    pieces: &[TextPiece],
    options: &WindowOptions,
    tokenizer: &dyn Tokenizer,
) -> String {
    let layout = Layout::new(pieces);
    let mut emitted: Vec<(usize, usize)> = Vec::new();
    let mut out = String::new();

    for hit in hits {
        let k = hit.document.metadata.index;
        if k >= pieces.len() {
            warn!(index = k, pieces = pieces.len(), "Hit points past the source pieces, skipping");
            continue;
        }

        let (start, end) = layout.span(k);
        let lo = start.saturating_sub(options.surrounding_chars);
        let hi = (end + options.surrounding_chars).min(layout.total);
        if emitted.iter().any(|&(a, b)| a <= lo && hi <= b) {
            continue;
        }

        let window = layout.extract(k, lo, hi);
        let candidate = if out.is_empty() {
            window
        } else {
            format!("{out}{}{window}", options.separator)
        };
        if tokenizer.count(&candidate) > options.token_limit {
            debug!(windows = emitted.len(), limit = options.token_limit, "Window budget reached");
            break;
        }
        out = candidate;
        emitted.push((lo, hi));
    }
    out
}

/// Pick chunk indices for a message log within `token_limit`.
///
/// `token_counts[i]` is the cost of chunk `i`. Pinned chunks go in first,
/// each one as long as it still fits. Hits are then taken in relevance order
/// until the next one would overflow the budget. The result is sorted, which
/// is conversation order.
pub fn recombine_messages<'a>(
    hits: impl IntoIterator<Item = SearchHit<'a>>,
    token_counts: &[usize],
    pinned: &[usize],
    token_limit: usize,
) -> Vec<usize> {
    let mut kept = BTreeSet::new();
    let mut used = 0usize;

    for &index in pinned {
        let Some(&cost) = token_counts.get(index) else {
            continue;
        };
        if used + cost <= token_limit && kept.insert(index) {
            used += cost;
        }
    }

    for hit in hits {
        let index = hit.document.metadata.index;
        let Some(&cost) = token_counts.get(index) else {
            warn!(index, chunks = token_counts.len(), "Hit has no chunk record, skipping");
            continue;
        };
        if kept.contains(&index) {
            continue;
        }
        if used + cost > token_limit {
            break;
        }
        kept.insert(index);
        used += cost;
    }

    debug!(kept = kept.len(), tokens = used, limit = token_limit, "Messages recombined");
    kept.into_iter().collect()
}
