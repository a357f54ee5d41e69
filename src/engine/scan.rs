//! Scan orchestration.
//!
//! Signatures arrive sorted by confidence (first-line byte size, largest
//! first). Each signature's precompiled literal searcher proposes candidate
//! positions; candidates are biased by the rule's first-line offset, bounds
//! checked, and deduplicated so that the highest-confidence rule wins an
//! offset. Results come back sorted by buffer offset.

use std::collections::HashSet;

use super::evaluate::{Evaluator, RawMatch};
use crate::Signature;

pub(crate) fn run(
    signatures: &[Signature],
    data: &[u8],
    dlen: usize,
    show_invalid: bool,
) -> Vec<RawMatch> {
    let evaluator = Evaluator { data, show_invalid };
    let debug = std::env::var_os("SIGSCAN_DEBUG_RULES").is_some();

    let mut results: Vec<RawMatch> = Vec::new();
    let mut matched_offsets: HashSet<usize> = HashSet::new();

    for signature in signatures {
        let mut candidates = 0usize;
        for position in signature.finder.find_iter(data) {
            let offset = position as i64 - signature.offset;
            if offset < 0 || offset > dlen as i64 {
                continue;
            }
            let offset = offset as usize;
            if matched_offsets.contains(&offset) && !show_invalid {
                continue;
            }
            candidates += 1;

            let result = evaluator.analyze(signature, offset);
            if show_invalid || !result.invalid() {
                matched_offsets.insert(offset);
                results.push(result);
            }
        }
        if debug && candidates > 0 {
            eprintln!(
                "[scan] id={} title=\"{}\" candidates={}",
                signature.id, signature.title, candidates
            );
        }
    }

    // Stable: equal offsets stay in confidence order.
    results.sort_by_key(|result| result.offset);
    results
}
