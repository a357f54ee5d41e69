//! Signature matching engine.
//!
//! This module is the internal core behind [`crate::Magic`]. Loading and
//! scanning are deliberately split into two phases:
//!
//! 1. **Load** (`line.rs`, `expr.rs`, `prescreen.rs`, `filter.rs`): parse
//!    signature text into typed lines, compile deferred offset/operand
//!    expressions into small ASTs, derive each rule's literal byte pattern
//!    and build a `memmem` searcher for it, and drop rules whose titles are
//!    filtered out.
//! 2. **Scan** (`scan.rs`, `evaluate.rs`, `render.rs`): locate candidate
//!    offsets with the precompiled searchers, then walk each rule's line
//!    tree against the buffer and render matched values into description
//!    text and tags.
//!
//! ## How the parts work together
//!
//! ```text
//! signature text ── line::parse_line ──┐
//!                     (expr::Expr)     │  Signature::new  (lib.rs)
//!                                      │  prescreen::literal_pattern
//!                                      v
//!                      ordered signatures (confidence-sorted)
//!                                      │
//! buffer ── scan::run ─────────────────┤  per-rule finder hits
//!                                      v
//!                      evaluate::Evaluator::analyze
//!                        - resolve line offsets (expr.rs)
//!                        - read + transform + compare
//!                        - render descriptions/tags (render.rs)
//!                                      │
//!                                      v
//!                        Vec<RawMatch> (offset-sorted)
//! ```
//!
//! ## Responsibilities by module
//!
//! - `line.rs`: parses one rule text line into a `SignatureLine`.
//! - `expr.rs`: deferred arithmetic / indirect-read expressions.
//! - `prescreen.rs`: literal byte patterns for fast candidate discovery.
//! - `evaluate.rs`: walks a rule's line tree at one candidate offset.
//! - `render.rs`: printf-subset formatting and timestamp rendering.
//! - `scan.rs`: drives prescreen → evaluate, deduplicates and sorts.
//! - `filter.rs`: include/exclude filtering of rule titles.
//!
//! ## Debugging
//!
//! Set `SIGSCAN_DEBUG_RULES=1` to print load and scan traces.

#[path = "engine/evaluate.rs"]
mod evaluate;
#[path = "engine/expr.rs"]
mod expr;
#[path = "engine/filter.rs"]
mod filter;
#[path = "engine/line.rs"]
mod line;
#[path = "engine/prescreen.rs"]
mod prescreen;
#[path = "engine/render.rs"]
mod render;
#[path = "engine/scan.rs"]
mod scan;

pub(crate) use evaluate::RawMatch;
pub(crate) use expr::Expr;
pub(crate) use filter::TitleFilter;
pub(crate) use line::parse_line;
pub(crate) use prescreen::literal_pattern;
pub(crate) use scan::run;
