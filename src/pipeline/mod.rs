//! Pipeline stages for PDF page splitting.
//!
//! Each submodule implements exactly one step, so each can be tested on
//! its own and the PDF backend can be swapped behind
//! [`split::PageSource`] without touching the orchestrator.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ (orchestrator writes pages, updates tracker)
//! (vet+stage) (lopdf)
//! ```
//!
//! 1. [`input`]: check the extension and `%PDF` magic, stage the upload
//!    under a generated name
//! 2. [`split`]: parse the document and yield one single-page PDF per
//!    source page; CPU-bound, so callers run it in `spawn_blocking`

pub mod input;
pub mod split;
