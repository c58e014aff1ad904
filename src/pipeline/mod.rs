//! Pipeline stages for document repurposing.
//!
//! Each submodule implements one step and is testable on its own; the
//! [`crate::coordinator`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! chunk ──▶ cache ──▶ orchestrator ──▶ postprocess ──▶ assemble
//! (split)   (hits)    (plan/dispatch)   (cleanup)       (format)
//!              ▲            │
//!              └── write ◀──┘
//! ```
//!
//! 1. [`chunk`]        — format-aware segmentation plus the context map
//! 2. [`cache`]        — fingerprinted store of successful fragment results
//! 3. [`orchestrator`] — capability mapping, budget-aware planning and
//!    batched dispatch; the only stage with network I/O
//! 4. [`postprocess`]  — deterministic cleanup of model quirks
//! 5. [`assemble`]     — ordered, grouped output document
//!
//! [`cost`] and [`compress`] are shared by several stages: unit estimates
//! and pricing, and extractive compression plus the document digest.

pub mod assemble;
pub mod cache;
pub mod chunk;
pub mod compress;
pub mod cost;
pub mod orchestrator;
pub mod postprocess;
