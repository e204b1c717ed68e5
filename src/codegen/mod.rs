//! Code generator.
//!
//! Rather than concatenating target-language source text and compiling it,
//! [produce_consume] specializes the produce/consume protocol all the way
//! down to direct execution: each operator's contract runs as plain
//! recursive Rust, closure-free, with no textual intermediate to parse
//! back. `log::trace!` calls mark the points that would otherwise be
//! emitted source lines.

pub mod produce_consume;

pub use produce_consume::{execute, CompiledOutput};
