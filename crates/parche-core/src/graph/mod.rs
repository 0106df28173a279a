//! Patch graphs: objects, parsing, signal-schedule compilation.

pub(crate) mod object;
pub(crate) mod parse;
pub(crate) mod patch;
pub(crate) mod schedule;

pub use patch::PatchId;
