//! On-disk persistence of chunk edits

pub mod delta_log;

pub use delta_log::{apply_chunk_delta, delta_path, encode_chunk_delta, DeltaLog};
