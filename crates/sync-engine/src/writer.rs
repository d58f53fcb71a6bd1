//! Output file layout (spec §4.7/§6).
//!
//! Per-process serialization (`kind, corrected time, payload` per event) is
//! `Synchronizer::export_bytes`. This module handles the two drivers'
//! different file layouts: the sequential driver concatenates every
//! process's bytes into one `.kst` file prefixed by a small text header;
//! the parallel driver writes one file per rank into a `synchronized/`
//! directory, each carrying its own original header bytes as-is. Grounded
//! on `original_source/sequential/main.py` (single `synchronized_trace.kst`
//! next to the input) and `original_source/parallel/main.py` (per-rank
//! files under a `synchronized/` directory).

use crate::header::PointerSize;

/// Builds the merged sequential `.kst` file: a text prefix of
/// `pointer_size\nprocess_count\n<len per process>\n`, followed by the
/// concatenated per-process byte streams in process-id order.
pub fn build_sequential_output(pointer_size: PointerSize, per_process: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{}\n", pointer_size.bytes()).as_bytes());
    out.extend_from_slice(format!("{}\n", per_process.len()).as_bytes());
    for bytes in per_process {
        out.extend_from_slice(format!("{}\n", bytes.len()).as_bytes());
    }
    for bytes in per_process {
        out.extend_from_slice(bytes);
    }
    out
}

/// The parallel driver's per-rank output file name within `synchronized/`.
pub fn parallel_output_filename(stem: &str, process_id: u32) -> String {
    format!("{stem}-{process_id}-0.ktt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_output_has_length_prefixed_layout() {
        let processes = vec![vec![1, 2, 3], vec![4, 5]];
        let out = build_sequential_output(PointerSize::Eight, &processes);
        let text = String::from_utf8_lossy(&out[..14]);
        assert!(text.starts_with("8\n2\n3\n2\n"));
        assert!(out.ends_with(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn parallel_filename_matches_input_convention() {
        assert_eq!(parallel_output_filename("run", 3), "run-3-0.ktt");
    }
}
