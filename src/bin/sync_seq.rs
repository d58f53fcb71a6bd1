//! `sync-seq` — sequential causal clock synchronization driver.
//!
//! Reads every process's `.ktt` trace named after the `.kth` header file,
//! runs the `SequentialCoordinator` over all of them in one address space,
//! and writes the merged `synchronized_trace.kst` next to the input —
//! matching `examples/original_source/sequential/main.py`'s invocation
//! (`SyncedTraceLog(path, min_event_diff, min_msg_delay, True, True)` then
//! `export_to_file`).

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use sync_engine::{parse_trace, PointerSize, SequentialCoordinator};
use synctrace::CommonArgs;
use tracing::info;

fn main() -> Result<()> {
    let args = CommonArgs::parse();
    synctrace::init_logging(args.verbose)?;

    let kth_content = std::fs::read_to_string(&args.kth_path)
        .with_context(|| format!("reading {}", args.kth_path.display()))?;
    let pointer_size = sync_engine::header::parse_kth(&kth_content)
        .with_context(|| format!("parsing .kth header at {}", args.kth_path.display()))?;

    let ktt_paths = discover_ktt_files(&args.kth_path)?;
    info!(processes = ktt_paths.len(), "discovered process traces");

    let traces = ktt_paths
        .iter()
        .enumerate()
        .map(|(pid, path)| {
            let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            parse_trace(pid as u32, &bytes, pointer_size)
                .with_context(|| format!("parsing {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut coordinator = SequentialCoordinator::new(traces, args.sync_config(), pointer_size);
    coordinator.run()?;

    let merged = sync_engine::writer::build_sequential_output(pointer_size, &coordinator.export_all());

    let out_path = output_path(&args.kth_path);
    std::fs::write(&out_path, &merged).with_context(|| format!("writing {}", out_path.display()))?;
    info!(path = %out_path.display(), "wrote synchronized trace");

    Ok(())
}

/// Per-process files are named `<stem>-<process_id>-0.ktt` next to the
/// `.kth` (spec §6). No index of the process count lives in the `.kth`
/// file, so files are probed in order until one is missing.
fn discover_ktt_files(kth_path: &Path) -> Result<Vec<PathBuf>> {
    let stem = kth_path
        .file_stem()
        .context("'.kth' path has no file stem")?
        .to_string_lossy()
        .into_owned();
    let dir = kth_path.parent().unwrap_or_else(|| Path::new("."));

    let mut paths = Vec::new();
    let mut process_id = 0u32;
    loop {
        let candidate = dir.join(format!("{stem}-{process_id}-0.ktt"));
        if !candidate.exists() {
            break;
        }
        paths.push(candidate);
        process_id += 1;
    }

    anyhow::ensure!(!paths.is_empty(), "no .ktt trace files found next to {}", kth_path.display());
    Ok(paths)
}

fn output_path(kth_path: &Path) -> PathBuf {
    kth_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("synchronized_trace.kst")
}
