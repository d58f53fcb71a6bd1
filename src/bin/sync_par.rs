//! `sync-par` — parallel causal clock synchronization driver.
//!
//! One process per rank, connected over TCP (spec §4.6, §6). Rank and peer
//! addresses stand in for "a launcher that provides rank and size" — see
//! `DESIGN.md` Open Question decision 2 — since no MPI-equivalent crate
//! exists in this ecosystem. Output mirrors
//! `examples/original_source/parallel/main.py`: one file per rank under a
//! `synchronized/` directory, preceded by an inittime gather/scatter to
//! rank 0 exactly like that script's `communicator.bcast`/`gather`.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use sync_engine::{parse_trace, PeersConfig, Tag, TcpTransport};
use synctrace::CommonArgs;
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    #[clap(flatten)]
    common: CommonArgs,

    /// This process's rank within the peer set
    #[clap(long)]
    rank: u32,

    /// TOML file listing every rank's host:port
    #[clap(long)]
    peers: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    synctrace::init_logging(args.common.verbose)?;

    let peers_text = std::fs::read_to_string(&args.peers)
        .with_context(|| format!("reading {}", args.peers.display()))?;
    let peers_config: PeersConfig = toml::from_str(&peers_text)
        .with_context(|| format!("parsing {}", args.peers.display()))?;
    let addresses = peers_config
        .addresses_by_rank()
        .iter()
        .map(|a| a.parse::<SocketAddr>().with_context(|| format!("invalid peer address {a}")))
        .collect::<Result<Vec<_>>>()?;

    anyhow::ensure!(
        (args.rank as usize) < addresses.len(),
        "rank {} out of range for {} configured peers",
        args.rank,
        addresses.len()
    );

    let kth_content = std::fs::read_to_string(&args.common.kth_path)
        .with_context(|| format!("reading {}", args.common.kth_path.display()))?;
    let pointer_size = sync_engine::header::parse_kth(&kth_content)
        .with_context(|| format!("parsing .kth header at {}", args.common.kth_path.display()))?;

    let ktt_path = process_ktt_path(&args.common.kth_path, args.rank);
    let bytes = std::fs::read(&ktt_path).with_context(|| format!("reading {}", ktt_path.display()))?;
    let trace = parse_trace(args.rank, &bytes, pointer_size)
        .with_context(|| format!("parsing {}", ktt_path.display()))?;
    let own_init_time = trace.init_time;

    info!(rank = args.rank, size = addresses.len(), "connecting to peers");
    let transport = TcpTransport::connect(args.rank, &addresses)
        .await
        .context("connecting to peers")?;

    let time_offset = exchange_init_time(&transport, args.rank, addresses.len() as u32, own_init_time).await?;

    let mut coordinator = sync_engine::parallel::ParallelCoordinator::new(
        args.rank,
        trace,
        args.common.sync_config(),
        time_offset,
        transport,
    );
    coordinator.run().await?;

    let out_dir = args
        .common
        .kth_path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join("synchronized");
    std::fs::create_dir_all(&out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let stem = args
        .common
        .kth_path
        .file_stem()
        .context("'.kth' path has no file stem")?
        .to_string_lossy()
        .into_owned();
    let out_path = out_dir.join(sync_engine::writer::parallel_output_filename(&stem, args.rank));
    std::fs::write(&out_path, coordinator.export_bytes())
        .with_context(|| format!("writing {}", out_path.display()))?;
    info!(path = %out_path.display(), "wrote synchronized trace");

    if args.rank == 0 {
        let kth_name = args
            .common
            .kth_path
            .file_name()
            .context("'.kth' path has no file name")?;
        let kth_out = out_dir.join(kth_name);
        std::fs::copy(&args.common.kth_path, &kth_out)
            .with_context(|| format!("copying {} to {}", args.common.kth_path.display(), kth_out.display()))?;
        info!(path = %kth_out.display(), "copied .kth header");
    }

    Ok(())
}

/// Rank 0 gathers every rank's `inittime`, computes the minimum, and
/// scatters `time_offset = init_time - min_init` to everyone (spec §4.6
/// init phase).
async fn exchange_init_time(
    transport: &TcpTransport,
    rank: u32,
    size: u32,
    own_init_time: u64,
) -> Result<u64> {
    if rank == 0 {
        let mut min_init = own_init_time;
        for peer in 1..size {
            let peer_init = transport.recv_main(peer).await?;
            min_init = min_init.min(peer_init);
        }
        for peer in 1..size {
            transport.send(peer, Tag::Main, min_init)?;
        }
        Ok(own_init_time - min_init)
    } else {
        transport.send(0, Tag::Main, own_init_time)?;
        let min_init = transport.recv_main(0).await?;
        Ok(own_init_time - min_init)
    }
}

fn process_ktt_path(kth_path: &std::path::Path, rank: u32) -> PathBuf {
    let stem = kth_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = kth_path.parent().unwrap_or_else(|| std::path::Path::new("."));
    dir.join(sync_engine::writer::parallel_output_filename(&stem, rank))
}
