// packages/engine/src/main.rs
//! Domain Engine driver
//!
//! Builds a regular block decomposition, computes the domain index across
//! simulated ranks, then fans per-domain work for a slice query out through
//! the execution manager.
//!
//! Usage: `domain-engine [config-file]`

use anyhow::{anyhow, Context, Result};
use domain_engine::index::{Communicator, IntervalTree, LocalComm};
use domain_engine::observability::{describe_metrics, init_tracing};
use domain_engine::runtime::ExecutionManager;
use domain_engine::utils::config::{DecompositionConfig, EngineConfig};
use domain_engine::BuildInfo;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

fn main() -> Result<()> {
    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from(&path)
            .with_context(|| format!("failed to load configuration from {}", path))?,
        None => EngineConfig::load().context("failed to load configuration")?,
    };

    // Initialize observability
    init_tracing(&config.logging)?;
    describe_metrics();

    let build = BuildInfo::current();
    info!(
        "Starting Domain Engine v{} ({}, {})",
        build.version, build.git_hash, build.rustc_version
    );
    info!("Configuration loaded: {:?}", config);

    let tree = Arc::new(build_distributed_index(&config.decomposition)?);
    let bounds = tree.extents()?.to_vec();
    info!("Decomposition bounds: {:?}", bounds);

    let manager = ExecutionManager::from_config(&config.threading)?;

    // Slice through the middle of the first axis
    let mut normal = vec![0.0; tree.num_dims()];
    normal[0] = 1.0;
    let plane = (bounds[0] + bounds[1]) * 0.5;
    let domains = tree.domains_for_equation(&normal, plane)?;
    info!(
        "{} of {} domains intersect the plane x0 = {}",
        domains.len(),
        tree.num_domains(),
        plane
    );

    let (tx, rx) = crossbeam_channel::unbounded();
    for domain in domains {
        let tree = Arc::clone(&tree);
        let tx = tx.clone();
        manager.schedule_work(move || match tree.domain_extents(domain) {
            Ok(row) => {
                let volume: f64 = row.chunks(2).map(|span| span[1] - span[0]).product();
                let _ = tx.send((domain, volume));
            }
            Err(e) => error!("Domain {} lookup failed: {}", domain, e),
        })?;
    }
    drop(tx);
    manager.finish_work()?;

    let processed: Vec<(usize, f64)> = rx.try_iter().collect();
    let total: f64 = processed.iter().map(|(_, volume)| volume).sum();
    info!(
        "Processed {} domains, total volume {:.3}",
        processed.len(),
        total
    );

    manager.shutdown()?;
    info!("Engine stopped");
    Ok(())
}

/// Build the index on every simulated rank; each rank adds only the domains
/// it owns and the reduction merges them
fn build_distributed_index(config: &DecompositionConfig) -> Result<IntervalTree> {
    let num_domains = config
        .num_domains()
        .context("decomposition has too many domains")?;
    info!(
        "Building index for {} domains across {} ranks",
        num_domains, config.ranks
    );

    let comms = LocalComm::group(config.ranks);
    let supervisor = comms.first().cloned().context("no ranks configured")?;

    let mut handles = Vec::with_capacity(config.ranks);
    for comm in comms {
        let config = config.clone();
        let rank = comm.rank();
        let spawned = thread::Builder::new()
            .name(format!("rank-{}", comm.rank()))
            .spawn(move || {
                let built = build_rank_tree(&comm, num_domains, &config);
                if let Err(e) = &built {
                    comm.abort(format!("rank {} failed: {}", comm.rank(), e));
                }
                built
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                // Release ranks already waiting in the reduction
                supervisor.abort(format!("could not start rank {}: {}", rank, e));
                return Err(e).context("failed to spawn rank thread");
            }
        }
    }

    let mut trees = Vec::with_capacity(handles.len());
    for handle in handles {
        let tree = handle
            .join()
            .map_err(|_| anyhow!("rank thread panicked"))??;
        trees.push(tree);
    }

    let mut trees = trees.into_iter();
    let first = trees.next().context("no ranks configured")?;
    for (rank, other) in trees.enumerate() {
        if other.node_extents() != first.node_extents() || other.node_ids() != first.node_ids() {
            warn!("Rank {} built a different index than rank 0", rank + 1);
        }
    }
    Ok(first)
}

fn build_rank_tree(
    comm: &LocalComm,
    num_domains: usize,
    config: &DecompositionConfig,
) -> domain_engine::Result<IntervalTree> {
    let mut tree = IntervalTree::new(num_domains, config.dimensions)?;
    for domain in (comm.rank()..num_domains).step_by(comm.size()) {
        tree.add_domain(domain, &block_extents(domain, config))?;
    }
    tree.calculate_with(comm, false)?;
    Ok(tree)
}

/// Unit cube of a regular grid of blocks, indexed fastest along axis 0
fn block_extents(domain: usize, config: &DecompositionConfig) -> Vec<f64> {
    let mut extents = Vec::with_capacity(2 * config.dimensions);
    let mut rest = domain;
    for _ in 0..config.dimensions {
        let coord = (rest % config.domains_per_axis) as f64;
        rest /= config.domains_per_axis;
        extents.push(coord);
        extents.push(coord + 1.0);
    }
    extents
}
