//! catmaid-tiles - Fetch an image volume from a CATMAID stack.
//!
//! This binary reads the stack metadata, assembles the requested ROI and
//! writes it to a memory-mapped raw `u8` file.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catmaid_tiles::{
    Cli, FetchOutcome, HttpTileSource, ImageFetcher, MmapVolume, ProjectStack, VolumeError,
};

/// Canary requests per mirror when timing mirrors.
const MIRROR_TIMING_REPS: u32 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Validate configuration
    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(outcome) if outcome.is_complete() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<FetchOutcome, VolumeError> {
    let server = cli.server_url()?;
    let config = cli.fetcher_config()?;
    let roi = cli.roi()?;
    let roi_mode = cli.roi_mode()?;

    info!("Configuration:");
    info!("  Server: {}", server);
    info!("  Project {} / stack {}", cli.project_id, cli.stack_id);
    info!("  ROI: {:?} ({} space, zoom {})", roi, roi_mode, cli.zoom);
    info!("  Orientation: {}", config.output_orientation);
    info!(
        "  Cache: {} tiles, {} bytes",
        cli.cache_items,
        cli.cache_bytes
            .map_or_else(|| "unbounded".to_string(), |b| b.to_string())
    );
    info!("  Workers: {}", config.concurrency.max(1));

    let source = Arc::new(HttpTileSource::new(cli.request_timeout())?);

    info!("Fetching stack info...");
    let stack_info = source
        .fetch_stack_info(&server, cli.project_id, cli.stack_id)
        .await?;
    let project_stack = ProjectStack::from_stack_info(stack_info)?;
    let dimension = project_stack.stack().dimension();
    info!(
        "  Stack: {}x{}x{} voxels, {} mirror(s), {} broken slice(s)",
        dimension.x,
        dimension.y,
        dimension.z,
        project_stack.stack().mirrors().len(),
        project_stack.stack().broken_slices().len()
    );

    let mut fetcher = ImageFetcher::from_project_stack(project_stack, source, config)?;

    if cli.fastest_mirror {
        fetcher
            .set_fastest_mirror(MIRROR_TIMING_REPS, true)
            .await?;
    } else if let Some(selector) = cli.mirror_selector() {
        fetcher.set_mirror(&selector)?;
    } else {
        warn!(
            "No mirror selected: using '{}', which may not be the fastest",
            fetcher.mirror().title()
        );
    }

    let shape = fetcher.output_shape(&roi, roi_mode, cli.zoom)?;
    info!("Writing {:?} volume to {}", shape, cli.output.display());

    let started = Instant::now();
    let mut volume = MmapVolume::create(&cli.output, shape, fetcher.config().fill_value)?;
    let report = fetcher
        .fetch_into(&roi, roi_mode, cli.zoom, &mut volume)
        .await?;
    volume.flush()?;

    info!(
        "Done in {:.2}s: {} tiles ({} cached, {} fetched, {} filled)",
        started.elapsed().as_secs_f64(),
        report.stats.tiles,
        report.stats.cache_hits,
        report.stats.fetched,
        report.stats.filled
    );

    if let FetchOutcome::PartialWithGaps { failed_keys } = &report.outcome {
        warn!("{} tile(s) failed and were filled:", failed_keys.len());
        for key in failed_keys {
            warn!("  {}", key);
        }
    }

    Ok(report.outcome)
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "catmaid_tiles=debug"
    } else {
        "catmaid_tiles=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
