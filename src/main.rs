use std::sync::Arc;

use anyhow::{Context, Result};
use rolecall::{
    aws,
    cache::ScanStore,
    cli::CommandLineArgs,
    expand::{self, ExpandInput, ScanSet},
    lifecycle, plugins,
    plugins::Plugin,
    rate_limit::RateLimiter,
    scanner::ScanEngine,
};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_core::metadata::LevelFilter;
use tracing_subscriber::{
    self, fmt, prelude::__tracing_subscriber_SubscriberExt, registry, util::SubscriberInitExt,
};

fn main() -> Result<()> {
    let args = CommandLineArgs::parse_args();
    setup_logging(args.debug);

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

fn setup_logging(debug: bool) {
    let level = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };

    // Keep SDK internals quiet unless something goes properly wrong; results
    // go to stdout, so every log line belongs on stderr.
    let filter = tracing_subscriber::filter::Targets::new()
        .with_default(LevelFilter::ERROR)
        .with_target("rolecall", level);
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false)
        .without_time();
    registry().with(fmt_layer).with(filter).init();
}

/// SIGINT/SIGTERM cancel the process-root token; everything downstream hangs
/// off child tokens and unwinds from there.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                        _ = terminate.recv() => info!("received SIGTERM"),
                    }
                }
                Err(err) => {
                    warn!("installing SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt");
        }
        cancel.cancel();
    });
}

async fn async_main(args: CommandLineArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let regions = aws::default_regions();
    let cfgs = aws::load_region_configs(&args.profile, &regions).await?;
    let plugins = plugins::load_all(&cfgs);
    info!(
        "loaded {} probe plugins across {} regions",
        plugins.len(),
        regions.len()
    );

    if args.setup {
        lifecycle::setup_all(&plugins).await?;
        info!("probe infrastructure provisioned");
        return Ok(());
    }
    if args.clean {
        lifecycle::clean_up_all(&plugins).await;
        info!("probe infrastructure removed");
        return Ok(());
    }

    let scan_set = expand::expand(&ExpandInput {
        accounts_inline: args.accounts.clone(),
        account_paths: args.account_list.clone(),
        role_paths: args.roles.clone(),
        regions,
    })?;
    info!("expanded {} candidate principals", scan_set.len());

    let store = Arc::new(ScanStore::open(&args.name)?);
    let result = run_scan(&args, scan_set, Arc::clone(&store), plugins, cancel).await;
    // The lock comes off on every exit path, error or not.
    store.close();
    result
}

async fn run_scan(
    args: &CommandLineArgs,
    scan_set: ScanSet,
    store: Arc<ScanStore>,
    plugins: Vec<Arc<dyn Plugin>>,
    cancel: CancellationToken,
) -> Result<()> {
    lifecycle::setup_all(&plugins).await?;

    let limiter = RateLimiter::new(usize::from(args.rate_limit), cancel.child_token());
    let engine = ScanEngine::new(plugins, Arc::clone(&store), limiter, args.force);

    let mut results = engine.scan(&scan_set, cancel.child_token());
    while let Some(outcome) = results.recv().await {
        if outcome.exists {
            let comment = scan_set.comment(&outcome.arn).unwrap_or_default();
            println!("{} # {}", outcome.arn, comment);
        }
    }

    store.save().context("saving cache")?;
    if cancel.is_cancelled() {
        info!("interrupted; cache saved");
    }
    Ok(())
}
