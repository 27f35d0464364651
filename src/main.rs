use std::{path::PathBuf, sync::Arc, time::Duration};

use ffmpeg_dual::{
    router::StreamRouter,
    sink::{ChannelSink, PresentationSink},
};
use tokio_util::sync::CancellationToken;

mod config;
mod presenter;
mod source;

use presenter::{Presenter, PresenterSettings};

// used only when the filter variable is unset
const DEFAULT_LOG_FILTERS: &str = "info,ffmpeg_dual=debug";

fn logging_builder(filter_var: &str) -> env_logger::Builder {
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(filter_var, DEFAULT_LOG_FILTERS),
    )
}

fn init_logging() {
    logging_builder(env_logger::DEFAULT_FILTER_ENV).init();
}

// run_seconds == 0 waits forever
async fn run_deadline(run_seconds: u64) {
    if run_seconds == 0 {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(Duration::from_secs(run_seconds)).await;
    }
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    ffmpeg_dual::init().unwrap_or_else(|e| {
        eprintln!("Error initializing ffmpeg: {:#}", e);
        std::process::exit(1);
    });
    let config = config::load().unwrap_or_else(|e| {
        eprintln!("Error loading config: {:#}", e);
        std::process::exit(1);
    });

    let (sink, stream) = ChannelSink::with_capacity(config.channel_capacity);
    let sink: Arc<dyn PresentationSink> = Arc::new(sink);
    let router = StreamRouter::new(config.router_config(), sink).unwrap_or_else(|e| {
        eprintln!("Error creating stream router: {:#}", e);
        std::process::exit(1);
    });
    let router = Arc::new(router);

    let presenter = Presenter::new(PresenterSettings {
        snapshot_dir: config.snapshot_dir.as_ref().map(PathBuf::from),
        snapshot_interval: Duration::from_secs(config.snapshot_interval_secs),
    })
    .unwrap_or_else(|e| {
        eprintln!("Error creating presenter: {:#}", e);
        std::process::exit(1);
    });
    let presenter = tokio::spawn(presenter.run(stream));

    let cancel = CancellationToken::new();
    let sources: Vec<_> = config
        .inputs
        .iter()
        .cloned()
        .map(|input| source::spawn_replay(input, router.clone(), cancel.clone()))
        .collect();
    if sources.is_empty() {
        log::warn!("no inputs configured, waiting for ctrl-c or run time to elapse");
    }

    let mut sources = futures::future::join_all(sources);
    let sources_done = tokio::select! {
        results = &mut sources => {
            log::info!("all inputs finished");
            Some(results)
        },
        _ = run_deadline(config.run_seconds) => {
            log::info!("run time of {}s elapsed", config.run_seconds);
            None
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted");
            None
        },
    };

    cancel.cancel();
    let results = match sources_done {
        Some(results) => results,
        None => sources.await,
    };
    for result in results {
        match result {
            Ok(Ok(summary)) => log::debug!("replay summary: {:?}", summary),
            Ok(Err(e)) => log::error!("replay failed: {:#}", e),
            Err(e) => log::error!("replay task panicked: {}", e),
        }
    }

    let flushed = router.flush();
    log::info!("flushed {} images", flushed);
    for stats in router.stats() {
        log::info!(
            "{} (stream {}): fragments: {}, frames: {}, feed errors: {}, presented: {}",
            stats.label,
            stats.stream_id,
            stats.unit.fragments,
            stats.unit.frames,
            stats.unit.feed_errors,
            stats.presented
        );
    }
    if router.dropped_unknown() > 0 {
        log::warn!(
            "{} fragments for unknown streams ignored",
            router.dropped_unknown()
        );
    }
    if let Err(e) = router.teardown() {
        log::error!("{:#}", e);
    }

    // last sink handle goes with the router, which ends the presentation stream
    drop(router);
    if let Err(e) = presenter.await {
        log::error!("presenter task failed: {}", e);
    }

    std::process::exit(0);
}
