use clap::Parser;
use piecemeal::{
    config::Config, error::Error, finder::Finder, metainfo::MetaInfo,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;

mod args;

use args::Args;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    let _guard = init_logs(&args)?;

    let mut config = match &args.config {
        Some(path) => Config::from_path(path).await?,
        None => Config::load().await?,
    };
    args.apply(&mut config);
    config.validate()?;

    tracing::debug!("config: {config:?}");

    let buf = tokio::fs::read(&args.torrent).await?;
    let meta_info = MetaInfo::from_bytes(&buf)?;

    info!(
        "{} ({}): {} pieces",
        meta_info.info.name,
        meta_info.info.info_hash,
        meta_info.info.piece_count()
    );

    let token = CancellationToken::new();
    let ctrl_c = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancelling, the report will be partial");
            ctrl_c.cancel();
        }
    });

    let mut finder = Finder::new(&meta_info, config);
    let mut report = finder.report();

    for dir in &args.dirs {
        if token.is_cancelled() || report.is_complete() {
            break;
        }

        // a bad directory doesn't make the others useless
        if let Err(e) = finder.scan(dir).await {
            error!("{e}");
            continue;
        }

        report = finder.run(token.clone()).await?;
    }

    if args.verbose {
        println!("{report:#}");
    } else {
        println!("{report}");
    }

    Ok(())
}

/// Logs go to stderr, or to `--log-file` through a non blocking writer. The
/// guard must live until the end of main to flush the file.
fn init_logs(args: &Args) -> Result<Option<WorkerGuard>, Error> {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .with_file(false)
        .without_time();

    let Some(path) = &args.log_file else {
        subscriber.with_writer(std::io::stderr).init();
        return Ok(None);
    };

    let file =
        std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    subscriber.with_writer(writer).with_ansi(false).init();

    Ok(Some(guard))
}
