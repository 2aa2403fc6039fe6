//! pixd binary: one request per invocation, from argv or CGI.

use anyhow::Result;
use clap::Parser;
use pixd::config::{Args, ServerConfig};
use pixd::dispatch::Dispatcher;
use pixd::files::FsFileStore;
use pixd::pixels::FsPixelEngine;
use pixd::report::{ErrorSink, StderrSink};
use pixd::response::ResponseWriter;
use pixd::transport;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let decoded = match transport::decode(&args.params).await {
        Ok(decoded) => decoded,
        Err(_) => {
            StderrSink.report("pixd", None, 0, "Bad usage. Missing parameters.");
            std::process::exit(1);
        }
    };
    let config = ServerConfig::new(args.root, decoded.interactive);

    tracing::debug!(
        version = pixd::PIXD_VERSION,
        root = %config.root.display(),
        interactive = config.interactive,
        "dispatching request"
    );

    let engine = FsPixelEngine::new(&config.root);
    let files = FsFileStore::new(&config.root);
    let sink = StderrSink;
    let dispatcher = Dispatcher::new(&engine, &files, &sink, &config);

    let mut body = tokio::io::stdin();
    let mut out = ResponseWriter::new(tokio::io::stdout(), config.interactive);
    let exit = dispatcher.dispatch(&decoded.params, &mut body, &mut out).await;

    if exit != 0 {
        std::process::exit(exit);
    }
    Ok(())
}
