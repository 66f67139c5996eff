use std::path::PathBuf;

use analyzer::NullClassifier;
use anyhow::Result;
use clap::Parser;
use fetcher::StreamSession;
use hotlist::Hotlist;
use predictor::{NullExtractor, Predictor};

#[derive(Debug, Parser)]
struct Args {
    /// Station country, as listed in the directory.
    pub country: String,
    /// Station name, as listed in the directory.
    pub name: String,
    /// Segment duration in seconds.
    #[clap(short, long, default_value_t = 1)]
    pub segment_duration: u64,
    /// Path to the hotlist reference database.
    #[clap(long)]
    pub hotlist_db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger()?;

    let args = Args::parse();

    let hotlist = match &args.hotlist_db {
        Some(path) => Hotlist::open(path),
        None => Hotlist::new(None),
    };

    let (handle, events) = StreamSession::spawn(&args.country, &args.name, args.segment_duration);
    let (_fusion, mut predictions) =
        Predictor::spawn(events, NullExtractor, NullClassifier, hotlist);

    while let Some(prediction) = predictions.recv().await {
        println!("{}", serde_json::to_string(&prediction)?);
    }

    handle.stop();
    Ok(())
}

fn init_logger() -> Result<()> {
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::ConfigBuilder::new()
            .set_time_format_rfc3339()
            .add_filter_allow("predictor".to_owned())
            .add_filter_allow("fetcher".to_owned())
            .add_filter_allow("analyzer".to_owned())
            .add_filter_allow("hotlist".to_owned())
            .build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}
