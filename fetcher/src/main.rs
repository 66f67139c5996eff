use anyhow::Result;
use clap::Parser;
use fetcher::{StreamEvent, StreamSession};

#[derive(Debug, Parser)]
struct Args {
    /// Station country, as listed in the directory.
    pub country: String,
    /// Station name, as listed in the directory.
    pub name: String,
    /// Segment duration in seconds.
    #[clap(short, long, default_value_t = 10)]
    pub segment_duration: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger()?;

    let args = Args::parse();
    let (handle, mut events) = StreamSession::spawn(&args.country, &args.name, args.segment_duration);

    let mut segments = 0u64;
    let mut bytes = 0u64;

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Metadata(info) => {
                log::info!(
                    "stream: url={} codec={:?} (*.{}) rate={}B/s",
                    info.url,
                    info.codec,
                    info.codec.ext(),
                    info.byte_rate
                );
            }
            StreamEvent::Chunk(chunk) => {
                if chunk.segment_start {
                    segments += 1;
                    log::info!("segment #{segments} tBuffer={:.2}s", chunk.t_buffer);
                }
                bytes += chunk.len() as u64;
                log::debug!("chunk {} bytes, total {bytes}", chunk.len());
            }
            StreamEvent::Fatal(err) => {
                handle.stop();
                return Err(err.into());
            }
        }
    }

    Ok(())
}

fn init_logger() -> Result<()> {
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::ConfigBuilder::new()
            .set_time_format_rfc3339()
            .add_filter_allow("fetcher".to_owned())
            .build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}
