use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use hls_m3u8::tags::VariantStream;
use hls_m3u8::{MasterPlaylist, MediaPlaylist};
use reqwest::Client;
use tokio::sync::mpsc;
use url::Url;

use crate::remux;
use crate::stopper::Stopper;

pub(crate) static MIME_HLS: &str = "application/vnd.apple.mpegurl";

/// Rendition selection target; the variant closest to this wins.
const TARGET_BANDWIDTH: u64 = 128_000;

/// Pacing of segment release towards the chunker.
const EMIT_INTERVAL: Duration = Duration::from_secs(2);

/// Falling further behind the live edge than this skips forward.
const MAX_LAG_SEGMENTS: usize = 5;

/// Spawns the HLS sub-protocol task. Remuxed audio arrives on the returned
/// channel at a metered rate; dropping the receiver (or stopping) tears the
/// task down, which also invalidates any in-flight playlist fetch.
pub(crate) fn spawn(
    client: Client,
    master: Url,
    stopper: Stopper,
    epoch: u64,
) -> mpsc::Receiver<anyhow::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        log::debug!(target: "fetcher::hls", "start hls session epoch={epoch} master={master}");
        if let Err(err) = run(client, master, stopper, &tx).await {
            let _ = tx.send(Err(err)).await;
        }
    });
    rx
}

async fn run(
    client: Client,
    master: Url,
    stopper: Stopper,
    tx: &mpsc::Sender<anyhow::Result<Bytes>>,
) -> anyhow::Result<()> {
    let media_url = resolve_media_url(&client, &master).await?;

    let mut last_done: Option<usize> = None;
    let mut pending: VecDeque<Bytes> = VecDeque::new();
    let mut poll_at = tokio::time::Instant::now();
    let mut emit = tokio::time::interval(EMIT_INTERVAL);
    emit.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stopper.stopped() => return Ok(()),

            () = tokio::time::sleep_until(poll_at) => {
                let playlist = fetch_media_playlist(&client, &media_url).await?;
                let target = playlist.target_duration;
                poll_at = tokio::time::Instant::now() + target / 4;

                let initial = last_done.is_none();
                if let Some((_, data)) = download_next(&client, &media_url, &playlist, &mut last_done).await? {
                    queue_segment(tx, &mut pending, data, target, initial).await?;
                    emit.reset();
                }
            }

            _ = emit.tick(), if !pending.is_empty() => {
                if let Some(step) = pending.pop_front() {
                    if tx.send(Ok(step)).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Flushes any unsent remainder of the previous segment, then releases the
/// new one either whole or in timed sub-steps, so a multi-second segment does
/// not reach downstream consumers as one burst.
async fn queue_segment(
    tx: &mpsc::Sender<anyhow::Result<Bytes>>,
    pending: &mut VecDeque<Bytes>,
    mut data: Bytes,
    target: Duration,
    initial: bool,
) -> anyhow::Result<()> {
    if !pending.is_empty() {
        let stale: usize = pending.iter().map(Bytes::len).sum();
        log::debug!(target: "fetcher::hls", "prematurely flushing {stale} buffered bytes");
        while let Some(step) = pending.pop_front() {
            if tx.send(Ok(step)).await.is_err() {
                return Ok(());
            }
        }
    }

    if initial || EMIT_INTERVAL >= target {
        let _ = tx.send(Ok(data)).await;
        return Ok(());
    }

    let steps = target.as_secs_f64() / EMIT_INTERVAL.as_secs_f64();
    let steps = steps.ceil() as usize; // >= 2
    let step_len = data.len().div_ceil(steps);

    // First step goes out immediately, the rest on the emit timer.
    let first = data.split_to(step_len.min(data.len()));
    if tx.send(Ok(first)).await.is_err() {
        return Ok(());
    }
    while !data.is_empty() {
        pending.push_back(data.split_to(step_len.min(data.len())));
    }
    Ok(())
}

/// Fetches the master playlist and picks the media playlist to follow.
/// A URL that already serves a media playlist is used as-is.
async fn resolve_media_url(client: &Client, master: &Url) -> anyhow::Result<Url> {
    let body = fetch_text(client, master).await?;

    match MasterPlaylist::try_from(body.as_str()) {
        Ok(playlist) => {
            let (bandwidth, uri) = select_variant(&playlist, TARGET_BANDWIDTH)
                .ok_or_else(|| anyhow!("master playlist contains no media streams"))?;
            let url = master.join(&uri).context("resolving rendition uri")?;
            log::info!(target: "fetcher::hls", "selected rendition at {bandwidth}bps uri={url}");
            Ok(url)
        }
        Err(_) => Ok(master.clone()),
    }
}

/// The rendition whose advertised bandwidth is numerically closest to the
/// target wins; I-frame-only streams are not playable audio.
fn select_variant(master: &MasterPlaylist, target: u64) -> Option<(u64, String)> {
    master
        .variant_streams
        .iter()
        .filter_map(|vs| match vs {
            VariantStream::ExtXIFrame { .. } => None,
            VariantStream::ExtXStreamInf {
                uri, stream_data, ..
            } => Some((stream_data.bandwidth(), uri.to_string())),
        })
        .min_by_key(|(bandwidth, _)| bandwidth.abs_diff(target))
}

async fn fetch_media_playlist(client: &Client, url: &Url) -> anyhow::Result<MediaPlaylist<'static>> {
    let body = fetch_text(client, url).await?;
    let playlist = MediaPlaylist::try_from(body.as_str())
        .map_err(|e| anyhow!("failed to parse media playlist: {e}"))?;
    Ok(playlist.into_owned())
}

/// Downloads at most one segment per poll: the oldest unseen one, skipping
/// forward when the session has fallen too far behind the live edge.
/// Bootstrap starts at the second-to-last segment.
async fn download_next(
    client: &Client,
    media_url: &Url,
    playlist: &MediaPlaylist<'_>,
    last_done: &mut Option<usize>,
) -> anyhow::Result<Option<(usize, Bytes)>> {
    let mut segments: Vec<(usize, String)> = playlist
        .segments
        .iter()
        .map(|(_, segment)| (segment.number(), segment.uri().to_string()))
        .collect();
    segments.sort_by_key(|(number, _)| *number);

    let Some(&(live_edge, _)) = segments.last() else {
        bail!("media playlist contains no segments");
    };

    let next = match *last_done {
        None => live_edge.saturating_sub(1),
        Some(done) => {
            let next = done + 1;
            if next > live_edge {
                return Ok(None);
            }
            if live_edge - next > MAX_LAG_SEGMENTS {
                log::info!(
                    target: "fetcher::hls",
                    "{} segments behind live edge, skipping forward",
                    live_edge - next
                );
                live_edge
            } else {
                next
            }
        }
    };

    let (number, uri) = segments
        .into_iter()
        .find(|(n, _)| *n >= next)
        .expect("live edge is always >= next");

    let url = media_url.join(&uri).context("resolving segment uri")?;
    let content = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    log::debug!(target: "fetcher::hls", "fetched segment #{number}: {} bytes", content.len());
    *last_done = Some(number);

    let elementary = remux::extract_elementary(&content)?;
    Ok(Some((number, elementary)))
}

async fn fetch_text(client: &Client, url: &Url) -> anyhow::Result<String> {
    client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("fetching {url}"))?
        .error_for_status()?
        .text()
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=64000,CODECS=\"mp4a.40.2\"\nlow.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=128000,CODECS=\"mp4a.40.2\"\nmid.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=256000,CODECS=\"mp4a.40.2\"\nhigh.m3u8\n";

    #[test]
    fn selects_closest_bandwidth() {
        let master = MasterPlaylist::try_from(MASTER).unwrap();
        let (bandwidth, uri) = select_variant(&master, 128_000).unwrap();
        assert_eq!(bandwidth, 128_000);
        assert_eq!(uri, "mid.m3u8");
    }

    #[test]
    fn closest_wins_for_off_grid_target() {
        let master = MasterPlaylist::try_from(MASTER).unwrap();
        let (bandwidth, _) = select_variant(&master, 100_000).unwrap();
        assert_eq!(bandwidth, 128_000);
    }
}
