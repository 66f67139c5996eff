use std::time::{Duration, Instant};

use bytes::Bytes;
use model::{AudioChunk, Codec, StationInfo};
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::chunker::SegmentChunker;
use crate::directory::DirectoryClient;
use crate::error::SessionError;
use crate::hls;
use crate::playlist::{first_playable_url, PlaylistKind};
use crate::stopper::Stopper;

/// Fixed per-cause backoffs. Streams are long-lived, so transient conditions
/// are retried indefinitely.
const RETRY_SERVER_ERROR: Duration = Duration::from_secs(10);
const RETRY_OTHER_STATUS: Duration = Duration::from_secs(2);
const RETRY_CLOSED: Duration = Duration::from_secs(5);
const RERESOLVE_DELAY: Duration = Duration::from_secs(5);

const WATCHDOG_PERIOD: Duration = Duration::from_secs(4);
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Events emitted by a running session. `Metadata` arrives once after
/// resolution, then `Chunk`s until `stop()`; `Fatal` is terminal.
#[derive(Debug)]
pub enum StreamEvent {
    Metadata(StationInfo),
    Chunk(AudioChunk),
    Fatal(SessionError),
}

/// Handle for stopping a spawned session. `stop` is idempotent: it flags the
/// session terminal, which disables every retry and watchdog path and aborts
/// in-flight requests at their next suspension point.
pub struct SessionHandle {
    stopper: Stopper,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// One station's live connection: resolves the station, keeps the connection
/// alive through every recoverable failure, and feeds received bytes through
/// the segment chunker.
pub struct StreamSession {
    country: String,
    name: String,
    canonical: String,
    segment_duration_secs: u64,
    info: StationInfo,
    url: Url,
    orig_url: Url,
    /// Bumped on every connection attempt. Watchdogs and reconnects are
    /// scoped to the attempt that scheduled them, so an earlier attempt's
    /// timers cannot fire into a newer connection; the epoch identifies the
    /// attempt in logs and tears down in-flight HLS work on restart.
    epoch: u64,
    chunker: SegmentChunker,
    client: Client,
    directory: DirectoryClient,
    tx: mpsc::Sender<StreamEvent>,
    stopper: Stopper,
}

enum NextStep {
    Retry(Duration),
    Reresolve,
    SwitchHls,
    Fatal(SessionError),
    Stopped,
}

impl StreamSession {
    pub fn spawn(
        country: &str,
        name: &str,
        segment_duration_secs: u64,
    ) -> (SessionHandle, mpsc::Receiver<StreamEvent>) {
        Self::spawn_with_directory(
            DirectoryClient::default(),
            country,
            name,
            segment_duration_secs,
        )
    }

    pub fn spawn_with_directory(
        directory: DirectoryClient,
        country: &str,
        name: &str,
        segment_duration_secs: u64,
    ) -> (SessionHandle, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let stopper = Stopper::new();

        let task = tokio::spawn(Self::start(
            directory,
            country.to_owned(),
            name.to_owned(),
            segment_duration_secs,
            tx,
            stopper.clone(),
        ));

        (SessionHandle { stopper, task }, rx)
    }

    async fn start(
        directory: DirectoryClient,
        country: String,
        name: String,
        segment_duration_secs: u64,
        tx: mpsc::Sender<StreamEvent>,
        stopper: Stopper,
    ) {
        let canonical = format!("{country}_{name}");

        let info = match directory.resolve(&country, &name).await {
            Ok(info) => info,
            Err(err) => {
                log::warn!("{canonical} problem fetching radio info: {err}");
                let _ = tx.send(StreamEvent::Fatal(err)).await;
                return;
            }
        };

        if tx.send(StreamEvent::Metadata(info.clone())).await.is_err() {
            return;
        }

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client");

        let session = Self {
            canonical,
            country,
            name,
            segment_duration_secs,
            url: info.url.clone(),
            orig_url: info.url.clone(),
            epoch: 0,
            chunker: SegmentChunker::new(info.byte_rate, segment_duration_secs),
            info,
            client,
            directory,
            tx,
            stopper,
        };

        session.run().await;
    }

    async fn run(mut self) {
        let mut force_hls = false;
        loop {
            if self.stopper.is_stopped() {
                break;
            }
            self.epoch += 1;
            log::debug!(
                "{} start dl epoch={} url={} codec={:?} rate={}",
                self.canonical,
                self.epoch,
                self.url,
                self.info.codec,
                self.info.byte_rate
            );

            let step = if force_hls || self.info.codec == Codec::Hls {
                self.run_hls().await
            } else {
                self.connect_once().await
            };
            force_hls = false;

            match step {
                NextStep::Retry(delay) => {
                    if !self.sleep_unless_stopped(delay).await {
                        break;
                    }
                }
                NextStep::Reresolve => {
                    if !self.sleep_unless_stopped(RERESOLVE_DELAY).await {
                        break;
                    }
                    self.reresolve().await;
                }
                NextStep::SwitchHls => force_hls = true,
                NextStep::Fatal(err) => {
                    log::error!("{} fatal: {err}", self.canonical);
                    let _ = self.tx.send(StreamEvent::Fatal(err)).await;
                    break;
                }
                NextStep::Stopped => break,
            }
        }
        log::debug!("{} session ended", self.canonical);
    }

    async fn connect_once(&mut self) -> NextStep {
        let response = tokio::select! {
            () = self.stopper.stopped() => return NextStep::Stopped,
            response = self.client.get(self.url.clone()).send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                log::error!("{} problem with request: {err}", self.canonical);
                return NextStep::Reresolve;
            }
        };

        log::debug!(
            "{} got response code {} content-type {:?}",
            self.canonical,
            response.status(),
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
        );

        match classify_response(response.status(), response.headers()) {
            ResponseClass::Fatal404 => NextStep::Fatal(SessionError::Dead),
            ResponseClass::AuthOrServerError => {
                log::warn!(
                    "{} server error or auth challenge, retry in {:?}",
                    self.canonical,
                    RETRY_SERVER_ERROR
                );
                NextStep::Retry(RETRY_SERVER_ERROR)
            }
            ResponseClass::Redirect(Some(location)) => match self.url.join(&location) {
                Ok(url) => {
                    log::info!("{} following redirection to {url}", self.canonical);
                    self.url = url;
                    NextStep::Retry(Duration::ZERO)
                }
                Err(err) => {
                    log::error!("{} bad redirect location {location}: {err}", self.canonical);
                    NextStep::Retry(RETRY_OTHER_STATUS)
                }
            },
            ResponseClass::Redirect(None) => NextStep::Retry(RETRY_OTHER_STATUS),
            ResponseClass::Hls => NextStep::SwitchHls,
            ResponseClass::Playlist(kind) => self.follow_playlist(kind, response).await,
            ResponseClass::OtherStatus(code) => {
                log::warn!("{} unexpected status {code}", self.canonical);
                NextStep::Retry(RETRY_OTHER_STATUS)
            }
            ResponseClass::Audio => self.stream_body(response).await,
        }
    }

    /// The station URL pointed at a playlist; extract the real stream URL
    /// from the body and reconnect to it.
    async fn follow_playlist(&mut self, kind: PlaylistKind, response: Response) -> NextStep {
        log::debug!("{} url is that of a playlist, read it", self.canonical);

        let body = tokio::select! {
            () = self.stopper.stopped() => return NextStep::Stopped,
            body = response.text() => body,
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                log::warn!("{} failed to read playlist: {err}", self.canonical);
                return NextStep::Retry(RETRY_OTHER_STATUS);
            }
        };

        match first_playable_url(kind, &body) {
            Some(url) => {
                log::info!("{} playlist points to {url}", self.canonical);
                self.url = url;
                NextStep::Retry(Duration::ZERO)
            }
            None => {
                log::error!("{} could not parse playlist", self.canonical);
                NextStep::Fatal(SessionError::BadPlaylist)
            }
        }
    }

    async fn stream_body(&mut self, mut response: Response) -> NextStep {
        let mut watchdog = tokio::time::interval_at(
            tokio::time::Instant::now() + WATCHDOG_PERIOD,
            WATCHDOG_PERIOD,
        );
        let mut last_data = Instant::now();

        loop {
            tokio::select! {
                () = self.stopper.stopped() => return NextStep::Stopped,

                _ = watchdog.tick() => {
                    if last_data.elapsed() > IDLE_TIMEOUT {
                        log::info!("{} stream seems idle, we restart it", self.canonical);
                        return NextStep::Retry(Duration::ZERO);
                    }
                }

                chunk = response.chunk() => match chunk {
                    Ok(Some(data)) => {
                        last_data = Instant::now();
                        if !self.emit(data).await {
                            return NextStep::Stopped;
                        }
                    }
                    Ok(None) => {
                        log::warn!("{} server response has been closed", self.canonical);
                        return NextStep::Retry(RETRY_CLOSED);
                    }
                    Err(err) => {
                        log::error!("{} stream read failed: {err}", self.canonical);
                        return NextStep::Reresolve;
                    }
                }
            }
        }
    }

    async fn run_hls(&mut self) -> NextStep {
        let mut rx = hls::spawn(
            self.client.clone(),
            self.url.clone(),
            self.stopper.clone(),
            self.epoch,
        );
        let mut watchdog = tokio::time::interval_at(
            tokio::time::Instant::now() + WATCHDOG_PERIOD,
            WATCHDOG_PERIOD,
        );
        let mut last_data = Instant::now();

        loop {
            tokio::select! {
                () = self.stopper.stopped() => return NextStep::Stopped,

                _ = watchdog.tick() => {
                    if last_data.elapsed() > IDLE_TIMEOUT {
                        log::info!("{} hls stream seems idle, we restart it", self.canonical);
                        return NextStep::Retry(Duration::ZERO);
                    }
                }

                item = rx.recv() => match item {
                    Some(Ok(data)) => {
                        last_data = Instant::now();
                        if !self.emit(data).await {
                            return NextStep::Stopped;
                        }
                    }
                    Some(Err(err)) => {
                        log::warn!("{} hls failed: {err:#}", self.canonical);
                        return NextStep::Retry(RETRY_CLOSED);
                    }
                    None => return NextStep::Retry(RETRY_CLOSED),
                }
            }
        }
    }

    async fn emit(&mut self, data: Bytes) -> bool {
        for chunk in self.chunker.push(data) {
            if self.tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                return false;
            }
        }
        true
    }

    /// The station URL may have moved; ask the directory again before the
    /// next attempt and adopt the new endpoint if it changed.
    async fn reresolve(&mut self) {
        match self.directory.resolve(&self.country, &self.name).await {
            Ok(info) => {
                if info.url != self.url {
                    log::warn!(
                        "{} URL updated from {} to {}",
                        self.canonical,
                        self.url,
                        info.url
                    );
                    log::warn!("{} original url was {}", self.canonical, self.orig_url);
                    self.url = info.url.clone();
                    self.orig_url = info.url.clone();
                    self.chunker
                        .set_byte_rate(info.byte_rate, self.segment_duration_secs);
                    self.info = info;
                }
            }
            Err(err) => {
                log::warn!("{} problem fetching radio info: {err}", self.canonical);
            }
        }
    }

    /// Returns false when the session was stopped while waiting.
    async fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.stopper.is_stopped();
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = self.stopper.stopped() => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ResponseClass {
    Fatal404,
    AuthOrServerError,
    Redirect(Option<String>),
    Playlist(PlaylistKind),
    Hls,
    OtherStatus(u16),
    Audio,
}

/// Branch taxonomy of a connection attempt, in the order the conditions are
/// checked: dead URL, server trouble, indirections, then payload.
fn classify_response(status: StatusCode, headers: &HeaderMap) -> ResponseClass {
    if status == StatusCode::NOT_FOUND {
        return ResponseClass::Fatal404;
    }
    if headers.contains_key(WWW_AUTHENTICATE) || status.is_server_error() {
        return ResponseClass::AuthOrServerError;
    }
    if status.is_redirection() {
        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        return ResponseClass::Redirect(location);
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .eq_ignore_ascii_case(hls::MIME_HLS)
    {
        return ResponseClass::Hls;
    }
    if let Some(kind) = PlaylistKind::from_content_type(content_type) {
        return ResponseClass::Playlist(kind);
    }

    if status != StatusCode::OK {
        return ResponseClass::OtherStatus(status.as_u16());
    }
    ResponseClass::Audio
}
