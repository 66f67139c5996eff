use model::{Codec, StationInfo};
use serde::Deserialize;
use url::Url;

use crate::SessionError;

static API_BASE: &str = "https://de1.api.radio-browser.info/json/stations/bynameexact/";

/// Streams advertised without a usable bitrate default to 128 kbps.
const DEFAULT_BYTE_RATE: u64 = 128_000 / 8;

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    country: String,
    url: String,
    codec: String,
    #[serde(default)]
    bitrate: i64,
}

/// Client for the external radio-directory lookup service.
#[derive(Clone)]
pub struct DirectoryClient {
    base: Url,
    client: reqwest::Client,
}

impl Default for DirectoryClient {
    fn default() -> Self {
        Self::new(Url::parse(API_BASE).expect("valid directory endpoint"))
    }
}

impl DirectoryClient {
    #[must_use]
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    /// Resolves `(country, name)` to a live URL, codec and byte rate.
    ///
    /// Unknown stations and unsupported codecs are fatal to the session;
    /// transport problems surface as [`SessionError::Directory`] so the
    /// re-resolution retry path can distinguish them.
    pub async fn resolve(&self, country: &str, name: &str) -> Result<StationInfo, SessionError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| SessionError::Directory("endpoint is not a base url".to_owned()))?
            .pop_if_empty()
            .push(name);

        let entries: Vec<DirectoryEntry> = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SessionError::Directory(e.to_string()))?
            .json()
            .await
            .map_err(|e| SessionError::Directory(e.to_string()))?;

        let entry = entries
            .into_iter()
            .find(|entry| entry.country == country)
            .ok_or_else(|| SessionError::StationNotFound(format!("{country}_{name}")))?;

        log::info!("directory: found {country}_{name}: url={} codec={}", entry.url, entry.codec);

        let codec = Codec::try_from(entry.codec.as_str())
            .map_err(|_| SessionError::UnsupportedCodec(entry.codec.clone()))?;

        let byte_rate = if entry.bitrate > 0 {
            entry.bitrate as u64 * 1000 / 8
        } else {
            log::warn!("directory: default bitrate to 128k for {country}_{name}");
            DEFAULT_BYTE_RATE
        };

        let url = Url::parse(&entry.url)
            .map_err(|e| SessionError::Directory(format!("bad stream url {}: {e}", entry.url)))?;

        Ok(StationInfo {
            url,
            codec,
            byte_rate,
        })
    }
}
