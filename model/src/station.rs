use serde::{Deserialize, Serialize};
use url::Url;

/// Codecs the ingestor can chunk. Anything else is fatal at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    Mp3,
    Aac,
    AacPlus,
    Ogg,
    Hls,
}

impl Codec {
    /// File extension used by the storage sink for raw segments.
    #[must_use]
    pub const fn ext(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac | Self::AacPlus | Self::Hls => "aac",
            Self::Ogg => "ogg",
        }
    }
}

impl TryFrom<&str> for Codec {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "MP3" => Ok(Self::Mp3),
            "AAC" => Ok(Self::Aac),
            "AAC+" => Ok(Self::AacPlus),
            "OGG" => Ok(Self::Ogg),
            "HLS" => Ok(Self::Hls),
            _ => anyhow::bail!("Unsupported codec: {value}"),
        }
    }
}

/// Resolved live-stream endpoint for one station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationInfo {
    pub url: Url,
    pub codec: Codec,
    /// Expected stream rate in bytes per second.
    pub byte_rate: u64,
}
