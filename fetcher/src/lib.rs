mod chunker;
mod directory;
mod error;
mod hls;
mod playlist;
mod remux;
mod session;
mod stopper;

pub use chunker::SegmentChunker;
pub use directory::DirectoryClient;
pub use error::SessionError;
pub use playlist::{first_playable_url, PlaylistKind};
pub use session::{SessionHandle, StreamEvent, StreamSession};
pub use stopper::Stopper;
