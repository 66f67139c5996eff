mod db;
mod matcher;

pub use db::{FingerRow, HotlistDb, TrackInfo};
pub use matcher::Hotlist;
