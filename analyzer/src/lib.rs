mod classifier;
mod fusion;
mod task;

pub use classifier::{Classify, NullClassifier};
pub use fusion::{FusionCache, Payload, SlotTimer, CACHE_MAX_LEN, PLAYOUT_MARGIN};
pub use task::{FusionCmd, FusionHandle, FusionTask};
