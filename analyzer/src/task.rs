use model::FusedPrediction;
use tokio::sync::mpsc;

use crate::fusion::{FusionCache, Payload};

/// Commands accepted by a running [`FusionTask`].
#[derive(Debug)]
pub enum FusionCmd {
    /// Write to the current (newest) slot.
    Write(Payload),
    /// Write to an addressed slot; evicted slots are a logged no-op.
    WriteTo(u64, Payload),
}

/// Cloneable sender half for feeding a running [`FusionTask`].
#[derive(Clone)]
pub struct FusionHandle {
    tx: mpsc::Sender<FusionCmd>,
}

impl FusionHandle {
    /// Returns false once the fusion task has shut down.
    pub async fn write(&self, payload: Payload) -> bool {
        self.tx.send(FusionCmd::Write(payload)).await.is_ok()
    }

    pub async fn write_to(&self, seq: u64, payload: Payload) -> bool {
        self.tx.send(FusionCmd::WriteTo(seq, payload)).await.is_ok()
    }
}

/// Async pump around [`FusionCache`]: consumes payload writes, schedules
/// each new slot's one-shot finalize timer relative to the slot's own
/// creation time, and emits predictions.
///
/// Dropping all [`FusionHandle`]s stops new slot creation; finalize timers
/// already scheduled still fire and drain before the task ends.
pub struct FusionTask;

impl FusionTask {
    #[must_use]
    pub fn spawn(cache: FusionCache) -> (FusionHandle, mpsc::Receiver<FusedPrediction>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(16);

        tokio::spawn(Self::run(cache, cmd_rx, out_tx));

        (FusionHandle { tx: cmd_tx }, out_rx)
    }

    async fn run(
        mut cache: FusionCache,
        mut cmd_rx: mpsc::Receiver<FusionCmd>,
        out_tx: mpsc::Sender<FusedPrediction>,
    ) {
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<u64>();
        let mut outstanding = 0usize;
        let mut cmds_open = true;

        loop {
            if !cmds_open && outstanding == 0 {
                break;
            }

            tokio::select! {
                cmd = cmd_rx.recv(), if cmds_open => match cmd {
                    Some(cmd) => {
                        let timer = match cmd {
                            FusionCmd::Write(payload) => cache.write(payload),
                            FusionCmd::WriteTo(seq, payload) => {
                                cache.write_to(seq, payload);
                                None
                            }
                        };
                        if let Some(timer) = timer {
                            outstanding += 1;
                            let timer_tx = timer_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(timer.delay).await;
                                let _ = timer_tx.send(timer.seq);
                            });
                        }
                    }
                    None => cmds_open = false,
                },

                seq = timer_rx.recv() => {
                    let Some(seq) = seq else { break };
                    outstanding -= 1;
                    if let Some(prediction) = cache.finalize(seq) {
                        if out_tx.send(prediction).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
