//! Local audio output.
//!
//! rodio's output stream is not `Send`, so a dedicated thread owns it and
//! clips are handed over through a channel. `play` resolves when the clip
//! has finished on the device, which is what the pipeline's turn barrier
//! relies on.

use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio::sync::{mpsc, oneshot};

use troupe_core::{AudioClip, AudioSink, Error, Result};

struct PlayCommand {
    clip: AudioClip,
    done: oneshot::Sender<Result<()>>,
}

pub struct RodioSink {
    tx: mpsc::UnboundedSender<PlayCommand>,
}

impl RodioSink {
    pub fn new() -> Result<Self> {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<PlayCommand>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::result::Result<(), String>>();

        std::thread::Builder::new()
            .name("troupe-audio".to_string())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => {
                        let _ = ready_tx.send(Ok(()));
                        pair
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                while let Some(PlayCommand { clip, done }) = cmd_rx.blocking_recv() {
                    let _ = done.send(play_clip(&handle, clip));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("failed to start audio thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { tx: cmd_tx }),
            Ok(Err(err)) => Err(Error::AudioOutput(format!("audio device unavailable: {err}"))),
            Err(_) => Err(Error::AudioOutput(
                "audio thread exited during startup".to_string(),
            )),
        }
    }
}

fn play_clip(handle: &OutputStreamHandle, clip: AudioClip) -> Result<()> {
    let sink = Sink::try_new(handle).map_err(|e| Error::AudioOutput(e.to_string()))?;
    sink.append(SamplesBuffer::new(1, clip.sample_rate, clip.samples));
    sink.sleep_until_end();
    Ok(())
}

#[async_trait]
impl AudioSink for RodioSink {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(PlayCommand {
                clip,
                done: done_tx,
            })
            .map_err(|_| Error::AudioOutput("audio thread stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| Error::AudioOutput("audio thread dropped the clip".to_string()))?
    }
}

/// Sink for `--mute` runs: accepts every clip and reports instant
/// completion.
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _clip: AudioClip) -> Result<()> {
        Ok(())
    }
}
