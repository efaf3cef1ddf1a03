//! cpal microphone capture and rodio speaker output.
//!
//! Both libraries hand out `!Send` stream objects, so each backend owns a
//! dedicated OS thread and is driven through a command channel.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::capture::{
    wav_stream_header, CaptureConstraints, CaptureError, CaptureEvent, Recorder,
};
use super::playback::{AudioSink, PlaybackError, PlaybackHandle};

/// Wakes the capture thread
#[derive(Debug)]
enum CaptureSignal {
    Stop,
    StreamError(String),
}

/// Microphone recorder producing a mono 16-bit WAV stream
pub struct CpalRecorder {
    sample_rate: u32,
    stop: Option<std_mpsc::Sender<CaptureSignal>>,
}

impl CpalRecorder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            stop: None,
        }
    }
}

impl Recorder for CpalRecorder {
    fn has_microphone(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    /// Device errors after this returns arrive as `CaptureEvent::Failed`
    fn start(
        &mut self,
        constraints: CaptureConstraints,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Result<(), CaptureError> {
        let (stop_tx, stop_rx) = std_mpsc::channel::<CaptureSignal>();
        let stream_errors = stop_tx.clone();
        let target_rate = self.sample_rate;
        debug!(
            "Input processing {:?} is left to the host audio stack",
            constraints
        );

        thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match open_input(target_rate, events.clone(), stream_errors) {
                    Ok(stream) => stream,
                    Err(reason) => {
                        error!("Audio capture failed to start: {}", reason);
                        let _ = events.send(CaptureEvent::Failed(reason));
                        return;
                    }
                };

                let last = await_signal(&stop_rx);
                drop(stream);
                let _ = events.send(last);
                info!("Audio capture stopped");
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        self.stop = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(CaptureSignal::Stop);
        }
    }
}

impl Drop for CpalRecorder {
    fn drop(&mut self) {
        Recorder::stop(self);
    }
}

/// Blocks until stop() or a stream error.
///
/// Returns the event that ends the session.
fn await_signal(signals: &std_mpsc::Receiver<CaptureSignal>) -> CaptureEvent {
    match signals.recv() {
        Ok(CaptureSignal::StreamError(reason)) => CaptureEvent::Failed(reason),
        Ok(CaptureSignal::Stop) | Err(_) => CaptureEvent::Finished,
    }
}

fn open_input(
    target_rate: u32,
    events: mpsc::UnboundedSender<CaptureEvent>,
    stream_errors: std_mpsc::Sender<CaptureSignal>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "No default input device available".to_string())?;
    let default_config = device
        .default_input_config()
        .map_err(|e| format!("Failed to get default input config: {e}"))?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();
    let stream_config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        native_rate,
        channels,
        "Recording at {}Hz mono",
        target_rate
    );

    let _ = events.send(CaptureEvent::Fragment(wav_stream_header(target_rate, 1)));

    let data_events = events;
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, channels);
                let samples = resample_linear(&mono, native_rate, target_rate);
                let _ = data_events.send(CaptureEvent::Fragment(to_pcm16(&samples)));
            },
            move |err| {
                error!("Audio input stream error: {}", err);
                let _ = stream_errors.send(CaptureSignal::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| format!("Failed to build input stream: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("Failed to start input stream: {e}"))?;
    Ok(stream)
}

fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = src.floor() as usize;
            let frac = (src - idx as f64) as f32;
            let s0 = input.get(idx).copied().unwrap_or(0.0);
            let s1 = input.get(idx + 1).copied().unwrap_or(s0);
            s0 + frac * (s1 - s0)
        })
        .collect()
}

fn to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| ((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes())
        .collect()
}

enum SinkCommand {
    Load {
        id: u64,
        clip: Vec<u8>,
        reply: std_mpsc::Sender<Result<(), PlaybackError>>,
    },
    Play(u64),
    Release(u64),
}

/// Speaker output on the default device
pub struct RodioSink {
    commands: std_mpsc::Sender<SinkCommand>,
    next_id: u64,
}

impl RodioSink {
    pub fn spawn() -> Result<Self, PlaybackError> {
        let (commands, rx) = std_mpsc::channel();

        thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || run_output(rx))
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        Ok(Self {
            commands,
            next_id: 0,
        })
    }

    fn send(&self, command: SinkCommand) -> Result<(), PlaybackError> {
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::Output("playback thread exited".to_string()))
    }
}

impl AudioSink for RodioSink {
    fn load(&mut self, clip: Vec<u8>) -> Result<PlaybackHandle, PlaybackError> {
        self.next_id += 1;
        let id = self.next_id;
        let (reply, response) = std_mpsc::channel();

        self.send(SinkCommand::Load { id, clip, reply })?;
        response
            .recv()
            .map_err(|_| PlaybackError::Output("playback thread exited".to_string()))??;
        Ok(PlaybackHandle::new(id))
    }

    fn play(&mut self, handle: PlaybackHandle) -> Result<(), PlaybackError> {
        self.send(SinkCommand::Play(handle.id()))
    }

    fn release(&mut self, handle: PlaybackHandle) {
        if self.send(SinkCommand::Release(handle.id())).is_err() {
            warn!("Could not release {:?}, playback thread gone", handle);
        }
    }
}

fn run_output(commands: std_mpsc::Receiver<SinkCommand>) {
    let output = OutputStream::try_default().map_err(|e| e.to_string());
    if let Err(e) = &output {
        error!("Failed to open audio output: {}", e);
    }
    let mut sinks: HashMap<u64, Sink> = HashMap::new();

    while let Ok(command) = commands.recv() {
        match command {
            SinkCommand::Load { id, clip, reply } => {
                let result = match &output {
                    Ok((_stream, handle)) => Decoder::new(Cursor::new(clip))
                        .map_err(|e| PlaybackError::Decode(e.to_string()))
                        .and_then(|source| {
                            let sink = Sink::try_new(handle)
                                .map_err(|e| PlaybackError::Output(e.to_string()))?;
                            sink.pause();
                            sink.append(source);
                            sinks.insert(id, sink);
                            Ok(())
                        }),
                    Err(e) => Err(PlaybackError::Output(e.clone())),
                };
                let _ = reply.send(result);
            }
            SinkCommand::Play(id) => match sinks.get(&id) {
                Some(sink) => sink.play(),
                None => warn!("Play for unknown clip {}", id),
            },
            SinkCommand::Release(id) => {
                if let Some(sink) = sinks.remove(&id) {
                    sink.stop();
                }
            }
        }
    }
    debug!("Playback thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_and_resample() {
        let stereo = [0.5f32, 0.5, -0.5, -0.5, 1.0, 0.0];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, -0.5, 0.5]);

        let input: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        assert_eq!(resample_linear(&input, 48_000, 16_000).len(), 160);
    }

    #[test]
    fn stream_error_ends_the_capture_thread() {
        let (tx, rx) = std_mpsc::channel();
        tx.send(CaptureSignal::StreamError("device unplugged".to_string()))
            .unwrap();
        assert!(matches!(
            await_signal(&rx),
            CaptureEvent::Failed(reason) if reason == "device unplugged"
        ));

        tx.send(CaptureSignal::Stop).unwrap();
        assert!(matches!(await_signal(&rx), CaptureEvent::Finished));

        drop(tx);
        assert!(matches!(await_signal(&rx), CaptureEvent::Finished));
    }

    #[test]
    fn pcm16_is_little_endian_and_clamped() {
        let bytes = to_pcm16(&[0.0, 2.0, -2.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -i16::MAX);
    }
}
