//! Audio engine: recording to WAV and playback with progress, using CPAL
//!
//! CPAL streams stay on the thread that built them. Recording runs on a
//! dedicated worker thread that owns the input stream until stopped, and
//! playback runs on a blocking task that owns the output stream. Nothing here
//! blocks the async caller.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::permissions::PermissionProvider;
use crate::types::PermissionKind;

/// How often the recorder publishes its input level
const LEVEL_INTERVAL: Duration = Duration::from_millis(50);

/// How often playback looks for a better output route
const ROUTE_SCAN_INTERVAL: Duration = Duration::from_secs(1);

const LEVEL_CAPACITY: usize = 32;

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioCaptureConfig {
    /// Sample rate in Hz (default: 16000 for speech recognition)
    pub sample_rate: u32,
    /// Number of channels (default: 1 for mono)
    pub channels: u16,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// How often progress is reported (at least 10 Hz)
    pub progress_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(50),
        }
    }
}

/// Playback position report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackProgress {
    /// Seconds played
    pub current: f64,
    /// Total seconds
    pub duration: f64,
}

/// How a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Stopped,
}

/// A finished recording on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub duration_secs: f64,
    pub sample_rate: u32,
}

/// Output route class, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AudioRoute {
    Speaker,
    Headphones,
    Bluetooth,
}

/// Classify an output device by name
pub fn classify_route(device_name: &str) -> AudioRoute {
    let name = device_name.to_lowercase();
    const BLUETOOTH: [&str; 6] = ["airpods", "bluetooth", "buds", "beats", "bose", "wh-1000"];
    const WIRED: [&str; 4] = ["headphone", "headset", "earphone", "earpods"];

    if BLUETOOTH.iter().any(|k| name.contains(k)) {
        AudioRoute::Bluetooth
    } else if WIRED.iter().any(|k| name.contains(k)) {
        AudioRoute::Headphones
    } else {
        AudioRoute::Speaker
    }
}

/// Pick the most appropriate output: Bluetooth, then headphones, then speaker.
/// Ties keep enumeration order.
pub fn select_output(device_names: &[String]) -> Option<usize> {
    device_names
        .iter()
        .enumerate()
        .max_by_key(|(i, name)| (classify_route(name), Reverse(*i)))
        .map(|(i, _)| i)
}

/// Output a running playback should move to, if any.
///
/// A lost or vanished device moves to the best remaining output. Otherwise
/// playback only moves when a strictly more preferred route appeared.
pub fn reroute_target(
    current: Option<&str>,
    available: &[String],
    device_lost: bool,
) -> Option<String> {
    let preferred = select_output(available).map(|i| available[i].clone())?;
    let vanished = current.is_some_and(|c| !available.iter().any(|a| a == c));
    if device_lost || vanished {
        return Some(preferred);
    }
    let current_route = current.map(classify_route).unwrap_or(AudioRoute::Speaker);
    (classify_route(&preferred) > current_route).then_some(preferred)
}

/// Record/playback lifecycle consumed by the practice session
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Suspends until the user responds or the system auto-denies
    async fn request_microphone_permission(&self) -> bool;

    /// Play a recording. Resolves when playback finishes or is stopped,
    /// reporting progress on `progress` at a steady cadence.
    async fn play(
        &self,
        path: &Path,
        progress: UnboundedSender<PlaybackProgress>,
    ) -> Result<PlaybackOutcome>;

    /// Stop playback. Idempotent.
    fn stop_playback(&self);

    /// Start capturing microphone input into `path`. Resolves once the
    /// device is open.
    async fn start_recording(&self, path: &Path) -> Result<()>;

    /// Stop capturing and finalize the file. Idempotent: returns `None`
    /// when nothing was recording.
    async fn stop_recording(&self) -> Result<Option<RecordingSummary>>;

    /// RMS input levels (0.0 - 1.0) published while recording, for engines
    /// that measure them
    fn input_levels(&self) -> Option<broadcast::Receiver<f32>> {
        None
    }

    /// Route audio is currently sent to
    fn current_route(&self) -> AudioRoute;
}

struct RecorderWorker {
    stop_tx: std::sync::mpsc::Sender<()>,
    join: thread::JoinHandle<Result<RecordingSummary>>,
}

/// CPAL-backed audio engine
pub struct CpalAudioEngine {
    permissions: Arc<dyn PermissionProvider>,
    capture_config: AudioCaptureConfig,
    playback_config: PlaybackConfig,
    recorder: tokio::sync::Mutex<Option<RecorderWorker>>,
    levels: broadcast::Sender<f32>,
    playback_stop: Mutex<Option<Arc<AtomicBool>>>,
    output_device: Arc<Mutex<Option<String>>>,
    route_stale: Arc<AtomicBool>,
}

impl CpalAudioEngine {
    pub fn new(permissions: Arc<dyn PermissionProvider>) -> Self {
        Self::with_config(
            permissions,
            AudioCaptureConfig::default(),
            PlaybackConfig::default(),
        )
    }

    pub fn with_config(
        permissions: Arc<dyn PermissionProvider>,
        capture_config: AudioCaptureConfig,
        playback_config: PlaybackConfig,
    ) -> Self {
        let (levels, _) = broadcast::channel(LEVEL_CAPACITY);
        Self {
            permissions,
            capture_config,
            playback_config,
            recorder: tokio::sync::Mutex::new(None),
            levels,
            playback_stop: Mutex::new(None),
            output_device: Arc::new(Mutex::new(None)),
            route_stale: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Re-resolve the preferred output device
    fn refresh_route(&self) -> Option<String> {
        let chosen = resolve_route(&self.output_device);
        self.route_stale.store(false, Ordering::SeqCst);
        chosen
    }
}

impl Drop for CpalAudioEngine {
    fn drop(&mut self) {
        self.stop_playback();
        if let Some(worker) = self.recorder.get_mut().take() {
            let _ = worker.stop_tx.send(());
            match worker.join.join() {
                Ok(Err(e)) => warn!("Failed to finalize recording on shutdown: {}", e),
                Err(_) => warn!("Recorder thread panicked on shutdown"),
                Ok(Ok(_)) => {}
            }
        }
    }
}

#[async_trait]
impl AudioEngine for CpalAudioEngine {
    async fn request_microphone_permission(&self) -> bool {
        self.permissions.request(PermissionKind::Microphone).await
    }

    async fn play(
        &self,
        path: &Path,
        progress: UnboundedSender<PlaybackProgress>,
    ) -> Result<PlaybackOutcome> {
        let (samples, sample_rate) = read_wav_mono(path)?;
        self.refresh_route();

        let stop = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.playback_stop.lock().replace(Arc::clone(&stop)) {
            previous.store(true, Ordering::SeqCst);
        }

        let route = Arc::clone(&self.output_device);
        let interval = self.playback_config.progress_interval;
        let stale = Arc::clone(&self.route_stale);
        let worker_stop = Arc::clone(&stop);
        let result = tokio::task::spawn_blocking(move || {
            run_playback(
                route,
                samples,
                sample_rate,
                worker_stop,
                progress,
                interval,
                stale,
            )
        })
        .await
        .map_err(|e| Error::Audio(format!("Playback task failed: {e}")))?;

        let mut slot = self.playback_stop.lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &stop)) {
            *slot = None;
        }
        result
    }

    fn stop_playback(&self) {
        if let Some(stop) = self.playback_stop.lock().take() {
            stop.store(true, Ordering::SeqCst);
            debug!("Playback stop requested");
        }
    }

    async fn start_recording(&self, path: &Path) -> Result<()> {
        let mut slot = self.recorder.lock().await;
        if slot.is_some() {
            return Err(Error::Audio("Audio input already in use".to_string()));
        }
        if self.route_stale.load(Ordering::SeqCst) {
            self.refresh_route();
        }

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let config = self.capture_config.clone();
        let target = path.to_path_buf();
        let stale = Arc::clone(&self.route_stale);
        let levels = self.levels.clone();

        let join = thread::Builder::new()
            .name("affirm-recorder".to_string())
            .spawn(move || record_until_stopped(config, target, ready_tx, stop_rx, levels, stale))
            .map_err(|e| Error::Audio(format!("Failed to spawn recorder: {e}")))?;

        // opening the device can take a while on some hosts
        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| Error::Audio(format!("Recorder start task failed: {e}")))?;

        match ready {
            Ok(Ok(())) => {
                *slot = Some(RecorderWorker { stop_tx, join });
                info!("Recording to {}", path.display());
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || join.join()).await;
                Err(e)
            }
            Err(_) => {
                let _ = tokio::task::spawn_blocking(move || join.join()).await;
                Err(Error::Audio("Recorder exited before starting".to_string()))
            }
        }
    }

    async fn stop_recording(&self) -> Result<Option<RecordingSummary>> {
        let Some(worker) = self.recorder.lock().await.take() else {
            return Ok(None);
        };
        let _ = worker.stop_tx.send(());
        let join = worker.join;
        let summary = tokio::task::spawn_blocking(move || join.join())
            .await
            .map_err(|e| Error::Audio(format!("Recorder stop task failed: {e}")))?
            .map_err(|_| Error::Audio("Recorder thread panicked".to_string()))??;
        info!(
            "Recording finalized: {} ({:.2}s)",
            summary.path.display(),
            summary.duration_secs
        );
        Ok(Some(summary))
    }

    fn input_levels(&self) -> Option<broadcast::Receiver<f32>> {
        Some(self.levels.subscribe())
    }

    fn current_route(&self) -> AudioRoute {
        self.output_device
            .lock()
            .as_deref()
            .map(classify_route)
            .unwrap_or(AudioRoute::Speaker)
    }
}

fn record_until_stopped(
    config: AudioCaptureConfig,
    path: PathBuf,
    ready: std::sync::mpsc::Sender<Result<()>>,
    stop: std::sync::mpsc::Receiver<()>,
    levels: broadcast::Sender<f32>,
    stale: Arc<AtomicBool>,
) -> Result<RecordingSummary> {
    let mut capture = match AudioCapture::with_config(config, stale).and_then(|mut c| {
        c.start()?;
        Ok(c)
    }) {
        Ok(capture) => capture,
        Err(e) => {
            let message = e.to_string();
            let _ = ready.send(Err(e));
            return Err(Error::Audio(message));
        }
    };
    let _ = ready.send(Ok(()));

    // runs until the stop signal or until the engine is dropped
    while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(LEVEL_INTERVAL) {
        // no subscribers is fine
        let _ = levels.send(capture.current_audio_level());
    }

    let samples = capture.stop();
    let sample_rate = capture.sample_rate();
    write_wav_atomic(&path, &samples, sample_rate)?;

    Ok(RecordingSummary {
        path,
        duration_secs: samples.len() as f64 / sample_rate.max(1) as f64,
        sample_rate,
    })
}

#[allow(deprecated)]
fn device_name(device: &Device) -> Option<String> {
    // note: device.name() is deprecated in cpal 0.17+, but works
    device.name().ok()
}

fn output_device_names() -> Vec<String> {
    match cpal::default_host().output_devices() {
        Ok(devices) => devices.filter_map(|d| device_name(&d)).collect(),
        Err(e) => {
            warn!("Failed to enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

/// Pick the preferred output and remember it in `current`; logs route changes
fn resolve_route(current: &Mutex<Option<String>>) -> Option<String> {
    let names = output_device_names();
    let chosen = select_output(&names).map(|i| names[i].clone());

    let mut current = current.lock();
    if *current != chosen {
        info!(
            "Audio route changed: {:?} -> {:?}",
            current.as_deref(),
            chosen.as_deref()
        );
        *current = chosen.clone();
    }
    chosen
}

fn find_output_device(name: Option<&str>) -> Option<Device> {
    let host = cpal::default_host();
    if let Some(name) = name {
        if let Ok(mut devices) = host.output_devices() {
            if let Some(device) = devices.find(|d| device_name(d).as_deref() == Some(name)) {
                return Some(device);
            }
        }
        warn!("Output device {} disappeared, using default", name);
    }
    host.default_output_device()
}

/// One output stream playing `samples` from a shared cursor
struct OutputStream {
    _stream: Stream,
    cursor: Arc<AtomicUsize>,
    rate: u32,
    total_frames: usize,
}

impl OutputStream {
    /// Open `device` (or the default output) and start playing at `start_secs`
    fn open(
        device: Option<&str>,
        samples: &[f32],
        sample_rate: u32,
        start_secs: f64,
        stale: &Arc<AtomicBool>,
    ) -> Result<Self> {
        let device = find_output_device(device)
            .ok_or_else(|| Error::Audio("No output device available".to_string()))?;

        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(format!("Failed to get supported output configs: {e}")))?
            .collect();
        let (supported, channels, sample_format, rate) =
            select_supported_config(&ranges, sample_rate, 2)
                .ok_or_else(|| Error::Audio("No supported output config found".to_string()))?;
        let mut config = supported.config();
        config.channels = channels;

        let samples = Arc::new(resample_linear(samples, sample_rate, rate));
        let total_frames = samples.len();
        let start = ((start_secs.max(0.0) * rate as f64) as usize).min(total_frames);
        let cursor = Arc::new(AtomicUsize::new(start));

        let stream = match sample_format {
            SampleFormat::F32 => build_output_stream::<f32>(&device, &config, &samples, &cursor, stale)?,
            SampleFormat::I16 => build_output_stream::<i16>(&device, &config, &samples, &cursor, stale)?,
            SampleFormat::U16 => build_output_stream::<u16>(&device, &config, &samples, &cursor, stale)?,
            SampleFormat::I32 => build_output_stream::<i32>(&device, &config, &samples, &cursor, stale)?,
            SampleFormat::U32 => build_output_stream::<u32>(&device, &config, &samples, &cursor, stale)?,
            SampleFormat::F64 => build_output_stream::<f64>(&device, &config, &samples, &cursor, stale)?,
            SampleFormat::I8 => build_output_stream::<i8>(&device, &config, &samples, &cursor, stale)?,
            SampleFormat::U8 => build_output_stream::<u8>(&device, &config, &samples, &cursor, stale)?,
            other => {
                return Err(Error::Audio(format!(
                    "Unsupported output sample format: {other:?}"
                )));
            }
        };
        stream
            .play()
            .map_err(|e| Error::Audio(format!("Failed to start playback: {e}")))?;

        Ok(Self {
            _stream: stream,
            cursor,
            rate,
            total_frames,
        })
    }

    fn position(&self) -> f64 {
        self.cursor.load(Ordering::Relaxed).min(self.total_frames) as f64 / self.rate.max(1) as f64
    }

    fn finished(&self) -> bool {
        self.cursor.load(Ordering::Relaxed) >= self.total_frames
    }
}

fn run_playback(
    route: Arc<Mutex<Option<String>>>,
    samples: Vec<f32>,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    progress: UnboundedSender<PlaybackProgress>,
    interval: Duration,
    stale: Arc<AtomicBool>,
) -> Result<PlaybackOutcome> {
    let duration = samples.len() as f64 / sample_rate.max(1) as f64;
    let device = route.lock().clone();
    let mut output = OutputStream::open(device.as_deref(), &samples, sample_rate, 0.0, &stale)?;
    info!("Playback started ({:.2}s)", duration);

    let mut since_scan = Duration::ZERO;
    loop {
        thread::sleep(interval);
        since_scan += interval;

        let played = output.position().min(duration);
        let _ = progress.send(PlaybackProgress {
            current: played,
            duration,
        });

        if stop.load(Ordering::SeqCst) {
            debug!("Playback stopped at {:.2}s of {:.2}s", played, duration);
            return Ok(PlaybackOutcome::Stopped);
        }
        if output.finished() {
            info!("Playback finished");
            return Ok(PlaybackOutcome::Finished);
        }

        let lost = stale.load(Ordering::SeqCst);
        if !lost && since_scan < ROUTE_SCAN_INTERVAL {
            continue;
        }
        since_scan = Duration::ZERO;

        let current = route.lock().clone();
        match reroute_target(current.as_deref(), &output_device_names(), lost) {
            Some(target) => {
                info!(
                    "Rerouting playback from {:?} to {} at {:.2}s",
                    current.as_deref(),
                    target,
                    played
                );
                stale.store(false, Ordering::SeqCst);
                *route.lock() = Some(target.clone());
                output = OutputStream::open(Some(&target), &samples, sample_rate, played, &stale)?;
            }
            None if lost => {
                return Err(Error::Audio(
                    "Output device disconnected and no other route is available".to_string(),
                ));
            }
            None => {}
        }
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    samples: &Arc<Vec<f32>>,
    cursor: &Arc<AtomicUsize>,
    stale: &Arc<AtomicBool>,
) -> Result<Stream>
where
    T: Sample + SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let samples = Arc::clone(samples);
    let cursor = Arc::clone(cursor);
    let stale = Arc::clone(stale);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut position = cursor.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let value = samples.get(position).copied().unwrap_or(0.0);
                    if position < samples.len() {
                        position += 1;
                    }
                    for out in frame.iter_mut() {
                        *out = T::from_sample(value);
                    }
                }
                cursor.store(position, Ordering::Relaxed);
            },
            move |err| {
                error!("Audio output stream error: {}", err);
                stale.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::Audio(format!("Failed to build output stream: {e}")))
}

/// Handles audio capture from the default input device
pub struct AudioCapture {
    device: Device,
    config: AudioCaptureConfig,
    stream_config: StreamConfig,
    input_channels: u16,
    sample_format: SampleFormat,
    buffer: Arc<Mutex<Vec<f32>>>,
    stale: Arc<AtomicBool>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device. `stale` is raised if the device
    /// disappears while the stream is running.
    pub fn with_config(config: AudioCaptureConfig, stale: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("No input device available".to_string()))?;

        info!(
            "Using input device: {}",
            device_name(&device).unwrap_or_else(|| "Unknown".to_string())
        );

        let supported_configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(format!("Failed to get supported configs: {e}")))?
            .collect();

        if supported_configs.is_empty() {
            return Err(Error::Audio("No supported input configs".to_string()));
        }

        let (supported_config, input_channels, sample_format, sample_rate) =
            select_supported_config(&supported_configs, config.sample_rate, config.channels)
                .ok_or_else(|| Error::Audio("No supported input config found".to_string()))?;

        let stream_config = supported_config.config();

        let mut config = config;
        config.sample_rate = sample_rate;
        config.channels = 1;

        debug!(
            "Stream config: {:?} (input channels: {}, format: {:?})",
            stream_config, input_channels, sample_format
        );

        Ok(Self {
            device,
            config,
            stream_config,
            input_channels,
            sample_format,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stale,
            stream: None,
        })
    }

    /// Start capturing
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.buffer.lock().clear();

        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>()?,
            SampleFormat::I16 => self.build_stream::<i16>()?,
            SampleFormat::U16 => self.build_stream::<u16>()?,
            SampleFormat::I32 => self.build_stream::<i32>()?,
            SampleFormat::U32 => self.build_stream::<u32>()?,
            SampleFormat::F64 => self.build_stream::<f64>()?,
            SampleFormat::I8 => self.build_stream::<i8>()?,
            SampleFormat::U8 => self.build_stream::<u8>()?,
            _ => {
                return Err(Error::Audio(format!(
                    "Unsupported sample format: {:?}",
                    self.sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::Audio(format!("Failed to start stream: {e}")))?;

        self.stream = Some(stream);
        info!("Audio capture started");
        Ok(())
    }

    /// Stop capturing and return the mono samples
    pub fn stop(&mut self) -> Vec<f32> {
        // dropping the stream stops the device callback
        self.stream = None;
        let samples = std::mem::take(&mut *self.buffer.lock());
        info!("Audio capture stopped, {} samples captured", samples.len());
        samples
    }

    /// Current capture sample rate
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// RMS level of the last 50ms of audio, between 0.0 and 1.0
    pub fn current_audio_level(&self) -> f32 {
        let buffer = self.buffer.lock();
        let window = (self.config.sample_rate as usize / 20).max(1);
        let start = buffer.len().saturating_sub(window);
        crate::vad::calculate_rms(&buffer[start..]).min(1.0)
    }

    fn build_stream<T>(&self) -> Result<Stream>
    where
        T: Sample + SizedSample,
        f32: FromSample<T>,
    {
        let channels = self.input_channels.max(1) as usize;
        let buffer = Arc::clone(&self.buffer);
        let stale = Arc::clone(&self.stale);

        self.device
            .build_input_stream(
                &self.stream_config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let mut buf = buffer.lock();
                    if channels == 1 {
                        buf.extend(data.iter().map(|sample| sample.to_sample::<f32>()));
                    } else {
                        for frame in data.chunks_exact(channels) {
                            let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                            buf.push(sum / channels as f32);
                        }
                    }
                },
                move |err| {
                    error!("Audio input stream error: {}", err);
                    stale.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::Audio(format!("Failed to build stream: {e}")))
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stream = None;
    }
}

fn select_supported_config(
    ranges: &[cpal::SupportedStreamConfigRange],
    preferred_rate: u32,
    preferred_channels: u16,
) -> Option<(cpal::SupportedStreamConfig, u16, SampleFormat, u32)> {
    let preferred_formats = [
        SampleFormat::F32,
        SampleFormat::I16,
        SampleFormat::U16,
        SampleFormat::I32,
        SampleFormat::U32,
        SampleFormat::F64,
        SampleFormat::I8,
        SampleFormat::U8,
    ];

    for format in preferred_formats {
        let mut candidates: Vec<_> = ranges
            .iter()
            .copied()
            .filter(|range| {
                range.sample_format() == format && range.channels() == preferred_channels
            })
            .collect();

        if candidates.is_empty() {
            candidates = ranges
                .iter()
                .copied()
                .filter(|range| range.sample_format() == format)
                .collect();
        }

        if candidates.is_empty() {
            continue;
        }

        let best = candidates
            .into_iter()
            .min_by_key(|range| sample_rate_distance(*range, preferred_rate))?;

        let sample_rate = choose_sample_rate(best, preferred_rate);
        let supported = best.with_sample_rate(sample_rate);

        return Some((supported, best.channels(), format, sample_rate));
    }

    None
}

fn sample_rate_distance(range: cpal::SupportedStreamConfigRange, preferred_rate: u32) -> u32 {
    let min_rate = range.min_sample_rate();
    let max_rate = range.max_sample_rate();
    if preferred_rate < min_rate {
        min_rate.saturating_sub(preferred_rate)
    } else if preferred_rate > max_rate {
        preferred_rate.saturating_sub(max_rate)
    } else {
        0
    }
}

fn choose_sample_rate(range: cpal::SupportedStreamConfigRange, preferred_rate: u32) -> u32 {
    preferred_rate.clamp(range.min_sample_rate(), range.max_sample_rate())
}

/// Linear-interpolation resampling of mono samples
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(last);
            let frac = (position - index as f64) as f32;
            let a = samples[index];
            let b = samples[(index + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Write mono samples as 16-bit PCM WAV.
///
/// Data goes to a `.partial` sibling first and is renamed into place once the
/// writer has finalized, so `path` never refers to a half-written file.
pub fn write_wav_atomic(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let partial = partial_path(path);

    let written = (|| -> Result<()> {
        let mut writer = hound::WavWriter::create(&partial, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * 32767.0) as i16)?;
        }
        writer.finalize()?;
        std::fs::rename(&partial, path)?;
        Ok(())
    })();

    if written.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    written
}

/// Read a WAV file as mono f32 samples
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

/// Duration of a WAV file in seconds
pub fn wav_duration(path: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(path)?;
    let rate = reader.spec().sample_rate.max(1);
    Ok(reader.duration() as f64 / rate as f64)
}
