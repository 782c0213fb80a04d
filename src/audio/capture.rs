//! Continuous audio capture.
//!
//! Wraps an [`AudioSource`] and slices its reads into fixed-duration blocks
//! for the segmenter. The capture thread must never stall waiting for
//! downstream consumption: blocks go over a bounded channel with `try_send`,
//! and a full channel drops the block with a logged warning.

use crate::error::{PredikaError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever 16-bit PCM samples are available, possibly none.
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

/// One fixed-duration block of captured audio.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Block sequence number, strictly increasing.
    pub sequence: u64,
    /// Samples as 16-bit PCM, exactly one block duration long.
    pub samples: Vec<i16>,
}

/// Configuration for the capture loop.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per emitted block.
    pub block_samples: usize,
    /// Bounded channel depth between capture and segmenter.
    pub channel_capacity: usize,
    /// Polling interval when the device has no samples ready.
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_samples: 1600,
            channel_capacity: 256,
            poll_interval_ms: 10,
        }
    }
}

/// Capture loop that continuously reads a source and emits blocks.
pub struct AudioCapture<A: AudioSource> {
    source: A,
    config: CaptureConfig,
    running: Arc<AtomicBool>,
}

impl<A: AudioSource + 'static> AudioCapture<A> {
    pub fn new(source: A, config: CaptureConfig) -> Self {
        Self {
            source,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts capture in a background thread.
    ///
    /// Returns the block receiver and a handle. The loop runs until the
    /// handle stops it, the receiver is dropped, or the device fails; a
    /// device failure is fatal and is retrievable from the handle.
    pub fn start(mut self) -> Result<(crossbeam_channel::Receiver<AudioBlock>, CaptureHandle)> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.channel_capacity);
        let running = self.running.clone();
        let last_error: Arc<Mutex<Option<PredikaError>>> = Arc::new(Mutex::new(None));
        let dropped_blocks = Arc::new(AtomicU64::new(0));

        self.source.start()?;
        running.store(true, Ordering::SeqCst);

        let handle = CaptureHandle {
            running: running.clone(),
            last_error: last_error.clone(),
            dropped_blocks: dropped_blocks.clone(),
        };

        let block_samples = self.config.block_samples;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        thread::spawn(move || {
            let mut pending: Vec<i16> = Vec::with_capacity(block_samples * 2);
            let mut sequence: u64 = 0;

            while running.load(Ordering::SeqCst) {
                match self.source.read_samples() {
                    Ok(samples) if !samples.is_empty() => {
                        pending.extend_from_slice(&samples);

                        while pending.len() >= block_samples {
                            let rest = pending.split_off(block_samples);
                            let block = AudioBlock {
                                sequence,
                                samples: std::mem::replace(&mut pending, rest),
                            };
                            sequence += 1;

                            match tx.try_send(block) {
                                Ok(()) => {}
                                Err(crossbeam_channel::TrySendError::Full(_)) => {
                                    // Downstream is behind; capture never waits.
                                    let dropped =
                                        dropped_blocks.fetch_add(1, Ordering::SeqCst) + 1;
                                    warn!(dropped, "capture channel full, block dropped");
                                }
                                Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                                    running.store(false, Ordering::SeqCst);
                                    break;
                                }
                            }
                        }
                    }
                    Ok(_) => {
                        thread::sleep(poll_interval);
                    }
                    Err(e) => {
                        error!("audio device failure, capture halted: {}", e);
                        *last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }

            if let Err(e) = self.source.stop() {
                warn!("audio source stop failed: {}", e);
            }
        });

        Ok((rx, handle))
    }
}

/// Handle to control a running capture loop.
#[derive(Clone)]
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<PredikaError>>>,
    dropped_blocks: Arc<AtomicU64>,
}

impl CaptureHandle {
    /// Stops the capture loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Returns true if capture is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Takes the fatal device error, if capture halted on one.
    pub fn take_error(&self) -> Option<PredikaError> {
        self.last_error.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    /// Blocks dropped because the segmenter fell behind.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::SeqCst)
    }
}

/// Mock audio source for testing
pub struct MockAudioSource {
    is_started: bool,
    reads: Vec<Vec<i16>>,
    next_read: usize,
    repeat_last: bool,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            reads: vec![vec![0i16; 160]],
            next_read: 0,
            repeat_last: true,
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return the given samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.reads = vec![samples];
        self
    }

    /// Configure the mock to return a script of reads, then empty reads
    pub fn with_script(mut self, reads: Vec<Vec<i16>>) -> Self {
        self.reads = reads;
        self.repeat_last = false;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(PredikaError::AudioDevice {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(PredikaError::AudioDevice {
                message: self.error_message.clone(),
            });
        }
        if self.next_read < self.reads.len() {
            let samples = self.reads[self.next_read].clone();
            if self.repeat_last && self.next_read == self.reads.len() - 1 {
                return Ok(samples);
            }
            self.next_read += 1;
            Ok(samples)
        } else {
            Ok(Vec::new())
        }
    }
}

/// cpal-backed microphone source.
#[cfg(feature = "cpal-audio")]
pub use cpal_source::CpalAudioSource;

#[cfg(feature = "cpal-audio")]
mod cpal_source {
    use super::AudioSource;
    use crate::error::{PredikaError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Wrapper for cpal::Stream to make it Send.
    ///
    /// SAFETY: the stream is only touched from the capture thread after
    /// `start()` hands the source over; it never crosses thread boundaries
    /// concurrently.
    struct SendableStream(#[allow(dead_code)] cpal::Stream);

    unsafe impl Send for SendableStream {}

    /// Microphone capture through cpal.
    ///
    /// Converts whatever the device delivers to 16-bit mono PCM at the
    /// requested sample rate's granularity; the segmenter re-slices into
    /// blocks so the device's buffer sizing doesn't matter here.
    pub struct CpalAudioSource {
        device_name: Option<String>,
        sample_rate: u32,
        stream: Option<SendableStream>,
        shared: Arc<Mutex<VecDeque<i16>>>,
    }

    impl CpalAudioSource {
        pub fn new(device_name: Option<String>, sample_rate: u32) -> Self {
            Self {
                device_name,
                sample_rate,
                stream: None,
                shared: Arc::new(Mutex::new(VecDeque::new())),
            }
        }

        fn find_device(&self) -> Result<cpal::Device> {
            let host = cpal::default_host();
            match &self.device_name {
                None => host
                    .default_input_device()
                    .ok_or_else(|| PredikaError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    }),
                Some(name) => {
                    let mut devices =
                        host.input_devices()
                            .map_err(|e| PredikaError::AudioDevice {
                                message: e.to_string(),
                            })?;
                    devices
                        .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                        .ok_or_else(|| PredikaError::AudioDeviceNotFound {
                            device: name.clone(),
                        })
                }
            }
        }
    }

    impl AudioSource for CpalAudioSource {
        fn start(&mut self) -> Result<()> {
            let device = self.find_device()?;
            let config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(self.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let shared = self.shared.clone();
            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let mut queue = shared.lock().unwrap_or_else(|p| p.into_inner());
                        queue.extend(
                            data.iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                        );
                    },
                    |e| tracing::error!("cpal stream error: {}", e),
                    None,
                )
                .map_err(|e| PredikaError::AudioDevice {
                    message: e.to_string(),
                })?;

            stream.play().map_err(|e| PredikaError::AudioDevice {
                message: e.to_string(),
            })?;
            self.stream = Some(SendableStream(stream));
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.stream = None;
            Ok(())
        }

        fn read_samples(&mut self) -> Result<Vec<i16>> {
            let mut queue = self.shared.lock().unwrap_or_else(|p| p.into_inner());
            Ok(queue.drain(..).collect())
        }
    }
}
