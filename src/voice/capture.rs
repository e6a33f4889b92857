//! Audio capture from microphone
//!
//! [`AudioCapture`] records one time-boxed utterance into a fixed-capacity
//! buffer. The microphone delivers 32-bit left-justified samples; they are
//! narrowed to 16-bit by keeping the upper half of each word.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::error::CaptureError;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Size of the canonical PCM WAV header
pub const WAV_HEADER_SIZE: usize = 44;

/// Raw sample source behind [`AudioCapture`]
pub trait Microphone: Send {
    /// Begin delivering samples
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Device`] if the hardware cannot start
    fn start(&mut self) -> std::result::Result<(), CaptureError>;

    /// Stop delivering samples and discard anything pending
    fn stop(&mut self);

    /// Copy pending samples into `out`, returning how many were written
    ///
    /// Must not block waiting for new samples.
    fn read(&mut self, out: &mut [i32]) -> usize;
}

/// Narrow a 32-bit hardware sample to 16-bit PCM
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn narrow_sample(sample: i32) -> i16 {
    (sample >> 16) as i16
}

/// A finished recording: mono 16-bit PCM with a WAV header
///
/// Move-only; handing it to a consumer gives that consumer the only copy.
#[derive(Debug)]
pub struct AudioBuffer {
    wav: Vec<u8>,
    sample_rate: u32,
    sample_count: usize,
}

impl AudioBuffer {
    /// A recording with no samples
    #[must_use]
    pub const fn empty(sample_rate: u32) -> Self {
        Self {
            wav: Vec::new(),
            sample_rate,
            sample_count: 0,
        }
    }

    /// Encode 16-bit samples as a WAV buffer
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Ok(Self::empty(sample_rate));
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::with_capacity(
            WAV_HEADER_SIZE + samples.len() * 2,
        ));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| Error::Audio(e.to_string()))?;

            for &sample in samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }

            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(Self {
            wav: cursor.into_inner(),
            sample_rate,
            sample_count: samples.len(),
        })
    }

    /// Whether the recording holds no samples
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Number of 16-bit samples
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count (always mono)
    #[must_use]
    pub const fn channels(&self) -> u16 {
        1
    }

    /// The complete WAV file
    #[must_use]
    pub fn as_wav(&self) -> &[u8] {
        &self.wav
    }

    /// PCM payload following the header
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.wav.get(WAV_HEADER_SIZE..).unwrap_or_default()
    }

    /// Iterate the PCM samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.payload()
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Take the WAV bytes
    #[must_use]
    pub fn into_wav(self) -> Vec<u8> {
        self.wav
    }
}

/// Records a bounded-duration utterance from a [`Microphone`]
pub struct AudioCapture {
    mic: Box<dyn Microphone>,
    sample_rate: u32,
    capacity: usize,
    samples: Vec<i16>,
    scratch: Vec<i32>,
    active: bool,
}

impl AudioCapture {
    /// Create a capture with room for `max_samples` samples
    #[must_use]
    pub fn new(
        mic: Box<dyn Microphone>,
        sample_rate: u32,
        max_samples: usize,
        read_chunk: usize,
    ) -> Self {
        Self {
            mic,
            sample_rate,
            capacity: max_samples,
            samples: Vec::new(),
            scratch: vec![0; read_chunk.max(1)],
            active: false,
        }
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AlreadyActive`] if already recording,
    /// [`CaptureError::AllocationFailed`] if the buffer cannot be reserved,
    /// or the microphone's own start error. No state changes on error.
    pub fn start(&mut self) -> std::result::Result<(), CaptureError> {
        if self.active {
            tracing::warn!("capture already active");
            return Err(CaptureError::AlreadyActive);
        }

        let mut samples = Vec::new();
        if samples.try_reserve_exact(self.capacity).is_err() {
            tracing::error!(capacity = self.capacity, "failed to allocate recording buffer");
            return Err(CaptureError::AllocationFailed);
        }

        self.mic.start()?;
        self.samples = samples;
        self.active = true;

        tracing::debug!(
            capacity = self.capacity,
            sample_rate = self.sample_rate,
            "audio capture started"
        );
        Ok(())
    }

    /// Drain pending microphone samples into the buffer
    ///
    /// Returns the number of samples stored. Samples beyond capacity stay in
    /// the microphone and are discarded on stop.
    pub fn poll(&mut self) -> usize {
        if !self.active {
            return 0;
        }

        let room = self.capacity - self.samples.len();
        let want = room.min(self.scratch.len());
        if want == 0 {
            return 0;
        }

        let read = self.mic.read(&mut self.scratch[..want]).min(want);
        self.samples
            .extend(self.scratch[..read].iter().copied().map(narrow_sample));
        read
    }

    /// Stop capturing and hand over the recording
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NotActive`] if no capture is running, or
    /// [`CaptureError::Device`] if the recording cannot be encoded
    pub fn stop(&mut self) -> std::result::Result<AudioBuffer, CaptureError> {
        if !self.active {
            tracing::warn!("capture not active");
            return Err(CaptureError::NotActive);
        }

        self.active = false;
        self.mic.stop();

        let samples = std::mem::take(&mut self.samples);
        tracing::debug!(samples = samples.len(), "audio capture stopped");

        AudioBuffer::from_samples(&samples, self.sample_rate)
            .map_err(|e| CaptureError::Device(e.to_string()))
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the buffer has reached capacity
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Samples recorded so far
    #[must_use]
    pub fn captured_samples(&self) -> usize {
        self.samples.len()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Control messages for the microphone stream thread
enum MicCommand {
    Start(mpsc::Sender<std::result::Result<(), String>>),
    Stop,
}

/// Microphone on the default `cpal` input device
///
/// `cpal` streams are not `Send`, so the stream lives on a dedicated thread
/// and is driven through a command channel.
pub struct CpalMicrophone {
    commands: mpsc::Sender<MicCommand>,
    queue: Arc<Mutex<VecDeque<i32>>>,
    _worker: JoinHandle<()>,
}

impl CpalMicrophone {
    /// Open the default input device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32) -> Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let stream_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("mic-stream".into())
            .spawn(move || run_mic_thread(sample_rate, &stream_queue, &command_rx, &ready_tx))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("microphone thread exited".to_string()))?
            .map_err(Error::Audio)?;

        Ok(Self {
            commands,
            queue,
            _worker: worker,
        })
    }
}

impl Microphone for CpalMicrophone {
    fn start(&mut self) -> std::result::Result<(), CaptureError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(MicCommand::Start(reply_tx))
            .map_err(|_| CaptureError::Device("microphone thread exited".to_string()))?;

        reply_rx
            .recv()
            .map_err(|_| CaptureError::Device("microphone thread exited".to_string()))?
            .map_err(CaptureError::Device)
    }

    fn stop(&mut self) {
        if self.commands.send(MicCommand::Stop).is_err() {
            tracing::warn!("microphone thread already gone");
        }
    }

    fn read(&mut self, out: &mut [i32]) -> usize {
        let Ok(mut queue) = self.queue.lock() else {
            return 0;
        };

        let count = out.len().min(queue.len());
        for (slot, sample) in out.iter_mut().zip(queue.drain(..count)) {
            *slot = sample;
        }
        count
    }
}

/// Body of the microphone thread: owns the device and the stream
fn run_mic_thread(
    sample_rate: u32,
    queue: &Arc<Mutex<VecDeque<i32>>>,
    commands: &mpsc::Receiver<MicCommand>,
    ready: &mpsc::Sender<std::result::Result<(), String>>,
) {
    let opened = open_input(sample_rate);
    let (device, config) = match opened {
        Ok(pair) => {
            let _ = ready.send(Ok(()));
            pair
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Two seconds of backlog is plenty between polls
    let max_pending = sample_rate as usize * 2;
    let mut stream = None;

    while let Ok(command) = commands.recv() {
        match command {
            MicCommand::Start(reply) => {
                let sink = Arc::clone(queue);
                let built = device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if let Ok(mut pending) = sink.lock() {
                                for &sample in data {
                                    #[allow(clippy::cast_possible_truncation)]
                                    let wide = (f64::from(sample.clamp(-1.0, 1.0))
                                        * f64::from(i32::MAX))
                                        as i32;
                                    pending.push_back(wide);
                                }
                                while pending.len() > max_pending {
                                    pending.pop_front();
                                }
                            }
                        },
                        |err| {
                            tracing::error!(error = %err, "audio capture error");
                        },
                        None,
                    )
                    .map_err(|e| e.to_string())
                    .and_then(|s| s.play().map(|()| s).map_err(|e| e.to_string()));

                match built {
                    Ok(s) => {
                        stream = Some(s);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            MicCommand::Stop => {
                drop(stream.take());
                if let Ok(mut pending) = queue.lock() {
                    pending.clear();
                }
            }
        }
    }
}

/// Find a mono input configuration at the requested rate
fn open_input(sample_rate: u32) -> std::result::Result<(cpal::Device, StreamConfig), String> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| "no input device available".to_string())?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| e.to_string())?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| "no suitable audio config found".to_string())?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "audio capture initialized"
    );

    Ok((device, config))
}
