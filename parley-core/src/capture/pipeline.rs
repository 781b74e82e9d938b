//! Capture state machine and block processing.
//!
//! ```text
//! Idle ──start()──► Requesting ──acquired──► Capturing ──stop()──► Idle
//!                       │
//!                       └──failed──► teardown ──► Idle
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, info, warn};

use super::InputDevice;
use crate::{
    audio::resample::RateConverter,
    buffering::{
        block::{BlockFramer, SampleBuffer},
        create_audio_ring, AudioConsumer, Consumer,
    },
    codec::PcmEncoder,
    error::{ParleyError, Result},
    session::OutboundSink,
};

/// Samples popped from the ring per drain step.
const DRAIN_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Capturing,
}

/// What happened to one captured block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Forwarded,
    /// Recording was off; the block was thrown away.
    Discarded,
    Empty,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Wire sample rate (Hz).
    pub sample_rate: u32,
    /// Samples per forwarded block.
    pub block_size: usize,
    /// Linear gain applied before framing.
    pub gain: f32,
    /// Input frames per rubato call when the device rate differs.
    pub resample_chunk: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::codec::CAPTURE_SAMPLE_RATE,
            block_size: 256,
            gain: 1.0,
            resample_chunk: 480,
        }
    }
}

/// Nodes that exist only while capturing. Built in one step, dropped in one step.
struct CaptureGraph {
    consumer: AudioConsumer,
    converter: RateConverter,
    framer: BlockFramer,
    device_rate: u32,
    raw: Vec<f32>,
}

pub struct CapturePipeline<I: InputDevice> {
    device: I,
    config: CaptureConfig,
    state: CaptureState,
    recording: Arc<AtomicBool>,
    graph: Option<CaptureGraph>,
    encoder: PcmEncoder,
}

impl<I: InputDevice> CapturePipeline<I> {
    pub fn new(device: I, config: CaptureConfig) -> Self {
        let encoder = PcmEncoder::new(config.sample_rate);
        Self {
            device,
            config,
            state: CaptureState::Idle,
            recording: Arc::new(AtomicBool::new(false)),
            graph: None,
            encoder,
        }
    }

    /// Acquire the input device and start recording.
    ///
    /// No-op when already capturing. On failure the pipeline is torn down and
    /// left `Idle`.
    ///
    /// # Errors
    /// `ParleyError::Acquisition` / `ParleyError::NoDefaultInputDevice`.
    pub fn start(&mut self) -> Result<()> {
        if self.state == CaptureState::Capturing {
            return Ok(());
        }
        self.state = CaptureState::Requesting;
        info!("requesting input device");

        let (producer, consumer) = create_audio_ring();
        let acquired = self
            .device
            .acquire(producer, Arc::clone(&self.recording), self.config.sample_rate)
            .map_err(|e| {
                if e.is_acquisition() {
                    e
                } else {
                    ParleyError::Acquisition(e.to_string())
                }
            })
            .and_then(|device_rate| {
                let converter = RateConverter::new(
                    device_rate,
                    self.config.sample_rate,
                    self.config.resample_chunk,
                )?;
                Ok(CaptureGraph {
                    consumer,
                    converter,
                    framer: BlockFramer::new(self.config.block_size, self.config.sample_rate),
                    device_rate,
                    raw: vec![0f32; DRAIN_CHUNK],
                })
            });

        match acquired {
            Ok(graph) => {
                info!(
                    device_rate = graph.device_rate,
                    wire_rate = self.config.sample_rate,
                    block_size = self.config.block_size,
                    "capture started"
                );
                self.graph = Some(graph);
                self.recording.store(true, Ordering::Release);
                self.state = CaptureState::Capturing;
                Ok(())
            }
            Err(e) => {
                warn!("input acquisition failed: {e}");
                self.stop();
                Err(e)
            }
        }
    }

    /// Tear the graph down and release the device. Idempotent.
    ///
    /// Returns `true` if there was anything to tear down.
    pub fn stop(&mut self) -> bool {
        if self.state == CaptureState::Idle && self.graph.is_none() {
            return false;
        }
        self.recording.store(false, Ordering::Release);
        self.graph = None;
        self.device.release();
        self.state = CaptureState::Idle;
        info!("capture stopped");
        true
    }

    /// Drain the ring and append every completed block to `blocks`.
    ///
    /// Returns the number of blocks appended.
    pub fn pump(&mut self, blocks: &mut Vec<SampleBuffer>) -> usize {
        let Some(graph) = self.graph.as_mut() else {
            return 0;
        };
        let gain = self.config.gain;
        let before = blocks.len();
        loop {
            let n = graph.consumer.pop_slice(&mut graph.raw);
            if n == 0 {
                break;
            }
            let converted = graph.converter.process(&graph.raw[..n]);
            if converted.is_empty() {
                continue;
            }
            if (gain - 1.0).abs() > f32::EPSILON {
                let scaled: Vec<f32> = converted.iter().map(|s| (s * gain).clamp(-1.0, 1.0)).collect();
                graph.framer.push(&scaled, |b| blocks.push(b));
            } else {
                graph.framer.push(converted, |b| blocks.push(b));
            }
        }
        blocks.len() - before
    }

    /// Forward one block to `sink` if recording, encoded for the wire.
    ///
    /// Never panics; empty blocks and blocks arriving after `stop()` are dropped.
    pub fn process_block(&mut self, block: &SampleBuffer, sink: &mut dyn OutboundSink) -> BlockOutcome {
        if !self.recording.load(Ordering::Acquire) {
            return BlockOutcome::Discarded;
        }
        if block.is_empty() {
            return BlockOutcome::Empty;
        }
        let encoded = self.encoder.encode(&block.samples);
        debug!(samples = block.samples.len(), "forwarding capture block");
        sink.send(encoded);
        BlockOutcome::Forwarded
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// `true` when capturing and the device has reported itself gone.
    pub fn device_lost(&self) -> bool {
        self.state == CaptureState::Capturing && self.device.is_lost()
    }

    /// Sample rate the device actually delivers, while capturing.
    pub fn device_rate(&self) -> Option<u32> {
        self.graph.as_ref().map(|g| g.device_rate)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn device(&self) -> &I {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut I {
        &mut self.device
    }
}

impl<I: InputDevice> Drop for CapturePipeline<I> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{AudioProducer, Producer};
    use crate::codec::{decode_bytes, EncodedBlock};

    /// Input double: records lifecycle calls and keeps the producer so tests
    /// can play the role of the device callback.
    #[derive(Default)]
    struct FakeMic {
        fail_with: Option<&'static str>,
        rate: u32,
        producer: Option<AudioProducer>,
        recording: Option<Arc<AtomicBool>>,
        acquires: usize,
        releases: usize,
    }

    impl FakeMic {
        fn at(rate: u32) -> Self {
            Self {
                rate,
                ..Default::default()
            }
        }

        /// Mimics the device callback: gated on the shared recording flag.
        fn speak(&mut self, samples: &[f32]) {
            let gate = self
                .recording
                .as_ref()
                .is_some_and(|r| r.load(Ordering::Acquire));
            if let (true, Some(p)) = (gate, self.producer.as_mut()) {
                p.push_slice(samples);
            }
        }
    }

    impl InputDevice for FakeMic {
        fn acquire(
            &mut self,
            producer: AudioProducer,
            recording: Arc<AtomicBool>,
            _preferred_rate: u32,
        ) -> Result<u32> {
            self.acquires += 1;
            if let Some(msg) = self.fail_with {
                return Err(ParleyError::Acquisition(msg.into()));
            }
            self.producer = Some(producer);
            self.recording = Some(recording);
            Ok(self.rate)
        }

        fn release(&mut self) {
            self.releases += 1;
            self.producer = None;
        }
    }

    fn pipeline(mic: FakeMic) -> CapturePipeline<FakeMic> {
        CapturePipeline::new(mic, CaptureConfig::default())
    }

    #[test]
    fn start_builds_graph_and_sets_recording() {
        let mut p = pipeline(FakeMic::at(16_000));
        p.start().expect("start");
        assert_eq!(p.state(), CaptureState::Capturing);
        assert!(p.is_recording());
        assert_eq!(p.device_rate(), Some(16_000));
    }

    #[test]
    fn second_start_is_a_no_op() {
        let mut p = pipeline(FakeMic::at(16_000));
        p.start().expect("start");
        p.start().expect("start again");
        assert_eq!(p.device().acquires, 1);
    }

    #[test]
    fn acquisition_failure_leaves_idle_without_graph() {
        let mut mic = FakeMic::at(16_000);
        mic.fail_with = Some("permission denied");
        let mut p = pipeline(mic);

        let err = p.start().expect_err("must fail");
        assert!(err.is_acquisition());
        assert_eq!(p.state(), CaptureState::Idle);
        assert!(!p.is_recording());
        assert_eq!(p.device_rate(), None);
        assert_eq!(p.device().releases, 1);
    }

    #[test]
    fn stop_twice_matches_stop_once() {
        let mut p = pipeline(FakeMic::at(16_000));
        p.start().expect("start");
        assert!(p.stop());
        assert!(!p.stop());
        assert_eq!(p.state(), CaptureState::Idle);
        assert!(!p.is_recording());
        assert_eq!(p.device().releases, 1);
    }

    #[test]
    fn frames_256_sample_blocks_in_order() {
        let mut p = pipeline(FakeMic::at(16_000));
        p.start().expect("start");
        let ramp: Vec<f32> = (0..600).map(|i| i as f32 / 1000.0).collect();
        p.device_mut().speak(&ramp);

        let mut blocks = Vec::new();
        assert_eq!(p.pump(&mut blocks), 2);
        assert_eq!(blocks[0].samples.len(), 256);
        assert_eq!(blocks[0].samples[0], 0.0);
        assert_eq!(blocks[1].samples[0], 0.256);
        assert_eq!(blocks[1].sample_rate, 16_000);
    }

    #[test]
    fn forwards_encoded_blocks_while_recording() {
        let mut p = pipeline(FakeMic::at(16_000));
        p.start().expect("start");
        let mut sink: Vec<EncodedBlock> = Vec::new();
        let block = SampleBuffer::new(vec![0.5; 256], 16_000);

        assert_eq!(p.process_block(&block, &mut sink), BlockOutcome::Forwarded);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].mime_type, "audio/pcm;rate=16000");
        assert_eq!(decode_bytes(&sink[0].data).expect("base64").len(), 512);
    }

    #[test]
    fn gate_discards_blocks_when_not_recording() {
        let mut p = pipeline(FakeMic::at(16_000));
        let mut sink: Vec<EncodedBlock> = Vec::new();
        let block = SampleBuffer::new(vec![0.1; 256], 16_000);
        for _ in 0..10 {
            assert_eq!(p.process_block(&block, &mut sink), BlockOutcome::Discarded);
        }
        p.start().expect("start");
        p.stop();
        assert_eq!(p.process_block(&block, &mut sink), BlockOutcome::Discarded);
        assert!(sink.is_empty());
    }

    #[test]
    fn empty_block_is_a_no_op() {
        let mut p = pipeline(FakeMic::at(16_000));
        p.start().expect("start");
        let mut sink: Vec<EncodedBlock> = Vec::new();
        let empty = SampleBuffer::new(Vec::new(), 16_000);
        assert_eq!(p.process_block(&empty, &mut sink), BlockOutcome::Empty);
        assert!(sink.is_empty());
    }

    #[test]
    fn device_rate_is_converted_to_wire_rate() {
        let mut p = pipeline(FakeMic::at(48_000));
        p.start().expect("start");
        p.device_mut().speak(&vec![0.0; 4800]);
        let mut blocks = Vec::new();
        p.pump(&mut blocks);
        // 4800 samples at 48 kHz ≈ 1600 at 16 kHz ≈ 6 full blocks.
        assert!((5..=6).contains(&blocks.len()), "got {} blocks", blocks.len());
        assert!(blocks.iter().all(|b| b.samples.len() == 256));
    }

    #[test]
    fn gain_is_applied_and_clamped() {
        let mut config = CaptureConfig::default();
        config.gain = 4.0;
        let mut p = CapturePipeline::new(FakeMic::at(16_000), config);
        p.start().expect("start");
        p.device_mut().speak(&[0.1; 128]);
        p.device_mut().speak(&[0.5; 128]);
        let mut blocks = Vec::new();
        p.pump(&mut blocks);
        assert_eq!(blocks.len(), 1);
        assert!((blocks[0].samples[0] - 0.4).abs() < 1e-6);
        assert_eq!(blocks[0].samples[200], 1.0);
    }

    #[test]
    fn pump_after_stop_yields_nothing() {
        let mut p = pipeline(FakeMic::at(16_000));
        p.start().expect("start");
        p.device_mut().speak(&[0.2; 512]);
        p.stop();
        let mut blocks = Vec::new();
        assert_eq!(p.pump(&mut blocks), 0);
    }
}
