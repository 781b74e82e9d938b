//! Fixed-size capture blocks handed from the framer to the encoder.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Produced once per framer emission on the engine thread and consumed
/// synchronously by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (16000 for capture).
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level of the block, 0.0 when empty.
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Compute the root-mean-square of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Cuts a continuous sample stream into blocks of exactly `block_size` samples.
///
/// Leftover samples are held until the next push. Blocks are emitted in the
/// order their samples arrived.
#[derive(Debug)]
pub struct BlockFramer {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl BlockFramer {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(block_size.max(1) * 2),
        }
    }

    /// Append samples and call `emit` once per completed block.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(SampleBuffer)) {
        self.pending.extend_from_slice(samples);
        let mut offset = 0;
        while self.pending.len() - offset >= self.block_size {
            let block = self.pending[offset..offset + self.block_size].to_vec();
            emit(SampleBuffer::new(block, self.sample_rate));
            offset += self.block_size;
        }
        self.pending.drain(..offset);
    }

    /// Samples waiting for the next full block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}
