//! Lock-free SPSC ring buffer between the input device callback and the
//! capture framer.
//!
//! The producer half lives inside the cpal callback (`push_slice` is
//! wait-free); the consumer half belongs to the capture graph on the engine
//! thread.

pub mod block;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the input device callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture graph.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^17 = 131 072 f32 samples ≈ 2.7 s at 48 kHz. The engine drains every
/// few milliseconds, so this only matters when the engine thread stalls.
pub const RING_CAPACITY: usize = 1 << 17;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
