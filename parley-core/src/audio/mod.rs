//! cpal device layer.
//!
//! # Design constraints
//!
//! Both cpal callbacks run on OS audio threads at elevated priority. They
//! **must not**:
//! - Allocate heap memory in steady state
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! The input callback writes into an SPSC ring producer (`push_slice` is
//! lock-free). The output callback owns a [`crate::playback::mixer::Mixer`]
//! that only talks to the engine through crossbeam channels and an atomic
//! frame clock.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `CpalInput` and `CpalOutput` must be created and dropped on the
//! same thread, which is why `ParleyEngine` opens them inside its own thread.

pub mod device;
pub mod input;
pub mod output;
pub mod resample;

pub use device::{list_input_devices, list_output_devices, DeviceInfo};
pub use input::CpalInput;
pub use output::CpalOutput;
