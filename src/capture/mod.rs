//! Capture collaborators
//!
//! Real camera and microphone drivers live outside this crate; they plug in
//! through [`VideoSource`] and [`AudioSource`]. The synthetic sources produce
//! a moving test pattern and a sine tone for demos and tests.

mod synthetic;
mod traits;

pub use synthetic::{SyntheticAudioSource, SyntheticVideoSource};
pub use traits::{AudioSource, BlockCallback, FrameCallback, VideoSource};
