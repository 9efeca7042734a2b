pub mod audio_clock;
pub mod config;
pub mod correlation;
pub mod dual_clock;
pub mod envelope;
pub mod error;
pub mod link;
pub mod listeners;
pub mod offline;
pub mod playback_buffer;
pub mod processor;
pub mod remote;
pub mod sequencer_engine;
pub mod sequencer_handle;
pub mod sound_banks;
pub mod synth_handle;
pub mod worker;

pub use audio_clock::*;
pub use config::*;
pub use correlation::*;
pub use dual_clock::*;
pub use envelope::*;
pub use error::*;
pub use link::*;
pub use listeners::*;
pub use offline::*;
pub use playback_buffer::*;
pub use processor::*;
pub use remote::*;
pub use sequencer_engine::*;
pub use sequencer_handle::*;
pub use sound_banks::*;
pub use synth_handle::*;
pub use worker::*;
