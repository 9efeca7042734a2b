pub mod clock;
pub mod midi;
pub mod render;
pub mod synth;
pub mod types;

pub use clock::*;
pub use midi::*;
pub use render::*;
pub use synth::*;
pub use types::*;
