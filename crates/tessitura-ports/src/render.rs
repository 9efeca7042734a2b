use serde::{Deserialize, Serialize};

pub const REVERB_BUS: usize = 0;
pub const CHORUS_BUS: usize = 1;
pub const EFFECT_BUSES: usize = 2;
pub const DRY_BUSES: usize = 16;

/// Layout of one rendered quantum: every bus contributes a left block followed
/// by a right block of `quantum_frames` samples. Effect buses come first, then
/// the dry channel buses. Writer and reader must agree on the quantum size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusLayout {
    pub quantum_frames: usize,
}

impl BusLayout {
    pub fn new(quantum_frames: usize) -> Self {
        Self {
            quantum_frames: quantum_frames.max(1),
        }
    }

    pub fn bus_count(&self) -> usize {
        EFFECT_BUSES + DRY_BUSES
    }

    pub fn buffer_len(&self) -> usize {
        self.bus_count() * 2 * self.quantum_frames
    }

    /// Dry bus carrying the given (absolute) channel.
    pub fn dry_bus(&self, channel: usize) -> usize {
        EFFECT_BUSES + channel % DRY_BUSES
    }

    pub fn left_offset(&self, bus: usize) -> usize {
        bus * 2 * self.quantum_frames
    }

    pub fn right_offset(&self, bus: usize) -> usize {
        self.left_offset(bus) + self.quantum_frames
    }

    pub fn bus<'a>(&self, buffer: &'a [f32], bus: usize) -> (&'a [f32], &'a [f32]) {
        let q = self.quantum_frames;
        let start = self.left_offset(bus);
        let (left, right) = buffer[start..start + 2 * q].split_at(q);
        (left, right)
    }

    pub fn bus_mut<'a>(&self, buffer: &'a mut [f32], bus: usize) -> (&'a mut [f32], &'a mut [f32]) {
        let q = self.quantum_frames;
        let start = self.left_offset(bus);
        let (left, right) = buffer[start..start + 2 * q].split_at_mut(q);
        (left, right)
    }

    /// Sums every bus into a stereo pair. `out_l`/`out_r` may be shorter than
    /// a quantum; extra frames are ignored.
    pub fn mix_down(&self, buffer: &[f32], out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len()).min(self.quantum_frames);
        out_l[..frames].fill(0.0);
        out_r[..frames].fill(0.0);
        for bus in 0..self.bus_count() {
            let (left, right) = self.bus(buffer, bus);
            for i in 0..frames {
                out_l[i] += left[i];
                out_r[i] += right[i];
            }
        }
    }
}
