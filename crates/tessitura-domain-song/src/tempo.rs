use serde::{Deserialize, Serialize};
use tessitura_ports::types::{Seconds, Tick};

pub const DEFAULT_US_PER_QUARTER: u32 = 500_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoPoint {
    pub tick: Tick,
    pub us_per_quarter: u32,
}

/// Piecewise-constant tempo map converting between ticks and song seconds.
#[derive(Clone, Debug)]
pub struct TempoMap {
    ppq: u16,
    segments: Vec<TempoSegment>,
}

#[derive(Clone, Copy, Debug)]
struct TempoSegment {
    start_tick: Tick,
    start_us: i64,
    us_per_quarter: u32,
}

impl TempoMap {
    pub fn new(ppq: u16, points: &[TempoPoint]) -> Self {
        let ppq = ppq.max(1);
        let mut points = points.to_vec();
        points.sort_by_key(|p| p.tick);
        if points.is_empty() || points[0].tick != 0 {
            points.insert(
                0,
                TempoPoint {
                    tick: 0,
                    us_per_quarter: DEFAULT_US_PER_QUARTER,
                },
            );
        }

        let mut segments: Vec<TempoSegment> = Vec::with_capacity(points.len());
        let mut current_us = 0i64;
        for (idx, point) in points.iter().enumerate() {
            if idx > 0 {
                let prev = &points[idx - 1];
                current_us += ticks_to_us(point.tick - prev.tick, prev.us_per_quarter, ppq);
            }
            // a later point on the same tick overrides the earlier one
            if let Some(last) = segments.last_mut() {
                if last.start_tick == point.tick {
                    last.us_per_quarter = point.us_per_quarter.max(1);
                    continue;
                }
            }
            segments.push(TempoSegment {
                start_tick: point.tick,
                start_us: current_us,
                us_per_quarter: point.us_per_quarter.max(1),
            });
        }

        Self { ppq, segments }
    }

    pub fn ppq(&self) -> u16 {
        self.ppq
    }

    pub fn tick_to_micros(&self, tick: Tick) -> i64 {
        let seg = self.segment_for_tick(tick);
        seg.start_us + ticks_to_us(tick - seg.start_tick, seg.us_per_quarter, self.ppq)
    }

    pub fn micros_to_tick(&self, micros: i64) -> Tick {
        let seg = self.segment_for_micros(micros);
        seg.start_tick + us_to_ticks(micros - seg.start_us, seg.us_per_quarter, self.ppq)
    }

    pub fn tick_to_seconds(&self, tick: Tick) -> Seconds {
        self.tick_to_micros(tick) as f64 / 1_000_000.0
    }

    pub fn seconds_to_tick(&self, seconds: Seconds) -> Tick {
        self.micros_to_tick((seconds * 1_000_000.0).round() as i64)
    }

    pub fn us_per_quarter_at(&self, tick: Tick) -> u32 {
        self.segment_for_tick(tick).us_per_quarter
    }

    fn segment_for_tick(&self, tick: Tick) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_tick > tick {
                break;
            }
            current = *seg;
        }
        current
    }

    fn segment_for_micros(&self, micros: i64) -> TempoSegment {
        let mut current = self.segments[0];
        for seg in &self.segments {
            if seg.start_us > micros {
                break;
            }
            current = *seg;
        }
        current
    }
}

fn ticks_to_us(ticks: Tick, us_per_quarter: u32, ppq: u16) -> i64 {
    let ticks = ticks as i128;
    let us_per_quarter = us_per_quarter as i128;
    let ppq = ppq as i128;
    ((ticks * us_per_quarter) / ppq) as i64
}

fn us_to_ticks(us: i64, us_per_quarter: u32, ppq: u16) -> Tick {
    let us = us as i128;
    let us_per_quarter = us_per_quarter as i128;
    let ppq = ppq as i128;
    ((us * ppq) / us_per_quarter) as Tick
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tempo_is_120_bpm() {
        let map = TempoMap::new(480, &[]);
        assert_eq!(map.tick_to_seconds(960), 1.0);
        assert_eq!(map.seconds_to_tick(1.5), 1440);
    }

    #[test]
    fn tempo_change_splits_segments() {
        let map = TempoMap::new(
            480,
            &[
                TempoPoint {
                    tick: 0,
                    us_per_quarter: 500_000,
                },
                TempoPoint {
                    tick: 960,
                    us_per_quarter: 1_000_000,
                },
            ],
        );
        assert_eq!(map.tick_to_seconds(960), 1.0);
        assert_eq!(map.tick_to_seconds(1440), 2.0);
        assert_eq!(map.seconds_to_tick(2.0), 1440);
        assert_eq!(map.us_per_quarter_at(1000), 1_000_000);
    }
}
