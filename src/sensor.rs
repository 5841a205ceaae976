// ===================== sensor.rs =====================
use core::f32::consts::TAU;

/// Source of raw analog readings, one per sampling tick.
pub trait Sensor {
    fn read_raw(&mut self) -> u16;
}

/// Fake stethoscope for host runs: a "lub" and a quieter "dub" per beat,
/// each a short decaying 60 Hz burst around the ADC midpoint.
pub struct SyntheticHeartbeat {
    sample_rate: f32,
    beat_period: f32,
    midpoint: f32,
    amplitude: f32,
    n: u64,
}

impl SyntheticHeartbeat {
    pub fn new(sample_rate: u32, bpm: f32, midpoint: u16) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            beat_period: 60.0 / bpm.max(1.0),
            midpoint: f32::from(midpoint),
            amplitude: f32::from(midpoint) * 0.8,
            n: 0,
        }
    }

    fn burst(t: f32) -> f32 {
        if !(0.0..0.12).contains(&t) {
            return 0.0;
        }
        (-t * 30.0).exp() * (TAU * 60.0 * t).sin()
    }
}

impl Sensor for SyntheticHeartbeat {
    fn read_raw(&mut self) -> u16 {
        let t = (self.n as f32 / self.sample_rate) % self.beat_period;
        self.n += 1;
        let v = Self::burst(t) + 0.6 * Self::burst(t - 0.3);
        (self.midpoint + self.amplitude * v).clamp(0.0, f32::from(u16::MAX)) as u16
    }
}
