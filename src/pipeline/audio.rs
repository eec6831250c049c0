//! In-memory PCM track used by the conversation mixer.

/// Interleaved f32 samples at a fixed rate and channel count.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
}

pub fn db_to_gain(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

impl AudioTrack {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn silent(sample_rate: u32, channels: u16, ms: u64) -> Self {
        let mut track = Self::new(sample_rate, channels, Vec::new());
        track.pad_to(track.ms_to_frames(ms));
        track
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn ms_to_frames(&self, ms: u64) -> usize {
        (ms * self.sample_rate as u64 / 1000) as usize
    }

    pub fn same_layout(&self, other: &AudioTrack) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    pub fn append(&mut self, other: &AudioTrack) {
        self.samples.extend_from_slice(&other.samples);
    }

    /// Extend with silence up to `frames`. Never shortens the track.
    pub fn pad_to(&mut self, frames: usize) {
        let wanted = frames * self.channels as usize;
        if wanted > self.samples.len() {
            self.samples.resize(wanted, 0.0);
        }
    }

    pub fn append_silence_ms(&mut self, ms: u64) {
        let frames = self.frames() + self.ms_to_frames(ms);
        self.pad_to(frames);
    }

    /// Apply `db` of gain to frames `[start, end)`.
    pub fn gain_range_db(&mut self, start: usize, end: usize, db: f64) {
        let gain = db_to_gain(db);
        let ch = self.channels as usize;
        let end = end.min(self.frames());
        if start >= end {
            return;
        }
        for s in &mut self.samples[start * ch..end * ch] {
            *s *= gain;
        }
    }

    pub fn gain_db(&mut self, db: f64) {
        let frames = self.frames();
        self.gain_range_db(0, frames, db);
    }

    /// Linear ramp from silence over the first `ms`.
    pub fn fade_in_ms(&mut self, ms: u64) {
        let ch = self.channels as usize;
        let len = self.ms_to_frames(ms).min(self.frames());
        for frame in 0..len {
            let gain = frame as f32 / len as f32;
            for s in &mut self.samples[frame * ch..(frame + 1) * ch] {
                *s *= gain;
            }
        }
    }

    /// Linear ramp to silence over the last `ms`.
    pub fn fade_out_ms(&mut self, ms: u64) {
        let ch = self.channels as usize;
        let frames = self.frames();
        let len = self.ms_to_frames(ms).min(frames);
        let start = frames - len;
        for i in 0..len {
            let gain = (len - i) as f32 / len as f32;
            let frame = start + i;
            for s in &mut self.samples[frame * ch..(frame + 1) * ch] {
                *s *= gain;
            }
        }
    }

    /// Sum `other` into this track starting at `frame`, padding first if needed.
    pub fn overlay_at(&mut self, other: &AudioTrack, frame: usize) {
        let end = frame + other.frames();
        self.pad_to(end);
        let offset = frame * self.channels as usize;
        for (dst, src) in self.samples[offset..].iter_mut().zip(&other.samples) {
            *dst += *src;
        }
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Scale so the loudest sample sits `headroom_db` below full scale.
    pub fn normalize_peak(&mut self, headroom_db: f64) {
        let peak = self.peak();
        if peak <= f32::EPSILON {
            return;
        }
        let target = db_to_gain(-headroom_db.abs());
        let gain = target / peak;
        for s in &mut self.samples {
            *s *= gain;
        }
    }
}
