// ===================== wav.rs =====================
//! 44-byte RIFF/WAVE header and the incremental container writer.

use std::io::{self, BufWriter, Write};

use crate::{
    error::{Error, Result},
    storage::StorageSink,
};

pub const HEADER_LEN: usize = 44;
const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub data_bytes: u32,
}

impl WavHeader {
    /// Mono, 16-bit PCM for `num_samples` samples; `None` if any size field
    /// would not fit its u32.
    pub fn mono16(sample_rate: u32, num_samples: u32) -> Option<Self> {
        let mut h = Self { sample_rate, channels: 1, bits_per_sample: 16, data_bytes: 0 };
        h.data_bytes = num_samples.checked_mul(u32::from(h.block_align()))?;
        h.data_bytes.checked_add(HEADER_LEN as u32 - 8)?;
        sample_rate.checked_mul(u32::from(h.block_align()))?;
        Some(h)
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }

    /// RIFF chunk size: everything after the first 8 bytes.
    pub fn container_size(&self) -> u32 {
        self.data_bytes + HEADER_LEN as u32 - 8
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut h = [0u8; HEADER_LEN];
        h[0..4].copy_from_slice(b"RIFF");
        h[4..8].copy_from_slice(&self.container_size().to_le_bytes());
        h[8..12].copy_from_slice(b"WAVE");
        h[12..16].copy_from_slice(b"fmt ");
        h[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
        h[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
        h[22..24].copy_from_slice(&self.channels.to_le_bytes());
        h[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        h[28..32].copy_from_slice(&self.byte_rate().to_le_bytes());
        h[32..34].copy_from_slice(&self.block_align().to_le_bytes());
        h[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        h[36..40].copy_from_slice(b"data");
        h[40..44].copy_from_slice(&self.data_bytes.to_le_bytes());
        h
    }
}

/// Raw ADC reading → signed PCM: recentre on the midpoint, apply gain.
#[derive(Debug, Clone, Copy)]
pub struct SampleScale {
    pub midpoint: u16,
    pub gain: i32,
}

impl SampleScale {
    pub fn to_pcm(&self, raw: u16) -> i16 {
        let v = (i32::from(raw) - i32::from(self.midpoint)).saturating_mul(self.gain);
        v.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
    }
}

/// Writes one recording: header first, then exactly the declared number of
/// samples. The header is never patched, so the caller must append exactly
/// `num_samples` times.
pub struct ContainerWriter<'a, S: StorageSink> {
    sink: &'a mut S,
    out: BufWriter<S::Writer>,
    name: String,
    scale: SampleScale,
    declared: u32,
    written: u32,
}

impl<'a, S: StorageSink> ContainerWriter<'a, S> {
    pub fn begin(sink: &'a mut S, name: &str, sample_rate: u32, num_samples: u32, scale: SampleScale) -> Result<Self> {
        let header = WavHeader::mono16(sample_rate, num_samples).ok_or_else(|| {
            Error::storage(name, io::Error::new(io::ErrorKind::InvalidInput, "recording too large for a WAV header"))
        })?;
        let file = sink.create_for_write(name)?;
        let mut out = BufWriter::with_capacity(512, file);
        out.write_all(&header.to_bytes()).map_err(|e| Error::storage(name, e))?;

        Ok(Self { sink, out, name: name.to_owned(), scale, declared: num_samples, written: 0 })
    }

    pub fn append_sample(&mut self, raw: u16) -> Result<()> {
        let s = self.scale.to_pcm(raw);
        self.out.write_all(&s.to_le_bytes()).map_err(|e| Error::storage(&self.name, e))?;
        self.written += 1;
        Ok(())
    }

    pub fn declared(&self) -> u32 {
        self.declared
    }

    /// Seals the file; returns how many samples were appended.
    pub fn finish(self) -> Result<u32> {
        let Self { sink, out, name, written, .. } = self;
        let file = out.into_inner().map_err(|e| Error::storage(&name, e.into_error()))?;
        sink.close(file).map_err(|e| Error::storage(&name, e))?;
        Ok(written)
    }
}
