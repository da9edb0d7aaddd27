//! Canonical 44-byte WAV header handling
//!
//! The bridge moves raw PCM on the wire and only wraps it in a WAV container
//! at the edges: before handing audio to the transcription backend, and when
//! a synthesis backend returns headerless PCM. Encoding buffers the payload
//! in memory so the header lengths are written once, correct, with no
//! seek-back pass.

use crate::{Error, Result};

/// Length of the canonical RIFF/WAVE/fmt/data header
pub const HEADER_LEN: usize = 44;

/// PCM stream format described by a WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    /// Bytes per PCM frame across all channels
    #[must_use]
    pub const fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

impl Default for WavFormat {
    /// The bridge's native stream format: 24 kHz mono 16-bit
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

/// Parse the fixed 44-byte header at the start of `bytes`
///
/// Fails closed: anything shorter than 44 bytes, missing the RIFF/WAVE/fmt
/// magics, or claiming a sample depth that is not a whole number of bytes
/// yields `None` rather than reading garbage. Callers fall back to
/// [`WavFormat::default`].
#[must_use]
pub fn parse_header(bytes: &[u8]) -> Option<WavFormat> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" || &bytes[12..16] != b"fmt " {
        return None;
    }

    let channels = u16::from_le_bytes([bytes[22], bytes[23]]);
    let sample_rate = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
    let bits_per_sample = u16::from_le_bytes([bytes[34], bytes[35]]);

    if channels == 0 || sample_rate == 0 {
        return None;
    }
    // Sub-byte or oversized depths would make every byte-rate computation
    // downstream degenerate
    if bits_per_sample == 0 || bits_per_sample % 8 != 0 || bits_per_sample > 32 {
        return None;
    }

    Some(WavFormat {
        sample_rate,
        channels,
        bits_per_sample,
    })
}

/// Wrap raw 16-bit little-endian PCM bytes in a WAV container
///
/// # Errors
///
/// Returns error if `pcm` has an odd length or encoding fails.
pub fn encode_wav(pcm: &[u8], format: WavFormat) -> Result<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(Error::Wav(format!(
            "PCM payload has odd length {}",
            pcm.len()
        )));
    }

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(HEADER_LEN + pcm.len()));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Wav(e.to_string()))?;

        for pair in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| Error::Wav(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Wav(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Normalize a synthesis payload to a headered WAV byte sequence
///
/// Backends may return either a complete WAV file or bare PCM; bare PCM gets
/// the canonical header prepended using `fallback` as the format.
///
/// # Errors
///
/// Returns error if headerless PCM cannot be encoded.
pub fn ensure_wav(payload: Vec<u8>, fallback: WavFormat) -> Result<Vec<u8>> {
    if payload.len() >= 4 && &payload[0..4] == b"RIFF" {
        return Ok(payload);
    }
    tracing::debug!(
        bytes = payload.len(),
        sample_rate = fallback.sample_rate,
        "synthesis payload has no RIFF header, wrapping as WAV"
    );
    encode_wav(&payload, fallback)
}
