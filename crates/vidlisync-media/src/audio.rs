//! PCM and WAV helpers.
//!
//! Audio moves through the pipeline as raw 16-bit little-endian mono PCM at
//! [`SAMPLE_RATE`]; it is only wrapped in a WAV container when an HTTP engine
//! needs a file upload.

pub const SAMPLE_RATE: u32 = 16_000;

/// Wrap raw 16-bit PCM samples in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Decode little-endian 16-bit samples. A trailing odd byte is dropped.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Produce an uploadable WAV file from either raw PCM or an existing WAV.
pub fn ensure_wav(bytes: &[u8]) -> Vec<u8> {
    if is_wav(bytes) {
        bytes.to_vec()
    } else {
        pcm_to_wav(&pcm_bytes_to_samples(bytes), SAMPLE_RATE, 1, 16)
    }
}

/// Duration of raw 16-bit mono PCM at [`SAMPLE_RATE`], in seconds.
pub fn pcm_duration_secs(bytes: &[u8]) -> f64 {
    bytes.len() as f64 / (SAMPLE_RATE as f64 * 2.0)
}
