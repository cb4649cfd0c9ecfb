//! PCM16 little-endian audio, base64 on the wire.

use crate::error::ClientError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Converts float samples to PCM16 bytes.
///
/// Samples are clamped to [-1, 1]; negative values scale by 32768 and
/// positive ones by 32767 so both ends of the range are reachable.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let value = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Converts PCM16 bytes to float samples. A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Encodes one captured frame for the uplink.
pub fn encode_frame(samples: &[f32]) -> String {
    STANDARD.encode(encode_pcm16(samples))
}

/// Decodes one downlink audio chunk.
pub fn decode_chunk(encoded: &str) -> Result<Vec<f32>, ClientError> {
    Ok(decode_pcm16(&STANDARD.decode(encoded)?))
}
