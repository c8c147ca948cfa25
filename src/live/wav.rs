// 每個 chunk 都自帶 RIFF/WAVE 標頭，單獨拿出來就能播

use std::time::Duration;

pub const MIME: &str = "audio/wav";
const HEADER_LEN: usize = 44;

/// Interleaved signed 16-bit little-endian PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.bytes_per_frame() as u32
    }

    /// Whole frames covering `len`.
    pub fn bytes_for(&self, len: Duration) -> usize {
        let frames = (self.sample_rate as u128 * len.as_millis() / 1000) as usize;
        frames * self.bytes_per_frame()
    }
}

/// Wraps `pcm` (trailing partial frame dropped) in a standalone WAV file.
pub fn encode(fmt: PcmFormat, pcm: &[u8]) -> Vec<u8> {
    let frame = fmt.bytes_per_frame().max(1);
    let data = &pcm[..pcm.len() - pcm.len() % frame];
    let data_len = data.len() as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + data.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&fmt.channels.to_le_bytes());
    out.extend_from_slice(&fmt.sample_rate.to_le_bytes());
    out.extend_from_slice(&fmt.byte_rate().to_le_bytes());
    out.extend_from_slice(&(fmt.bytes_per_frame() as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn u32_at(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

/// Play length of a WAV file, `None` if `bytes` is not one.
pub fn duration(bytes: &[u8]) -> Option<Duration> {
    if bytes.get(0..4)? != b"RIFF" || bytes.get(8..12)? != b"WAVE" {
        return None;
    }
    let mut at = 12;
    let mut byte_rate = None;
    while at + 8 <= bytes.len() {
        let id = &bytes[at..at + 4];
        let size = u32_at(bytes, at + 4)? as usize;
        let body = at + 8;
        match id {
            b"fmt " => byte_rate = u32_at(bytes, body + 8),
            b"data" => {
                let rate = byte_rate.filter(|r| *r > 0)?;
                let len = size.min(bytes.len() - body);
                return Some(Duration::from_secs_f64(len as f64 / rate as f64));
            }
            _ => {}
        }
        at = body + size + (size & 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEREO_48K: PcmFormat = PcmFormat { sample_rate: 48_000, channels: 2 };

    #[test]
    fn half_second_segment() {
        let n = STEREO_48K.bytes_for(Duration::from_millis(500));
        assert_eq!(n, 24_000 * 4);

        let wav = encode(STEREO_48K, &vec![0u8; n]);
        assert_eq!(wav.len(), 44 + n);
        assert_eq!(duration(&wav), Some(Duration::from_millis(500)));
    }

    #[test]
    fn partial_frame_is_dropped() {
        let wav = encode(STEREO_48K, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(wav.len(), 44 + 4);
        assert_eq!(u32_at(&wav, 40), Some(4));
    }

    #[test]
    fn not_a_wav() {
        assert_eq!(duration(b"OggS\0\0\0\0"), None);
        assert_eq!(duration(&[]), None);
    }
}
