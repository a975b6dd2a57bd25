//! Canonical 44-byte PCM WAV codec.
//!
//! Only the minimal RIFF/WAVE layout is produced and understood: a `fmt `
//! chunk of 16 bytes followed directly by the `data` chunk. No extension
//! chunks are read or written.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Size of the canonical header in bytes.
pub const HEADER_LEN: usize = 44;

/// Offset of the RIFF chunk size field.
const RIFF_SIZE_OFFSET: u64 = 4;

/// Offset of the `data` chunk size field.
pub const DATA_SIZE_OFFSET: u64 = 40;

/// PCM audio format tag.
const FORMAT_PCM: u16 = 1;

/// Sample layout of a stream or file. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// 16-bit signed PCM at the given rate and channel count.
    pub const fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels, bits_per_sample: 16 }
    }

    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample / 8
    }

    /// Bytes per frame, saturating at `u16::MAX` for absurd channel counts.
    pub fn block_align(&self) -> u16 {
        self.channels.saturating_mul(self.bytes_per_sample())
    }

    /// Bytes per second, saturating at `u32::MAX`.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(self.block_align() as u32)
    }

    fn frame_bytes(&self) -> u64 {
        self.channels as u64 * self.bytes_per_sample() as u64
    }

    /// Duration in seconds of a payload of `data_size` bytes.
    ///
    /// Returns `None` when any format field is degenerate, so callers can fall
    /// back to wall-clock time.
    pub fn duration_for(&self, data_size: u64) -> Option<f64> {
        let frame_bytes = self.frame_bytes();
        if self.sample_rate == 0 || frame_bytes == 0 {
            return None;
        }
        let frames = data_size / frame_bytes;
        Some(frames as f64 / self.sample_rate as f64)
    }
}

/// Serialize a canonical header for a payload of `data_size` bytes.
pub fn encode_header(format: &AudioFormat, data_size: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];

    // RIFF chunk
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&36u32.wrapping_add(data_size).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&FORMAT_PCM.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Parse a canonical header, returning the format and declared payload size.
///
/// Only the magic tags are validated; byte rate and block align are not
/// cross-checked.
pub fn decode_header(bytes: &[u8]) -> Result<(AudioFormat, u32)> {
    if bytes.len() < 4 || &bytes[0..4] != b"RIFF" {
        return Err(Error::InvalidFormat("missing RIFF tag"));
    }
    if bytes.len() < 12 || &bytes[8..12] != b"WAVE" {
        return Err(Error::InvalidFormat("missing WAVE tag"));
    }
    if bytes.len() < HEADER_LEN {
        return Err(Error::InvalidFormat("header shorter than 44 bytes"));
    }

    let format = AudioFormat {
        channels: read_u16(bytes, 22),
        sample_rate: read_u32(bytes, 24),
        bits_per_sample: read_u16(bytes, 34),
    };
    let data_size = read_u32(bytes, 40);

    Ok((format, data_size))
}

/// Little-endian 16-bit encoding of a sample buffer.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode little-endian 16-bit samples. A trailing odd byte is dropped.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(|pair| i16::from_le_bytes([pair[0], pair[1]])).collect()
}

/// Overwrite the size fields of an already written header.
///
/// Used once the true payload length is known, after recording stops.
/// The stream position is left just past the `data` size field.
pub fn patch_data_size<F: Write + Seek>(file: &mut F, data_size: u32) -> io::Result<()> {
    file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
    file.write_all(&36u32.wrapping_add(data_size).to_le_bytes())?;
    file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
    file.write_all(&data_size.to_le_bytes())?;
    file.flush()
}

/// Read a whole WAV file into memory.
///
/// Fails with `UnreadableFile` on I/O errors, an invalid header, a non 16-bit
/// layout, or a payload shorter than the declared size. Bytes past the
/// declared payload are ignored and samples are truncated to whole frames.
pub fn read_file(path: &Path) -> Result<(AudioFormat, Vec<i16>)> {
    let mut file = File::open(path).map_err(|e| Error::unreadable(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| Error::unreadable(path, e))?;

    let (format, data_size) = decode_header(&bytes).map_err(|e| Error::unreadable(path, e))?;
    if format.bits_per_sample != 16 {
        return Err(Error::unreadable(path, format!("unsupported {} bits per sample", format.bits_per_sample)));
    }

    let payload = &bytes[HEADER_LEN..];
    let declared = data_size as usize;
    if payload.len() < declared {
        return Err(Error::unreadable(path, format!("payload truncated: {} of {} bytes", payload.len(), declared)));
    }

    let mut samples = bytes_to_samples(&payload[..declared]);
    let channels = format.channels.max(1) as usize;
    samples.truncate(samples.len() - samples.len() % channels);

    Ok((format, samples))
}

/// Write a complete WAV file in one go.
pub fn write_file(path: &Path, format: &AudioFormat, samples: &[i16]) -> io::Result<()> {
    let payload = samples_to_bytes(samples);
    let mut file = File::create(path)?;
    file.write_all(&encode_header(format, payload.len() as u32))?;
    file.write_all(&payload)?;
    file.sync_all()
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_layout() {
        let format = AudioFormat::pcm16(44100, 2);
        let header = encode_header(&format, 640);

        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(read_u32(&header, 4), 36 + 640);
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(read_u32(&header, 16), 16);
        assert_eq!(read_u16(&header, 20), 1); // PCM
        assert_eq!(read_u16(&header, 22), 2);
        assert_eq!(read_u32(&header, 24), 44100);
        assert_eq!(read_u32(&header, 28), 44100 * 2 * 2);
        assert_eq!(read_u16(&header, 32), 4);
        assert_eq!(read_u16(&header, 34), 16);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(read_u32(&header, 40), 640);
    }

    #[test]
    fn test_header_and_samples_round_trip() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN, 1234, -4321];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);

        for format in [AudioFormat::pcm16(44100, 1), AudioFormat::pcm16(48000, 2), AudioFormat::pcm16(8000, 1)] {
            let header = encode_header(&format, bytes.len() as u32);
            assert_eq!(decode_header(&header).unwrap(), (format, bytes.len() as u32));
        }

        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_extreme_formats_encode_without_overflow() {
        let formats = [
            AudioFormat { sample_rate: 44100, channels: 40000, bits_per_sample: 16 },
            AudioFormat { sample_rate: 3_000_000_000, channels: 1, bits_per_sample: 16 },
            AudioFormat { sample_rate: u32::MAX, channels: u16::MAX, bits_per_sample: u16::MAX },
        ];

        for format in formats {
            let header = encode_header(&format, u32::MAX);
            assert_eq!(decode_header(&header).unwrap(), (format, u32::MAX));
            assert_eq!(read_u32(&header, 4), 35); // RIFF size wraps like the on-disk field
        }

        assert_eq!(formats[0].block_align(), u16::MAX);
        assert_eq!(formats[1].byte_rate(), u32::MAX);
        assert_eq!(formats[0].duration_for(80000 * 44100), Some(1.0));
    }

    #[test]
    fn test_bytes_to_samples_drops_odd_byte() {
        assert_eq!(bytes_to_samples(&[0x34, 0x12, 0xff]), vec![0x1234]);
        assert!(bytes_to_samples(&[0x01]).is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut header = encode_header(&AudioFormat::pcm16(44100, 1), 0);
        header[0..4].copy_from_slice(b"RIFX");
        assert!(matches!(decode_header(&header), Err(Error::InvalidFormat(_))));

        let mut header = encode_header(&AudioFormat::pcm16(44100, 1), 0);
        header[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(decode_header(&header), Err(Error::InvalidFormat(_))));

        assert!(matches!(decode_header(b""), Err(Error::InvalidFormat(_))));
        assert!(matches!(decode_header(&[0u8; 44]), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_decode_is_tolerant_of_inconsistent_fields() {
        let mut header = encode_header(&AudioFormat::pcm16(22050, 1), 100);
        // Corrupt byte rate and block align; they are not cross-checked.
        header[28..32].copy_from_slice(&7u32.to_le_bytes());
        header[32..34].copy_from_slice(&9u16.to_le_bytes());
        let (format, size) = decode_header(&header).unwrap();
        assert_eq!(format, AudioFormat::pcm16(22050, 1));
        assert_eq!(size, 100);
    }

    #[test]
    fn test_duration_from_header() {
        let header = encode_header(&AudioFormat::pcm16(44100, 1), 441000);
        let (format, size) = decode_header(&header).unwrap();
        assert_eq!(format.duration_for(size as u64), Some(5.0));
    }

    #[test]
    fn test_duration_degenerate_format() {
        assert_eq!(AudioFormat::pcm16(0, 1).duration_for(1000), None);
        assert_eq!(AudioFormat::pcm16(44100, 0).duration_for(1000), None);
        assert_eq!(AudioFormat { sample_rate: 44100, channels: 1, bits_per_sample: 0 }.duration_for(1000), None);
    }

    #[test]
    fn test_patch_data_size() {
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_all(&encode_header(&AudioFormat::pcm16(16000, 1), 0)).unwrap();
        cursor.write_all(&[0u8; 20]).unwrap();

        patch_data_size(&mut cursor, 20).unwrap();

        let bytes = cursor.into_inner();
        assert_eq!(bytes.len(), HEADER_LEN + 20);
        assert_eq!(read_u32(&bytes, 40), 20);
        assert_eq!(read_u32(&bytes, 4), 56);
    }

    #[test]
    fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.wav");
        let format = AudioFormat::pcm16(8000, 2);
        write_file(&path, &format, &[1, 2, 3, 4]).unwrap();

        let (read_format, samples) = read_file(&path).unwrap();
        assert_eq!(read_format, format);
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_read_file_rejects_truncated_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        let mut bytes = encode_header(&AudioFormat::pcm16(8000, 1), 100).to_vec();
        bytes.extend_from_slice(&[0u8; 10]);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(read_file(&path), Err(Error::UnreadableFile { .. })));
    }

    #[test]
    fn test_read_file_rejects_invalid_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, [7u8; 64]).unwrap();

        assert!(matches!(read_file(&path), Err(Error::UnreadableFile { .. })));
    }

    #[test]
    fn test_read_file_truncates_to_whole_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.wav");
        write_file(&path, &AudioFormat::pcm16(8000, 2), &[10, 20, 30]).unwrap();

        let (_, samples) = read_file(&path).unwrap();
        assert_eq!(samples, vec![10, 20]);
    }
}
