//! Media Test Fixture Generator
//!
//! In-memory WAV and PNG payloads for upload and media tests

use std::io::Cursor;

/// A mono 16-bit WAV file of `duration_ms` filled with a sawtooth
pub fn wav_bytes(duration_ms: u32, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let total_samples = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        for i in 0..total_samples {
            let sample = ((i % 64) as i16 - 32) * 512;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// PNG signature and IHDR chunk for an image of `width` x `height`
///
/// Enough for header decoding and type sniffing; not a displayable image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    png.extend_from_slice(&13u32.to_be_bytes());
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&width.to_be_bytes());
    png.extend_from_slice(&height.to_be_bytes());
    // bit depth, color type, compression, filter, interlace
    png.extend_from_slice(&[8, 6, 0, 0, 0]);
    // CRC is not checked by the decoders used here
    png.extend_from_slice(&[0, 0, 0, 0]);
    png
}
