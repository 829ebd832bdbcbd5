//! WAV input.
//!
//! Thin wrapper over `hound`: reads RIFF/WAVE with integer (8/16/24/32 bit)
//! or IEEE-float samples, selects the first channel of multi-channel files,
//! and normalizes everything to `f32` in `[-1, 1]`.

use std::{
    io::BufReader,
    path::Path,
};

use hound::SampleFormat;

#[derive(Debug, thiserror::Error)]
#[error("wav source error")]
pub enum WavError {
    Hound(#[from] hound::Error),
    UnsupportedBitsPerSample { bits_per_sample: u16 },
}

/// Decoded mono audio.
#[derive(Clone, Debug)]
pub struct WavAudio {
    pub samples: Vec<f32>,
    pub sample_rate: f32,
}

/// Read a WAV file from disk.
pub fn read_wav(path: impl AsRef<Path>) -> Result<WavAudio, WavError> {
    read_wav_from(hound::WavReader::open(path)?)
}

/// Read WAV data from any reader.
pub fn read_wav_reader<R: std::io::Read>(reader: R) -> Result<WavAudio, WavError> {
    read_wav_from(hound::WavReader::new(BufReader::new(reader))?)
}

fn read_wav_from<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<WavAudio, WavError> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;
    let sample_rate = spec.sample_rate as f32;

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => first_channel(
            reader.into_samples::<f32>(),
            channels,
            |sample| sample,
        )?,
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = 1.0 / (1i64 << (bits - 1)) as f32;
            first_channel(reader.into_samples::<i32>(), channels, move |sample| {
                sample as f32 * scale
            })?
        }
        (_, bits_per_sample) => {
            return Err(WavError::UnsupportedBitsPerSample { bits_per_sample });
        }
    };

    Ok(WavAudio {
        samples,
        sample_rate,
    })
}

fn first_channel<S, R>(
    samples: hound::WavIntoSamples<R, S>,
    channels: usize,
    convert: impl Fn(S) -> f32,
) -> Result<Vec<f32>, WavError>
where
    S: hound::Sample,
    R: std::io::Read,
{
    let mut output = Vec::new();
    for (i, sample) in samples.enumerate() {
        let sample = sample?;
        if i % channels == 0 {
            output.push(convert(sample));
        }
    }
    Ok(output)
}

/// Write mono samples as 16-bit PCM; the counterpart of [`read_wav`] used by
/// the encoder-side tests and tools.
pub fn write_wav(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: f32,
) -> Result<(), WavError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// In-memory round trip through the 16-bit writer format, for tests.
pub fn write_wav_vec(samples: &[f32], sample_rate: f32) -> Result<Vec<u8>, WavError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bit_round_trip() {
        let samples: Vec<f32> = (0..480)
            .map(|i| (std::f32::consts::TAU * 1000.0 * i as f32 / 48000.0).sin() * 0.8)
            .collect();
        let bytes = write_wav_vec(&samples, 48000.0).unwrap();
        let audio = read_wav_reader(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(audio.sample_rate, 48000.0);
        assert_eq!(audio.samples.len(), samples.len());
        for (a, b) in audio.samples.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn first_channel_of_stereo_is_selected() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..100i16 {
            writer.write_sample(i).unwrap();
            writer.write_sample(-i).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_wav_reader(std::io::Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(audio.samples.len(), 100);
        assert!(audio.samples[10] > 0.0);
    }
}
