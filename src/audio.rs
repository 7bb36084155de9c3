use std::io::Cursor;
use std::path::Path;

/// Sample rate the engine plays synthesized prompts at.
pub const PROMPT_SAMPLE_RATE: u32 = 8000;

/// Basic facts about a recorded WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// Read the header of a recording without decoding its samples.
pub fn inspect_wav(path: &Path) -> Result<WavInfo, AudioError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let frames = reader.duration() as u64;
    Ok(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration_ms: frames * 1000 / spec.sample_rate.max(1) as u64,
    })
}

/// Encode mono PCM samples as a 16-bit WAV file in memory.
pub fn pcm_to_wav(pcm_data: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let mut buffer = Cursor::new(Vec::new());

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(&mut buffer, spec)?;
    for &sample in pcm_data {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(buffer.into_inner())
}

/// Decode an in-memory 16-bit WAV to mono samples and its sample rate.
///
/// Multi-channel input is downmixed.
pub fn wav_to_pcm(wav_data: &[u8]) -> Result<(Vec<i16>, u32), AudioError> {
    let reader = hound::WavReader::new(Cursor::new(wav_data))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AudioError::Unsupported(format!(
            "{}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<Result<_, _>>()?;

    let channels = spec.channels.max(1) as usize;
    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        samples
    };

    Ok((mono, spec.sample_rate))
}

/// Resample audio using linear interpolation.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            let a = samples[idx] as f64;
            let b = samples[idx + 1] as f64;
            (a + (b - a) * frac) as i16
        } else {
            samples[idx.min(samples.len() - 1)]
        };

        output.push(sample);
    }

    output
}

/// Join several WAV clips into one mono clip at `sample_rate`.
pub fn concat_wavs(clips: &[Vec<u8>], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let mut joined = Vec::new();
    for clip in clips {
        let (pcm, rate) = wav_to_pcm(clip)?;
        joined.extend(resample_linear(&pcm, rate, sample_rate));
    }
    if joined.is_empty() {
        return Err(AudioError::Empty);
    }
    Ok(pcm_to_wav(&joined, sample_rate)?)
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("failed to read WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported WAV format: {0}")]
    Unsupported(String),
    #[error("no audio samples")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_roundtrip() {
        let samples: Vec<i16> = (0..100).map(|i| (i * 100) as i16).collect();
        let wav = pcm_to_wav(&samples, 16000).unwrap();
        let (decoded, rate) = wav_to_pcm(&wav).unwrap();
        assert_eq!(samples, decoded);
        assert_eq!(rate, 16000);
    }

    #[test]
    fn inspect_reports_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("name_1.wav16");
        let half_second = vec![0i16; 8000];
        std::fs::write(&path, pcm_to_wav(&half_second, 16000).unwrap()).unwrap();

        let info = inspect_wav(&path).unwrap();
        assert_eq!(info.sample_rate, 16000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.duration_ms, 500);
    }

    #[test]
    fn inspect_rejects_non_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"definitely not RIFF").unwrap();
        assert!(inspect_wav(&path).is_err());
    }

    #[test]
    fn resample_halves_length() {
        let samples = vec![1000i16; 1600];
        let out = resample_linear(&samples, 16000, 8000);
        assert_eq!(out.len(), 800);
        assert!(out.iter().all(|&s| s == 1000));
    }

    #[test]
    fn concat_joins_at_target_rate() {
        let a = pcm_to_wav(&vec![1i16; 800], 8000).unwrap();
        let b = pcm_to_wav(&vec![2i16; 1600], 16000).unwrap();
        let joined = concat_wavs(&[a, b], 8000).unwrap();

        let (pcm, rate) = wav_to_pcm(&joined).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(pcm.len(), 1600);
        assert_eq!(pcm[0], 1);
        assert_eq!(pcm[1599], 2);
    }

    #[test]
    fn concat_of_nothing_is_error() {
        assert!(matches!(concat_wavs(&[], 8000), Err(AudioError::Empty)));
    }
}
