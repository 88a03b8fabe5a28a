//! WAV file reader

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hound::{SampleFormat, WavReader};

use super::{AudioMetadata, SampleReader};
use crate::error::SampleReadError;

/// Mono view of a WAV file
///
/// Multi-channel files are down-mixed by averaging. Seek + read pairs are
/// serialized through a mutex, so one reader can be shared by every render
/// worker.
pub struct WavSampleReader {
    path: PathBuf,
    reader: Mutex<Option<WavReader<BufReader<File>>>>,
    channels: u16,
    format: SampleFormat,
    bits_per_sample: u16,
    total_frames: u64,
    metadata: AudioMetadata,
}

impl std::fmt::Debug for WavSampleReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSampleReader")
            .field("path", &self.path)
            .field("channels", &self.channels)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl WavSampleReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SampleReadError> {
        let path = path.as_ref().to_path_buf();
        let reader = WavReader::open(&path).map_err(|source| SampleReadError::Open {
            path: path.clone(),
            source,
        })?;

        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(SampleReadError::UnsupportedFormat(format!(
                "{} channels at {} Hz",
                spec.channels, spec.sample_rate
            )));
        }
        if spec.sample_format == SampleFormat::Int && !(1..=32).contains(&spec.bits_per_sample) {
            return Err(SampleReadError::UnsupportedFormat(format!(
                "{}-bit integer PCM",
                spec.bits_per_sample
            )));
        }

        let total_frames = reader.duration() as u64;
        let metadata = AudioMetadata {
            duration_seconds: total_frames as f64 / spec.sample_rate as f64,
            sample_rate: spec.sample_rate,
        };
        log::debug!(
            "[WAV] Opened {:?}: {} ch, {} Hz, {:.2}s",
            path,
            spec.channels,
            spec.sample_rate,
            metadata.duration_seconds
        );

        Ok(Self {
            path,
            reader: Mutex::new(Some(reader)),
            channels: spec.channels,
            format: spec.sample_format,
            bits_per_sample: spec.bits_per_sample,
            total_frames,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<WavReader<BufReader<File>>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_interleaved(
        &self,
        reader: &mut WavReader<BufReader<File>>,
        start_frame: u64,
        sample_count: usize,
    ) -> Result<Vec<f64>, SampleReadError> {
        let read_error = |message: String| SampleReadError::Read {
            frame: start_frame,
            message,
        };

        // Frame offsets in a WAV file fit in u32 by construction
        reader
            .seek(start_frame as u32)
            .map_err(|e| read_error(e.to_string()))?;

        match self.format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .take(sample_count)
                .map(|s| s.map(f64::from).map_err(|e| read_error(e.to_string())))
                .collect(),
            SampleFormat::Int => {
                let scale = (1_i64 << (self.bits_per_sample - 1)) as f64;
                reader
                    .samples::<i32>()
                    .take(sample_count)
                    .map(|s| {
                        s.map(|v| v as f64 / scale)
                            .map_err(|e| read_error(e.to_string()))
                    })
                    .collect()
            }
        }
    }
}

impl SampleReader for WavSampleReader {
    fn read_frames(&self, start_frame: u64, frame_count: u64) -> Result<Vec<f64>, SampleReadError> {
        let mut guard = self.lock();
        let reader = guard.as_mut().ok_or(SampleReadError::Closed)?;

        let start = start_frame.min(self.total_frames);
        let frames = frame_count.min(self.total_frames - start) as usize;
        if frames == 0 {
            return Ok(Vec::new());
        }

        let channels = self.channels as usize;
        let interleaved = self.read_interleaved(reader, start, frames * channels)?;
        drop(guard);

        if channels == 1 {
            return Ok(interleaved);
        }
        Ok(interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f64>() / channels as f64)
            .collect())
    }

    fn metadata(&self) -> AudioMetadata {
        self.metadata
    }

    fn close(&self) {
        if self.lock().take().is_some() {
            log::debug!("[WAV] Closed {:?}", self.path);
        }
    }
}
