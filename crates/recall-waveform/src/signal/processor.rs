//! Chunked display processing over a `SampleReader`

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{
    envelope_smooth, AudioMetadata, BandPassFilter, PixelScaler, SampleReader, SampleSource,
    WavSampleReader,
};
use crate::config::WaveformConfig;
use crate::error::SampleReadError;
use crate::types::STANDARD_CHUNK_DURATION_SECONDS;

/// Raw frames of one chunk plus how many of them are overlap lead-in
struct ChunkFrames {
    samples: Vec<f64>,
    overlap_frames: usize,
    /// Frames the chunk would span without truncation (excluding overlap)
    nominal_frames: usize,
}

/// Standard [`SampleSource`]: band-passed, envelope-smoothed amplitudes
pub struct WaveformProcessor<R> {
    reader: R,
    metadata: AudioMetadata,
    filter: BandPassFilter,
    overlap_seconds: f64,
    envelope_window: usize,
    closed: AtomicBool,
}

impl WaveformProcessor<WavSampleReader> {
    /// Open a WAV file with the given config
    pub fn open_wav(path: impl AsRef<Path>, config: &WaveformConfig) -> Result<Self, SampleReadError> {
        Ok(Self::new(WavSampleReader::open(path)?, config))
    }
}

impl<R: SampleReader> WaveformProcessor<R> {
    pub fn new(reader: R, config: &WaveformConfig) -> Self {
        let metadata = reader.metadata();
        Self {
            reader,
            metadata,
            filter: BandPassFilter::new(config.band_min, config.band_max),
            overlap_seconds: config.overlap_seconds,
            envelope_window: config.envelope_window,
            closed: AtomicBool::new(false),
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    fn load_chunk(&self, chunk_index: u64) -> Result<ChunkFrames, SampleReadError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SampleReadError::Closed);
        }

        let rate = self.metadata.sample_rate as f64;
        let nominal_frames = (STANDARD_CHUNK_DURATION_SECONDS * rate) as u64;
        let mut start_frame = chunk_index * nominal_frames;
        let mut frame_count = nominal_frames;

        // Every chunk after the first starts a little early so the filter and
        // envelope have settled by the chunk's real first frame
        let overlap_frames = if chunk_index > 0 {
            let overlap = ((self.overlap_seconds * rate) as u64).min(start_frame);
            start_frame -= overlap;
            frame_count += overlap;
            overlap
        } else {
            0
        };

        let samples = self.reader.read_frames(start_frame, frame_count)?;
        Ok(ChunkFrames {
            samples,
            overlap_frames: overlap_frames as usize,
            nominal_frames: nominal_frames as usize,
        })
    }

    fn process_chunk(&self, chunk: ChunkFrames, target_pixel_width: usize) -> Vec<f64> {
        let mut samples = if chunk.samples.is_empty() {
            chunk.samples
        } else {
            self.filter.apply(&chunk.samples)
        };
        envelope_smooth(&mut samples, self.envelope_window);

        let mut pixels = PixelScaler::to_pixel_resolution(
            &samples,
            chunk.overlap_frames,
            target_pixel_width,
            chunk.nominal_frames,
        );
        PixelScaler::smooth_pixels(&mut pixels);
        pixels
    }
}

impl<R: SampleReader> SampleSource for WaveformProcessor<R> {
    fn process_audio_for_display(&self, chunk_index: u64, target_pixel_width: usize) -> Vec<f64> {
        match self.load_chunk(chunk_index) {
            Ok(chunk) => self.process_chunk(chunk, target_pixel_width),
            Err(SampleReadError::Closed) => {
                log::debug!("[SIGNAL] Chunk {} requested after close", chunk_index);
                vec![0.0; target_pixel_width]
            }
            Err(e) => {
                // Transient during file switches; render an empty strip
                log::warn!("[SIGNAL] Failed to read chunk {}: {}", chunk_index, e);
                vec![0.0; target_pixel_width]
            }
        }
    }

    fn metadata(&self) -> AudioMetadata {
        self.metadata
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.reader.close();
        }
    }
}
