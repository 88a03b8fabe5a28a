//! Audio samples to display amplitudes
//!
//! The renderer and peak detector only see [`SampleSource`]: "give me chunk N
//! at W pixels". [`WaveformProcessor`] is the standard implementation on top
//! of any [`SampleReader`]:
//!
//! ```text
//! read chunk (+ overlap) → band-pass → envelope smooth → decimate → pixel smooth
//! ```

mod enhance;
mod filter;
mod pixels;
mod processor;
mod wav;

use crate::error::SampleReadError;

pub use enhance::envelope_smooth;
pub use filter::BandPassFilter;
pub use pixels::PixelScaler;
pub use processor::WaveformProcessor;
pub use wav::WavSampleReader;

/// Basic facts about an open audio file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMetadata {
    pub duration_seconds: f64,
    pub sample_rate: u32,
}

/// Display amplitudes for fixed-length chunks of one audio file
pub trait SampleSource: Send + Sync {
    /// Amplitudes for chunk `chunk_index` at `target_pixel_width` pixels
    ///
    /// Never fails: transient read problems produce zeros.
    fn process_audio_for_display(&self, chunk_index: u64, target_pixel_width: usize) -> Vec<f64>;

    fn metadata(&self) -> AudioMetadata;

    /// Release the underlying file; later calls return zeros
    fn close(&self) {}
}

/// Mono frame access to an audio file
pub trait SampleReader: Send + Sync {
    /// Read up to `frame_count` mono frames from `start_frame`
    ///
    /// Reads running past the end of the file are truncated.
    fn read_frames(&self, start_frame: u64, frame_count: u64) -> Result<Vec<f64>, SampleReadError>;

    fn metadata(&self) -> AudioMetadata;

    fn close(&self) {}
}
