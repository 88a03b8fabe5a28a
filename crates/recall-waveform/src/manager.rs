//! Which audio file is open
//!
//! At most one `Waveform` exists at a time. Opening a new file builds the
//! new waveform first, then shuts the previous one down, so a failed open
//! leaves the current file untouched.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::WaveformConfig;
use crate::error::WaveformResult;
use crate::signal::{SampleSource, WaveformProcessor};
use crate::waveform::Waveform;

#[derive(Debug, Default)]
pub struct WaveformManager {
    current: Mutex<Option<Arc<Waveform>>>,
    config: WaveformConfig,
}

impl WaveformManager {
    pub fn new(config: WaveformConfig) -> Self {
        Self {
            current: Mutex::new(None),
            config,
        }
    }

    /// Switch to `source`, shutting the previous waveform down
    pub fn open(&self, source: Arc<dyn SampleSource>) -> WaveformResult<Arc<Waveform>> {
        let waveform = Arc::new(Waveform::open(source, self.config.clone())?);
        let previous = self.lock().replace(Arc::clone(&waveform));
        if let Some(previous) = previous {
            log::info!("[WAVEFORM] Switching files, shutting down previous waveform");
            previous.shutdown();
        }
        Ok(waveform)
    }

    /// Switch to a WAV file
    pub fn open_wav(&self, path: impl AsRef<Path>) -> WaveformResult<Arc<Waveform>> {
        let processor = WaveformProcessor::open_wav(path, &self.config)?;
        self.open(Arc::new(processor))
    }

    /// Shut the current waveform down, if any
    pub fn close(&self) {
        let previous = self.lock().take();
        if let Some(previous) = previous {
            previous.shutdown();
        }
    }

    pub fn current(&self) -> Option<Arc<Waveform>> {
        self.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Waveform>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WaveformManager {
    fn drop(&mut self) {
        self.close();
    }
}
