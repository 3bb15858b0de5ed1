//! Non-real-time sample file loading and publication.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use basedrop::{Collector, Handle, Shared};
use crossbeam_channel::{unbounded, Sender};
use symphonia::core::audio::SampleBuffer as DecodeBuffer;

use crate::{
    error::Error,
    sample::{SampleBuffer, SampleStore},
    utils::decoder::AudioDecoder,
};

// -------------------------------------------------------------------------------------------------

/// Special sample path value requesting a load of the configured default sample.
pub const DEFAULT_SAMPLE_KEY: &str = "__DEFAULT__";

// -------------------------------------------------------------------------------------------------

/// Load progress of the most recent sample load request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed,
}

/// Diagnostics of the most recent sample load, readable by a UI or host while the
/// loader keeps working.
#[derive(Debug, Default, Clone)]
pub struct LoadDiagnostics {
    pub state: LoadState,
    pub path: String,
    pub error: String,
}

// -------------------------------------------------------------------------------------------------

enum LoadRequest {
    Load(String),
    Shutdown,
}

/// Owns a worker thread which decodes sample files on request and publishes them
/// into a [`SampleStore`].
///
/// The worker also owns the basedrop [`Collector`], so buffer references released by
/// the render thread get reclaimed here, off the real-time path.
pub struct SampleLoader {
    request_send: Sender<LoadRequest>,
    diagnostics: Arc<Mutex<LoadDiagnostics>>,
    default_path: Option<String>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SampleLoader {
    pub fn new(store: Arc<SampleStore>) -> Self {
        let (request_send, request_recv) = unbounded::<LoadRequest>();
        let diagnostics = Arc::new(Mutex::new(LoadDiagnostics::default()));

        let worker_diagnostics = Arc::clone(&diagnostics);
        let worker = thread::Builder::new()
            .name("granule-sample-loader".to_string())
            .spawn(move || {
                let mut collector = Collector::new();
                while let Ok(request) = request_recv.recv() {
                    match request {
                        LoadRequest::Load(path) => {
                            match load_sample_file(&path, &collector.handle()) {
                                Ok(buffer) => {
                                    log::info!(
                                        "Loaded sample '{}': {} frames at {} Hz",
                                        path,
                                        buffer.frame_count(),
                                        buffer.sample_rate()
                                    );
                                    store.publish(buffer);
                                    let mut diagnostics = worker_diagnostics
                                        .lock()
                                        .expect("Load diagnostics lock poisoned");
                                    diagnostics.state = LoadState::Loaded;
                                    diagnostics.path = path;
                                    diagnostics.error.clear();
                                }
                                Err(err) => {
                                    log::error!("Failed to load sample '{}': {}", path, err);
                                    let mut diagnostics = worker_diagnostics
                                        .lock()
                                        .expect("Load diagnostics lock poisoned");
                                    diagnostics.state = LoadState::Failed;
                                    diagnostics.path = path;
                                    diagnostics.error = err.to_string();
                                }
                            }
                            // Reclaim buffers the render thread has released since the last load.
                            collector.collect();
                        }
                        LoadRequest::Shutdown => break,
                    }
                }
                // Give late releases from the render thread a bounded chance to get reclaimed.
                for _ in 0..100 {
                    collector.collect();
                    if collector.alloc_count() == 0 {
                        break;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .expect("Failed to spawn sample loader thread");

        Self {
            request_send,
            diagnostics,
            default_path: None,
            worker: Some(worker),
        }
    }

    /// Set the path loaded when a request passes [`DEFAULT_SAMPLE_KEY`].
    pub fn set_default_path(&mut self, path: &str) {
        self.default_path = Some(path.to_string());
    }

    /// Request an asynchronous load of the given file path.
    ///
    /// The result is observable via [`Self::diagnostics`]; on success the decoded buffer
    /// gets published to the store. A failed load leaves the previously published buffer
    /// in place.
    pub fn request(&self, path: &str) {
        let path = if path == DEFAULT_SAMPLE_KEY {
            self.default_path.clone().unwrap_or_default()
        } else {
            path.to_string()
        };
        {
            let mut diagnostics = self
                .diagnostics
                .lock()
                .expect("Load diagnostics lock poisoned");
            diagnostics.state = LoadState::Loading;
            diagnostics.path = path.clone();
            diagnostics.error.clear();
        }
        if self.request_send.send(LoadRequest::Load(path)).is_err() {
            log::error!("Sample loader thread is gone - dropping load request");
        }
    }

    /// Snapshot of the most recent load's diagnostics.
    pub fn diagnostics(&self) -> LoadDiagnostics {
        self.diagnostics
            .lock()
            .expect("Load diagnostics lock poisoned")
            .clone()
    }
}

impl Drop for SampleLoader {
    fn drop(&mut self) {
        let _ = self.request_send.send(LoadRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Decode the given audio file into a new shared [`SampleBuffer`].
///
/// Mono files are duplicated to both channels; files with more than two channels
/// are rejected. This runs on the loader thread only.
pub(crate) fn load_sample_file(path: &str, handle: &Handle) -> Result<Shared<SampleBuffer>, Error> {
    if path.is_empty() {
        return Err(Error::EmptyFilePath);
    }

    let mut decoder = AudioDecoder::from_file(path)?;
    let signal_spec = decoder.signal_spec();
    let channel_count = signal_spec.channels.count();
    if channel_count == 0 || channel_count > 2 {
        return Err(Error::UnsupportedChannelCount(channel_count));
    }

    // Decode the entire file in packet sized chunks into an interleaved buffer.
    let frame_count_hint = decoder.codec_params().n_frames.unwrap_or(0) as usize;
    let decode_buffer_capacity = decoder
        .codec_params()
        .max_frames_per_packet
        .unwrap_or(16 * 1024 * channel_count as u64);
    let mut decode_buffer = DecodeBuffer::<f32>::new(decode_buffer_capacity, signal_spec);

    let mut interleaved = Vec::with_capacity(frame_count_hint * channel_count);
    while decoder.read_packet(&mut decode_buffer).is_some() {
        interleaved.extend_from_slice(decode_buffer.samples());
    }
    if interleaved.is_empty() {
        return Err(Error::EmptyFile);
    }

    // De-interleave into planar channels, duplicating mono input.
    let frame_count = interleaved.len() / channel_count;
    let mut left = Vec::with_capacity(frame_count);
    let mut right = Vec::with_capacity(frame_count);
    if channel_count == 1 {
        left.extend_from_slice(&interleaved);
        right.extend_from_slice(&interleaved);
    } else {
        for frame in interleaved.chunks_exact(2) {
            left.push(frame[0]);
            right.push(frame[1]);
        }
    }

    let buffer = SampleBuffer::new(left, right, signal_spec.rate, path.to_string())?;
    Ok(Shared::new(handle, buffer))
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn write_test_wav(name: &str, frame_count: usize) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "granule-loader-test-{}-{}.wav",
            std::process::id(),
            name
        ));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for frame in 0..frame_count {
            writer.write_sample(((frame % 100) as i16 - 50) * 256).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn load_mono_wav_duplicates_channels() {
        let path = write_test_wav("mono", 1000);
        let collector = Collector::new();

        let buffer = load_sample_file(path.to_str().unwrap(), &collector.handle()).unwrap();
        assert_eq!(buffer.frame_count(), 1000);
        assert_eq!(buffer.sample_rate(), 22050);
        assert_eq!(buffer.left(), buffer.right());
        assert!(buffer.left().iter().any(|&sample| sample != 0.0));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_failures_yield_distinct_errors() {
        let collector = Collector::new();
        assert!(matches!(
            load_sample_file("", &collector.handle()),
            Err(Error::EmptyFilePath)
        ));
        assert!(matches!(
            load_sample_file("/no/such/granule-file.wav", &collector.handle()),
            Err(Error::MediaFileNotFound)
        ));
    }

    #[test]
    fn async_load_publishes_to_store() {
        let path = write_test_wav("async", 512);
        let store = Arc::new(SampleStore::new());
        let loader = SampleLoader::new(Arc::clone(&store));

        loader.request(path.to_str().unwrap());
        let mut state = loader.diagnostics().state;
        for _ in 0..500 {
            state = loader.diagnostics().state;
            if state == LoadState::Loaded {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(state, LoadState::Loaded);
        assert_eq!(store.snapshot().unwrap().frame_count(), 512);

        // A failed load must keep the previously published buffer in place.
        loader.request("/no/such/granule-file.wav");
        for _ in 0..500 {
            if loader.diagnostics().state == LoadState::Failed {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(loader.diagnostics().state, LoadState::Failed);
        assert!(!loader.diagnostics().error.is_empty());
        assert_eq!(store.snapshot().unwrap().frame_count(), 512);

        drop(loader);
        std::fs::remove_file(&path).ok();
    }
}
