//! Camera capture pipelines and the latest-frame fan-out.
//!
//! Each camera gets one pipeline owning its device exclusively. A dedicated
//! blocking loop pulls frames as fast as the device delivers them and
//! overwrites a single-slot `watch` holder; there is never a queue, so a slow
//! viewer only ever sees the newest frame and can never block capture.
//!
//! On device loss the pipeline degrades: the slot is cleared and reopen
//! attempts run on an exponential backoff until the device returns or the
//! pipeline is stopped.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crawler_core::capture::{CameraSettings, CaptureBackoff, CaptureHealth};
use crawler_core::error::CaptureError;
use crawler_core::frame::{CameraId, Frame};

use crate::monotonic_ms;

/// A camera device session. `open` acquires the device and returns a stream
/// of encoded frames; dropping the stream releases the buffers, `close`
/// releases the device handle itself.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<Box<dyn FrameStream + '_>, CaptureError>;
    fn close(&mut self);
}

/// Blocking frame delivery for one open device session.
pub trait FrameStream {
    fn next_frame(&mut self) -> Result<Vec<u8>, CaptureError>;
}

pub type BoxedFrameSource = Box<dyn FrameSource>;

/// Builds a fresh source for the given settings; called on every (re)start
/// so a quality-profile change reaches the device.
pub type SourceFactory = Arc<dyn Fn(CameraSettings) -> BoxedFrameSource + Send + Sync>;

struct PipelineShared {
    camera: CameraId,
    frame_tx: watch::Sender<Option<Arc<Frame>>>,
    next_sequence: AtomicU64,
    health: RwLock<CaptureHealth>,
}

impl PipelineShared {
    fn set_health(&self, health: CaptureHealth) {
        *self.health.write().unwrap() = health;
    }

    fn clear_latest(&self) {
        self.frame_tx.send_replace(None);
    }

    fn publish(&self, payload: Vec<u8>) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Frame {
            camera: self.camera,
            sequence,
            captured_at_ms: monotonic_ms(),
            payload,
        };
        self.frame_tx.send_replace(Some(Arc::new(frame)));
        self.set_health(CaptureHealth::Running {
            last_sequence: sequence,
        });
    }
}

struct RunningCapture {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One camera's capture pipeline.
pub struct CapturePipeline {
    factory: SourceFactory,
    shared: Arc<PipelineShared>,
    settings: RwLock<CameraSettings>,
    running: tokio::sync::Mutex<Option<RunningCapture>>,
}

impl CapturePipeline {
    pub fn new(camera: CameraId, settings: CameraSettings, factory: SourceFactory) -> Self {
        let (frame_tx, _) = watch::channel(None);
        CapturePipeline {
            factory,
            shared: Arc::new(PipelineShared {
                camera,
                frame_tx,
                next_sequence: AtomicU64::new(0),
                health: RwLock::new(CaptureHealth::Stopped),
            }),
            settings: RwLock::new(settings),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn camera(&self) -> CameraId {
        self.shared.camera
    }

    pub fn settings(&self) -> CameraSettings {
        *self.settings.read().unwrap()
    }

    pub fn health(&self) -> CaptureHealth {
        *self.shared.health.read().unwrap()
    }

    /// The newest frame, or `None` when stopped or degraded.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.frame_tx.borrow().clone()
    }

    /// Start the capture loop. Already-running pipelines are left alone.
    pub async fn start(&self) -> Result<(), CaptureError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let settings = self.settings();
        let source = (self.factory)(settings);
        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let loop_cancel = cancel.clone();
        info!("Starting {} camera capture", self.shared.camera);
        let handle = tokio::task::spawn_blocking(move || {
            capture_loop(shared, source, settings, loop_cancel)
        });
        *running = Some(RunningCapture { cancel, handle });
        Ok(())
    }

    /// Stop capture, joining the loop and releasing the device before
    /// returning.
    pub async fn stop(&self) {
        let taken = self.running.lock().await.take();
        if let Some(running) = taken {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!("{} capture loop join failed: {}", self.shared.camera, e);
            }
            info!("Stopped {} camera capture", self.shared.camera);
        }
        self.shared.set_health(CaptureHealth::Stopped);
        self.shared.clear_latest();
    }

    /// Swap in new capture settings, restarting the loop if it was running.
    pub async fn apply_settings(&self, settings: CameraSettings) -> Result<(), CaptureError> {
        let was_running = self.running.lock().await.is_some();
        if was_running {
            self.stop().await;
        }
        *self.settings.write().unwrap() = settings;
        if was_running {
            self.start().await?;
        }
        Ok(())
    }

    /// Open an independent subscription starting at the current latest
    /// frame. No history is replayed.
    pub fn subscribe(&self) -> FrameSubscription {
        FrameSubscription {
            rx: self.shared.frame_tx.subscribe(),
            last_sequence: None,
        }
    }
}

/// A lazy, infinite sequence of frames for one subscriber.
///
/// Each call yields the next frame strictly newer than the last one this
/// subscriber saw; intermediate frames a slow subscriber missed are skipped,
/// never queued.
pub struct FrameSubscription {
    rx: watch::Receiver<Option<Arc<Frame>>>,
    last_sequence: Option<u64>,
}

impl FrameSubscription {
    /// Wait for the next frame. Returns `None` only when the pipeline has
    /// been dropped entirely.
    pub async fn next_frame(&mut self) -> Option<Arc<Frame>> {
        loop {
            let candidate = {
                let current = self.rx.borrow_and_update();
                current.as_ref().and_then(|frame| {
                    if self.last_sequence.map_or(true, |seen| frame.sequence > seen) {
                        Some(frame.clone())
                    } else {
                        None
                    }
                })
            };
            if let Some(frame) = candidate {
                self.last_sequence = Some(frame.sequence);
                return Some(frame);
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(25)));
    }
}

/// The blocking capture loop: open, pump frames at the configured pace,
/// degrade with backoff on failure, release everything on cancellation.
fn capture_loop(
    shared: Arc<PipelineShared>,
    mut source: BoxedFrameSource,
    settings: CameraSettings,
    cancel: CancellationToken,
) {
    let camera = shared.camera;
    let interval = Duration::from_millis(settings.frame_interval_ms());
    let mut backoff = CaptureBackoff::new();

    while !cancel.is_cancelled() {
        let session_error = match source.open() {
            Ok(mut stream) => {
                backoff.reset();
                debug!("{} camera device opened", camera);
                let mut error = None;
                while !cancel.is_cancelled() {
                    let started = Instant::now();
                    match stream.next_frame() {
                        Ok(payload) => shared.publish(payload),
                        Err(e) => {
                            error = Some(e);
                            break;
                        }
                    }
                    let elapsed = started.elapsed();
                    if elapsed < interval {
                        sleep_cancellable(interval - elapsed, &cancel);
                    }
                }
                error
            }
            Err(e) => Some(e),
        };
        source.close();

        if cancel.is_cancelled() {
            break;
        }
        if let Some(e) = session_error {
            warn!("{} camera degraded: {}", camera, e);
            shared.clear_latest();
            shared.set_health(CaptureHealth::Degraded {
                reopen_attempts: backoff.failures(),
            });
            sleep_cancellable(Duration::from_millis(backoff.delay_ms()), &cancel);
            backoff.record_failure();
        }
    }

    shared.set_health(CaptureHealth::Stopped);
    shared.clear_latest();
}

// ---------------------------------------------------------------------------
// V4L2 backend
// ---------------------------------------------------------------------------

#[cfg(feature = "v4l")]
pub use self::v4l_source::V4lFrameSource;

#[cfg(feature = "v4l")]
mod v4l_source {
    use super::{FrameSource, FrameStream};
    use crawler_core::capture::CameraSettings;
    use crawler_core::error::CaptureError;
    use log::debug;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream as MmapStream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::capture::Parameters;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    /// A V4L2 camera delivering MJPG, so the device output is already the
    /// JPEG payload the stream serves.
    pub struct V4lFrameSource {
        device_index: usize,
        settings: CameraSettings,
        device: Option<Device>,
    }

    impl V4lFrameSource {
        pub fn new(device_index: usize, settings: CameraSettings) -> Self {
            V4lFrameSource {
                device_index,
                settings,
                device: None,
            }
        }

        fn map_io(&self, e: std::io::Error) -> CaptureError {
            let node = format!("/dev/video{}", self.device_index);
            match e.kind() {
                std::io::ErrorKind::NotFound => CaptureError::DeviceAbsent(node),
                std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(node),
                _ => CaptureError::Io(e.to_string()),
            }
        }
    }

    impl FrameSource for V4lFrameSource {
        fn open(&mut self) -> Result<Box<dyn FrameStream + '_>, CaptureError> {
            let device = Device::new(self.device_index).map_err(|e| self.map_io(e))?;

            let mut format = device.format().map_err(|e| self.map_io(e))?;
            format.width = self.settings.width;
            format.height = self.settings.height;
            format.fourcc = FourCC::new(b"MJPG");
            let actual = device.set_format(&format).map_err(|e| self.map_io(e))?;
            if &actual.fourcc.repr != b"MJPG" {
                return Err(CaptureError::Decode(format!(
                    "/dev/video{} cannot produce MJPG",
                    self.device_index
                )));
            }

            // Frame rate is advisory; devices that ignore it still work.
            if let Err(e) = device.set_params(&Parameters::with_fps(self.settings.fps)) {
                debug!("/dev/video{} ignored fps request: {}", self.device_index, e);
            }

            self.device = Some(device);
            let stream = MmapStream::with_buffers(
                self.device.as_ref().expect("device just stored"),
                Type::VideoCapture,
                4,
            )
            .map_err(|e| CaptureError::Io(e.to_string()))?;
            Ok(Box::new(V4lFrameStream { stream }))
        }

        fn close(&mut self) {
            self.device = None;
        }
    }

    struct V4lFrameStream<'a> {
        stream: MmapStream<'a>,
    }

    impl FrameStream for V4lFrameStream<'_> {
        fn next_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
            let (buffer, meta) = CaptureStream::next(&mut self.stream)
                .map_err(|e| CaptureError::Io(e.to_string()))?;
            let used = (meta.bytesused as usize).min(buffer.len());
            if used == 0 {
                return Err(CaptureError::Decode("empty frame from device".into()));
            }
            Ok(buffer[..used].to_vec())
        }
    }
}

// ---------------------------------------------------------------------------
// Emulated backend
// ---------------------------------------------------------------------------

#[cfg(any(feature = "emulator", test))]
pub use self::emulated::EmulatedFrameSource;

#[cfg(any(feature = "emulator", test))]
mod emulated {
    use super::{FrameSource, FrameStream};
    use crawler_core::error::CaptureError;
    use crawler_core::frame::CameraId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Synthesizes JPEG-framed placeholder payloads so the control plane can
    /// run off-target. Failure counters let tests drive the degraded path.
    pub struct EmulatedFrameSource {
        camera: CameraId,
        counter: u64,
        open_failures: Arc<AtomicU32>,
        grab_failures: Arc<AtomicU32>,
    }

    impl EmulatedFrameSource {
        pub fn new(camera: CameraId) -> Self {
            EmulatedFrameSource {
                camera,
                counter: 0,
                open_failures: Arc::new(AtomicU32::new(0)),
                grab_failures: Arc::new(AtomicU32::new(0)),
            }
        }

        /// Fail the next opens/grabs recorded in the shared counters.
        pub fn with_failures(
            camera: CameraId,
            open_failures: Arc<AtomicU32>,
            grab_failures: Arc<AtomicU32>,
        ) -> Self {
            EmulatedFrameSource {
                camera,
                counter: 0,
                open_failures,
                grab_failures,
            }
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// SOI + comment segment + EOI; JPEG-framed but intentionally not a
    /// decodable image.
    fn placeholder_jpeg(camera: CameraId, counter: u64) -> Vec<u8> {
        let comment = format!("crawler {} frame {}", camera, counter);
        let mut payload = vec![0xFF, 0xD8];
        payload.extend_from_slice(&[0xFF, 0xFE]);
        payload.extend_from_slice(&((comment.len() as u16 + 2).to_be_bytes()));
        payload.extend_from_slice(comment.as_bytes());
        payload.extend_from_slice(&[0xFF, 0xD9]);
        payload
    }

    impl FrameSource for EmulatedFrameSource {
        fn open(&mut self) -> Result<Box<dyn FrameStream + '_>, CaptureError> {
            if take_failure(&self.open_failures) {
                return Err(CaptureError::DeviceAbsent("emulated".into()));
            }
            Ok(Box::new(EmulatedStream { source: self }))
        }

        fn close(&mut self) {}
    }

    struct EmulatedStream<'a> {
        source: &'a mut EmulatedFrameSource,
    }

    impl FrameStream for EmulatedStream<'_> {
        fn next_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
            if take_failure(&self.source.grab_failures) {
                return Err(CaptureError::Io("emulated device dropout".into()));
            }
            self.source.counter += 1;
            Ok(placeholder_jpeg(self.source.camera, self.source.counter))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::timeout;

    const FAST: CameraSettings = CameraSettings::new(320, 240, 200, 70);

    fn emulated_pipeline(camera: CameraId) -> CapturePipeline {
        CapturePipeline::new(
            camera,
            FAST,
            Arc::new(move |_| Box::new(EmulatedFrameSource::new(camera)) as BoxedFrameSource),
        )
    }

    async fn wait_for_frames(pipeline: &CapturePipeline, minimum: u64) -> Arc<Frame> {
        timeout(Duration::from_secs(2), async {
            let mut sub = pipeline.subscribe();
            loop {
                let frame = sub.next_frame().await.expect("pipeline alive");
                if frame.sequence >= minimum {
                    return frame;
                }
            }
        })
        .await
        .expect("frames should arrive")
    }

    #[tokio::test]
    async fn sequences_strictly_increase_per_subscriber() {
        let pipeline = emulated_pipeline(CameraId::Front);
        pipeline.start().await.unwrap();

        let mut sub = pipeline.subscribe();
        let mut last = 0;
        for _ in 0..5 {
            let frame = timeout(Duration::from_secs(2), sub.next_frame())
                .await
                .unwrap()
                .unwrap();
            assert!(frame.sequence > last);
            assert_eq!(frame.camera, CameraId::Front);
            assert!(frame.payload.starts_with(&[0xFF, 0xD8]));
            last = frame.sequence;
        }

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn late_subscriber_never_sees_history() {
        let pipeline = emulated_pipeline(CameraId::Rear);
        pipeline.start().await.unwrap();

        let reached = wait_for_frames(&pipeline, 4).await.sequence;

        let mut late = pipeline.subscribe();
        let first = timeout(Duration::from_secs(2), late.next_frame())
            .await
            .unwrap()
            .unwrap();
        assert!(first.sequence >= reached);

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn stop_clears_latest_and_restart_continues_sequence() {
        let pipeline = emulated_pipeline(CameraId::Front);
        pipeline.start().await.unwrap();
        let before = wait_for_frames(&pipeline, 2).await.sequence;

        pipeline.stop().await;
        assert_eq!(pipeline.health(), CaptureHealth::Stopped);
        assert!(pipeline.latest_frame().is_none());

        // Sequence numbers keep increasing across restarts so observers can
        // never see a repeat.
        pipeline.start().await.unwrap();
        let after = wait_for_frames(&pipeline, before + 1).await;
        assert!(after.sequence > before);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn device_dropout_degrades_then_recovers() {
        let open_failures = Arc::new(AtomicU32::new(0));
        let grab_failures = Arc::new(AtomicU32::new(0));
        let (open_f, grab_f) = (open_failures.clone(), grab_failures.clone());
        let pipeline = CapturePipeline::new(
            CameraId::Rear,
            FAST,
            Arc::new(move |_| {
                Box::new(EmulatedFrameSource::with_failures(
                    CameraId::Rear,
                    open_f.clone(),
                    grab_f.clone(),
                )) as BoxedFrameSource
            }),
        );
        pipeline.start().await.unwrap();
        wait_for_frames(&pipeline, 1).await;

        // Kill the device: the next grab fails and one reopen fails too.
        grab_failures.store(1, Ordering::SeqCst);
        open_failures.store(1, Ordering::SeqCst);

        timeout(Duration::from_secs(2), async {
            loop {
                if matches!(pipeline.health(), CaptureHealth::Degraded { .. }) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pipeline should degrade");
        assert!(pipeline.latest_frame().is_none());

        // First reopen happens after the 1 s base backoff; the failed open
        // pushes recovery past the second attempt.
        timeout(Duration::from_secs(5), async {
            loop {
                if pipeline.health().is_running() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("pipeline should recover");

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn apply_settings_restarts_running_pipeline() {
        let pipeline = emulated_pipeline(CameraId::Front);
        pipeline.start().await.unwrap();
        wait_for_frames(&pipeline, 1).await;

        let new_settings = CameraSettings::new(640, 360, 100, 68);
        pipeline.apply_settings(new_settings).await.unwrap();
        assert_eq!(pipeline.settings(), new_settings);
        // Still delivering after the restart.
        wait_for_frames(&pipeline, 1).await;
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn apply_settings_on_stopped_pipeline_does_not_start_it() {
        let pipeline = emulated_pipeline(CameraId::Front);
        let new_settings = CameraSettings::new(640, 360, 30, 68);
        pipeline.apply_settings(new_settings).await.unwrap();
        assert_eq!(pipeline.health(), CaptureHealth::Stopped);
    }
}
