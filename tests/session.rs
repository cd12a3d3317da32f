//! End-to-end session tests over fake collaborators
//!
//! The fakes deliver their callbacks synchronously, so a full
//! prepare/start/frame/stop cycle runs deterministically on the test
//! thread (plus the GPU executor thread the session spawns).

use camrec::encode::{
    EncoderAdapter, EncoderEvents, FrameSample, PixelReader, SampleKind, SampleSink,
    SoftwareVideoEncoder, StreamFormat,
};
use camrec::mux::{MuxerAdapter, MuxerEvents};
use camrec::session::state::SessionState;
use camrec::session::{PipelineFactory, Session, SessionEvent};
use camrec::{
    CameraIndex, CaptureConfig, CaptureDevice, DeviceEvents, EncoderConfig, Filter, FrameCodec,
    GpuContext, GpuExecutor, RecorderError, RecorderResult, RenderStage, SessionConfig,
    SurfaceDescriptor, TextureHandle,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

struct NullContext;

impl GpuContext for NullContext {
    fn make_current(&mut self) -> RecorderResult<()> {
        Ok(())
    }
    fn swap_buffers(&mut self) -> RecorderResult<()> {
        Ok(())
    }
    fn release(&mut self) {}
}

#[derive(Default)]
struct DeviceShared {
    open_count: AtomicUsize,
    released: AtomicBool,
    fail_open: AtomicBool,
    switches: Mutex<Vec<CameraIndex>>,
    events: Mutex<Option<Arc<dyn DeviceEvents>>>,
    open_config: Mutex<Option<CaptureConfig>>,
}

impl DeviceShared {
    fn emit_frame(&self, texture: TextureHandle) {
        let events = self.events.lock().clone();
        if let Some(events) = events {
            events.on_frame(texture);
        }
    }

    fn emit_error(&self, message: &str) {
        let events = self.events.lock().clone();
        if let Some(events) = events {
            events.on_device_error(message.to_string());
        }
    }
}

struct FakeDevice(Arc<DeviceShared>);

impl CaptureDevice for FakeDevice {
    fn open(&mut self, config: &CaptureConfig, events: Arc<dyn DeviceEvents>) -> RecorderResult<()> {
        self.0.open_count.fetch_add(1, Ordering::SeqCst);
        *self.0.open_config.lock() = Some(config.clone());
        *self.0.events.lock() = Some(events.clone());
        if self.0.fail_open.load(Ordering::SeqCst) {
            events.on_device_error("sensor offline".to_string());
        } else {
            events.on_device_ready();
        }
        Ok(())
    }

    fn switch_camera(&mut self, index: CameraIndex) -> RecorderResult<()> {
        self.0.switches.lock().push(index);
        Ok(())
    }

    fn release(&mut self) -> RecorderResult<()> {
        self.0.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Encoder that turns every frame notification into one 128 byte sample
struct FakeEncoder {
    sink: Arc<dyn SampleSink>,
    running: Arc<AtomicBool>,
    sent_format: bool,
    frames: Arc<AtomicUsize>,
}

impl EncoderAdapter for FakeEncoder {
    fn start(&mut self) -> RecorderResult<()> {
        if !self.sent_format {
            self.sent_format = true;
            self.sink.on_format_changed(StreamFormat {
                mime: "video/avc".into(),
                width: 1280,
                height: 720,
            });
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> RecorderResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> RecorderResult<()> {
        Ok(())
    }

    fn frame_available(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        self.sink.on_sample(FrameSample {
            kind: if n == 0 { SampleKind::Key } else { SampleKind::Delta },
            pts_us: n as i64 * 33_333,
            data: vec![0u8; 128],
        });
    }
}

#[derive(Default)]
struct FakeMuxer {
    started: AtomicBool,
    reset: AtomicBool,
    formats: Mutex<Vec<StreamFormat>>,
    samples: Mutex<Vec<FrameSample>>,
}

impl SampleSink for FakeMuxer {
    fn on_format_changed(&self, format: StreamFormat) {
        self.formats.lock().push(format);
    }

    fn on_sample(&self, sample: FrameSample) {
        self.samples.lock().push(sample);
    }
}

impl MuxerAdapter for FakeMuxer {
    fn on_start(&self) -> RecorderResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&self) -> RecorderResult<()> {
        self.reset.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> RecorderResult<()> {
        Ok(())
    }
}

/// Audio adapter that only counts its lifecycle calls
#[derive(Default)]
struct AudioCalls {
    starts: AtomicUsize,
    pauses: AtomicUsize,
    stops: AtomicUsize,
    releases: AtomicUsize,
}

struct FakeAudioEncoder(Arc<AudioCalls>);

impl EncoderAdapter for FakeAudioEncoder {
    fn start(&mut self) -> RecorderResult<()> {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> RecorderResult<()> {
        self.0.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> RecorderResult<()> {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) -> RecorderResult<()> {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn frame_available(&self) {}
}

struct TestFactory {
    device: Arc<DeviceShared>,
    muxer: Arc<FakeMuxer>,
    encoder_configs: Arc<Mutex<Vec<EncoderConfig>>>,
    muxer_uris: Arc<Mutex<Vec<String>>>,
    audio: Option<Arc<AudioCalls>>,
}

impl TestFactory {
    fn new() -> Self {
        Self {
            device: Arc::new(DeviceShared::default()),
            muxer: Arc::new(FakeMuxer::default()),
            encoder_configs: Arc::new(Mutex::new(Vec::new())),
            muxer_uris: Arc::new(Mutex::new(Vec::new())),
            audio: None,
        }
    }

    fn with_audio() -> (Self, Arc<AudioCalls>) {
        let audio = Arc::new(AudioCalls::default());
        let mut factory = Self::new();
        factory.audio = Some(audio.clone());
        (factory, audio)
    }
}

impl PipelineFactory for TestFactory {
    fn create_device(&mut self) -> RecorderResult<Box<dyn CaptureDevice>> {
        Ok(Box::new(FakeDevice(self.device.clone())))
    }

    fn create_gpu_context(&mut self) -> RecorderResult<Box<dyn GpuContext>> {
        Ok(Box::new(NullContext))
    }

    fn create_encoder(
        &mut self,
        config: &EncoderConfig,
        _frames: Arc<RenderStage>,
        _executor: Arc<GpuExecutor>,
        sink: Arc<dyn SampleSink>,
        events: Arc<dyn EncoderEvents>,
    ) -> RecorderResult<Box<dyn EncoderAdapter>> {
        self.encoder_configs.lock().push(config.clone());
        let encoder = FakeEncoder {
            sink,
            running: Arc::new(AtomicBool::new(false)),
            sent_format: false,
            frames: Arc::new(AtomicUsize::new(0)),
        };
        events.on_encoder_ready();
        Ok(Box::new(encoder))
    }

    fn create_audio_encoder(
        &mut self,
        _sink: Arc<dyn SampleSink>,
        _events: Arc<dyn EncoderEvents>,
    ) -> RecorderResult<Option<Box<dyn EncoderAdapter>>> {
        Ok(self
            .audio
            .as_ref()
            .map(|calls| Box::new(FakeAudioEncoder(calls.clone())) as Box<dyn EncoderAdapter>))
    }

    fn create_muxer(
        &mut self,
        output_uri: &str,
        _events: Arc<dyn MuxerEvents>,
    ) -> RecorderResult<Arc<dyn MuxerAdapter>> {
        self.muxer_uris.lock().push(output_uri.to_string());
        Ok(self.muxer.clone())
    }
}

fn surface() -> SurfaceDescriptor {
    SurfaceDescriptor {
        native_handle: 42,
        width: 1280,
        height: 720,
    }
}

fn session_with_factory() -> (Session, Arc<DeviceShared>, Arc<FakeMuxer>, Arc<Mutex<Vec<EncoderConfig>>>) {
    let factory = TestFactory::new();
    let device = factory.device.clone();
    let muxer = factory.muxer.clone();
    let configs = factory.encoder_configs.clone();
    let config = SessionConfig {
        output_uri: Some("/tmp/out.mp4".into()),
        ..SessionConfig::default()
    };
    (Session::new(config, Box::new(factory)), device, muxer, configs)
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_full_recording_cycle() {
    let (session, device, muxer, _) = session_with_factory();
    let mut rx = session.subscribe();

    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    assert_eq!(session.state(), SessionState::Prepared);
    assert!(matches!(drain(&mut rx).as_slice(), [SessionEvent::Prepared]));

    session.start().unwrap();
    assert!(session.started());
    assert!(muxer.started.load(Ordering::SeqCst));

    for i in 0..3u32 {
        device.emit_frame(TextureHandle(i));
    }

    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(device.released.load(Ordering::SeqCst));
    assert!(muxer.reset.load(Ordering::SeqCst));

    // Format arrived once, samples flowed, and the first was a key frame.
    assert_eq!(muxer.formats.lock().len(), 1);
    let samples = muxer.samples.lock();
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[0].kind, SampleKind::Key);

    let events = drain(&mut rx);
    let started = events.iter().filter(|e| matches!(e, SessionEvent::Started)).count();
    let stopped = events.iter().filter(|e| matches!(e, SessionEvent::Stopped { .. })).count();
    let sample_events = events.iter().filter(|e| matches!(e, SessionEvent::Sample { .. })).count();
    assert_eq!(started, 1);
    assert_eq!(stopped, 1);
    assert_eq!(sample_events, 3);
}

#[test]
fn test_stop_twice_emits_one_stopped() {
    let (session, _, _, _) = session_with_factory();
    let mut rx = session.subscribe();

    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();
    session.stop().unwrap();
    session.stop().unwrap();

    let stopped = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, SessionEvent::Stopped { .. }))
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn test_auto_bitrate_reaches_encoder() {
    let (session, _, _, configs) = session_with_factory();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();

    let configs = configs.lock();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].bitrate, (1280u64 * 720 * 4 * 30 / 24) as u32);
    assert_eq!(configs[0].width, 1280);
    assert_eq!(configs[0].height, 720);
}

#[test]
fn test_prepare_twice_opens_device_once() {
    let (session, device, _, _) = session_with_factory();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.prepare().unwrap();

    assert_eq!(device.open_count.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Prepared);
}

#[test]
fn test_setters_rejected_while_prepared() {
    let (session, _, _, _) = session_with_factory();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();

    assert!(matches!(
        session.set_output_size(1920, 1080),
        Err(RecorderError::IllegalState { .. })
    ));
    assert!(session.set_fps(60).is_err());
    assert!(session.set_video_bitrate(1).is_err());
    assert!(session.set_output_uri("/tmp/other.mp4").is_err());
    assert!(session.set_preview_display(surface()).is_err());

    // But the camera can be switched live.
    session.set_camera_index(CameraIndex::Front).unwrap();
}

#[test]
fn test_live_camera_switch_reaches_device() {
    let (session, device, _, _) = session_with_factory();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();

    session.set_camera_index(CameraIndex::Front).unwrap();
    assert_eq!(device.switches.lock().as_slice(), [CameraIndex::Front]);
}

#[test]
fn test_device_error_during_open_returns_to_idle() {
    let (session, device, _, _) = session_with_factory();
    device.fail_open.store(true, Ordering::SeqCst);
    let mut rx = session.subscribe();

    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(device.released.load(Ordering::SeqCst));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Error { code, .. } if code == "DEVICE_ERROR"
    )));
}

#[test]
fn test_device_error_while_recording_tears_down() {
    let (session, device, muxer, _) = session_with_factory();
    let mut rx = session.subscribe();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();

    device.emit_error("sensor lost");

    assert_eq!(session.state(), SessionState::Idle);
    assert!(muxer.reset.load(Ordering::SeqCst));
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        SessionEvent::Error { code, .. } if code == "DEVICE_ERROR"
    )));
}

#[test]
fn test_pause_stops_sample_flow() {
    let (session, device, muxer, _) = session_with_factory();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();

    device.emit_frame(TextureHandle(1));
    session.pause().unwrap();
    assert_eq!(session.state(), SessionState::Prepared);
    device.emit_frame(TextureHandle(2));

    assert_eq!(muxer.samples.lock().len(), 1);

    // Resuming picks samples back up.
    session.start().unwrap();
    device.emit_frame(TextureHandle(3));
    assert_eq!(muxer.samples.lock().len(), 2);
    session.stop().unwrap();
}

#[test]
fn test_release_after_start_is_safe_and_terminal() {
    let (session, device, _, _) = session_with_factory();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();

    session.release();
    session.release();
    assert_eq!(session.state(), SessionState::Released);
    assert!(device.released.load(Ordering::SeqCst));
    assert!(session.start().is_err());
}

/// Filter whose frame buffer handle is fixed at init
struct FixedOutputFilter(TextureHandle);

impl Filter for FixedOutputFilter {
    fn init(&mut self, _ctx: &mut dyn GpuContext, _width: u32, _height: u32) -> RecorderResult<()> {
        Ok(())
    }
    fn resize(
        &mut self,
        _ctx: &mut dyn GpuContext,
        _width: u32,
        _height: u32,
    ) -> RecorderResult<()> {
        Ok(())
    }
    fn draw(&mut self, _ctx: &mut dyn GpuContext, _input: TextureHandle) -> RecorderResult<()> {
        Ok(())
    }
    fn output_texture(&self) -> TextureHandle {
        self.0
    }
    fn release(&mut self, _ctx: &mut dyn GpuContext) {}
}

/// Pixel reader that writes the texture id it was asked to read
struct StampReader;

impl PixelReader for StampReader {
    fn read_pixels(
        &mut self,
        _ctx: &mut dyn GpuContext,
        texture: TextureHandle,
        out: &mut [u8],
    ) -> RecorderResult<()> {
        out[0] = texture.0 as u8;
        Ok(())
    }
}

/// Codec that echoes the stamped byte back as the sample payload
struct StampCodec;

impl FrameCodec for StampCodec {
    fn encode(&mut self, frame: &[u8]) -> Result<Option<FrameSample>, RecorderError> {
        Ok(Some(FrameSample {
            kind: SampleKind::Key,
            pts_us: 0,
            data: vec![frame[0]],
        }))
    }
    fn format(&self) -> StreamFormat {
        StreamFormat {
            mime: "video/avc".into(),
            width: 2,
            height: 2,
        }
    }
    fn release(&mut self) {}
}

/// Factory wiring the real software encoder over the fake device
struct StampingFactory {
    device: Arc<DeviceShared>,
    muxer: Arc<FakeMuxer>,
}

impl PipelineFactory for StampingFactory {
    fn create_device(&mut self) -> RecorderResult<Box<dyn CaptureDevice>> {
        Ok(Box::new(FakeDevice(self.device.clone())))
    }

    fn create_gpu_context(&mut self) -> RecorderResult<Box<dyn GpuContext>> {
        Ok(Box::new(NullContext))
    }

    fn create_encoder(
        &mut self,
        config: &EncoderConfig,
        frames: Arc<RenderStage>,
        executor: Arc<GpuExecutor>,
        sink: Arc<dyn SampleSink>,
        events: Arc<dyn EncoderEvents>,
    ) -> RecorderResult<Box<dyn EncoderAdapter>> {
        let encoder = SoftwareVideoEncoder::new(
            config,
            frames,
            executor,
            Box::new(StampCodec),
            Box::new(StampReader),
            sink,
            events,
        )?;
        Ok(Box::new(encoder))
    }

    fn create_muxer(
        &mut self,
        _output_uri: &str,
        _events: Arc<dyn MuxerEvents>,
    ) -> RecorderResult<Arc<dyn MuxerAdapter>> {
        Ok(self.muxer.clone())
    }
}

#[test]
fn test_encoder_reads_live_filter_output() {
    let factory = StampingFactory {
        device: Arc::new(DeviceShared::default()),
        muxer: Arc::new(FakeMuxer::default()),
    };
    let device = factory.device.clone();
    let muxer = factory.muxer.clone();
    let config = SessionConfig {
        output_uri: Some("/tmp/out.mp4".into()),
        width: 2,
        height: 2,
        ..SessionConfig::default()
    };
    let session = Session::new(config, Box::new(factory));

    // The frame buffer only exists after the stage's queued init runs,
    // and every sample must carry its handle, not the default zero.
    session
        .set_filter(Box::new(FixedOutputFilter(TextureHandle(99))))
        .unwrap();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();

    for i in 1..=3u32 {
        device.emit_frame(TextureHandle(i));
    }
    session.stop().unwrap();

    let samples = muxer.samples.lock();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| s.data[0] == 99));
}

#[test]
fn test_audio_encoder_follows_lifecycle() {
    let (factory, audio) = TestFactory::with_audio();
    let config = SessionConfig {
        output_uri: Some("/tmp/out.mp4".into()),
        ..SessionConfig::default()
    };
    let session = Session::new(config, Box::new(factory));

    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();
    session.pause().unwrap();
    session.start().unwrap();
    session.stop().unwrap();

    assert_eq!(audio.starts.load(Ordering::SeqCst), 2);
    assert_eq!(audio.pauses.load(Ordering::SeqCst), 1);
    assert_eq!(audio.stops.load(Ordering::SeqCst), 1);
    assert_eq!(audio.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_stops_emit_one_stopped() {
    let (session, _, _, _) = session_with_factory();
    let mut rx = session.subscribe();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();
    session.start().unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| session.stop().unwrap());
        }
    });

    assert_eq!(session.state(), SessionState::Idle);
    let stopped = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, SessionEvent::Stopped { .. }))
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn test_capture_config_mirrors_session_config() {
    let (session, device, _, _) = session_with_factory();
    session.set_fps(24).unwrap();
    session.set_output_size(640, 480).unwrap();
    session.set_camera_index(CameraIndex::Front).unwrap();
    session.set_preview_display(surface()).unwrap();
    session.prepare().unwrap();

    let open_config = device.open_config.lock().clone().unwrap();
    assert_eq!(open_config.width, 640);
    assert_eq!(open_config.height, 480);
    assert_eq!(open_config.fps, 24);
    assert_eq!(open_config.camera, CameraIndex::Front);
}
