//! Recording session
//!
//! Orchestrates the capture device, GPU render stage, encoder and muxer
//! through an explicit state machine. The session owns the collaborators
//! for the lifetime of one prepare/stop cycle and is the only component
//! that moves state; collaborators report back through the `*Events`
//! traits, which the session implements on a weak handle so callbacks
//! arriving after teardown fall through harmlessly.
//!
//! Locking discipline: `state` is a fast RwLock consulted on every
//! callback; `parts` holds the collaborators and is never held across a
//! call that can re-enter the session (device open, encoder factory).

pub mod state;

use crate::capture::traits::{
    CameraIndex, CaptureConfig, CaptureDevice, DeviceEvents, SurfaceDescriptor, TextureHandle,
};
use crate::config::{EncoderConfig, SessionConfig};
use crate::encode::{EncoderAdapter, EncoderEvents, FrameSample, SampleKind, SampleSink, StreamFormat};
use crate::executor::{GpuContext, GpuExecutor};
use crate::mux::{MuxerAdapter, MuxerEvents};
use crate::render::filter::{Filter, PassthroughFilter};
use crate::render::RenderStage;
use crate::utils::error::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use state::{PrepareStage, SessionState};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events emitted by a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Pipeline assembled, preview frames flowing
    Prepared,
    /// Samples flowing to the muxer
    Started,
    /// Recording paused, preview still flowing
    Paused,
    /// One encoded sample delivered to the muxer
    Sample { kind: SampleKind, bytes: usize },
    /// Session returned to idle
    Stopped { duration_ms: u64 },
    /// A collaborator failed; the session tore down to idle
    Error { code: String, message: String },
}

/// Host-supplied constructors for the platform collaborators
///
/// Called during `prepare`; the factory decides which concrete device,
/// context, encoder and muxer back the session on this platform.
pub trait PipelineFactory: Send {
    fn create_device(&mut self) -> RecorderResult<Box<dyn CaptureDevice>>;

    fn create_gpu_context(&mut self) -> RecorderResult<Box<dyn GpuContext>>;

    /// Build the video encoder for `config`, reading frames from the
    /// render stage's output on `executor` and delivering output to
    /// `sink`. The frame buffer handle must be resolved on the executor
    /// thread at read time, never captured up front: it does not exist
    /// until the queued filter init has run and it changes when the
    /// filter is replaced or resized. Readiness is signalled
    /// asynchronously through `events`.
    fn create_encoder(
        &mut self,
        config: &EncoderConfig,
        frames: Arc<RenderStage>,
        executor: Arc<GpuExecutor>,
        sink: Arc<dyn SampleSink>,
        events: Arc<dyn EncoderEvents>,
    ) -> RecorderResult<Box<dyn EncoderAdapter>>;

    /// Build the audio encoder, delivering output to `sink`. `Ok(None)`
    /// means the session records video only.
    fn create_audio_encoder(
        &mut self,
        _sink: Arc<dyn SampleSink>,
        _events: Arc<dyn EncoderEvents>,
    ) -> RecorderResult<Option<Box<dyn EncoderAdapter>>> {
        Ok(None)
    }

    fn create_muxer(
        &mut self,
        output_uri: &str,
        events: Arc<dyn MuxerEvents>,
    ) -> RecorderResult<Arc<dyn MuxerAdapter>>;
}

/// Collaborators owned for one prepare/stop cycle
#[derive(Default)]
struct Parts {
    device: Option<Box<dyn CaptureDevice>>,
    executor: Option<Arc<GpuExecutor>>,
    render: Option<Arc<RenderStage>>,
    encoder: Option<Box<dyn EncoderAdapter>>,
    audio_encoder: Option<Box<dyn EncoderAdapter>>,
    muxer: Option<Arc<dyn MuxerAdapter>>,
    /// Filter installed before prepare, applied when the stage comes up
    pending_filter: Option<Box<dyn Filter>>,
}

struct SessionCore {
    id: Uuid,
    state: RwLock<SessionState>,
    config: RwLock<SessionConfig>,
    preview: Mutex<Option<SurfaceDescriptor>>,
    parts: Mutex<Parts>,
    factory: Mutex<Box<dyn PipelineFactory>>,
    /// Serializes the public commands (prepare/start/pause/stop/reset/
    /// release and the setters) against each other. Collaborator
    /// callbacks never take this lock, so re-entry from inside a command
    /// stays safe.
    ops: Mutex<()>,
    event_tx: broadcast::Sender<SessionEvent>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

/// A recording session
pub struct Session {
    core: Arc<SessionCore>,
}

impl Session {
    pub fn new(config: SessionConfig, factory: Box<dyn PipelineFactory>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            core: Arc::new(SessionCore {
                id: Uuid::new_v4(),
                state: RwLock::new(SessionState::Idle),
                config: RwLock::new(config),
                preview: Mutex::new(None),
                parts: Mutex::new(Parts::default()),
                factory: Mutex::new(factory),
                ops: Mutex::new(()),
                event_tx,
                started_at: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn state(&self) -> SessionState {
        *self.core.state.read()
    }

    pub fn prepared(&self) -> bool {
        self.state().is_prepared()
    }

    pub fn started(&self) -> bool {
        self.state() == SessionState::Started
    }

    pub fn width(&self) -> u32 {
        self.core.config.read().width
    }

    pub fn height(&self) -> u32 {
        self.core.config.read().height
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.event_tx.subscribe()
    }

    /// Frames dropped by the render stage's coalescing so far
    pub fn dropped_frames(&self) -> u64 {
        self.core
            .parts
            .lock()
            .render
            .as_ref()
            .map(|r| r.dropped_frames())
            .unwrap_or(0)
    }

    /// Assemble the pipeline and begin preview onto the surface set via
    /// [`set_preview_display`](Self::set_preview_display).
    ///
    /// Readiness is reported through the [`SessionEvent::Prepared`]
    /// event once the device and encoder have both come up. Calling
    /// prepare on an already preparing or prepared session is a no-op.
    pub fn prepare(&self) -> RecorderResult<()> {
        SessionCore::prepare(&self.core)
    }

    /// Begin delivering encoded samples to the muxer.
    pub fn start(&self) -> RecorderResult<()> {
        self.core.start()
    }

    /// Pause sample delivery; preview keeps running.
    pub fn pause(&self) -> RecorderResult<()> {
        self.core.pause()
    }

    /// Tear the pipeline down and return to idle. No-op when idle.
    pub fn stop(&self) -> RecorderResult<()> {
        self.core.stop()
    }

    /// Restore the default configuration. Legal only while idle.
    pub fn reset(&self) -> RecorderResult<()> {
        self.core.reset()
    }

    /// Drop everything and leave the session unusable. Idempotent.
    pub fn release(&self) {
        self.core.release()
    }

    /// Bind the preview surface used by the next prepare. Idle only.
    pub fn set_preview_display(&self, surface: SurfaceDescriptor) -> RecorderResult<()> {
        let _ops = self.core.ops.lock();
        if *self.core.state.read() != SessionState::Idle {
            return Err(self.core.illegal("set_preview_display"));
        }
        *self.core.preview.lock() = Some(surface);
        Ok(())
    }

    pub fn set_output_uri(&self, uri: impl Into<String>) -> RecorderResult<()> {
        self.core.update_idle_config("set_output_uri", |c| {
            c.output_uri = Some(uri.into());
        })
    }

    pub fn set_output_size(&self, width: u32, height: u32) -> RecorderResult<()> {
        self.core.update_idle_config("set_output_size", |c| {
            c.width = width;
            c.height = height;
        })
    }

    pub fn set_fps(&self, fps: u32) -> RecorderResult<()> {
        self.core.update_idle_config("set_fps", |c| c.fps = fps)
    }

    pub fn set_video_bitrate(&self, bitrate: u32) -> RecorderResult<()> {
        self.core
            .update_idle_config("set_video_bitrate", |c| c.bitrate = bitrate)
    }

    /// Select hardware or software encoding for the next prepare.
    pub fn enable_hardware(&self, enable: bool) -> RecorderResult<()> {
        self.core.update_idle_config("enable_hardware", |c| {
            c.codec_mode = if enable {
                crate::config::CodecMode::Hardware
            } else {
                crate::config::CodecMode::Software
            };
        })
    }

    /// Select the camera. Legal while idle (takes effect at prepare) and
    /// while the pipeline is live (switches the open device).
    pub fn set_camera_index(&self, index: CameraIndex) -> RecorderResult<()> {
        self.core.set_camera_index(index)
    }

    /// Install a filter. Applied immediately when the pipeline is live,
    /// otherwise stored and applied at the next prepare.
    pub fn set_filter(&self, filter: Box<dyn Filter>) -> RecorderResult<()> {
        self.core.set_filter(filter)
    }
}

impl SessionCore {
    fn send_event(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn illegal(&self, operation: &'static str) -> RecorderError {
        RecorderError::IllegalState {
            operation,
            state: self.state.read().name().to_string(),
        }
    }

    fn update_idle_config(
        &self,
        operation: &'static str,
        apply: impl FnOnce(&mut SessionConfig),
    ) -> RecorderResult<()> {
        let _ops = self.ops.lock();
        if *self.state.read() != SessionState::Idle {
            return Err(self.illegal(operation));
        }
        apply(&mut self.config.write());
        Ok(())
    }

    fn prepare(core: &Arc<Self>) -> RecorderResult<()> {
        let _ops = core.ops.lock();
        let surface = {
            let mut state = core.state.write();
            match *state {
                SessionState::Idle => {}
                SessionState::Released => return Err(core.illegal_locked("prepare", *state)),
                _ => {
                    debug!(session = %core.id, state = state.name(), "prepare ignored");
                    return Ok(());
                }
            }
            core.config.read().validate()?;
            let surface = (*core.preview.lock()).ok_or_else(|| {
                RecorderError::InvalidConfig("preview display is not set".into())
            })?;
            *state = SessionState::Preparing(PrepareStage::AwaitingDevice);
            surface
        };

        if let Err(e) = Self::assemble(core, surface) {
            core.fail("DEVICE_ERROR", &e.to_string());
            return Err(e);
        }
        Ok(())
    }

    fn illegal_locked(&self, operation: &'static str, state: SessionState) -> RecorderError {
        RecorderError::IllegalState {
            operation,
            state: state.name().to_string(),
        }
    }

    /// Bring up the executor, render stage and device. The encoder and
    /// muxer follow from the device-ready callback.
    fn assemble(core: &Arc<Self>, surface: SurfaceDescriptor) -> RecorderResult<()> {
        let config = core.config.read().clone();
        info!(
            session = %core.id,
            width = config.width,
            height = config.height,
            fps = config.fps,
            "preparing session"
        );

        let (context, mut device) = {
            let mut factory = core.factory.lock();
            (factory.create_gpu_context()?, factory.create_device()?)
        };
        let executor = Arc::new(GpuExecutor::spawn(context)?);

        let filter = core
            .parts
            .lock()
            .pending_filter
            .take()
            .unwrap_or_else(|| Box::<PassthroughFilter>::default());
        let render = Arc::new(RenderStage::new(executor.clone(), filter));
        render.start(surface, config.width, config.height)?;

        {
            let mut parts = core.parts.lock();
            parts.executor = Some(executor);
            parts.render = Some(render);
        }

        // The device may deliver on_device_ready synchronously from
        // open, which re-enters through the handle and builds the
        // encoder. The parts lock must not be held here.
        let handle: Arc<SessionHandle> = Arc::new(SessionHandle(Arc::downgrade(core)));
        let capture_config = CaptureConfig {
            camera: config.camera,
            width: config.width,
            height: config.height,
            fps: config.fps,
        };
        device.open(&capture_config, handle)?;

        // A synchronous failure during open may already have torn the
        // session back down; release the device instead of storing it.
        if *core.state.read() == SessionState::Idle {
            let _ = device.release();
            return Ok(());
        }
        core.parts.lock().device = Some(device);
        Ok(())
    }

    fn handle_device_ready(core: &Arc<Self>) {
        {
            let mut state = core.state.write();
            if *state != SessionState::Preparing(PrepareStage::AwaitingDevice) {
                warn!(state = state.name(), "device ready in unexpected state");
                return;
            }
            *state = SessionState::Preparing(PrepareStage::AwaitingEncoder);
        }
        debug!(session = %core.id, "device ready, building encode chain");
        if let Err(e) = Self::build_encode_chain(core) {
            core.fail("ENCODER_ERROR", &e.to_string());
        }
    }

    fn build_encode_chain(core: &Arc<Self>) -> RecorderResult<()> {
        let config = core.config.read().clone();
        let output_uri = config
            .output_uri
            .clone()
            .ok_or_else(|| RecorderError::InvalidConfig("output uri is not set".into()))?;

        let (executor, render) = {
            let parts = core.parts.lock();
            let executor = parts
                .executor
                .clone()
                .ok_or_else(|| RecorderError::Encoder("executor missing".into()))?;
            let render = parts
                .render
                .clone()
                .ok_or_else(|| RecorderError::Encoder("render stage missing".into()))?;
            (executor, render)
        };
        let handle: Arc<SessionHandle> = Arc::new(SessionHandle(Arc::downgrade(core)));

        let muxer = core
            .factory
            .lock()
            .create_muxer(&output_uri, handle.clone())?;
        core.parts.lock().muxer = Some(muxer.clone());

        let sink: Arc<dyn SampleSink> = Arc::new(ProgressSink {
            muxer,
            core: Arc::downgrade(core),
        });

        // The factory may fire on_encoder_ready synchronously; that
        // handler only touches the state lock, so holding nothing else
        // here keeps the re-entry safe.
        let encoder_config = EncoderConfig::from(&config);
        let encoder = core.factory.lock().create_encoder(
            &encoder_config,
            render,
            executor,
            sink.clone(),
            handle.clone(),
        )?;
        core.parts.lock().encoder = Some(encoder);

        let audio = core.factory.lock().create_audio_encoder(sink, handle)?;
        core.parts.lock().audio_encoder = audio;
        Ok(())
    }

    fn handle_encoder_ready(&self) {
        let mut state = self.state.write();
        if *state != SessionState::Preparing(PrepareStage::AwaitingEncoder) {
            warn!(state = state.name(), "encoder ready in unexpected state");
            return;
        }
        *state = SessionState::Prepared;
        drop(state);
        info!(session = %self.id, "session prepared");
        self.send_event(SessionEvent::Prepared);
    }

    fn start(&self) -> RecorderResult<()> {
        let _ops = self.ops.lock();
        {
            let state = self.state.read();
            match *state {
                SessionState::Prepared => {}
                SessionState::Started => return Ok(()),
                other => return Err(self.illegal_locked("start", other)),
            }
        }

        {
            let mut parts = self.parts.lock();
            if let Some(muxer) = parts.muxer.as_ref() {
                muxer.on_start()?;
            }
            if let Some(encoder) = parts.encoder.as_mut() {
                encoder.start()?;
            }
            if let Some(audio) = parts.audio_encoder.as_mut() {
                audio.start()?;
            }
        }

        let mut started_at = self.started_at.lock();
        if started_at.is_none() {
            *started_at = Some(Utc::now());
        }
        drop(started_at);

        *self.state.write() = SessionState::Started;
        info!(session = %self.id, "recording started");
        self.send_event(SessionEvent::Started);
        Ok(())
    }

    fn pause(&self) -> RecorderResult<()> {
        let _ops = self.ops.lock();
        {
            let state = self.state.read();
            if *state != SessionState::Started {
                return Err(self.illegal_locked("pause", *state));
            }
        }
        {
            let mut parts = self.parts.lock();
            if let Some(encoder) = parts.encoder.as_mut() {
                encoder.pause()?;
            }
            if let Some(audio) = parts.audio_encoder.as_mut() {
                audio.pause()?;
            }
        }
        *self.state.write() = SessionState::Prepared;
        info!(session = %self.id, "recording paused");
        self.send_event(SessionEvent::Paused);
        Ok(())
    }

    fn stop(&self) -> RecorderResult<()> {
        let _ops = self.ops.lock();
        self.stop_locked()
    }

    /// Body of `stop`; the caller holds the command lock.
    fn stop_locked(&self) -> RecorderResult<()> {
        {
            let state = self.state.read();
            match *state {
                SessionState::Idle | SessionState::Released => return Ok(()),
                _ => {}
            }
        }
        info!(session = %self.id, "stopping session");
        self.teardown();

        let duration_ms = self
            .started_at
            .lock()
            .take()
            .map(|t| (Utc::now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        *self.state.write() = SessionState::Idle;
        self.send_event(SessionEvent::Stopped { duration_ms });
        Ok(())
    }

    fn reset(&self) -> RecorderResult<()> {
        let _ops = self.ops.lock();
        {
            let state = self.state.read();
            if *state != SessionState::Idle {
                return Err(self.illegal_locked("reset", *state));
            }
        }
        *self.config.write() = SessionConfig::default();
        *self.preview.lock() = None;
        self.parts.lock().pending_filter = None;
        Ok(())
    }

    fn release(&self) {
        let _ops = self.ops.lock();
        {
            let state = self.state.read();
            if *state == SessionState::Released {
                return;
            }
        }
        let _ = self.stop_locked();
        *self.state.write() = SessionState::Released;
        info!(session = %self.id, "session released");
    }

    /// Collaborator failure path: emit the error, tear down, return to
    /// idle so the session can be prepared again.
    fn fail(&self, code: &str, message: &str) {
        error!(session = %self.id, code, message, "session failed");
        self.send_event(SessionEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        });
        self.teardown();
        self.started_at.lock().take();
        let mut state = self.state.write();
        if *state != SessionState::Released {
            *state = SessionState::Idle;
        }
    }

    /// Release collaborators in dependency order: device first so no new
    /// frames arrive, then the encoder and muxer as one task queued on
    /// the executor (ordered behind in-flight draws), then GPU teardown
    /// with the executor drained and joined.
    fn teardown(&self) {
        let (device, encoder, audio, muxer, render, executor) = {
            let mut parts = self.parts.lock();
            (
                parts.device.take(),
                parts.encoder.take(),
                parts.audio_encoder.take(),
                parts.muxer.take(),
                parts.render.take(),
                parts.executor.take(),
            )
        };

        if let Some(mut device) = device {
            if let Err(e) = device.release() {
                warn!("device release failed: {e}");
            }
        }

        match executor {
            Some(executor) => {
                if encoder.is_some() || audio.is_some() || muxer.is_some() {
                    // queue fails only when the executor is already
                    // stopped, which means a previous teardown ran and
                    // parts were empty
                    let _ = executor.queue(move |_| {
                        Self::drop_encode_chain(encoder, audio, muxer);
                    });
                }
                if let Some(render) = render {
                    if let Err(e) = render.release() {
                        warn!("render release failed: {e}");
                    }
                }
                executor.stop();
            }
            None => Self::drop_encode_chain(encoder, audio, muxer),
        }
    }

    fn drop_encode_chain(
        encoder: Option<Box<dyn EncoderAdapter>>,
        audio: Option<Box<dyn EncoderAdapter>>,
        muxer: Option<Arc<dyn MuxerAdapter>>,
    ) {
        for mut adapter in [encoder, audio].into_iter().flatten() {
            if let Err(e) = adapter.stop() {
                warn!("encoder stop failed: {e}");
            }
            if let Err(e) = adapter.release() {
                warn!("encoder release failed: {e}");
            }
        }
        if let Some(muxer) = muxer {
            if let Err(e) = muxer.reset() {
                warn!("muxer reset failed: {e}");
            }
            if let Err(e) = muxer.release() {
                warn!("muxer release failed: {e}");
            }
        }
    }

    /// Route a camera frame to the render stage, and on to the encoder
    /// while recording. Called on the device's callback thread.
    fn handle_frame(&self, texture: TextureHandle) {
        let state = *self.state.read();
        if !state.is_prepared() {
            return;
        }

        let render = self.parts.lock().render.clone();
        if let Some(render) = render {
            if let Err(e) = render.on_frame_available(texture) {
                warn!("render dispatch failed: {e}");
                return;
            }
        }

        if state == SessionState::Started {
            // Queued on the same executor as the draw above, so the
            // encoder reads the texture the draw produced.
            let parts = self.parts.lock();
            if let Some(encoder) = parts.encoder.as_ref() {
                encoder.frame_available();
            }
        }
    }

    fn set_camera_index(&self, index: CameraIndex) -> RecorderResult<()> {
        let _ops = self.ops.lock();
        let state = *self.state.read();
        if state == SessionState::Idle {
            self.config.write().camera = index;
            return Ok(());
        }
        let mut parts = self.parts.lock();
        match parts.device.as_mut() {
            Some(device) => {
                device.switch_camera(index)?;
                drop(parts);
                self.config.write().camera = index;
                Ok(())
            }
            None => Err(self.illegal_locked("set_camera_index", state)),
        }
    }

    fn set_filter(&self, filter: Box<dyn Filter>) -> RecorderResult<()> {
        let _ops = self.ops.lock();
        let mut parts = self.parts.lock();
        match parts.render.as_ref() {
            Some(render) => render.set_filter(filter),
            None => {
                parts.pending_filter = Some(filter);
                Ok(())
            }
        }
    }
}

/// Weak callback handle handed to collaborators
///
/// Upgrades on every callback; a collaborator firing after the session
/// dropped simply loses the event.
struct SessionHandle(Weak<SessionCore>);

impl DeviceEvents for SessionHandle {
    fn on_device_ready(&self) {
        if let Some(core) = self.0.upgrade() {
            SessionCore::handle_device_ready(&core);
        }
    }

    fn on_frame(&self, texture: TextureHandle) {
        if let Some(core) = self.0.upgrade() {
            core.handle_frame(texture);
        }
    }

    fn on_device_error(&self, message: String) {
        if let Some(core) = self.0.upgrade() {
            core.fail("DEVICE_ERROR", &message);
        }
    }
}

impl EncoderEvents for SessionHandle {
    fn on_encoder_ready(&self) {
        if let Some(core) = self.0.upgrade() {
            core.handle_encoder_ready();
        }
    }

    fn on_encoder_error(&self, message: String) {
        if let Some(core) = self.0.upgrade() {
            core.fail("ENCODER_ERROR", &message);
        }
    }
}

impl MuxerEvents for SessionHandle {
    fn on_muxer_start(&self) {
        if let Some(core) = self.0.upgrade() {
            debug!(session = %core.id, "muxer started");
        }
    }

    fn on_muxer_error(&self, code: i32, message: String) {
        if let Some(core) = self.0.upgrade() {
            core.fail("MUXER_ERROR", &format!("{code}: {message}"));
        }
    }
}

/// Sample sink that tees encoder output to the muxer and mirrors
/// delivery as session events.
struct ProgressSink {
    muxer: Arc<dyn MuxerAdapter>,
    core: Weak<SessionCore>,
}

impl SampleSink for ProgressSink {
    fn on_format_changed(&self, format: StreamFormat) {
        debug!(mime = %format.mime, width = format.width, height = format.height, "stream format negotiated");
        self.muxer.on_format_changed(format);
    }

    fn on_sample(&self, sample: FrameSample) {
        if let Some(core) = self.core.upgrade() {
            core.send_event(SessionEvent::Sample {
                kind: sample.kind,
                bytes: sample.data.len(),
            });
        }
        self.muxer.on_sample(sample);
    }
}
