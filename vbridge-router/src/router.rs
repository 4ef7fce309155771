//! Frame router
//!
//! Holds at most one capture source and one output sink. Frames are forwarded
//! inline on the thread that produced them: preview subscribers first
//! (never blocking), then the sink. There is no queue between source and sink,
//! so a slow sink slows the source down instead of piling up frames.
//!
//! Control calls (`start`, `stop`) are serialized by one control lock; the
//! state and stats can be read at any time without taking it.

use crate::config::BridgeConfig;
use crate::discovery::Discovery;
use crate::emitter::FrameHandler;
use crate::error::Result;
use crate::events::{EventReporter, RouterEvent, RouterState};
use crate::identity::{EndpointIdentity, EndpointSelection, SinkSelection};
use crate::preview::PreviewHub;
use crate::sink::{HardwareSink, NetworkSink, OutputSink};
use crate::source::{CaptureSource, HardwareSource, NetworkSource, ReceiveSettings};
use crossbeam::channel::Receiver;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vbridge_native::{HardwareDriver, NetworkLibrary, SharedHardware, SharedLibrary, SharedNetwork};
use vbridge_video::FrameBuffer;

/// Native runtimes the router builds endpoints from
///
/// Cloning shares the runtimes, so several routers can use one process-wide
/// library without tearing it down under each other.
#[derive(Clone)]
pub struct Backends {
    pub hardware: Arc<SharedHardware>,
    pub network: Arc<SharedNetwork>,
}

impl Backends {
    pub fn new(hardware: Arc<dyn HardwareDriver>, network: Arc<dyn NetworkLibrary>) -> Self {
        Self {
            hardware: SharedLibrary::new(hardware),
            network: SharedLibrary::new(network),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Frames that reached the forwarding handler
    pub frames_forwarded: u64,
    /// Sink sends that returned an error
    pub send_failures: u64,
    pub preview_delivered: u64,
    /// Preview frames a full subscriber missed
    pub preview_dropped: u64,
    /// Events nobody had room for
    pub events_dropped: u64,
}

#[derive(Default)]
struct Counters {
    forwarded: AtomicU64,
    send_failures: AtomicU64,
}

struct Pipeline {
    source: CaptureSource,
    sink: Option<Arc<Mutex<OutputSink>>>,
}

#[derive(Default)]
struct Control {
    pipeline: Option<Pipeline>,
    /// Last network selection and what discovery resolved it to
    resolved: Option<(String, EndpointIdentity)>,
}

pub struct FrameRouter {
    backends: Backends,
    config: BridgeConfig,
    control: Mutex<Control>,
    state: RwLock<RouterState>,
    preview: Arc<PreviewHub>,
    events: EventReporter,
    event_rx: Receiver<RouterEvent>,
    counters: Arc<Counters>,
}

impl FrameRouter {
    pub fn new(backends: Backends, config: BridgeConfig) -> Self {
        let (events, event_rx) = EventReporter::channel(config.router.event_depth);

        Self {
            preview: Arc::new(PreviewHub::new(config.router.preview_depth)),
            backends,
            config,
            control: Mutex::new(Control::default()),
            state: RwLock::new(RouterState::Idle),
            events,
            event_rx,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start routing from `source` to `sink`; `None` runs preview only
    ///
    /// A running pipeline is fully stopped first. On failure every endpoint
    /// started so far is rolled back, the router stays idle and the error is
    /// both returned and published.
    pub fn start(&self, source: EndpointSelection, sink: Option<SinkSelection>) -> Result<()> {
        let mut control = self.control.lock();

        if control.pipeline.is_some() {
            log::info!("switching endpoints");
            self.teardown(&mut control);
        }

        self.set_state(RouterState::Starting);

        match self.bring_up(&mut control, &source, sink.as_ref()) {
            Ok(pipeline) => {
                let state = if pipeline.sink.is_some() {
                    RouterState::Running
                } else {
                    RouterState::Preview
                };
                log::info!(
                    "routing {} -> {}",
                    pipeline.source.identity(),
                    sink.as_ref().map_or_else(|| "preview".to_string(), |s| s.to_string())
                );
                control.pipeline = Some(pipeline);
                self.set_state(state);
                Ok(())
            }
            Err(e) => {
                log::error!("start {} failed: {}", source, e);
                control.resolved = None;
                self.events.error(e.clone());
                self.set_state(RouterState::Idle);
                Err(e)
            }
        }
    }

    /// Stop the pipeline, if any
    ///
    /// Safe to call at any time. Teardown failures are published as events.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        self.teardown(&mut control);
    }

    pub fn state(&self) -> RouterState {
        *self.state.read()
    }

    /// The active source, if any
    pub fn source_identity(&self) -> Option<EndpointIdentity> {
        let control = self.control.lock();
        control.pipeline.as_ref().map(|p| p.source.identity().clone())
    }

    /// Frames forwarded to preview; a receiver that is dropped is forgotten
    pub fn subscribe_preview(&self) -> Receiver<Arc<FrameBuffer>> {
        self.preview.subscribe()
    }

    /// State changes and errors
    pub fn events(&self) -> Receiver<RouterEvent> {
        self.event_rx.clone()
    }

    /// Network sources currently announcing, waiting up to `timeout`
    pub fn list_sources(&self, timeout: Duration) -> Vec<EndpointIdentity> {
        Discovery::new(
            Arc::clone(&self.backends.network),
            self.config.network.show_local_sources,
        )
        .list_sources(timeout)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            frames_forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            preview_delivered: self.preview.delivered(),
            preview_dropped: self.preview.dropped(),
            events_dropped: self.events.dropped(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    fn set_state(&self, state: RouterState) {
        *self.state.write() = state;
        log::debug!("router {}", state);
        self.events.state(state);
    }

    fn bring_up(
        &self,
        control: &mut Control,
        selection: &EndpointSelection,
        sink_selection: Option<&SinkSelection>,
    ) -> Result<Pipeline> {
        let identity = self.resolve_source(control, selection)?;
        let mut source = self.build_source(identity)?;
        source.start()?;

        let sink = match sink_selection {
            Some(selection) => {
                let mut sink = self.build_sink(selection);
                if let Err(e) = sink.start() {
                    if let Err(stop_err) = source.stop() {
                        log::warn!("rollback of {} failed: {}", source.identity(), stop_err);
                        self.events.error(stop_err);
                    }
                    return Err(e);
                }
                Some(Arc::new(Mutex::new(sink)))
            }
            None => None,
        };

        source.subscribe(self.forwarder(sink.clone()));
        Ok(Pipeline { source, sink })
    }

    /// Hardware resolves immediately; network names go through discovery
    /// once per selection change
    fn resolve_source(&self, control: &mut Control, selection: &EndpointSelection) -> Result<EndpointIdentity> {
        match selection {
            EndpointSelection::Hardware(device) => Ok(EndpointIdentity::Hardware {
                device_index: *device,
                mode: self.config.hardware.mode,
            }),
            EndpointSelection::Network(name) => {
                if let Some((cached, identity)) = &control.resolved {
                    if cached == name {
                        return Ok(identity.clone());
                    }
                }

                let discovery = Discovery::new(
                    Arc::clone(&self.backends.network),
                    self.config.network.show_local_sources,
                );
                let identity = discovery.resolve(name, self.config.network.discovery_timeout())?;
                control.resolved = Some((name.clone(), identity.clone()));
                Ok(identity)
            }
        }
    }

    fn build_source(&self, identity: EndpointIdentity) -> Result<CaptureSource> {
        let events = self.events.clone();
        Ok(match identity {
            EndpointIdentity::Hardware { device_index, mode } => CaptureSource::Hardware(HardwareSource::new(
                Arc::clone(&self.backends.hardware),
                device_index,
                mode,
                events,
            )),
            identity @ EndpointIdentity::Network { .. } => CaptureSource::Network(NetworkSource::new(
                Arc::clone(&self.backends.network),
                identity,
                ReceiveSettings::from(&self.config.network),
                events,
            )?),
        })
    }

    fn build_sink(&self, selection: &SinkSelection) -> OutputSink {
        match selection {
            SinkSelection::Network(name) => OutputSink::Network(NetworkSink::new(
                Arc::clone(&self.backends.network),
                name.clone(),
                self.config.network.frame_rate,
            )),
            SinkSelection::Hardware(device) => OutputSink::Hardware(HardwareSink::new(
                Arc::clone(&self.backends.hardware),
                *device,
                self.config.hardware.mode,
            )),
        }
    }

    /// Runs on the source's delivery thread for every frame
    fn forwarder(&self, sink: Option<Arc<Mutex<OutputSink>>>) -> FrameHandler {
        let preview = Arc::clone(&self.preview);
        let events = self.events.clone();
        let counters = Arc::clone(&self.counters);

        Box::new(move |frame: FrameBuffer| {
            let frame = Arc::new(frame);
            counters.forwarded.fetch_add(1, Ordering::Relaxed);

            preview.publish(&frame);

            if let Some(sink) = &sink {
                if let Err(e) = sink.lock().send(&frame) {
                    counters.send_failures.fetch_add(1, Ordering::Relaxed);
                    log::debug!("send failed: {e}");
                    events.error(e);
                }
            }
        })
    }

    /// Unsubscribe, stop the sink, stop the source, release everything
    fn teardown(&self, control: &mut Control) {
        let Some(mut pipeline) = control.pipeline.take() else {
            return;
        };

        self.set_state(RouterState::Stopping);

        // No frame reaches the sink after this returns
        pipeline.source.unsubscribe();

        if let Some(sink) = &pipeline.sink {
            let mut sink = sink.lock();
            if let Err(e) = sink.stop() {
                log::warn!("stopping {} failed: {}", sink.identity(), e);
                self.events.error(e);
            }
        }

        if let Err(e) = pipeline.source.stop() {
            log::warn!("stopping {} failed: {}", pipeline.source.identity(), e);
            self.events.error(e);
        }

        log::info!(
            "stopped {} after {} frames",
            pipeline.source.identity(),
            pipeline.source.frames_captured()
        );
        drop(pipeline);

        self.set_state(RouterState::Idle);
    }
}

impl Drop for FrameRouter {
    fn drop(&mut self) {
        self.stop();
    }
}
