//! Network send sink

use crate::error::{BridgeError, Result};
use crate::identity::EndpointIdentity;
use crate::session::{DeviceSession, SessionState};
use std::sync::Arc;
use vbridge_native::{LibraryLease, NetworkLibrary, NetworkSender, OutgoingVideoFrame, SharedNetwork};
use vbridge_video::{bgr_to_bgra, FrameBuffer, FrameRate};

struct SenderHandle {
    sender: Box<dyn NetworkSender>,
    _lease: LibraryLease<dyn NetworkLibrary>,
}

pub struct NetworkSink {
    identity: EndpointIdentity,
    name: String,
    frame_rate: FrameRate,
    network: Arc<SharedNetwork>,
    session: DeviceSession<SenderHandle>,
    sent: u64,
}

impl NetworkSink {
    pub fn new(network: Arc<SharedNetwork>, name: impl Into<String>, frame_rate: FrameRate) -> Self {
        let name = name.into();
        Self {
            identity: EndpointIdentity::Network {
                name: name.clone(),
                address: None,
            },
            session: DeviceSession::new(format!("send {name}")),
            name,
            frame_rate,
            network,
            sent: 0,
        }
    }

    /// Announce the sender
    pub fn start(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Uninitialized {
            let (network, name) = (&self.network, &self.name);

            self.session.initialize(|| {
                let lease = network
                    .acquire()
                    .map_err(|e| BridgeError::initialization("network runtime", e))?;
                let sender = lease
                    .create_sender(name)
                    .map_err(|e| BridgeError::connection(name, e))?;

                Ok(SenderHandle { sender, _lease: lease })
            })?;
        }

        self.session.start(|_| Ok(()))?;
        log::info!("sending as {:?}", self.name);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.session.stop(|_| Ok(()))
    }

    /// Convert to BGRA and send synchronously
    ///
    /// The converted buffer is freshly allocated per frame and lives until
    /// the native call has returned.
    pub fn send(&mut self, frame: &FrameBuffer) -> Result<()> {
        if !self.session.is_running() {
            return Err(BridgeError::Transport(format!("{}: sink is not running", self.name)));
        }

        let wire = bgr_to_bgra(frame)?;
        let outgoing = OutgoingVideoFrame {
            // Let the library stamp the timecode
            timecode: None,
            ..OutgoingVideoFrame::progressive(&wire, self.frame_rate)
        };

        let handle = self
            .session
            .resource_mut()
            .ok_or_else(|| BridgeError::Transport(format!("{}: sender released", self.name)))?;
        handle
            .sender
            .send_video(&outgoing)
            .map_err(|e| BridgeError::transport(&self.name, e))?;

        self.sent += 1;
        Ok(())
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn frames_sent(&self) -> u64 {
        self.sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vbridge_native::loopback::LoopbackNetwork;
    use vbridge_native::{NativeVideoFrame, SharedLibrary, SourceDescriptor};
    use vbridge_video::{Bgr8, PixelFormat};

    fn shared(network: &LoopbackNetwork) -> Arc<SharedNetwork> {
        SharedLibrary::<dyn NetworkLibrary>::new(Arc::new(network.clone()))
    }

    #[test]
    fn test_send_announces_bgra() {
        let network = LoopbackNetwork::new();
        let shared = shared(&network);
        let mut sink = NetworkSink::new(Arc::clone(&shared), "SDI-NDI Converter", FrameRate::NTSC_60);
        sink.start().unwrap();
        assert_eq!(network.announced(), vec!["SDI-NDI Converter"]);

        let lease = shared.acquire().unwrap();
        let mut receiver = lease
            .create_receiver(&SourceDescriptor::named("SDI-NDI Converter"))
            .unwrap();

        let frame = FrameBuffer::solid(4, 2, Bgr8::new(1, 2, 3)).unwrap().with_timecode(99);
        sink.send(&frame).unwrap();
        assert_eq!(sink.frames_sent(), 1);

        let mut seen = None;
        for _ in 0..3 {
            receiver
                .capture_video(Duration::from_millis(50), &mut |f: NativeVideoFrame<'_>| {
                    seen = Some((f.format, f.data[..4].to_vec(), f.timecode))
                })
                .unwrap();
        }
        let (format, first_pixel, timecode) = seen.unwrap();
        assert_eq!(format, PixelFormat::Bgra);
        assert_eq!(first_pixel, vec![1, 2, 3, 255]);
        // Timecode is synthesized, not copied from the capture
        assert_ne!(timecode, Some(99));
    }

    #[test]
    fn test_send_after_stop_rejected() {
        let network = LoopbackNetwork::new();
        let mut sink = NetworkSink::new(shared(&network), "Out", FrameRate::NTSC_60);
        sink.start().unwrap();
        sink.stop().unwrap();

        let frame = FrameBuffer::solid(2, 2, Bgr8::BLACK).unwrap();
        assert!(matches!(sink.send(&frame), Err(BridgeError::Transport(_))));
        assert_eq!(network.frames_sent(), 0);
    }

    #[test]
    fn test_non_canonical_frame_rejected() {
        let network = LoopbackNetwork::new();
        let mut sink = NetworkSink::new(shared(&network), "Out", FrameRate::NTSC_60);
        sink.start().unwrap();

        let frame = FrameBuffer::zeroed(2, 2, PixelFormat::Yuy2).unwrap();
        assert!(matches!(sink.send(&frame), Err(BridgeError::Conversion(_))));
        assert_eq!(network.frames_sent(), 0);
    }

    #[test]
    fn test_transport_failure_keeps_running() {
        let network = LoopbackNetwork::new();
        let mut sink = NetworkSink::new(shared(&network), "Out", FrameRate::NTSC_60);
        sink.start().unwrap();

        network.set_fail_sends(true);
        let frame = FrameBuffer::solid(2, 2, Bgr8::BLACK).unwrap();
        assert!(matches!(sink.send(&frame), Err(BridgeError::Transport(_))));
        assert!(sink.is_running());

        network.set_fail_sends(false);
        assert!(sink.send(&frame).is_ok());
    }
}
