//! Card playback sink
//!
//! Each frame is converted straight into a native frame object sized to the
//! fixed mode and scheduled at the next frame index on a clock that ticks
//! `frame_rate.num` times per second, one frame lasting `frame_rate.den`.

use crate::error::{BridgeError, Result};
use crate::identity::EndpointIdentity;
use crate::session::{DeviceSession, SessionState};
use std::sync::Arc;
use vbridge_native::{HardwareDriver, HardwareOutput, LibraryLease, SharedHardware};
use vbridge_video::{convert_bgr_to_yuy2, ConversionError, FrameBuffer, PixelFormat, VideoMode};

struct OutputHandle {
    output: Box<dyn HardwareOutput>,
    _lease: LibraryLease<dyn HardwareDriver>,
}

pub struct HardwareSink {
    identity: EndpointIdentity,
    device: u32,
    mode: VideoMode,
    driver: Arc<SharedHardware>,
    session: DeviceSession<OutputHandle>,
    next_index: i64,
    sent: u64,
}

impl HardwareSink {
    pub fn new(driver: Arc<SharedHardware>, device: u32, mode: VideoMode) -> Self {
        Self {
            identity: EndpointIdentity::Hardware {
                device_index: device,
                mode,
            },
            device,
            mode,
            driver,
            session: DeviceSession::new(format!("playout hw:{device}")),
            next_index: 0,
            sent: 0,
        }
    }

    fn time_scale(&self) -> i64 {
        self.mode.frame_rate.num as i64
    }

    fn frame_duration(&self) -> i64 {
        self.mode.frame_rate.den as i64
    }

    /// Enable the output and start scheduled playback at time zero
    pub fn start(&mut self) -> Result<()> {
        let (device, mode, time_scale) = (self.device, self.mode, self.time_scale());

        if self.session.state() == SessionState::Uninitialized {
            let driver = &self.driver;
            self.session.initialize(|| {
                let lease = driver
                    .acquire()
                    .map_err(|e| BridgeError::initialization("playout driver", e))?;
                let output = lease
                    .open_output(device, &mode)
                    .map_err(|e| BridgeError::initialization(&format!("hw:{device} output"), e))?;

                Ok(OutputHandle { output, _lease: lease })
            })?;
        }

        self.session.start(|handle| {
            handle
                .output
                .start_playback(0, time_scale)
                .map_err(|e| BridgeError::initialization(&format!("hw:{device} playback"), e))
        })?;
        self.next_index = 0;

        log::info!("playing out on hw:{} ({}x{})", device, mode.width, mode.height);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        let device = self.device;
        self.session.stop(|handle| {
            handle
                .output
                .stop_playback()
                .map_err(|e| BridgeError::transport(&format!("hw:{device} stop"), e))
        })
    }

    /// Convert to YUY2 inside a native frame and schedule it
    pub fn send(&mut self, frame: &FrameBuffer) -> Result<()> {
        if !self.session.is_running() {
            return Err(BridgeError::Transport(format!("hw:{}: sink is not running", self.device)));
        }
        if frame.width() != self.mode.width || frame.height() != self.mode.height {
            return Err(ConversionError::ShapeMismatch {
                width: self.mode.width,
                height: self.mode.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            }
            .into());
        }
        if frame.format() != PixelFormat::Bgr {
            return Err(ConversionError::Unsupported {
                from: frame.format(),
                to: PixelFormat::Yuy2,
            }
            .into());
        }

        let (device, duration, time_scale) = (self.device, self.frame_duration(), self.time_scale());
        let display_time = self.next_index * duration;
        let (width, height) = (self.mode.width, self.mode.height);
        let row_bytes = PixelFormat::Yuy2.min_stride(width);

        let handle = self
            .session
            .resource_mut()
            .ok_or_else(|| BridgeError::Transport(format!("hw:{device}: output released")))?;

        let mut native = handle
            .output
            .create_frame(width, height, row_bytes, PixelFormat::Yuy2)
            .map_err(|e| BridgeError::transport(&format!("hw:{device} create frame"), e))?;

        let out_stride = native.row_bytes();
        convert_bgr_to_yuy2(
            frame.data(),
            native.bytes_mut(),
            width as usize,
            height as usize,
            frame.stride(),
            out_stride,
        )?;

        handle
            .output
            .schedule_frame(native, display_time, duration, time_scale)
            .map_err(|e| BridgeError::transport(&format!("hw:{device} schedule"), e))?;

        self.next_index += 1;
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
    use vbridge_native::loopback::LoopbackCard;
    use vbridge_native::SharedLibrary;
    use vbridge_video::{Bgr8, FrameRate};

    fn mode() -> VideoMode {
        VideoMode::new(4, 2, FrameRate::NTSC_60, PixelFormat::Yuy2)
    }

    fn sink(card: &LoopbackCard) -> HardwareSink {
        let driver = SharedLibrary::<dyn HardwareDriver>::new(Arc::new(card.clone()));
        HardwareSink::new(driver, 0, mode())
    }

    #[test]
    fn test_schedules_monotonic_frames() {
        let card = LoopbackCard::new(1);
        let mut sink = sink(&card);
        sink.start().unwrap();

        let black = FrameBuffer::solid(4, 2, Bgr8::BLACK).unwrap();
        let white = FrameBuffer::solid(4, 2, Bgr8::WHITE).unwrap();
        sink.send(&black).unwrap();
        sink.send(&white).unwrap();

        let log = card.playout(0);
        assert_eq!(log.scheduled, 2);
        assert_eq!(log.time_scale, Some(60000));
        assert_eq!(log.last_duration, Some(1001));
        assert_eq!(log.last_display_time, Some(1001));
        assert_eq!(log.last_frame.unwrap()[..4], [235, 128, 235, 128]);
        assert_eq!(sink.frames_sent(), 2);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let card = LoopbackCard::new(1);
        let mut sink = sink(&card);
        sink.start().unwrap();

        let frame = FrameBuffer::solid(8, 2, Bgr8::BLACK).unwrap();
        let err = sink.send(&frame).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Conversion(ConversionError::ShapeMismatch { actual_width: 8, .. })
        ));
        assert_eq!(card.playout(0).scheduled, 0);
        assert!(sink.is_running());
    }

    #[test]
    fn test_no_schedule_after_stop() {
        let card = LoopbackCard::new(1);
        let mut sink = sink(&card);
        sink.start().unwrap();
        sink.stop().unwrap();

        let frame = FrameBuffer::solid(4, 2, Bgr8::BLACK).unwrap();
        assert!(sink.send(&frame).is_err());
        assert_eq!(card.playout(0).scheduled, 0);
        assert!(!card.playout(0).playing);

        drop(sink);
        assert_eq!(card.live_handles(), 0);
        assert_eq!(card.destroy_count(), 1);
    }

    #[test]
    fn test_restart_resets_clock() {
        let card = LoopbackCard::new(1);
        let mut sink = sink(&card);
        let frame = FrameBuffer::solid(4, 2, Bgr8::BLACK).unwrap();

        sink.start().unwrap();
        sink.send(&frame).unwrap();
        sink.send(&frame).unwrap();
        sink.stop().unwrap();

        sink.start().unwrap();
        sink.send(&frame).unwrap();
        assert_eq!(card.playout(0).last_display_time, Some(0));
    }
}
