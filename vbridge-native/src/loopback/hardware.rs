use crate::error::NativeError;
use crate::frame::{DeviceFrame, NativeVideoFrame};
use crate::hardware::{FrameCallback, HardwareDriver, HardwareInput, HardwareOutput};
use crate::loopback::Journal;
use crate::runtime::NativeRuntime;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use vbridge_video::{bgr_to_yuy2, Bgr8, FrameBuffer, PixelFormat, VideoMode};

/// 75% colour bars, left to right
const BARS: [Bgr8; 8] = [
    Bgr8::new(191, 191, 191),
    Bgr8::new(0, 191, 191),
    Bgr8::new(191, 191, 0),
    Bgr8::new(0, 191, 0),
    Bgr8::new(191, 0, 191),
    Bgr8::new(0, 0, 191),
    Bgr8::new(191, 0, 0),
    Bgr8::new(0, 0, 0),
];

/// What an output has been asked to play
#[derive(Debug, Clone, Default)]
pub struct PlayoutLog {
    pub playing: bool,
    pub scheduled: u64,
    pub last_display_time: Option<i64>,
    pub last_duration: Option<i64>,
    pub time_scale: Option<i64>,
    pub last_frame: Option<Vec<u8>>,
}

struct Card {
    devices: u32,
    journal: Journal,

    initialized: AtomicBool,
    fail_initialize: AtomicBool,

    initialize_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    live_handles: AtomicUsize,
    capture_threads: AtomicUsize,
    frames_delivered: AtomicU64,

    open_inputs: Mutex<HashSet<u32>>,
    open_outputs: Mutex<HashSet<u32>>,
    playout: Mutex<HashMap<u32, PlayoutLog>>,
}

impl Card {
    fn ensure_initialized(&self, call: &'static str) -> Result<(), NativeError> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NativeError::call(call, "driver not initialized"))
        }
    }

    fn claim(&self, set: &Mutex<HashSet<u32>>, device: u32) -> Result<(), NativeError> {
        if device >= self.devices {
            return Err(NativeError::DeviceNotFound(device));
        }
        if !set.lock().insert(device) {
            return Err(NativeError::DeviceBusy(device));
        }
        self.live_handles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self, set: &Mutex<HashSet<u32>>, device: u32) {
        set.lock().remove(&device);
        self.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-process capture/playback card
#[derive(Clone)]
pub struct LoopbackCard {
    card: Arc<Card>,
}

impl LoopbackCard {
    pub fn new(devices: u32) -> Self {
        Self::with_journal(devices, Journal::new())
    }

    pub fn with_journal(devices: u32, journal: Journal) -> Self {
        Self {
            card: Arc::new(Card {
                devices,
                journal,
                initialized: AtomicBool::new(false),
                fail_initialize: AtomicBool::new(false),
                initialize_calls: AtomicUsize::new(0),
                destroy_calls: AtomicUsize::new(0),
                live_handles: AtomicUsize::new(0),
                capture_threads: AtomicUsize::new(0),
                frames_delivered: AtomicU64::new(0),
                open_inputs: Mutex::new(HashSet::new()),
                open_outputs: Mutex::new(HashSet::new()),
                playout: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.card.journal
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        self.card.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn initialize_count(&self) -> usize {
        self.card.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.card.destroy_calls.load(Ordering::SeqCst)
    }

    /// Open inputs plus open outputs
    pub fn live_handles(&self) -> usize {
        self.card.live_handles.load(Ordering::SeqCst)
    }

    /// Driver threads currently delivering frames
    pub fn capture_threads(&self) -> usize {
        self.card.capture_threads.load(Ordering::SeqCst)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.card.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn playout(&self, device: u32) -> PlayoutLog {
        self.card.playout.lock().get(&device).cloned().unwrap_or_default()
    }
}

impl NativeRuntime for LoopbackCard {
    fn name(&self) -> &str {
        "loopback card"
    }

    fn initialize(&self) -> Result<(), NativeError> {
        if self.card.fail_initialize.load(Ordering::SeqCst) {
            return Err(NativeError::LibraryUnavailable(
                "loopback card initialization disabled".into(),
            ));
        }
        self.card.initialize_calls.fetch_add(1, Ordering::SeqCst);
        self.card.initialized.store(true, Ordering::SeqCst);
        self.card.journal.record("card:initialize");
        Ok(())
    }

    fn destroy(&self) {
        self.card.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.card.initialized.store(false, Ordering::SeqCst);
        self.card.journal.record("card:destroy");
    }
}

impl HardwareDriver for LoopbackCard {
    fn device_count(&self) -> u32 {
        self.card.devices
    }

    fn open_input(&self, device: u32, mode: &VideoMode) -> Result<Box<dyn HardwareInput>, NativeError> {
        self.card.ensure_initialized("enable_video_input")?;
        if mode.format != PixelFormat::Yuy2 {
            return Err(NativeError::call(
                "enable_video_input",
                format!("capture format {} not supported", mode.format),
            ));
        }
        let pattern = colour_bars(mode)?;

        self.card.claim(&self.card.open_inputs, device)?;
        self.card.journal.record(format!("input{device}:enable"));

        Ok(Box::new(LoopbackInput {
            card: Arc::clone(&self.card),
            device,
            mode: *mode,
            pattern: Arc::new(pattern),
            callback: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }

    fn open_output(&self, device: u32, mode: &VideoMode) -> Result<Box<dyn HardwareOutput>, NativeError> {
        self.card.ensure_initialized("enable_video_output")?;

        self.card.claim(&self.card.open_outputs, device)?;
        self.card.journal.record(format!("output{device}:enable"));
        self.card.playout.lock().insert(device, PlayoutLog::default());

        Ok(Box::new(LoopbackOutput {
            card: Arc::clone(&self.card),
            device,
            mode: *mode,
            playing: false,
        }))
    }
}

fn colour_bars(mode: &VideoMode) -> Result<FrameBuffer, NativeError> {
    let frame = FrameBuffer::solid(mode.width, mode.height, Bgr8::BLACK)
        .map_err(|e| NativeError::call("enable_video_input", e.to_string()))?;

    let width = mode.width as usize;
    let stride = frame.stride();
    let mut data = frame.into_data();
    for row in data.chunks_exact_mut(stride) {
        for (x, pixel) in row.chunks_exact_mut(3).enumerate().take(width) {
            let bar = BARS[x * BARS.len() / width];
            pixel.copy_from_slice(&[bar.b, bar.g, bar.r]);
        }
    }

    let bars = FrameBuffer::new(mode.width, mode.height, stride, PixelFormat::Bgr, data)
        .map_err(|e| NativeError::call("enable_video_input", e.to_string()))?;
    bgr_to_yuy2(&bars).map_err(|e| NativeError::call("enable_video_input", e.to_string()))
}

struct LoopbackInput {
    card: Arc<Card>,
    device: u32,
    mode: VideoMode,
    pattern: Arc<FrameBuffer>,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HardwareInput for LoopbackInput {
    fn set_callback(&mut self, callback: FrameCallback) -> Result<(), NativeError> {
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn start_streams(&mut self) -> Result<(), NativeError> {
        if self.thread.is_some() {
            return Err(NativeError::call("start_streams", "streams already running"));
        }

        let card = Arc::clone(&self.card);
        let callback = Arc::clone(&self.callback);
        let running = Arc::clone(&self.running);
        let pattern = Arc::clone(&self.pattern);
        let mode = self.mode;
        let interval = mode.frame_rate.frame_interval();
        let ticks = (interval.as_nanos() / 100) as i64;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("loopback-capture-{}", self.device))
            .spawn(move || {
                let mut next = Instant::now();
                let mut index: i64 = 0;

                while running.load(Ordering::Acquire) {
                    if let Some(deliver) = callback.lock().as_mut() {
                        deliver(NativeVideoFrame {
                            width: mode.width,
                            height: mode.height,
                            row_bytes: pattern.stride(),
                            format: PixelFormat::Yuy2,
                            data: pattern.data(),
                            timecode: Some(index * ticks),
                        });
                        card.frames_delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    index += 1;

                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                NativeError::call("start_streams", e.to_string())
            })?;

        self.thread = Some(handle);
        self.card.capture_threads.fetch_add(1, Ordering::SeqCst);
        self.card.journal.record(format!("input{}:start_streams", self.device));
        Ok(())
    }

    fn stop_streams(&mut self) -> Result<(), NativeError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };

        self.running.store(false, Ordering::SeqCst);
        let joined = handle.join();
        self.card.capture_threads.fetch_sub(1, Ordering::SeqCst);
        self.card.journal.record(format!("input{}:stop_streams", self.device));

        joined.map_err(|_| NativeError::call("stop_streams", "capture thread panicked"))
    }
}

impl Drop for LoopbackInput {
    fn drop(&mut self) {
        if let Err(e) = self.stop_streams() {
            log::warn!("input {}: {}", self.device, e);
        }
        self.card.release(&self.card.open_inputs, self.device);
        self.card.journal.record(format!("input{}:disable", self.device));
    }
}

struct LoopbackDeviceFrame {
    width: u32,
    height: u32,
    row_bytes: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl DeviceFrame for LoopbackDeviceFrame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    fn format(&self) -> PixelFormat {
        self.format
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

struct LoopbackOutput {
    card: Arc<Card>,
    device: u32,
    mode: VideoMode,
    playing: bool,
}

impl LoopbackOutput {
    fn with_log(&self, update: impl FnOnce(&mut PlayoutLog)) {
        update(self.card.playout.lock().entry(self.device).or_default());
    }
}

impl HardwareOutput for LoopbackOutput {
    fn start_playback(&mut self, start_time: i64, time_scale: i64) -> Result<(), NativeError> {
        self.playing = true;
        self.with_log(|log| {
            log.playing = true;
            log.time_scale = Some(time_scale);
        });
        self.card
            .journal
            .record(format!("output{}:start_playback@{}", self.device, start_time));
        Ok(())
    }

    fn create_frame(
        &mut self,
        width: u32,
        height: u32,
        row_bytes: usize,
        format: PixelFormat,
    ) -> Result<Box<dyn DeviceFrame>, NativeError> {
        if width != self.mode.width || height != self.mode.height {
            return Err(NativeError::call(
                "create_video_frame",
                format!(
                    "{}x{} does not match output mode {}x{}",
                    width, height, self.mode.width, self.mode.height
                ),
            ));
        }
        if row_bytes < format.min_stride(width) {
            return Err(NativeError::call("create_video_frame", "row bytes too small"));
        }

        Ok(Box::new(LoopbackDeviceFrame {
            width,
            height,
            row_bytes,
            format,
            data: vec![0u8; row_bytes * height as usize],
        }))
    }

    fn schedule_frame(
        &mut self,
        frame: Box<dyn DeviceFrame>,
        display_time: i64,
        duration: i64,
        time_scale: i64,
    ) -> Result<(), NativeError> {
        if !self.playing {
            return Err(NativeError::call("schedule_video_frame", "playback not started"));
        }

        self.with_log(|log| {
            log.scheduled += 1;
            log.last_display_time = Some(display_time);
            log.last_duration = Some(duration);
            log.time_scale = Some(time_scale);
            log.last_frame = Some(frame.bytes().to_vec());
        });
        Ok(())
    }

    fn stop_playback(&mut self) -> Result<(), NativeError> {
        if !self.playing {
            return Ok(());
        }
        self.playing = false;
        self.with_log(|log| log.playing = false);
        self.card
            .journal
            .record(format!("output{}:stop_playback", self.device));
        Ok(())
    }
}

impl Drop for LoopbackOutput {
    fn drop(&mut self) {
        if let Err(e) = self.stop_playback() {
            log::warn!("output {}: {}", self.device, e);
        }
        self.card.release(&self.card.open_outputs, self.device);
        self.card.journal.record(format!("output{}:disable", self.device));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vbridge_video::{yuy2_to_bgr, FrameRate};

    fn fast_mode() -> VideoMode {
        VideoMode::new(64, 8, FrameRate::new(500, 1), PixelFormat::Yuy2)
    }

    fn ready(devices: u32) -> LoopbackCard {
        let card = LoopbackCard::new(devices);
        card.initialize().unwrap();
        card
    }

    #[test]
    fn test_open_checks_device() {
        let card = ready(1);
        assert_eq!(
            card.open_input(3, &fast_mode()).err(),
            Some(NativeError::DeviceNotFound(3))
        );

        let _input = card.open_input(0, &fast_mode()).unwrap();
        assert_eq!(
            card.open_input(0, &fast_mode()).err(),
            Some(NativeError::DeviceBusy(0))
        );
        // Input and output on one device are independent
        assert!(card.open_output(0, &fast_mode()).is_ok());
    }

    #[test]
    fn test_pattern_is_colour_bars() {
        let pattern = colour_bars(&fast_mode()).unwrap();
        let bgr = yuy2_to_bgr(&pattern).unwrap();

        let first = bgr.bgr_at(0, 0).unwrap();
        let last = bgr.bgr_at(63, 7).unwrap();
        assert!(first.b > 150 && first.g > 150 && first.r > 150);
        assert!(last.b < 10 && last.g < 10 && last.r < 10);
    }

    #[test]
    fn test_stop_streams_quiesces_callback() {
        let card = ready(1);
        let mut input = card.open_input(0, &fast_mode()).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        input
            .set_callback(Box::new(move |frame| {
                assert_eq!(frame.format, PixelFormat::Yuy2);
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        input.start_streams().unwrap();
        assert_eq!(card.capture_threads(), 1);
        thread::sleep(Duration::from_millis(30));
        input.stop_streams().unwrap();

        let seen = count.load(Ordering::SeqCst);
        assert!(seen > 0);
        assert_eq!(card.capture_threads(), 0);

        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), seen);

        // Second stop is a no-op
        input.stop_streams().unwrap();
    }

    #[test]
    fn test_output_records_schedule() {
        let card = ready(2);
        let mode = fast_mode();
        let mut output = card.open_output(1, &mode).unwrap();

        let frame = output.create_frame(64, 8, 128, PixelFormat::Yuy2).unwrap();
        assert!(output.schedule_frame(frame, 0, 1001, 60000).is_err());

        output.start_playback(0, 60000).unwrap();
        let mut frame = output.create_frame(64, 8, 128, PixelFormat::Yuy2).unwrap();
        frame.bytes_mut()[0] = 99;
        output.schedule_frame(frame, 2002, 1001, 60000).unwrap();

        let log = card.playout(1);
        assert!(log.playing);
        assert_eq!(log.scheduled, 1);
        assert_eq!(log.last_display_time, Some(2002));
        assert_eq!(log.last_frame.map(|f| f[0]), Some(99));

        assert!(output.create_frame(32, 8, 64, PixelFormat::Yuy2).is_err());
    }

    #[test]
    fn test_drop_releases_everything() {
        let card = ready(1);
        {
            let mut input = card.open_input(0, &fast_mode()).unwrap();
            input.set_callback(Box::new(|_| {})).unwrap();
            input.start_streams().unwrap();
            let mut output = card.open_output(0, &fast_mode()).unwrap();
            output.start_playback(0, 500).unwrap();
            assert_eq!(card.live_handles(), 2);
        }

        assert_eq!(card.live_handles(), 0);
        assert_eq!(card.capture_threads(), 0);
        assert!(!card.playout(0).playing);

        let journal = card.journal();
        assert!(journal.position("input0:stop_streams") < journal.position("input0:disable"));
        assert!(journal.position("output0:stop_playback") < journal.position("output0:disable"));
        assert!(journal.position("output0:disable").is_some());
    }
}
