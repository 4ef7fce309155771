//! NDI runtime bindings
//!
//! Thin FFI over the NDI SDK C API (v5+). Only the calls the bridge needs are
//! declared: discovery, receive in BGRX/BGRA at the highest bandwidth, and
//! progressive video send with synthesized timecodes.

use crate::error::NativeError;
use crate::frame::{NativeVideoFrame, OutgoingVideoFrame};
use crate::network::{
    CaptureStatus, NetworkFinder, NetworkLibrary, NetworkReceiver, NetworkSender, SourceDescriptor,
};
use crate::runtime::NativeRuntime;
use libc::{c_char, c_float, c_int, c_void};
use std::ffi::{CStr, CString};
use std::ptr;
use std::time::Duration;
use vbridge_video::{fourcc, PixelFormat};

mod sys {
    use super::*;

    pub type FindInstance = *mut c_void;
    pub type RecvInstance = *mut c_void;
    pub type SendInstance = *mut c_void;

    pub const FRAME_TYPE_NONE: c_int = 0;
    pub const FRAME_TYPE_VIDEO: c_int = 1;
    pub const FRAME_TYPE_ERROR: c_int = 4;
    pub const FRAME_TYPE_STATUS_CHANGE: c_int = 100;

    pub const RECV_COLOR_FORMAT_BGRX_BGRA: c_int = 0;
    pub const RECV_BANDWIDTH_HIGHEST: c_int = 100;
    pub const FRAME_FORMAT_PROGRESSIVE: c_int = 1;
    pub const SEND_TIMECODE_SYNTHESIZE: i64 = i64::MAX;

    #[repr(C)]
    pub struct Source {
        pub p_ndi_name: *const c_char,
        pub p_url_address: *const c_char,
    }

    #[repr(C)]
    pub struct FindCreate {
        pub show_local_sources: bool,
        pub p_groups: *const c_char,
        pub p_extra_ips: *const c_char,
    }

    #[repr(C)]
    pub struct RecvCreateV3 {
        pub source_to_connect_to: Source,
        pub color_format: c_int,
        pub bandwidth: c_int,
        pub allow_video_fields: bool,
        pub p_ndi_recv_name: *const c_char,
    }

    #[repr(C)]
    pub struct SendCreate {
        pub p_ndi_name: *const c_char,
        pub p_groups: *const c_char,
        pub clock_video: bool,
        pub clock_audio: bool,
    }

    #[repr(C)]
    pub struct VideoFrameV2 {
        pub xres: c_int,
        pub yres: c_int,
        pub four_cc: u32,
        pub frame_rate_n: c_int,
        pub frame_rate_d: c_int,
        pub picture_aspect_ratio: c_float,
        pub frame_format_type: c_int,
        pub timecode: i64,
        pub p_data: *mut u8,
        pub line_stride_in_bytes: c_int,
        pub p_metadata: *const c_char,
        pub timestamp: i64,
    }

    #[cfg_attr(windows, link(name = "Processing.NDI.Lib.x64"))]
    #[cfg_attr(not(windows), link(name = "ndi"))]
    extern "C" {
        pub fn NDIlib_initialize() -> bool;
        pub fn NDIlib_destroy();

        pub fn NDIlib_find_create_v2(settings: *const FindCreate) -> FindInstance;
        pub fn NDIlib_find_destroy(instance: FindInstance);
        pub fn NDIlib_find_wait_for_sources(instance: FindInstance, timeout_ms: u32) -> bool;
        pub fn NDIlib_find_get_current_sources(instance: FindInstance, count: *mut u32) -> *const Source;

        pub fn NDIlib_recv_create_v3(settings: *const RecvCreateV3) -> RecvInstance;
        pub fn NDIlib_recv_destroy(instance: RecvInstance);
        pub fn NDIlib_recv_capture_v2(
            instance: RecvInstance,
            video: *mut VideoFrameV2,
            audio: *mut c_void,
            metadata: *mut c_void,
            timeout_ms: u32,
        ) -> c_int;
        pub fn NDIlib_recv_free_video_v2(instance: RecvInstance, video: *const VideoFrameV2);

        pub fn NDIlib_send_create(settings: *const SendCreate) -> SendInstance;
        pub fn NDIlib_send_destroy(instance: SendInstance);
        pub fn NDIlib_send_send_video_v2(instance: SendInstance, video: *const VideoFrameV2);
    }
}

fn c_string(call: &'static str, value: &str) -> Result<CString, NativeError> {
    CString::new(value).map_err(|_| NativeError::call(call, "name contains a NUL byte"))
}

fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}

/// The process-wide NDI runtime
#[derive(Debug, Default)]
pub struct NdiLibrary;

impl NdiLibrary {
    pub fn new() -> Self {
        Self
    }
}

impl NativeRuntime for NdiLibrary {
    fn name(&self) -> &str {
        "NDI"
    }

    fn initialize(&self) -> Result<(), NativeError> {
        // SAFETY: no preconditions; returns false on unsupported CPUs
        if unsafe { sys::NDIlib_initialize() } {
            Ok(())
        } else {
            Err(NativeError::LibraryUnavailable(
                "NDIlib_initialize returned false".into(),
            ))
        }
    }

    fn destroy(&self) {
        // SAFETY: paired with a successful initialize by SharedLibrary
        unsafe { sys::NDIlib_destroy() }
    }
}

impl NetworkLibrary for NdiLibrary {
    fn create_finder(&self, show_local_sources: bool) -> Result<Box<dyn NetworkFinder>, NativeError> {
        let settings = sys::FindCreate {
            show_local_sources,
            p_groups: ptr::null(),
            p_extra_ips: ptr::null(),
        };

        // SAFETY: settings outlives the call
        let instance = unsafe { sys::NDIlib_find_create_v2(&settings) };
        if instance.is_null() {
            return Err(NativeError::call("NDIlib_find_create_v2", "returned null"));
        }
        Ok(Box::new(NdiFinder { instance }))
    }

    fn create_receiver(&self, source: &SourceDescriptor) -> Result<Box<dyn NetworkReceiver>, NativeError> {
        let name = c_string("NDIlib_recv_create_v3", &source.name)?;
        let url = source
            .url_address
            .as_deref()
            .map(|url| c_string("NDIlib_recv_create_v3", url))
            .transpose()?;

        let settings = sys::RecvCreateV3 {
            source_to_connect_to: sys::Source {
                p_ndi_name: name.as_ptr(),
                p_url_address: url.as_ref().map_or(ptr::null(), |u| u.as_ptr()),
            },
            color_format: sys::RECV_COLOR_FORMAT_BGRX_BGRA,
            bandwidth: sys::RECV_BANDWIDTH_HIGHEST,
            allow_video_fields: false,
            p_ndi_recv_name: ptr::null(),
        };

        // SAFETY: settings and the strings it points to outlive the call
        let instance = unsafe { sys::NDIlib_recv_create_v3(&settings) };
        if instance.is_null() {
            return Err(NativeError::call("NDIlib_recv_create_v3", "returned null"));
        }
        Ok(Box::new(NdiReceiver { instance }))
    }

    fn create_sender(&self, name: &str) -> Result<Box<dyn NetworkSender>, NativeError> {
        let name = c_string("NDIlib_send_create", name)?;
        let settings = sys::SendCreate {
            p_ndi_name: name.as_ptr(),
            p_groups: ptr::null(),
            clock_video: true,
            clock_audio: false,
        };

        // SAFETY: settings and name outlive the call
        let instance = unsafe { sys::NDIlib_send_create(&settings) };
        if instance.is_null() {
            return Err(NativeError::call("NDIlib_send_create", "returned null"));
        }
        Ok(Box::new(NdiSender { instance }))
    }
}

struct NdiFinder {
    instance: sys::FindInstance,
}

// SAFETY: NDI instances may be used from any thread, one call at a time
unsafe impl Send for NdiFinder {}

impl NetworkFinder for NdiFinder {
    fn wait_for_sources(&mut self, timeout: Duration) -> bool {
        // SAFETY: instance is live until drop
        unsafe { sys::NDIlib_find_wait_for_sources(self.instance, timeout_ms(timeout)) }
    }

    fn current_sources(&mut self) -> Vec<SourceDescriptor> {
        let mut count = 0u32;
        // SAFETY: the returned array stays valid until the next call on this finder
        let sources = unsafe { sys::NDIlib_find_get_current_sources(self.instance, &mut count) };
        if sources.is_null() {
            return Vec::new();
        }

        // SAFETY: the SDK guarantees `count` entries at `sources`
        let sources = unsafe { std::slice::from_raw_parts(sources, count as usize) };
        sources
            .iter()
            .filter(|s| !s.p_ndi_name.is_null())
            .map(|s| SourceDescriptor {
                // SAFETY: non-null, NUL-terminated strings owned by the finder
                name: unsafe { CStr::from_ptr(s.p_ndi_name) }.to_string_lossy().into_owned(),
                url_address: (!s.p_url_address.is_null())
                    .then(|| unsafe { CStr::from_ptr(s.p_url_address) }.to_string_lossy().into_owned()),
            })
            .collect()
    }
}

impl Drop for NdiFinder {
    fn drop(&mut self) {
        // SAFETY: instance came from NDIlib_find_create_v2 and is destroyed once
        unsafe { sys::NDIlib_find_destroy(self.instance) }
    }
}

struct NdiReceiver {
    instance: sys::RecvInstance,
}

// SAFETY: see NdiFinder
unsafe impl Send for NdiReceiver {}

impl NetworkReceiver for NdiReceiver {
    fn capture_video(
        &mut self,
        timeout: Duration,
        on_frame: &mut dyn FnMut(NativeVideoFrame<'_>),
    ) -> Result<CaptureStatus, NativeError> {
        // SAFETY: VideoFrameV2 is plain old data; the SDK fills it in
        let mut video: sys::VideoFrameV2 = unsafe { std::mem::zeroed() };

        // SAFETY: instance is live; audio and metadata are not requested
        let kind = unsafe {
            sys::NDIlib_recv_capture_v2(
                self.instance,
                &mut video,
                ptr::null_mut(),
                ptr::null_mut(),
                timeout_ms(timeout),
            )
        };

        match kind {
            sys::FRAME_TYPE_VIDEO => {
                let result = deliver(&video, on_frame);
                // SAFETY: frame was filled by recv_capture_v2 on this instance
                unsafe { sys::NDIlib_recv_free_video_v2(self.instance, &video) };
                result.map(|()| CaptureStatus::Video)
            }
            sys::FRAME_TYPE_NONE => Ok(CaptureStatus::Timeout),
            sys::FRAME_TYPE_STATUS_CHANGE => Ok(CaptureStatus::StatusChange),
            sys::FRAME_TYPE_ERROR => Err(NativeError::call(
                "NDIlib_recv_capture_v2",
                "connection lost",
            )),
            // Audio and metadata are not requested
            _ => Ok(CaptureStatus::Timeout),
        }
    }
}

fn deliver(
    video: &sys::VideoFrameV2,
    on_frame: &mut dyn FnMut(NativeVideoFrame<'_>),
) -> Result<(), NativeError> {
    let format = PixelFormat::from_fourcc(video.four_cc)
        .ok_or(NativeError::UnsupportedFormat(video.four_cc))?;
    if video.p_data.is_null() || video.xres <= 0 || video.yres <= 0 || video.line_stride_in_bytes <= 0 {
        return Err(NativeError::call("NDIlib_recv_capture_v2", "empty video frame"));
    }

    let row_bytes = video.line_stride_in_bytes as usize;
    let len = row_bytes * video.yres as usize;
    // SAFETY: the SDK owns `len` bytes at p_data until free_video is called
    let data = unsafe { std::slice::from_raw_parts(video.p_data, len) };

    on_frame(NativeVideoFrame {
        width: video.xres as u32,
        height: video.yres as u32,
        row_bytes,
        format,
        data,
        timecode: Some(video.timecode),
    });
    Ok(())
}

impl Drop for NdiReceiver {
    fn drop(&mut self) {
        // SAFETY: instance came from NDIlib_recv_create_v3 and is destroyed once
        unsafe { sys::NDIlib_recv_destroy(self.instance) }
    }
}

struct NdiSender {
    instance: sys::SendInstance,
}

// SAFETY: see NdiFinder
unsafe impl Send for NdiSender {}

impl NetworkSender for NdiSender {
    fn send_video(&mut self, frame: &OutgoingVideoFrame<'_>) -> Result<(), NativeError> {
        let four_cc = match frame.format {
            PixelFormat::Bgra => fourcc(b"BGRA"),
            other => return Err(NativeError::UnsupportedFormat(other.fourcc())),
        };
        let required = frame.row_bytes * frame.height as usize;
        if frame.data.len() < required {
            return Err(NativeError::call("NDIlib_send_send_video_v2", "frame buffer too small"));
        }

        let video = sys::VideoFrameV2 {
            xres: frame.width as c_int,
            yres: frame.height as c_int,
            four_cc,
            frame_rate_n: frame.frame_rate.num as c_int,
            frame_rate_d: frame.frame_rate.den as c_int,
            picture_aspect_ratio: frame.aspect_ratio,
            frame_format_type: sys::FRAME_FORMAT_PROGRESSIVE,
            timecode: frame.timecode.unwrap_or(sys::SEND_TIMECODE_SYNTHESIZE),
            // The SDK takes a mutable pointer but does not write through it
            p_data: frame.data.as_ptr() as *mut u8,
            line_stride_in_bytes: frame.row_bytes as c_int,
            p_metadata: ptr::null(),
            timestamp: 0,
        };

        // SAFETY: the synchronous send copies the frame before returning
        unsafe { sys::NDIlib_send_send_video_v2(self.instance, &video) };
        Ok(())
    }
}

impl Drop for NdiSender {
    fn drop(&mut self) {
        // SAFETY: instance came from NDIlib_send_create and is destroyed once
        unsafe { sys::NDIlib_send_destroy(self.instance) }
    }
}
