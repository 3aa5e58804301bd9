//! Safe wrapper around SpeexDSP's float resampler.

use std::ffi::c_int;

use crate::error::{PipelineError, Result};

// ======================== FFI declarations ========================

/// Opaque type for SpeexResamplerState
#[repr(C)]
pub struct SpeexResamplerState {
    _private: [u8; 0],
}

const SPEEX_RESAMPLER_QUALITY_DEFAULT: c_int = 4;
const RESAMPLER_ERR_SUCCESS: c_int = 0;

unsafe extern "C" {
    fn speex_resampler_init(
        nb_channels: u32,
        in_rate: u32,
        out_rate: u32,
        quality: c_int,
        err: *mut c_int,
    ) -> *mut SpeexResamplerState;
    fn speex_resampler_destroy(st: *mut SpeexResamplerState);
    fn speex_resampler_process_float(
        st: *mut SpeexResamplerState,
        channel_index: u32,
        in_: *const f32,
        in_len: *mut u32,
        out: *mut f32,
        out_len: *mut u32,
    ) -> c_int;
    fn speex_resampler_reset_mem(st: *mut SpeexResamplerState) -> c_int;
}

// ======================== Resampler ========================

/// Stateful resampler; each channel keeps its own filter history between calls
/// so consecutive blocks join without clicks.
pub struct Resampler {
    state: *mut SpeexResamplerState,
    channels: u32,
    in_rate: u32,
    out_rate: u32,
}

// SpeexResamplerState is only ever touched by the owner
unsafe impl Send for Resampler {}

impl Resampler {
    pub fn new(channels: u32, in_rate: u32, out_rate: u32) -> Result<Self> {
        let mut err: c_int = 0;
        let state = unsafe {
            speex_resampler_init(
                channels,
                in_rate,
                out_rate,
                SPEEX_RESAMPLER_QUALITY_DEFAULT,
                &mut err,
            )
        };
        if err != RESAMPLER_ERR_SUCCESS || state.is_null() {
            return Err(PipelineError::Codec(format!(
                "Failed to initialize speex resampler {}Hz -> {}Hz: err={}",
                in_rate, out_rate, err
            )));
        }
        Ok(Self {
            state,
            channels,
            in_rate,
            out_rate,
        })
    }

    pub fn matches(&self, channels: u32, in_rate: u32, out_rate: u32) -> bool {
        self.channels == channels && self.in_rate == in_rate && self.out_rate == out_rate
    }

    /// Resample one channel's worth of samples, consuming all of `input`.
    pub fn process(&mut self, channel: u32, input: &[f32]) -> Result<Vec<f32>> {
        let expected =
            (input.len() as u64 * self.out_rate as u64).div_ceil(self.in_rate as u64) as usize;
        let mut output = vec![0.0f32; expected + 64];
        let mut consumed = 0usize;
        let mut produced = 0usize;

        while consumed < input.len() {
            if produced == output.len() {
                output.resize(output.len() + 256, 0.0);
            }
            let mut in_len = (input.len() - consumed) as u32;
            let mut out_len = (output.len() - produced) as u32;
            let err = unsafe {
                speex_resampler_process_float(
                    self.state,
                    channel,
                    input[consumed..].as_ptr(),
                    &mut in_len,
                    output[produced..].as_mut_ptr(),
                    &mut out_len,
                )
            };
            if err != RESAMPLER_ERR_SUCCESS {
                return Err(PipelineError::Codec(format!("Speex resampler error: {}", err)));
            }
            if in_len == 0 && out_len == 0 {
                break;
            }
            consumed += in_len as usize;
            produced += out_len as usize;
        }

        output.truncate(produced);
        Ok(output)
    }

    /// Forget filter history, e.g. after playback was interrupted.
    pub fn reset(&mut self) {
        unsafe {
            speex_resampler_reset_mem(self.state);
        }
    }
}

impl Drop for Resampler {
    fn drop(&mut self) {
        unsafe {
            speex_resampler_destroy(self.state);
        }
    }
}
