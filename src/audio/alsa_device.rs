//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::error::{PipelineError, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let access_err = |what: &str, e: alsa::Error| {
        PipelineError::DeviceAccess(format!(
            "{} device '{}': {}: {}",
            dir_name, device, what, e
        ))
    };

    let pcm = PCM::new(device, direction, false).map_err(|e| access_err("open failed", e))?;

    {
        let hwp = HwParams::any(&pcm).map_err(|e| access_err("no hw params", e))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| access_err("interleaved access unsupported", e))?;
        hwp.set_format(Format::S16LE)
            .map_err(|e| access_err("S16LE unsupported", e))?;
        hwp.set_channels(channels)
            .map_err(|e| access_err("channel count unsupported", e))?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(|e| access_err("sample rate unsupported", e))?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(|e| access_err("period size unsupported", e))?;
        }
        pcm.hw_params(&hwp)
            .map_err(|e| access_err("applying hw params", e))?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm
            .hw_params_current()
            .map_err(|e| access_err("reading hw params", e))?;
        AlsaParams {
            sample_rate: hwp.get_rate().map_err(|e| access_err("reading rate", e))?,
            channels: hwp
                .get_channels()
                .map_err(|e| access_err("reading channels", e))?,
            period_size: hwp
                .get_period_size()
                .map_err(|e| access_err("reading period size", e))? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}
