use crate::audio::AudioConfig;

/// Runtime override for the persona file, read in addition to the build-time value.
pub const PERSONA_FILE_ENV: &str = "LIVE_AUDIO_PERSONA_FILE";

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub block_size: usize,
    pub capture_channels: u32,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    pub playback_period_size: usize,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
    pub gui_remote_ip: &'static str,

    // 网络配置
    pub ws_url: &'static str,
    pub model: &'static str,
    pub voice_name: &'static str,
    pub language_code: &'static str,
    pub api_key_env: &'static str,

    // 会话配置（persona_file 可在运行时覆盖）
    pub persona_file: String,
    pub persona_prompt: &'static str,
    pub auto_record: bool,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            input_sample_rate: env!("INPUT_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse INPUT_SAMPLE_RATE")?,
            output_sample_rate: env!("OUTPUT_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse OUTPUT_SAMPLE_RATE")?,
            block_size: env!("BLOCK_SIZE")
                .parse()
                .map_err(|_| "Failed to parse BLOCK_SIZE")?,
            capture_channels: env!("CAPTURE_CHANNELS")
                .parse()
                .map_err(|_| "Failed to parse CAPTURE_CHANNELS")?,
            playback_sample_rate: env!("PLAYBACK_SAMPLE_RATE")
                .parse()
                .map_err(|_| "Failed to parse PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("PLAYBACK_CHANNELS")
                .parse()
                .map_err(|_| "Failed to parse PLAYBACK_CHANNELS")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE")
                .parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            gui_local_port: env!("GUI_LOCAL_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
            gui_remote_ip: env!("GUI_REMOTE_IP"),

            ws_url: env!("WS_URL"),
            model: env!("LIVE_MODEL"),
            voice_name: env!("VOICE_NAME"),
            language_code: env!("LANGUAGE_CODE"),
            api_key_env: env!("API_KEY_ENV"),

            persona_file: env!("PERSONA_FILE").to_string(),
            persona_prompt: env!("PERSONA_PROMPT"),
            auto_record: env!("AUTO_RECORD")
                .parse()
                .map_err(|_| "Failed to parse AUTO_RECORD")?,
        })
    }

    /// Apply overrides taken from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var(PERSONA_FILE_ENV) {
            if !path.trim().is_empty() {
                self.persona_file = path;
            }
        }
        self
    }

    /// API key for the live session, looked up at runtime so it never ends up in the binary.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    pub fn audio(&self) -> AudioConfig {
        AudioConfig {
            capture_device: self.capture_device.to_string(),
            playback_device: self.playback_device.to_string(),
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            block_size: self.block_size,
            capture_channels: self.capture_channels,
            playback_sample_rate: self.playback_sample_rate,
            playback_channels: self.playback_channels,
            playback_period_size: self.playback_period_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_time_config_parses() {
        let config = Config::new().expect("config.toml should produce a valid Config");
        assert!(config.input_sample_rate > 0);
        assert!(config.output_sample_rate > 0);
        assert!(config.block_size > 0);
        assert!(!config.ws_url.is_empty());
    }

    #[test]
    fn test_audio_config_mirrors_build_config() {
        let config = Config::new().unwrap();
        let audio = config.audio();
        assert_eq!(audio.input_sample_rate, config.input_sample_rate);
        assert_eq!(audio.output_sample_rate, config.output_sample_rate);
        assert_eq!(audio.block_size, config.block_size);
        assert_eq!(audio.capture_device, config.capture_device);
    }
}
