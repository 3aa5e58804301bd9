use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    audio: Audio,
    gui: Gui,
    network: Network,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
    block_size: usize,
    capture_channels: u32,
    playback_sample_rate: u32,
    playback_channels: u32,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Gui {
    local_port: u16,
    remote_port: u16,
    remote_ip: String,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    model: String,
    voice_name: String,
    language_code: String,
    api_key_env: String,
}

#[derive(Deserialize)]
struct Session {
    persona_file: String,
    persona_prompt: String,
    auto_record: bool,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=INPUT_SAMPLE_RATE={}", config.audio.input_sample_rate);
    println!("cargo:rustc-env=OUTPUT_SAMPLE_RATE={}", config.audio.output_sample_rate);
    println!("cargo:rustc-env=BLOCK_SIZE={}", config.audio.block_size);
    println!("cargo:rustc-env=CAPTURE_CHANNELS={}", config.audio.capture_channels);
    println!("cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}", config.audio.playback_sample_rate);
    println!("cargo:rustc-env=PLAYBACK_CHANNELS={}", config.audio.playback_channels);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);

    // GUI 配置
    println!("cargo:rustc-env=GUI_LOCAL_PORT={}", config.gui.local_port);
    println!("cargo:rustc-env=GUI_REMOTE_PORT={}", config.gui.remote_port);
    println!("cargo:rustc-env=GUI_REMOTE_IP={}", config.gui.remote_ip);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=LIVE_MODEL={}", config.network.model);
    println!("cargo:rustc-env=VOICE_NAME={}", config.network.voice_name);
    println!("cargo:rustc-env=LANGUAGE_CODE={}", config.network.language_code);
    println!("cargo:rustc-env=API_KEY_ENV={}", config.network.api_key_env);

    // 会话配置
    println!("cargo:rustc-env=PERSONA_FILE={}", config.session.persona_file);
    println!("cargo:rustc-env=PERSONA_PROMPT={}", config.session.persona_prompt);
    println!("cargo:rustc-env=AUTO_RECORD={}", config.session.auto_record);

    // speexdsp 重采样器：musl 目标使用静态库，其他目标通过 pkg-config 查找
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("musl") {
        if let Ok(sysroot) = std::env::var("MUSL_SYSROOT") {
            println!("cargo:rustc-link-search=native={}/usr/lib", sysroot);
        }
        println!("cargo:rustc-link-lib=static=speexdsp");
        return;
    }
    pkg_config::Config::new()
        .probe("speexdsp")
        .expect("Failed to find speexdsp. Please install libspeexdsp-dev.");
}
