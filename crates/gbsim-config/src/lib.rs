// gbsim-config: 模拟器配置装载
// TOML 文件 + GBSIM_ 前缀环境变量覆盖，装载后统一校验

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 信令平台
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSection {
    /// 平台国标编码（20 位）
    pub server_id: String,

    /// SIP 域
    pub domain: String,

    pub host: String,

    #[serde(default = "default_sip_port")]
    pub port: u16,

    #[serde(default = "default_register_expires")]
    pub register_expires: u32,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

/// 本机网络
#[derive(Debug, Clone, Deserialize)]
pub struct LocalSection {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// 首台设备的 SIP 端口，后续设备依次递增
    #[serde(default = "default_sip_port_base")]
    pub sip_port_base: u16,

    /// 首台设备的媒体端口，后续设备依次递增
    #[serde(default = "default_media_port_base")]
    pub media_port_base: u16,
}

impl Default for LocalSection {
    fn default() -> Self {
        LocalSection {
            bind_ip: default_bind_ip(),
            sip_port_base: default_sip_port_base(),
            media_port_base: default_media_port_base(),
        }
    }
}

/// 媒体推流
#[derive(Debug, Clone, Deserialize)]
pub struct MediaSection {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// 推流素材，缺省时使用测试画面
    #[serde(default)]
    pub video_file: Option<PathBuf>,
}

impl Default for MediaSection {
    fn default() -> Self {
        MediaSection {
            ffmpeg_path: default_ffmpeg_path(),
            video_file: None,
        }
    }
}

/// 设备通道
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    pub channel_id: String,

    #[serde(default = "default_channel_name")]
    pub name: String,

    #[serde(default)]
    pub ptz: bool,
}

/// 一台模拟设备
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSection {
    /// 设备国标编码（20 位）
    pub device_id: String,

    pub name: String,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_firmware")]
    pub firmware: String,

    pub password: String,

    /// 缺省时以设备自身作为唯一通道
    #[serde(default)]
    pub channels: Vec<ChannelSection>,
}

/// 日志
#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        LogSection {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    pub platform: PlatformSection,

    #[serde(default)]
    pub local: LocalSection,

    #[serde(default)]
    pub media: MediaSection,

    #[serde(default)]
    pub devices: Vec<DeviceSection>,

    #[serde(default)]
    pub log: LogSection,
}

fn default_sip_port() -> u16 {
    5060
}
fn default_register_expires() -> u32 {
    3600
}
fn default_keepalive_interval() -> u64 {
    60
}
fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_sip_port_base() -> u16 {
    5061
}
fn default_media_port_base() -> u16 {
    30200
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_channel_name() -> String {
    "Channel".to_string()
}
fn default_manufacturer() -> String {
    "SimCamera".to_string()
}
fn default_model() -> String {
    "SC-2000".to_string()
}
fn default_firmware() -> String {
    "V1.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

fn is_gb_id(id: &str) -> bool {
    id.len() == 20 && id.bytes().all(|b| b.is_ascii_digit())
}

impl SimConfig {
    /// 从 TOML 文件装载，支持 GBSIM_ 前缀环境变量覆盖
    pub fn load(path: &Path) -> Result<SimConfig> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("GBSIM").separator("__"))
            .build()
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg: SimConfig = raw
            .try_deserialize()
            .context("failed to deserialize config")?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// 补全缺省通道
    fn normalize(&mut self) {
        for device in &mut self.devices {
            if device.channels.is_empty() {
                device.channels.push(ChannelSection {
                    channel_id: device.device_id.clone(),
                    name: device.name.clone(),
                    ptz: false,
                });
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_gb_id(&self.platform.server_id) {
            bail!("platform.server_id must be a 20-digit GB code");
        }
        if self.platform.host.is_empty() {
            bail!("platform.host must not be empty");
        }
        if self.devices.is_empty() {
            bail!("at least one device must be configured");
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !is_gb_id(&device.device_id) {
                bail!("device_id {:?} must be a 20-digit GB code", device.device_id);
            }
            if !seen.insert(&device.device_id) {
                bail!("duplicate device_id {}", device.device_id);
            }
            if device.password.is_empty() {
                bail!("device {} has an empty password", device.device_id);
            }
            for channel in &device.channels {
                if !is_gb_id(&channel.channel_id) {
                    bail!(
                        "channel_id {:?} of device {} must be a 20-digit GB code",
                        channel.channel_id,
                        device.device_id
                    );
                }
            }
        }
        Ok(())
    }
}
