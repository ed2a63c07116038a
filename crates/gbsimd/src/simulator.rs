// 模拟器监督者
// 按配置拉起全部设备，共享同一个媒体执行器，支持单台设备的
// 上下线与心跳触发，统一停机

use anyhow::{bail, Result};
use gbsim_config::{DeviceSection, SimConfig};
use gbsim_core::{Channel, DeviceClient, DeviceIdentity, PlatformConfig};
use gbsim_media::{MediaConfig, MediaServer, MediaSource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

pub struct Simulator {
    cfg: SimConfig,
    platform: PlatformConfig,
    media: Arc<MediaServer>,
    clients: Mutex<HashMap<String, DeviceClient>>,
}

impl Simulator {
    /// 启动全部设备，单台注册失败不影响其它设备
    pub async fn start(cfg: SimConfig) -> Result<Simulator> {
        let media = Arc::new(MediaServer::new(media_config(&cfg))?);
        let platform = platform_config(&cfg);

        let mut clients = HashMap::new();
        for (index, device) in cfg.devices.iter().enumerate() {
            match start_device(&cfg, &platform, media.clone(), device, index).await {
                Ok(client) => {
                    clients.insert(device.device_id.clone(), client);
                }
                Err(e) => {
                    error!(device = %device.device_id, error = %e, "device failed to start");
                }
            }
        }

        if clients.is_empty() {
            bail!("no device came online");
        }
        info!(
            online = clients.len(),
            configured = cfg.devices.len(),
            "simulator running"
        );
        Ok(Simulator {
            cfg,
            platform,
            media,
            clients: Mutex::new(clients),
        })
    }

    /// 各设备的运行快照
    pub async fn snapshot(&self) -> serde_json::Value {
        let clients = self.clients.lock().await;
        let mut devices = Vec::new();
        for client in clients.values() {
            let status = client.status().await;
            devices.push(serde_json::json!({
                "device_id": status.device_id,
                "name": status.name,
                "kind": status.kind,
                "manufacturer": status.manufacturer,
                "model": status.model,
                "channels": status.channels,
                "registered": status.registered,
                "active_sessions": status.active_sessions,
                "last_keepalive": status.last_keepalive.map(|t| t.to_rfc3339()),
            }));
        }
        serde_json::json!({ "devices": devices })
    }

    /// 将一台已下线的设备重新注册上线
    pub async fn register(&self, device_id: &str) -> Result<()> {
        let mut clients = self.clients.lock().await;
        if clients.contains_key(device_id) {
            bail!("device {} is already online", device_id);
        }
        let (index, device) = self
            .cfg
            .devices
            .iter()
            .enumerate()
            .find(|(_, d)| d.device_id == device_id)
            .ok_or_else(|| anyhow::anyhow!("device {} is not configured", device_id))?;
        let client =
            start_device(&self.cfg, &self.platform, self.media.clone(), device, index).await?;
        clients.insert(device_id.to_string(), client);
        Ok(())
    }

    /// 注销并下线一台设备
    pub async fn unregister(&self, device_id: &str) -> Result<()> {
        let client = self
            .clients
            .lock()
            .await
            .remove(device_id)
            .ok_or_else(|| anyhow::anyhow!("device {} is not online", device_id))?;
        client.stop().await?;
        Ok(())
    }

    /// 立刻发送一次心跳
    pub async fn send_heartbeat(&self, device_id: &str) -> Result<()> {
        let clients = self.clients.lock().await;
        let client = clients
            .get(device_id)
            .ok_or_else(|| anyhow::anyhow!("device {} is not online", device_id))?;
        client.send_keepalive().await?;
        Ok(())
    }

    /// 注销并停止全部设备
    pub async fn stop(self) {
        let clients: Vec<DeviceClient> =
            self.clients.lock().await.drain().map(|(_, c)| c).collect();
        for client in clients {
            let device_id = client.device_id().to_string();
            if let Err(e) = client.stop().await {
                error!(device = %device_id, error = %e, "device stop failed");
            }
        }
        self.media.stop_all().await;
        info!("simulator stopped");
    }
}

async fn start_device(
    cfg: &SimConfig,
    platform: &PlatformConfig,
    media: Arc<MediaServer>,
    device: &DeviceSection,
    index: usize,
) -> gbsim_core::Result<DeviceClient> {
    DeviceClient::start(
        to_identity(device),
        platform.clone(),
        &cfg.local.bind_ip,
        cfg.local.sip_port_base + index as u16,
        cfg.local.media_port_base + index as u16,
        media,
    )
    .await
}

fn media_config(cfg: &SimConfig) -> MediaConfig {
    MediaConfig {
        ffmpeg_path: cfg.media.ffmpeg_path.clone(),
        source: match &cfg.media.video_file {
            Some(path) => MediaSource::File(path.clone()),
            None => MediaSource::TestPattern,
        },
    }
}

fn platform_config(cfg: &SimConfig) -> PlatformConfig {
    PlatformConfig {
        server_id: cfg.platform.server_id.clone(),
        domain: cfg.platform.domain.clone(),
        host: cfg.platform.host.clone(),
        port: cfg.platform.port,
        register_expires: cfg.platform.register_expires,
        keepalive_interval: cfg.platform.keepalive_interval,
    }
}

fn to_identity(device: &DeviceSection) -> DeviceIdentity {
    DeviceIdentity {
        device_id: device.device_id.clone(),
        name: device.name.clone(),
        manufacturer: device.manufacturer.clone(),
        model: device.model.clone(),
        firmware: device.firmware.clone(),
        sip_user: device.device_id.clone(),
        sip_password: device.password.clone(),
        channels: device
            .channels
            .iter()
            .map(|c| Channel {
                channel_id: c.channel_id.clone(),
                name: c.name.clone(),
                ptz: c.ptz,
            })
            .collect(),
    }
}
