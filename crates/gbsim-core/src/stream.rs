// 媒体推流接口
// 信令层只负责协商目标地址，推流由外部进程（ffmpeg）完成

use crate::Result;
use async_trait::async_trait;

/// 协商完成后的推流参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// 会话的 SIP Call-ID
    pub call_id: String,

    /// 被点播的通道 ID
    pub channel_id: String,

    /// 平台接流地址
    pub dest_ip: String,
    pub dest_port: u16,

    /// SSRC（SDP y 字段）
    pub ssrc: String,
}

/// 推流执行器，由媒体层实现，测试中可替换为桩
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// 向目标地址开始推流
    async fn start_stream(&self, info: &StreamInfo) -> Result<()>;

    /// 停止指定会话的推流
    async fn stop_stream(&self, call_id: &str) -> Result<()>;
}
