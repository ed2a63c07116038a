// 媒体会话管理
// INVITE 协商 SDP，ACK 后启动推流，BYE 停止并清理
// 会话以 Call-ID 为键，推流动作委托给 StreamTransport

use super::message::{SipRequest, SipResponse};
use crate::stream::{StreamInfo, StreamTransport};
use crate::{Result, SimError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 已应答 200，等待 ACK
    Answered,
    /// 推流中
    Streaming,
}

/// 一路点播会话
/// 目标地址来自 offer，可能缺失；缺失时会话照常建立但不推流
#[derive(Debug, Clone)]
pub struct MediaSession {
    pub call_id: String,
    pub channel_id: String,
    pub dest_ip: Option<String>,
    pub dest_port: Option<u16>,
    pub ssrc: String,
    pub state: SessionState,
}

/// 平台 SDP offer 中的关键字段
/// 行缺失或无法解析时对应字段保持未设，不阻止应答
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdpOffer {
    pub dest_ip: Option<String>,
    pub dest_port: Option<u16>,
    pub ssrc: Option<String>,
}

/// 解析平台 offer，仅取连接地址、视频端口与 y 字段
pub fn parse_sdp_offer(sdp: &str) -> SdpOffer {
    let mut offer = SdpOffer::default();

    for line in sdp.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("c=") {
            // c=IN IP4 192.168.1.100
            if let Some(ip) = rest.split_whitespace().nth(2) {
                offer.dest_ip = Some(ip.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("m=video ") {
            if let Some(port) = rest.split_whitespace().next().and_then(|p| p.parse().ok()) {
                offer.dest_port = Some(port);
            }
        } else if let Some(rest) = line.strip_prefix("y=") {
            offer.ssrc = Some(rest.trim().to_string());
        }
    }

    offer
}

/// 构造设备侧 SDP answer
/// 端口回应 offer 请求的端口，y 字段为补零到 10 位的设备 ID，
/// 平台以此将应答关联回设备
pub fn build_sdp_answer(sip_user: &str, local_ip: &str, port: u16, device_id: &str) -> String {
    let trailer = format!("{:0>10}", device_id);
    format!(
        "v=0\r\n\
         o={sip_user} 0 0 IN IP4 {local_ip}\r\n\
         s=Play\r\n\
         c=IN IP4 {local_ip}\r\n\
         t=0 0\r\n\
         m=video {port} RTP/AVP 96 98 97\r\n\
         a=rtpmap:96 PS/90000\r\n\
         a=rtpmap:98 H264/90000\r\n\
         a=rtpmap:97 MPEG4/90000\r\n\
         a=recvonly\r\n\
         y={trailer}\r\n"
    )
}

/// 请求 URI 的 user 部分即被点播的通道 ID
fn channel_from_uri(uri: &str) -> Result<String> {
    let user = uri
        .strip_prefix("sip:")
        .and_then(|rest| rest.split('@').next())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| SimError::SipParse(format!("bad invite uri: {}", uri)))?;
    Ok(user.to_string())
}

pub struct SessionManager {
    sip_user: String,
    local_ip: String,
    media_port: u16,
    transport: Arc<dyn StreamTransport>,
    sessions: RwLock<HashMap<String, MediaSession>>,
}

impl SessionManager {
    pub fn new(
        sip_user: impl Into<String>,
        local_ip: impl Into<String>,
        media_port: u16,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        SessionManager {
            sip_user: sip_user.into(),
            local_ip: local_ip.into(),
            media_port,
            transport,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// 处理 INVITE，协商成功返回携带 SDP answer 的 200 应答
    pub async fn handle_invite(&self, req: &SipRequest) -> Result<SipResponse> {
        let call_id = req
            .call_id()
            .ok_or_else(|| SimError::SipParse("invite missing Call-ID".to_string()))?
            .to_string();
        let channel_id = channel_from_uri(&req.uri)?;
        let offer = parse_sdp_offer(&req.body);
        let trailer = format!("{:0>10}", self.sip_user);
        let ssrc = offer.ssrc.clone().unwrap_or_else(|| trailer.clone());
        // answer 的端口回应 offer 请求的端口，offer 未给时退回本地媒体口
        let answer_port = offer.dest_port.unwrap_or(self.media_port);

        if offer.dest_ip.is_none() || offer.dest_port.is_none() {
            warn!(call_id = %call_id, channel = %channel_id, "invite offer missing media address, answering without stream target");
        } else {
            info!(
                call_id = %call_id,
                channel = %channel_id,
                dest = %format!(
                    "{}:{}",
                    offer.dest_ip.as_deref().unwrap_or("-"),
                    answer_port
                ),
                "invite accepted"
            );
        }

        let session = MediaSession {
            call_id: call_id.clone(),
            channel_id,
            dest_ip: offer.dest_ip,
            dest_port: offer.dest_port,
            ssrc,
            state: SessionState::Answered,
        };
        self.sessions.write().await.insert(call_id, session);

        let mut resp = SipResponse::reply_to(req, 200, "OK");
        // To 加 tag，标识设备侧对话
        if let Some(to) = resp.header("To") {
            if !to.contains("tag=") {
                let tagged = format!("{};tag={}", to, super::generate_tag());
                resp.set_header("To", tagged);
            }
        }
        resp.set_header(
            "Contact",
            format!("<sip:{}@{}:{}>", self.sip_user, self.local_ip, self.media_port),
        );
        resp.set_header("Content-Type", "application/sdp");
        resp.body = build_sdp_answer(&self.sip_user, &self.local_ip, answer_port, &self.sip_user);
        Ok(resp)
    }

    /// 处理 ACK：确认协商完成并启动推流
    /// offer 未给出接流地址时不推流，会话保持已应答状态
    pub async fn handle_ack(&self, call_id: &str) -> Result<()> {
        let info = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(call_id)
                .ok_or_else(|| SimError::SessionNotFound(call_id.to_string()))?;
            if session.state == SessionState::Streaming {
                // 重复 ACK 不重启推流
                return Ok(());
            }
            let (dest_ip, dest_port) = match (&session.dest_ip, session.dest_port) {
                (Some(ip), Some(port)) => (ip.clone(), port),
                _ => {
                    warn!(call_id = %call_id, "ack for session without media address, skipping stream start");
                    return Ok(());
                }
            };
            session.state = SessionState::Streaming;
            StreamInfo {
                call_id: session.call_id.clone(),
                channel_id: session.channel_id.clone(),
                dest_ip,
                dest_port,
                ssrc: session.ssrc.clone(),
            }
        };

        info!(call_id = %call_id, "ack received, starting stream");
        self.transport.start_stream(&info).await
    }

    /// 处理 BYE：停止推流并移除会话
    pub async fn handle_bye(&self, call_id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(call_id)
            .ok_or_else(|| SimError::SessionNotFound(call_id.to_string()))?;

        info!(call_id = %call_id, channel = %session.channel_id, "bye received, stopping stream");
        if session.state == SessionState::Streaming {
            self.transport.stop_stream(call_id).await?;
        }
        Ok(())
    }

    /// 停止全部会话（设备下线时调用）
    pub async fn shutdown(&self) {
        let sessions: Vec<MediaSession> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            if session.state == SessionState::Streaming {
                if let Err(e) = self.transport.stop_stream(&session.call_id).await {
                    warn!(call_id = %session.call_id, error = %e, "failed to stop stream");
                }
            }
        }
    }

    pub async fn active_sessions(&self) -> Vec<MediaSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::message::SipMethod;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTransport {
        started: Mutex<Vec<StreamInfo>>,
        stopped: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl StreamTransport for MockTransport {
        async fn start_stream(&self, info: &StreamInfo) -> Result<()> {
            self.started.lock().unwrap().push(info.clone());
            Ok(())
        }

        async fn stop_stream(&self, call_id: &str) -> Result<()> {
            self.stopped.lock().unwrap().push(call_id.to_string());
            Ok(())
        }
    }

    fn invite(call_id: &str) -> SipRequest {
        let mut req = SipRequest::new(SipMethod::Invite, "sip:34020000001320000002@3402000000");
        req.set_header("Via", "SIP/2.0/UDP 192.168.1.100:5060;branch=z9hG4bKinv");
        req.set_header("From", "<sip:34020000002000000001@3402000000>;tag=ptag");
        req.set_header("To", "<sip:34020000001320000002@3402000000>");
        req.set_header("Call-ID", call_id);
        req.set_header("CSeq", "101 INVITE");
        req.set_header("Content-Type", "application/sdp");
        req.body = "v=0\r\n\
                    o=34020000002000000001 0 0 IN IP4 192.168.1.100\r\n\
                    s=Play\r\n\
                    c=IN IP4 192.168.1.100\r\n\
                    t=0 0\r\n\
                    m=video 30000 RTP/AVP 96\r\n\
                    a=rtpmap:96 PS/90000\r\n\
                    y=0100000001\r\n"
            .to_string();
        req
    }

    fn manager() -> (Arc<MockTransport>, SessionManager) {
        let transport = Arc::new(MockTransport::default());
        let mgr = SessionManager::new(
            "34020000001320000001",
            "192.168.1.50",
            30200,
            transport.clone(),
        );
        (transport, mgr)
    }

    #[tokio::test]
    async fn test_invite_produces_sdp_answer() {
        let (_, mgr) = manager();
        let resp = mgr.handle_invite(&invite("call-1")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("Content-Type"), Some("application/sdp"));
        assert!(resp.header("To").unwrap().contains("tag="));
        assert!(resp.body.contains("s=Play"));
        // m 行回应 offer 请求的端口，y 行是补零后的设备 ID
        assert!(resp.body.contains("m=video 30000 RTP/AVP 96 98 97"));
        assert!(resp.body.contains("y=34020000001320000001"));
        assert_eq!(mgr.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_answer_trailer_is_padded_device_id() {
        // 短于 10 位的设备 ID 补零到 10 位
        let transport = Arc::new(MockTransport::default());
        let mgr = SessionManager::new("42", "192.168.1.50", 30200, transport);
        let resp = mgr.handle_invite(&invite("call-1")).await.unwrap();
        assert!(resp.body.contains("y=0000000042"));
    }

    #[tokio::test]
    async fn test_ack_starts_stream_once() {
        let (transport, mgr) = manager();
        mgr.handle_invite(&invite("call-1")).await.unwrap();
        mgr.handle_ack("call-1").await.unwrap();
        mgr.handle_ack("call-1").await.unwrap();

        let started = transport.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].dest_ip, "192.168.1.100");
        assert_eq!(started[0].dest_port, 30000);
        assert_eq!(started[0].channel_id, "34020000001320000002");
    }

    #[tokio::test]
    async fn test_bye_stops_and_removes() {
        let (transport, mgr) = manager();
        mgr.handle_invite(&invite("call-1")).await.unwrap();
        mgr.handle_ack("call-1").await.unwrap();
        mgr.handle_bye("call-1").await.unwrap();

        assert_eq!(transport.stopped.lock().unwrap().as_slice(), ["call-1"]);
        assert_eq!(mgr.session_count().await, 0);
        // 会话已不存在
        assert!(mgr.handle_bye("call-1").await.is_err());
    }

    #[tokio::test]
    async fn test_bye_before_ack_skips_stop() {
        let (transport, mgr) = manager();
        mgr.handle_invite(&invite("call-1")).await.unwrap();
        mgr.handle_bye("call-1").await.unwrap();
        assert!(transport.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ack_unknown_call_is_error() {
        let (_, mgr) = manager();
        assert!(matches!(
            mgr.handle_ack("nope").await,
            Err(SimError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invite_without_sdp_still_answers() {
        // offer 缺失不阻止会话建立，ACK 时不推流
        let (transport, mgr) = manager();
        let mut req = invite("call-1");
        req.body = String::new();
        let resp = mgr.handle_invite(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("y=34020000001320000001"));
        assert_eq!(mgr.session_count().await, 1);

        mgr.handle_ack("call-1").await.unwrap();
        assert!(transport.started.lock().unwrap().is_empty());
        mgr.handle_bye("call-1").await.unwrap();
        assert!(transport.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invite_missing_connection_line_skips_stream() {
        let (transport, mgr) = manager();
        let mut req = invite("call-1");
        req.body = "v=0\r\ns=Play\r\nm=video 30000 RTP/AVP 96\r\n".to_string();
        let resp = mgr.handle_invite(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("m=video 30000 RTP/AVP 96 98 97"));

        mgr.handle_ack("call-1").await.unwrap();
        assert!(transport.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_streaming_sessions() {
        let (transport, mgr) = manager();
        mgr.handle_invite(&invite("call-1")).await.unwrap();
        mgr.handle_ack("call-1").await.unwrap();
        mgr.handle_invite(&invite("call-2")).await.unwrap();
        mgr.shutdown().await;

        assert_eq!(transport.stopped.lock().unwrap().len(), 1);
        assert_eq!(mgr.session_count().await, 0);
    }

    #[test]
    fn test_parse_offer_fields() {
        let offer =
            parse_sdp_offer("v=0\r\nc=IN IP4 10.0.0.1\r\nm=video 9000 RTP/AVP 96\r\ny=123\r\n");
        assert_eq!(offer.dest_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(offer.dest_port, Some(9000));
        assert_eq!(offer.ssrc.as_deref(), Some("123"));

        // 行缺失时字段保持未设
        let partial = parse_sdp_offer("v=0\r\nm=video 9000 RTP/AVP 96\r\n");
        assert_eq!(partial.dest_ip, None);
        assert_eq!(partial.dest_port, Some(9000));
        let partial = parse_sdp_offer("v=0\r\nc=IN IP4 10.0.0.1\r\n");
        assert_eq!(partial.dest_port, None);
    }
}
