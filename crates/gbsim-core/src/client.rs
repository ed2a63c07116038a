// 模拟设备客户端
// 每台设备独占一个 UDP 套接字：启动时完成注册握手，之后由接收循环
// 处理平台下行报文，心跳任务周期性上报，停止时注销并清理会话

use crate::device::DeviceIdentity;
use crate::dispatch::CommandDispatcher;
use crate::manscdp::{self, builder};
use crate::sip::message::{SipMessage, SipMethod, SipRequest, SipResponse};
use crate::sip::register::{RegisterOutcome, Registrar};
use crate::sip::session::SessionManager;
use crate::sip::{generate_branch, generate_call_id, generate_tag};
use crate::stream::StreamTransport;
use crate::{Result, SimError};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 握手中单次等待应答的超时
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// 端口被占用时向后探测的数量
const PORT_PROBE_RANGE: u16 = 16;

/// 信令平台参数
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// 平台国标编码
    pub server_id: String,

    /// SIP 域
    pub domain: String,

    /// 平台地址
    pub host: String,
    pub port: u16,

    /// 注册有效期（秒）
    pub register_expires: u32,

    /// 心跳间隔（秒）
    pub keepalive_interval: u64,
}

impl PlatformConfig {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 设备运行快照，供上层展示
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub device_id: String,
    pub name: String,
    pub kind: &'static str,
    pub manufacturer: String,
    pub model: String,
    pub channels: usize,
    pub registered: bool,
    pub active_sessions: usize,
    pub last_keepalive: Option<DateTime<Utc>>,
}

/// 共享的信令发送端
struct Link {
    socket: UdpSocket,
    platform_addr: String,
    server_id: String,
    domain: String,
    sip_user: String,
    local_ip: String,
    local_port: u16,
    cseq: Arc<AtomicU32>,
}

impl Link {
    /// 构造携带 MANSCDP 报文体的 MESSAGE 请求（每条独立 Call-ID）
    fn new_message(&self, body: String) -> SipRequest {
        let cseq = self.cseq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut req = SipRequest::new(
            SipMethod::Message,
            format!("sip:{}@{}", self.server_id, self.domain),
        );
        req.set_header(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};rport;branch={}",
                self.local_ip,
                self.local_port,
                generate_branch()
            ),
        );
        req.set_header(
            "From",
            format!("<sip:{}@{}>;tag={}", self.sip_user, self.domain, generate_tag()),
        );
        req.set_header("To", format!("<sip:{}@{}>", self.server_id, self.domain));
        req.set_header("Call-ID", generate_call_id());
        req.set_header("CSeq", format!("{} MESSAGE", cseq));
        req.set_header("Max-Forwards", "70");
        req.set_header("Content-Type", "Application/MANSCDP+xml");
        req.set_header("User-Agent", "gbsim");
        req.body = body;
        req
    }

    async fn send_request(&self, req: &SipRequest) -> Result<()> {
        self.socket
            .send_to(req.encode().as_bytes(), &self.platform_addr)
            .await?;
        Ok(())
    }

    async fn send_response(&self, resp: &SipResponse, addr: SocketAddr) -> Result<()> {
        self.socket.send_to(resp.encode().as_bytes(), addr).await?;
        Ok(())
    }
}

/// 运行中的模拟设备
pub struct DeviceClient {
    identity: DeviceIdentity,
    platform: PlatformConfig,
    link: Arc<Link>,
    sessions: Arc<SessionManager>,
    registered: Arc<AtomicBool>,
    last_keepalive: Arc<RwLock<Option<DateTime<Utc>>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DeviceClient {
    /// 启动设备：绑定套接字、完成注册握手、拉起接收循环与心跳任务
    /// `sip_port` 为 0 时由系统分配，被占用时向后探测
    pub async fn start(
        identity: DeviceIdentity,
        platform: PlatformConfig,
        bind_ip: &str,
        sip_port: u16,
        media_port: u16,
        transport: Arc<dyn StreamTransport>,
    ) -> Result<DeviceClient> {
        let socket = bind_with_probe(bind_ip, sip_port).await?;
        let local_addr = socket.local_addr()?;
        let local_ip = local_ip_for(&platform.addr()).unwrap_or_else(|_| bind_ip.to_string());

        let cseq = Arc::new(AtomicU32::new(0));
        let link = Arc::new(Link {
            socket,
            platform_addr: platform.addr(),
            server_id: platform.server_id.clone(),
            domain: platform.domain.clone(),
            sip_user: identity.sip_user.clone(),
            local_ip: local_ip.clone(),
            local_port: local_addr.port(),
            cseq: cseq.clone(),
        });

        info!(
            device = %identity.device_id,
            local = %format!("{}:{}", local_ip, local_addr.port()),
            platform = %link.platform_addr,
            "device starting"
        );

        // 注册握手，失败直接返回
        let mut registrar = Registrar::new(
            identity.sip_user.clone(),
            identity.sip_password.clone(),
            platform.server_id.clone(),
            platform.domain.clone(),
            local_ip.clone(),
            local_addr.port(),
            platform.register_expires,
            cseq.clone(),
        );
        let first = registrar.start();
        run_handshake(&link, &mut registrar, first).await?;
        info!(device = %identity.device_id, "registered");

        let sessions = Arc::new(SessionManager::new(
            identity.sip_user.clone(),
            local_ip,
            media_port,
            transport,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(identity.clone()));
        let registered = Arc::new(AtomicBool::new(true));
        let last_keepalive = Arc::new(RwLock::new(None));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(recv_loop(
            link.clone(),
            sessions.clone(),
            dispatcher,
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(keepalive_loop(
            link.clone(),
            identity.device_id.clone(),
            platform.keepalive_interval,
            last_keepalive.clone(),
            shutdown_rx,
        )));

        Ok(DeviceClient {
            identity,
            platform,
            link,
            sessions,
            registered,
            last_keepalive,
            shutdown_tx,
            tasks,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// 立即发送一次心跳（不影响周期任务）
    pub async fn send_keepalive(&self) -> Result<()> {
        let sn = Utc::now().timestamp_millis().to_string();
        let body = builder::keepalive(&self.identity.device_id, &sn, "OK");
        self.link.send_request(&self.link.new_message(body)).await?;
        *self.last_keepalive.write().await = Some(Utc::now());
        Ok(())
    }

    /// 主动上报报警通知，仅报警类设备可用
    pub async fn send_alarm(&self, alarm: &builder::AlarmInfo) -> Result<()> {
        if !self.identity.kind().is_alarm() {
            return Err(SimError::Other(format!(
                "device type {} does not raise alarms",
                self.identity.kind().name()
            )));
        }
        let sn = Utc::now().timestamp_millis().to_string();
        let body = builder::alarm_notify(&self.identity.device_id, &sn, alarm);
        self.link.send_request(&self.link.new_message(body)).await
    }

    pub async fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device_id: self.identity.device_id.clone(),
            name: self.identity.name.clone(),
            kind: self.identity.kind().name(),
            manufacturer: self.identity.manufacturer.clone(),
            model: self.identity.model.clone(),
            channels: self.identity.channels.len(),
            registered: self.is_registered(),
            active_sessions: self.sessions.session_count().await,
            last_keepalive: *self.last_keepalive.read().await,
        }
    }

    /// 停止设备：结束后台任务、注销、清理会话
    pub async fn stop(mut self) -> Result<()> {
        info!(device = %self.identity.device_id, "device stopping");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        // 接收循环已退出，套接字可用于注销握手
        if self.registered.swap(false, Ordering::SeqCst) {
            let mut registrar = Registrar::new(
                self.identity.sip_user.clone(),
                self.identity.sip_password.clone(),
                self.platform.server_id.clone(),
                self.platform.domain.clone(),
                self.link.local_ip.clone(),
                self.link.local_port,
                self.platform.register_expires,
                self.link.cseq.clone(),
            );
            let first = registrar.start_unregister();
            if let Err(e) = run_handshake(&self.link, &mut registrar, first).await {
                warn!(device = %self.identity.device_id, error = %e, "unregister failed");
            } else {
                info!(device = %self.identity.device_id, "unregistered");
            }
        }

        self.sessions.shutdown().await;
        Ok(())
    }
}

/// 探测可用端口并绑定
async fn bind_with_probe(bind_ip: &str, base_port: u16) -> Result<UdpSocket> {
    if base_port == 0 {
        return Ok(UdpSocket::bind((bind_ip, 0)).await?);
    }
    let mut last_err = None;
    for offset in 0..PORT_PROBE_RANGE {
        let port = base_port + offset;
        match UdpSocket::bind((bind_ip, port)).await {
            Ok(socket) => {
                if offset > 0 {
                    debug!(port, "bound after probing");
                }
                return Ok(socket);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(SimError::Io(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrInUse, "no port available")
    })))
}

/// 以连接目标反查本机出口 IP
pub fn local_ip_for(target: &str) -> Result<String> {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
    probe.connect(target)?;
    Ok(probe.local_addr()?.ip().to_string())
}

/// 驱动一次注册/注销握手直至完成
async fn run_handshake(link: &Link, registrar: &mut Registrar, first: SipRequest) -> Result<()> {
    link.send_request(&first).await?;
    let mut buf = vec![0u8; 65536];
    loop {
        let (len, _) = timeout(HANDSHAKE_TIMEOUT, link.socket.recv_from(&mut buf))
            .await
            .map_err(|_| {
                SimError::RegistrationFailed("no response from platform".to_string())
            })??;
        let raw = String::from_utf8_lossy(&buf[..len]);
        let msg = match SipMessage::parse(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "discarding unparseable datagram during handshake");
                continue;
            }
        };
        // 握手期间忽略非 REGISTER 事务以及其它对话的报文
        let resp = match msg {
            SipMessage::Response(r)
                if r.cseq_method() == Some(SipMethod::Register)
                    && r.call_id().map_or(true, |id| id == registrar.call_id()) =>
            {
                r
            }
            _ => continue,
        };
        match registrar.handle_response(&resp)? {
            RegisterOutcome::Continue(next) => link.send_request(&next).await?,
            RegisterOutcome::Registered { expires } => {
                debug!(expires, "handshake complete");
                return Ok(());
            }
            RegisterOutcome::Failed(reason) => {
                return Err(SimError::RegistrationFailed(reason));
            }
        }
    }
}

/// 接收循环：分发平台下行的请求与应答
async fn recv_loop(
    link: Arc<Link>,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<CommandDispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 65536];
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            recv = link.socket.recv_from(&mut buf) => {
                let (len, addr) = match recv {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "udp receive error");
                        continue;
                    }
                };
                let raw = String::from_utf8_lossy(&buf[..len]).to_string();
                if let Err(e) = handle_datagram(&link, &sessions, &dispatcher, &raw, addr).await {
                    warn!(error = %e, peer = %addr, "failed to handle datagram");
                }
            }
        }
    }
    debug!("receive loop exited");
}

async fn handle_datagram(
    link: &Link,
    sessions: &SessionManager,
    dispatcher: &CommandDispatcher,
    raw: &str,
    addr: SocketAddr,
) -> Result<()> {
    match SipMessage::parse(raw)? {
        SipMessage::Request(req) => handle_request(link, sessions, dispatcher, req, addr).await,
        SipMessage::Response(resp) => {
            // 心跳等出站 MESSAGE 的确认
            debug!(status = resp.status, cseq = ?resp.header("CSeq"), "response received");
            Ok(())
        }
    }
}

async fn handle_request(
    link: &Link,
    sessions: &SessionManager,
    dispatcher: &CommandDispatcher,
    req: SipRequest,
    addr: SocketAddr,
) -> Result<()> {
    match req.method {
        SipMethod::Message => {
            let env = match manscdp::parse(&req.body) {
                Ok(env) => env,
                Err(e) => {
                    warn!(error = %e, "bad manscdp body");
                    let resp = SipResponse::reply_to(&req, 400, "Bad Request");
                    return link.send_response(&resp, addr).await;
                }
            };
            // 先确认事务，再以独立 MESSAGE 送出应答报文
            link.send_response(&SipResponse::reply_to(&req, 200, "OK"), addr)
                .await?;
            if let Some(body) = dispatcher.dispatch(&env)? {
                link.send_request(&link.new_message(body)).await?;
            }
            Ok(())
        }
        SipMethod::Invite => {
            link.send_response(&SipResponse::reply_to(&req, 100, "Trying"), addr)
                .await?;
            match sessions.handle_invite(&req).await {
                Ok(resp) => link.send_response(&resp, addr).await,
                Err(e) => {
                    warn!(error = %e, "invite rejected");
                    let resp = SipResponse::reply_to(&req, 400, "Bad Request");
                    link.send_response(&resp, addr).await
                }
            }
        }
        SipMethod::Ack => {
            if let Some(call_id) = req.call_id() {
                if let Err(e) = sessions.handle_ack(call_id).await {
                    warn!(error = %e, "ack for unknown session");
                }
            }
            Ok(())
        }
        SipMethod::Bye => {
            link.send_response(&SipResponse::reply_to(&req, 200, "OK"), addr)
                .await?;
            if let Some(call_id) = req.call_id() {
                if let Err(e) = sessions.handle_bye(call_id).await {
                    warn!(error = %e, "bye for unknown session");
                }
            }
            Ok(())
        }
        other => {
            debug!(method = %other, "acknowledging unhandled method");
            link.send_response(&SipResponse::reply_to(&req, 200, "OK"), addr)
                .await
        }
    }
}

/// 心跳任务：按固定间隔上报 Keepalive 通知
async fn keepalive_loop(
    link: Arc<Link>,
    device_id: String,
    interval_secs: u64,
    last_keepalive: Arc<RwLock<Option<DateTime<Utc>>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    // 首个 tick 立即返回，跳过以避免与注册握手重叠
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let sn = Utc::now().timestamp_millis().to_string();
                let body = builder::keepalive(&device_id, &sn, "OK");
                match link.send_request(&link.new_message(body)).await {
                    Ok(()) => {
                        *last_keepalive.write().await = Some(Utc::now());
                        debug!(device = %device_id, sn = %sn, "keepalive sent");
                    }
                    Err(e) => warn!(device = %device_id, error = %e, "keepalive send failed"),
                }
            }
        }
    }
    debug!("keepalive loop exited");
}
