// 注册状态机（纯状态变换，不做网络 IO）
// 标准流程：REGISTER -> 401 携带挑战 -> 带 Authorization 重发 -> 200 OK
// 同一挑战只应答一次，二次 401 视为凭据错误

use super::auth;
use super::message::{SipMethod, SipRequest, SipResponse};
use crate::{Result, SimError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// 注册状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterState {
    Idle,
    Pending,
    Registered,
    Failed,
}

/// 状态机对平台应答的处理结果
#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    /// 继续握手，发送该请求
    Continue(SipRequest),
    /// 注册成功，expires 为平台确认的有效期（注销时为 0）
    Registered { expires: u32 },
    /// 注册失败
    Failed(String),
}

pub struct Registrar {
    sip_user: String,
    password: String,
    server_id: String,
    domain: String,
    local_ip: String,
    local_port: u16,
    expires: u32,
    /// 本次握手请求的有效期（注销时为 0）
    goal_expires: u32,
    cseq: Arc<AtomicU32>,
    state: RegisterState,
    call_id: String,
    from_tag: String,
    auth_attempted: bool,
}

impl Registrar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sip_user: impl Into<String>,
        password: impl Into<String>,
        server_id: impl Into<String>,
        domain: impl Into<String>,
        local_ip: impl Into<String>,
        local_port: u16,
        expires: u32,
        cseq: Arc<AtomicU32>,
    ) -> Self {
        Registrar {
            sip_user: sip_user.into(),
            password: password.into(),
            server_id: server_id.into(),
            domain: domain.into(),
            local_ip: local_ip.into(),
            local_port,
            expires,
            goal_expires: 0,
            cseq,
            state: RegisterState::Idle,
            call_id: String::new(),
            from_tag: String::new(),
            auth_attempted: false,
        }
    }

    pub fn state(&self) -> RegisterState {
        self.state
    }

    /// 当前握手的 Call-ID（start 之前为空）
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// 注册目标 URI，同时作为摘要认证的 digest-uri
    fn request_uri(&self) -> String {
        format!("sip:{}@{}", self.server_id, self.domain)
    }

    /// 开始注册握手，返回首个（无认证）REGISTER 请求
    pub fn start(&mut self) -> SipRequest {
        self.begin(self.expires)
    }

    /// 开始注销握手（Expires: 0）
    pub fn start_unregister(&mut self) -> SipRequest {
        self.begin(0)
    }

    fn begin(&mut self, expires: u32) -> SipRequest {
        self.state = RegisterState::Pending;
        self.goal_expires = expires;
        self.auth_attempted = false;
        self.call_id = super::generate_call_id();
        self.from_tag = super::generate_tag();
        self.build_request(None)
    }

    fn build_request(&self, authorization: Option<String>) -> SipRequest {
        let cseq = self.cseq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut req = SipRequest::new(SipMethod::Register, self.request_uri());
        req.set_header(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};rport;branch={}",
                self.local_ip,
                self.local_port,
                super::generate_branch()
            ),
        );
        req.set_header(
            "From",
            format!("<sip:{}@{}>;tag={}", self.sip_user, self.domain, self.from_tag),
        );
        req.set_header("To", format!("<sip:{}@{}>", self.sip_user, self.domain));
        req.set_header("Call-ID", self.call_id.clone());
        req.set_header("CSeq", format!("{} REGISTER", cseq));
        req.set_header(
            "Contact",
            format!("<sip:{}@{}:{}>", self.sip_user, self.local_ip, self.local_port),
        );
        req.set_header("Max-Forwards", "70");
        if let Some(value) = authorization {
            req.set_header("Authorization", value);
        }
        req.set_header("Expires", self.goal_expires.to_string());
        req.set_header("User-Agent", "gbsim");
        req
    }

    /// 处理平台对本次握手的应答
    pub fn handle_response(&mut self, resp: &SipResponse) -> Result<RegisterOutcome> {
        if self.state != RegisterState::Pending {
            return Err(SimError::RegistrationFailed(
                "response outside of a pending handshake".to_string(),
            ));
        }

        match resp.status {
            401 => {
                if self.auth_attempted {
                    self.state = RegisterState::Failed;
                    return Ok(RegisterOutcome::Failed(
                        "credentials rejected: second 401 after auth".to_string(),
                    ));
                }
                let header = resp.header("WWW-Authenticate").ok_or_else(|| {
                    SimError::RegistrationFailed("401 without WWW-Authenticate".to_string())
                })?;
                let challenge = auth::parse_challenge(header)?;
                let uri = self.request_uri();
                let response = auth::compute_response(
                    &self.sip_user,
                    &self.password,
                    &challenge.realm,
                    &challenge.nonce,
                    SipMethod::Register.as_str(),
                    &uri,
                );
                let authorization =
                    auth::authorization_header(&self.sip_user, &challenge, &uri, &response);
                self.auth_attempted = true;
                Ok(RegisterOutcome::Continue(self.build_request(Some(authorization))))
            }
            200 => {
                let expires = resp
                    .header("Expires")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.goal_expires);
                self.state = if self.goal_expires == 0 {
                    RegisterState::Idle
                } else {
                    RegisterState::Registered
                };
                Ok(RegisterOutcome::Registered { expires })
            }
            status => {
                self.state = RegisterState::Failed;
                Ok(RegisterOutcome::Failed(format!(
                    "platform rejected registration: {} {}",
                    status, resp.reason
                )))
            }
        }
    }
}
