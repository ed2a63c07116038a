// SIP 报文编解码
// 起始行 + 头部列表 + 空行 + 消息体，行分隔符为 CRLF（解析时容忍裸 LF）

use crate::{Result, SimError};
use std::fmt;

pub const SIP_VERSION: &str = "SIP/2.0";

/// SIP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Register,
    Invite,
    Ack,
    Bye,
    Message,
    Info,
    Subscribe,
    Notify,
    Options,
}

impl SipMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGISTER" => Some(SipMethod::Register),
            "INVITE" => Some(SipMethod::Invite),
            "ACK" => Some(SipMethod::Ack),
            "BYE" => Some(SipMethod::Bye),
            "MESSAGE" => Some(SipMethod::Message),
            "INFO" => Some(SipMethod::Info),
            "SUBSCRIBE" => Some(SipMethod::Subscribe),
            "NOTIFY" => Some(SipMethod::Notify),
            "OPTIONS" => Some(SipMethod::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Register => "REGISTER",
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Message => "MESSAGE",
            SipMethod::Info => "INFO",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SIP 请求
/// 头部保持插入顺序，编码输出与构建顺序一致
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: SipMethod,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// SIP 应答
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// 收到的 SIP 报文（请求或应答）
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

fn header_get<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn header_set(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    if let Some(entry) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        entry.1 = value;
    } else {
        headers.push((name.to_string(), value));
    }
}

fn encode_headers(out: &mut String, headers: &[(String, String)], body: &str) {
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    // Content-Length 始终按实际消息体长度输出
    out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    out.push_str("\r\n");
    out.push_str(body);
}

impl SipRequest {
    pub fn new(method: SipMethod, uri: impl Into<String>) -> Self {
        SipRequest {
            method,
            uri: uri.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        header_set(&mut self.headers, name, value.into());
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    /// CSeq 序号部分
    pub fn cseq_number(&self) -> Option<u32> {
        self.header("CSeq")?.split_whitespace().next()?.parse().ok()
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, SIP_VERSION);
        encode_headers(&mut out, &self.headers, &self.body);
        out
    }
}

impl SipResponse {
    /// 按请求构造应答，复制事务定位所需的五个头
    pub fn reply_to(req: &SipRequest, status: u16, reason: impl Into<String>) -> Self {
        let mut resp = SipResponse::new(status, reason);
        for name in ["Via", "From", "To", "Call-ID", "CSeq"] {
            if let Some(value) = req.header(name) {
                resp.set_header(name, value.to_string());
            }
        }
        resp
    }

    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        SipResponse {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        header_set(&mut self.headers, name, value.into());
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    /// CSeq 头中的方法部分
    pub fn cseq_method(&self) -> Option<SipMethod> {
        SipMethod::parse(self.header("CSeq")?.split_whitespace().nth(1)?)
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{} {} {}\r\n", SIP_VERSION, self.status, self.reason);
        encode_headers(&mut out, &self.headers, &self.body);
        out
    }
}

impl SipMessage {
    /// 解析 UDP 数据报中的 SIP 报文
    pub fn parse(raw: &str) -> Result<SipMessage> {
        let (head, body) = match raw.find("\r\n\r\n") {
            Some(pos) => (&raw[..pos], &raw[pos + 4..]),
            None => match raw.find("\n\n") {
                Some(pos) => (&raw[..pos], &raw[pos + 2..]),
                None => (raw, ""),
            },
        };

        let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
        let start_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| SimError::SipParse("empty datagram".to_string()))?;

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SimError::SipParse(format!("malformed header line: {}", line)))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        // Content-Length 截断消息体（UDP 数据报可能带填充）
        let body = match header_get(&headers, "Content-Length").and_then(|v| v.parse::<usize>().ok())
        {
            Some(len) if len <= body.len() => &body[..len],
            _ => body,
        };
        let body = body.to_string();

        if let Some(rest) = start_line.strip_prefix(SIP_VERSION) {
            // 应答：SIP/2.0 <status> <reason>
            let mut parts = rest.trim().splitn(2, ' ');
            let status: u16 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| SimError::SipParse(format!("bad status line: {}", start_line)))?;
            let reason = parts.next().unwrap_or("").to_string();
            return Ok(SipMessage::Response(SipResponse {
                status,
                reason,
                headers,
                body,
            }));
        }

        // 请求：<method> <uri> SIP/2.0
        let mut parts = start_line.split_whitespace();
        let method = parts
            .next()
            .and_then(SipMethod::parse)
            .ok_or_else(|| SimError::SipParse(format!("unknown method: {}", start_line)))?;
        let uri = parts
            .next()
            .ok_or_else(|| SimError::SipParse(format!("missing uri: {}", start_line)))?
            .to_string();
        if parts.next() != Some(SIP_VERSION) {
            return Err(SimError::SipParse(format!("bad request line: {}", start_line)));
        }

        Ok(SipMessage::Request(SipRequest {
            method,
            uri,
            headers,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_register_request() {
        let raw = "REGISTER sip:34020000002000000001@3402000000 SIP/2.0\r\n\
                   Via: SIP/2.0/UDP 192.168.1.50:5061;branch=z9hG4bKabc\r\n\
                   From: <sip:34020000001320000001@3402000000>;tag=123\r\n\
                   To: <sip:34020000001320000001@3402000000>\r\n\
                   Call-ID: deadbeef\r\n\
                   CSeq: 1 REGISTER\r\n\
                   Expires: 3600\r\n\
                   Content-Length: 0\r\n\r\n";

        let msg = SipMessage::parse(raw).unwrap();
        let req = match msg {
            SipMessage::Request(r) => r,
            _ => panic!("expected request"),
        };
        assert_eq!(req.method, SipMethod::Register);
        assert_eq!(req.uri, "sip:34020000002000000001@3402000000");
        assert_eq!(req.call_id(), Some("deadbeef"));
        assert_eq!(req.cseq_number(), Some(1));
        assert_eq!(req.header("expires"), Some("3600"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_response_with_body() {
        let raw = "SIP/2.0 401 Unauthorized\r\n\
                   Call-ID: abc\r\n\
                   CSeq: 1 REGISTER\r\n\
                   WWW-Authenticate: Digest realm=\"3402000000\", nonce=\"xyz\"\r\n\
                   Content-Length: 5\r\n\r\nhello";

        let msg = SipMessage::parse(raw).unwrap();
        let resp = match msg {
            SipMessage::Response(r) => r,
            _ => panic!("expected response"),
        };
        assert_eq!(resp.status, 401);
        assert_eq!(resp.reason, "Unauthorized");
        assert_eq!(resp.cseq_method(), Some(SipMethod::Register));
        assert_eq!(resp.body, "hello");
    }

    #[test]
    fn test_parse_tolerates_bare_lf() {
        let raw = "MESSAGE sip:a@b SIP/2.0\nCall-ID: x\nCSeq: 20 MESSAGE\nContent-Length: 0\n\n";
        let msg = SipMessage::parse(raw).unwrap();
        assert!(matches!(msg, SipMessage::Request(_)));
    }

    #[test]
    fn test_encode_roundtrip_preserves_header_order() {
        let mut req = SipRequest::new(SipMethod::Message, "sip:platform@3402000000");
        req.set_header("Via", "SIP/2.0/UDP 192.168.1.50:5061;branch=z9hG4bKtest");
        req.set_header("From", "<sip:dev@realm>;tag=t1");
        req.set_header("To", "<sip:platform@realm>");
        req.set_header("Call-ID", "cid1");
        req.set_header("CSeq", "21 MESSAGE");
        req.set_header("Content-Type", "Application/MANSCDP+xml");
        req.body = "<Notify></Notify>".to_string();

        let encoded = req.encode();
        let via_pos = encoded.find("Via:").unwrap();
        let from_pos = encoded.find("From:").unwrap();
        let cseq_pos = encoded.find("CSeq:").unwrap();
        assert!(via_pos < from_pos && from_pos < cseq_pos);
        assert!(encoded.contains(&format!("Content-Length: {}\r\n", req.body.len())));

        let parsed = SipMessage::parse(&encoded).unwrap();
        match parsed {
            SipMessage::Request(r) => {
                assert_eq!(r.body, "<Notify></Notify>");
                assert_eq!(r.header("Content-Type"), Some("Application/MANSCDP+xml"));
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn test_set_header_replaces_existing() {
        let mut req = SipRequest::new(SipMethod::Register, "sip:a@b");
        req.set_header("CSeq", "1 REGISTER");
        req.set_header("CSeq", "2 REGISTER");
        assert_eq!(req.header("CSeq"), Some("2 REGISTER"));
        assert_eq!(req.headers.iter().filter(|(k, _)| k == "CSeq").count(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SipMessage::parse("").is_err());
        assert!(SipMessage::parse("GET / HTTP/1.1\r\n\r\n").is_err());
        assert!(SipMessage::parse("REGISTER\r\n\r\n").is_err());
    }

    #[test]
    fn test_content_length_truncates_body() {
        let raw = "SIP/2.0 200 OK\r\nContent-Length: 2\r\n\r\nabcdef";
        match SipMessage::parse(raw).unwrap() {
            SipMessage::Response(r) => assert_eq!(r.body, "ab"),
            _ => panic!("expected response"),
        }
    }
}
