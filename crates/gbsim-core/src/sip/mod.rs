// SIP over UDP 信令层
// 报文编解码、摘要认证、注册状态机与媒体会话管理

pub mod auth;
pub mod message;
pub mod register;
pub mod session;

pub use message::{SipMessage, SipMethod, SipRequest, SipResponse};
pub use register::{RegisterOutcome, Registrar};
pub use session::{MediaSession, SessionManager};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// 随机 Call-ID（32 位字母数字）
pub fn generate_call_id() -> String {
    random_token(32)
}

/// 随机 From/To tag（10 位字母数字）
pub fn generate_tag() -> String {
    random_token(10)
}

/// Via branch，RFC 3261 要求以 z9hG4bK 开头
pub fn generate_branch() -> String {
    format!("z9hG4bK{}", random_token(20))
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lengths() {
        assert_eq!(generate_call_id().len(), 32);
        assert_eq!(generate_tag().len(), 10);
        assert!(generate_branch().starts_with("z9hG4bK"));
        assert_eq!(generate_branch().len(), 7 + 20);
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(generate_call_id(), generate_call_id());
    }
}
