// SIP 摘要认证（RFC 2617，无 qop 分支）
// 国标平台普遍只下发 realm + nonce，response = MD5(HA1:nonce:HA2)

use crate::{Result, SimError};

/// 401 应答中的认证挑战
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// 平台可能携带 algorithm=MD5，保留原样回显
    pub algorithm: Option<String>,
}

/// 解析 WWW-Authenticate 头
pub fn parse_challenge(header: &str) -> Result<DigestChallenge> {
    let params = header
        .trim()
        .strip_prefix("Digest")
        .ok_or_else(|| SimError::SipParse("not a Digest challenge".to_string()))?;

    let mut realm = None;
    let mut nonce = None;
    let mut algorithm = None;

    for part in params.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "nonce" => nonce = Some(value),
            "algorithm" => algorithm = Some(value),
            _ => {}
        }
    }

    Ok(DigestChallenge {
        realm: realm.ok_or_else(|| SimError::SipParse("challenge missing realm".to_string()))?,
        nonce: nonce.ok_or_else(|| SimError::SipParse("challenge missing nonce".to_string()))?,
        algorithm,
    })
}

/// 计算摘要认证应答值
/// HA1 = MD5(user:realm:password)，HA2 = MD5(method:uri)
pub fn compute_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = format!("{:x}", md5::compute(format!("{}:{}:{}", username, realm, password)));
    let ha2 = format!("{:x}", md5::compute(format!("{}:{}", method, uri)));
    format!("{:x}", md5::compute(format!("{}:{}:{}", ha1, nonce, ha2)))
}

/// 构造 Authorization 头的值
pub fn authorization_header(
    username: &str,
    challenge: &DigestChallenge,
    uri: &str,
    response: &str,
) -> String {
    let mut out = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        username, challenge.realm, challenge.nonce, uri, response
    );
    if let Some(alg) = &challenge.algorithm {
        out.push_str(&format!(", algorithm={}", alg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge() {
        let c = parse_challenge("Digest realm=\"3402000000\", nonce=\"abc123\", algorithm=MD5")
            .unwrap();
        assert_eq!(c.realm, "3402000000");
        assert_eq!(c.nonce, "abc123");
        assert_eq!(c.algorithm.as_deref(), Some("MD5"));
    }

    #[test]
    fn test_parse_challenge_missing_nonce() {
        assert!(parse_challenge("Digest realm=\"r\"").is_err());
        assert!(parse_challenge("Basic realm=\"r\"").is_err());
    }

    #[test]
    fn test_compute_response_is_deterministic() {
        let a = compute_response(
            "34020000001320000001",
            "12345678",
            "3402000000",
            "nonce1",
            "REGISTER",
            "sip:34020000002000000001@3402000000",
        );
        let b = compute_response(
            "34020000001320000001",
            "12345678",
            "3402000000",
            "nonce1",
            "REGISTER",
            "sip:34020000002000000001@3402000000",
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_response_depends_on_each_input() {
        let base = compute_response("u", "p", "r", "n", "REGISTER", "sip:x");
        assert_ne!(base, compute_response("u2", "p", "r", "n", "REGISTER", "sip:x"));
        assert_ne!(base, compute_response("u", "p2", "r", "n", "REGISTER", "sip:x"));
        assert_ne!(base, compute_response("u", "p", "r", "n2", "REGISTER", "sip:x"));
        assert_ne!(base, compute_response("u", "p", "r", "n", "MESSAGE", "sip:x"));
    }

    #[test]
    fn test_authorization_header_format() {
        let c = DigestChallenge {
            realm: "3402000000".to_string(),
            nonce: "n1".to_string(),
            algorithm: None,
        };
        let h = authorization_header("user1", &c, "sip:a@b", "resp");
        assert!(h.starts_with("Digest username=\"user1\""));
        assert!(h.contains("nonce=\"n1\""));
        assert!(h.contains("response=\"resp\""));
        assert!(!h.contains("algorithm"));
    }
}
