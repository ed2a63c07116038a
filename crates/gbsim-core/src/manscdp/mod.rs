// MANSCDP XML 子协议（GB/T 28181 附录 A）
// 承载于 SIP MESSAGE 消息体内的命令信封

pub mod builder;
pub mod parser;

pub use parser::{parse, Envelope};

use std::fmt;

/// 命令类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdType {
    Catalog,
    DeviceInfo,
    DeviceStatus,
    DeviceControl,
    RecordInfo,
    Keepalive,
    Alarm,
    Unknown(String),
}

impl CmdType {
    pub fn parse(s: &str) -> Self {
        match s {
            "Catalog" => CmdType::Catalog,
            "DeviceInfo" => CmdType::DeviceInfo,
            "DeviceStatus" => CmdType::DeviceStatus,
            "DeviceControl" => CmdType::DeviceControl,
            "RecordInfo" => CmdType::RecordInfo,
            "Keepalive" => CmdType::Keepalive,
            "Alarm" => CmdType::Alarm,
            other => CmdType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for CmdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmdType::Catalog => write!(f, "Catalog"),
            CmdType::DeviceInfo => write!(f, "DeviceInfo"),
            CmdType::DeviceStatus => write!(f, "DeviceStatus"),
            CmdType::DeviceControl => write!(f, "DeviceControl"),
            CmdType::RecordInfo => write!(f, "RecordInfo"),
            CmdType::Keepalive => write!(f, "Keepalive"),
            CmdType::Alarm => write!(f, "Alarm"),
            CmdType::Unknown(s) => write!(f, "{}", s),
        }
    }
}
