// GB28181 云台控制指令解码
// 指令为 ASCII-hex 字符串：A50F01 + 指令字节 + 水平速度 + 垂直速度 + 变倍速度 + 校验和

use crate::{Result, SimError};
use std::fmt;

/// 固定 3 字节指令前缀
pub const PTZ_PREFIX: &str = "A50F01";

// 指令字节位定义
const PTZ_RIGHT: u8 = 0x01;
const PTZ_LEFT: u8 = 0x02;
const PTZ_DOWN: u8 = 0x04;
const PTZ_UP: u8 = 0x08;
const PTZ_ZOOM_IN: u8 = 0x10;
const PTZ_ZOOM_OUT: u8 = 0x20;
const PTZ_FOCUS_FAR: u8 = 0x40;
const PTZ_FOCUS_NEAR: u8 = 0x80;

/// 云台动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzAction {
    Right,
    Left,
    Down,
    Up,
    ZoomIn,
    ZoomOut,
    FocusFar,
    FocusNear,
    Stop,
}

impl fmt::Display for PtzAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PtzAction::Right => "right",
            PtzAction::Left => "left",
            PtzAction::Down => "down",
            PtzAction::Up => "up",
            PtzAction::ZoomIn => "zoom_in",
            PtzAction::ZoomOut => "zoom_out",
            PtzAction::FocusFar => "focus_far",
            PtzAction::FocusNear => "focus_near",
            PtzAction::Stop => "stop",
        };
        write!(f, "{}", s)
    }
}

/// 解码后的云台指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtzCommand {
    /// 指令字节原始值
    pub command_byte: u8,

    /// 动作列表（无任何置位时为单个 Stop）
    pub actions: Vec<PtzAction>,

    /// 水平速度
    pub horizontal_speed: u8,

    /// 垂直速度
    pub vertical_speed: u8,

    /// 变倍速度
    pub zoom_speed: u8,

    /// 报文携带的校验和字节
    pub checksum: u8,
}

impl PtzCommand {
    /// 校验和是否与前 7 字节之和（mod 256）一致
    pub fn checksum_valid(&self, raw: &str) -> bool {
        let data = normalize(raw);
        match checksum(&data[..14.min(data.len())]) {
            Ok(sum) => sum == self.checksum,
            Err(_) => false,
        }
    }
}

fn normalize(data: &str) -> String {
    data.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_uppercase()
}

fn byte_at(data: &str, offset: usize) -> Result<u8> {
    let pair = data
        .get(offset..offset + 2)
        .ok_or_else(|| SimError::PtzParse("payload truncated".to_string()))?;
    u8::from_str_radix(pair, 16)
        .map_err(|_| SimError::PtzParse(format!("invalid hex byte at offset {}", offset)))
}

/// 解码云台指令，输入大小写与空白不敏感
pub fn decode(data: &str) -> Result<PtzCommand> {
    let data = normalize(data);

    if data.len() < 16 {
        return Err(SimError::PtzParse(format!(
            "payload too short: {} hex chars, need 16",
            data.len()
        )));
    }

    if !data.starts_with(PTZ_PREFIX) {
        return Err(SimError::PtzParse("missing A50F01 prefix".to_string()));
    }

    let command_byte = byte_at(&data, 6)?;
    let horizontal_speed = byte_at(&data, 8)?;
    let vertical_speed = byte_at(&data, 10)?;
    let zoom_speed = byte_at(&data, 12)?;
    let checksum = byte_at(&data, 14)?;

    let mut actions = Vec::new();
    // 动作顺序固定，保证解码结果可复现
    if command_byte & PTZ_RIGHT != 0 {
        actions.push(PtzAction::Right);
    }
    if command_byte & PTZ_LEFT != 0 {
        actions.push(PtzAction::Left);
    }
    if command_byte & PTZ_DOWN != 0 {
        actions.push(PtzAction::Down);
    }
    if command_byte & PTZ_UP != 0 {
        actions.push(PtzAction::Up);
    }
    if command_byte & PTZ_ZOOM_IN != 0 {
        actions.push(PtzAction::ZoomIn);
    }
    if command_byte & PTZ_ZOOM_OUT != 0 {
        actions.push(PtzAction::ZoomOut);
    }
    if command_byte & PTZ_FOCUS_FAR != 0 {
        actions.push(PtzAction::FocusFar);
    }
    if command_byte & PTZ_FOCUS_NEAR != 0 {
        actions.push(PtzAction::FocusNear);
    }
    if actions.is_empty() {
        actions.push(PtzAction::Stop);
    }

    Ok(PtzCommand {
        command_byte,
        actions,
        horizontal_speed,
        vertical_speed,
        zoom_speed,
        checksum,
    })
}

/// 计算 hex 串中所有字节之和 mod 256
pub fn checksum(data: &str) -> Result<u8> {
    let data = normalize(data);
    if data.len() % 2 != 0 {
        return Err(SimError::PtzParse("odd hex length".to_string()));
    }
    let mut sum: u32 = 0;
    let mut offset = 0;
    while offset < data.len() {
        sum += byte_at(&data, offset)? as u32;
        offset += 2;
    }
    Ok((sum % 256) as u8)
}
