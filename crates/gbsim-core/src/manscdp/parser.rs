// MANSCDP 信封解析
// 将根元素下第一层子元素摊平为键值表；DeviceList/RecordList 的 Item 提升为逐项表

use super::CmdType;
use crate::{Result, SimError};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// 解析后的命令信封
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// 根元素（Query / Response / Notify）
    pub root: String,

    /// 命令类型
    pub cmd_type: CmdType,

    /// 命令序列号
    pub sn: String,

    /// 设备 ID
    pub device_id: String,

    /// 第一层子元素键值表
    pub fields: HashMap<String, String>,

    /// 嵌套列表（DeviceList/RecordList 的 Item 子项）
    pub items: Vec<HashMap<String, String>>,
}

impl Envelope {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// 解析 MANSCDP XML 信封，失败返回 `SimError::XmlParse`
pub fn parse(xml: &str) -> Result<Envelope> {
    let mut reader = Reader::from_str(xml.trim());

    let mut root = String::new();
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut items: Vec<HashMap<String, String>> = Vec::new();
    let mut current_item: Option<HashMap<String, String>> = None;
    // 当前打开的元素栈：[root, field] 或 [root, list, Item, field]
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if root.is_empty() {
                    root = name.clone();
                }
                stack.push(name.clone());
                if stack.len() == 3 && name == "Item" {
                    current_item = Some(HashMap::new());
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match stack.len() {
                    1 => {
                        fields.insert(name, String::new());
                    }
                    3 => {
                        if let Some(item) = current_item.as_mut() {
                            item.insert(name, String::new());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| SimError::XmlParse(e.to_string()))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                match stack.len() {
                    2 => {
                        fields.insert(stack[1].clone(), text);
                    }
                    4 => {
                        if let Some(item) = current_item.as_mut() {
                            item.insert(stack[3].clone(), text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() == 3 && stack[2] == "Item" {
                    if let Some(item) = current_item.take() {
                        items.push(item);
                    }
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SimError::XmlParse(e.to_string())),
        }
    }

    if root.is_empty() {
        return Err(SimError::XmlParse("empty document".to_string()));
    }

    let cmd_type = fields
        .get("CmdType")
        .map(|s| CmdType::parse(s))
        .unwrap_or(CmdType::Unknown(String::new()));
    let sn = fields.get("SN").cloned().unwrap_or_else(|| "1".to_string());
    let device_id = fields.get("DeviceID").cloned().unwrap_or_default();

    Ok(Envelope {
        root,
        cmd_type,
        sn,
        device_id,
        fields,
        items,
    })
}
