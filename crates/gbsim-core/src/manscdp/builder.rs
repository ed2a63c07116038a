// MANSCDP 应答/通知报文构建
// 输出为 XML 声明 + 单一根元素，字段顺序与国标平台的解析习惯保持一致

use crate::device::DeviceIdentity;

const XML_PROLOG: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// 录像文件条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordItem {
    pub device_id: String,
    pub name: String,
    pub file_path: String,
    pub start_time: String,
    pub end_time: String,
    pub secrecy: String,
    pub record_type: String,
    pub file_size: String,
}

/// 报警通知内容
#[derive(Debug, Clone)]
pub struct AlarmInfo {
    pub alarm_type: String,
    pub alarm_priority: u8,
    /// 1=报警, 2=故障
    pub alarm_method: String,
    pub alarm_time: String,
    pub alarm_description: String,
}

fn push_elem(out: &mut String, tag: &str, value: &str) {
    out.push_str(&format!("<{}>{}</{}>\n", tag, escape(value), tag));
}

/// XML 文本转义（字段值均为受控内容，仅处理保留字符）
fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// 心跳通知（Notify/Keepalive）
pub fn keepalive(device_id: &str, sn: &str, status: &str) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push_str("<Notify>\n");
    push_elem(&mut out, "CmdType", "Keepalive");
    push_elem(&mut out, "SN", sn);
    push_elem(&mut out, "DeviceID", device_id);
    push_elem(&mut out, "Status", status);
    out.push_str("</Notify>\n");
    out
}

/// 目录查询应答（Response/Catalog），通道列表带 Num 计数
pub fn catalog_response(identity: &DeviceIdentity, sn: &str) -> String {
    let device_id = &identity.device_id;
    let civil_code = device_id.get(..9).unwrap_or(device_id);
    let count = identity.channels.len();

    let mut out = String::from(XML_PROLOG);
    out.push_str("<Response>\n");
    push_elem(&mut out, "CmdType", "Catalog");
    push_elem(&mut out, "SN", sn);
    push_elem(&mut out, "DeviceID", device_id);
    push_elem(&mut out, "SumNum", &count.to_string());
    out.push_str(&format!("<DeviceList Num=\"{}\">\n", count));
    for channel in &identity.channels {
        out.push_str("<Item>\n");
        push_elem(&mut out, "DeviceID", &channel.channel_id);
        push_elem(&mut out, "Name", &channel.name);
        push_elem(&mut out, "Manufacturer", &identity.manufacturer);
        push_elem(&mut out, "Model", &identity.model);
        push_elem(&mut out, "Owner", "Owner");
        push_elem(&mut out, "CivilCode", civil_code);
        push_elem(&mut out, "Address", "Address");
        push_elem(&mut out, "Parental", "0");
        push_elem(&mut out, "ParentID", device_id);
        push_elem(&mut out, "SafetyWay", "0");
        push_elem(&mut out, "RegisterWay", "1");
        push_elem(&mut out, "Secrecy", "0");
        push_elem(&mut out, "Status", "ON");
        out.push_str("</Item>\n");
    }
    out.push_str("</DeviceList>\n");
    out.push_str("</Response>\n");
    out
}

/// 设备信息应答（Response/DeviceInfo），能力标志按设备类型派生
pub fn device_info_response(identity: &DeviceIdentity, sn: &str) -> String {
    let kind = identity.kind();

    let mut out = String::from(XML_PROLOG);
    out.push_str("<Response>\n");
    push_elem(&mut out, "CmdType", "DeviceInfo");
    push_elem(&mut out, "SN", sn);
    push_elem(&mut out, "DeviceID", &identity.device_id);
    push_elem(&mut out, "DeviceName", &identity.name);
    push_elem(&mut out, "Result", "OK");
    push_elem(&mut out, "Manufacturer", &identity.manufacturer);
    push_elem(&mut out, "Model", &identity.model);
    push_elem(&mut out, "Firmware", &identity.firmware);
    push_elem(&mut out, "Channel", &identity.channels.len().to_string());
    if identity.ptz_support() {
        push_elem(&mut out, "PTZSupport", "1");
    }
    if kind.is_recording() {
        push_elem(&mut out, "RecordingSupport", "1");
    }
    if kind.is_alarm() {
        push_elem(&mut out, "AlarmSupport", "1");
    }
    if kind.is_audio() {
        push_elem(&mut out, "AudioSupport", "1");
    }
    if kind.is_display() {
        push_elem(&mut out, "DisplaySupport", "1");
    }
    if kind.is_mobile() {
        push_elem(&mut out, "MobileSupport", "1");
    }
    out.push_str("</Response>\n");
    out
}

/// 设备状态应答（Response/DeviceStatus）
pub fn device_status_response(device_id: &str, sn: &str) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push_str("<Response>\n");
    push_elem(&mut out, "CmdType", "DeviceStatus");
    push_elem(&mut out, "SN", sn);
    push_elem(&mut out, "DeviceID", device_id);
    push_elem(&mut out, "Result", "OK");
    push_elem(&mut out, "Online", "ONLINE");
    push_elem(&mut out, "Status", "ON");
    push_elem(&mut out, "Encode", "ON");
    push_elem(&mut out, "Record", "OFF");
    out.push_str("</Response>\n");
    out
}

/// 设备控制应答（Response/DeviceControl）
pub fn device_control_response(device_id: &str, sn: &str, result: &str) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push_str("<Response>\n");
    push_elem(&mut out, "CmdType", "DeviceControl");
    push_elem(&mut out, "SN", sn);
    push_elem(&mut out, "DeviceID", device_id);
    push_elem(&mut out, "Result", result);
    out.push_str("</Response>\n");
    out
}

/// 录像文件查询应答（Response/RecordInfo）
/// 空列表时仍输出 SumNum=0 的完整信封
pub fn record_info_response(device_id: &str, sn: &str, records: &[RecordItem]) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push_str("<Response>\n");
    push_elem(&mut out, "CmdType", "RecordInfo");
    push_elem(&mut out, "SN", sn);
    push_elem(&mut out, "DeviceID", device_id);
    push_elem(&mut out, "Name", "RecordInfo");
    push_elem(&mut out, "SumNum", &records.len().to_string());
    if !records.is_empty() {
        out.push_str(&format!("<RecordList Num=\"{}\">\n", records.len()));
        for record in records {
            out.push_str("<Item>\n");
            push_elem(&mut out, "DeviceID", &record.device_id);
            push_elem(&mut out, "Name", &record.name);
            push_elem(&mut out, "FilePath", &record.file_path);
            push_elem(&mut out, "Address", "Address");
            push_elem(&mut out, "StartTime", &record.start_time);
            push_elem(&mut out, "EndTime", &record.end_time);
            push_elem(&mut out, "Secrecy", &record.secrecy);
            push_elem(&mut out, "Type", &record.record_type);
            push_elem(&mut out, "RecorderID", device_id);
            push_elem(&mut out, "FileSize", &record.file_size);
            out.push_str("</Item>\n");
        }
        out.push_str("</RecordList>\n");
    }
    out.push_str("</Response>\n");
    out
}

/// 报警通知（Notify/Alarm）
pub fn alarm_notify(device_id: &str, sn: &str, alarm: &AlarmInfo) -> String {
    let mut out = String::from(XML_PROLOG);
    out.push_str("<Notify>\n");
    push_elem(&mut out, "CmdType", "Alarm");
    push_elem(&mut out, "SN", sn);
    push_elem(&mut out, "DeviceID", device_id);
    push_elem(&mut out, "AlarmPriority", &alarm.alarm_priority.to_string());
    push_elem(&mut out, "AlarmMethod", &alarm.alarm_method);
    push_elem(&mut out, "AlarmTime", &alarm.alarm_time);
    push_elem(&mut out, "AlarmType", &alarm.alarm_type);
    push_elem(&mut out, "AlarmDescription", &alarm.alarm_description);
    out.push_str("</Notify>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Channel;
    use crate::manscdp::{parse, CmdType};

    fn identity(device_id: &str) -> DeviceIdentity {
        DeviceIdentity {
            device_id: device_id.to_string(),
            name: "Gate Camera".to_string(),
            manufacturer: "SimCamera".to_string(),
            model: "SC-2000".to_string(),
            firmware: "V1.0.0".to_string(),
            sip_user: device_id.to_string(),
            sip_password: "12345678".to_string(),
            channels: vec![
                Channel {
                    channel_id: "34020000001320000002".to_string(),
                    name: "Channel 1".to_string(),
                    ptz: true,
                },
                Channel {
                    channel_id: "34020000001320000003".to_string(),
                    name: "Channel 2".to_string(),
                    ptz: false,
                },
            ],
        }
    }

    #[test]
    fn test_keepalive_roundtrip() {
        let xml = keepalive("34020000001320000001", "42", "OK");
        let env = parse(&xml).unwrap();
        assert_eq!(env.root, "Notify");
        assert_eq!(env.cmd_type, CmdType::Keepalive);
        assert_eq!(env.sn, "42");
        assert_eq!(env.device_id, "34020000001320000001");
        assert_eq!(env.field("Status"), Some("OK"));
    }

    #[test]
    fn test_catalog_response_roundtrip() {
        let xml = catalog_response(&identity("34020000001320000001"), "7");
        let env = parse(&xml).unwrap();
        assert_eq!(env.cmd_type, CmdType::Catalog);
        assert_eq!(env.sn, "7");
        assert_eq!(env.field("SumNum"), Some("2"));
        assert_eq!(env.items.len(), 2);
        assert_eq!(env.items[0].get("Name").unwrap(), "Channel 1");
        assert_eq!(env.items[0].get("CivilCode").unwrap(), "340200000");
        assert_eq!(env.items[1].get("ParentID").unwrap(), "34020000001320000001");
    }

    #[test]
    fn test_device_info_flags() {
        // 摄像机 + PTZ 通道
        let xml = device_info_response(&identity("34020000001320000001"), "1");
        let env = parse(&xml).unwrap();
        assert_eq!(env.field("Channel"), Some("2"));
        assert_eq!(env.field("PTZSupport"), Some("1"));
        assert_eq!(env.field("RecordingSupport"), None);

        // NVR 支持录像
        let xml = device_info_response(&identity("34020000001180000001"), "1");
        let env = parse(&xml).unwrap();
        assert_eq!(env.field("RecordingSupport"), Some("1"));
    }

    #[test]
    fn test_device_status_fields() {
        let xml = device_status_response("34020000001320000001", "9");
        let env = parse(&xml).unwrap();
        assert_eq!(env.cmd_type, CmdType::DeviceStatus);
        assert_eq!(env.field("Online"), Some("ONLINE"));
        assert_eq!(env.field("Status"), Some("ON"));
    }

    #[test]
    fn test_record_info_empty_is_well_formed() {
        let xml = record_info_response("34020000001180000001", "5", &[]);
        let env = parse(&xml).unwrap();
        assert_eq!(env.cmd_type, CmdType::RecordInfo);
        assert_eq!(env.field("SumNum"), Some("0"));
        assert!(env.items.is_empty());
    }

    #[test]
    fn test_escape_reserved_chars() {
        let mut ident = identity("34020000001320000001");
        ident.name = "Cam <A&B>".to_string();
        let xml = device_info_response(&ident, "1");
        assert!(xml.contains("Cam &lt;A&amp;B&gt;"));
        let env = parse(&xml).unwrap();
        assert_eq!(env.field("DeviceName"), Some("Cam <A&B>"));
    }
}
