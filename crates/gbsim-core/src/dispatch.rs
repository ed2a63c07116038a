// 平台命令分发
// 解析 MESSAGE 承载的 MANSCDP Query，按命令类型生成应答报文体

use crate::device::DeviceIdentity;
use crate::manscdp::builder::{self, RecordItem};
use crate::manscdp::{CmdType, Envelope};
use crate::{ptz, Result};
use chrono::{Duration, NaiveDateTime, Utc};
use tracing::{debug, info, warn};

const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// 每通道最多返回的模拟录像条数
const MAX_RECORDS_PER_CHANNEL: usize = 10;

/// 模拟录像条目统一上报的文件大小（字节）
const RECORD_FILE_SIZE: &str = "102400";

pub struct CommandDispatcher {
    identity: DeviceIdentity,
}

impl CommandDispatcher {
    pub fn new(identity: DeviceIdentity) -> Self {
        CommandDispatcher { identity }
    }

    /// 处理一条平台命令，返回需要回发的 MANSCDP 报文体
    /// 非 Query 信封与未知命令不产生应答
    pub fn dispatch(&self, env: &Envelope) -> Result<Option<String>> {
        if env.root != "Query" && env.root != "Control" {
            debug!(root = %env.root, "ignoring non-query envelope");
            return Ok(None);
        }

        match &env.cmd_type {
            CmdType::Catalog => {
                info!(sn = %env.sn, "catalog query");
                Ok(Some(builder::catalog_response(&self.identity, &env.sn)))
            }
            CmdType::DeviceInfo => {
                info!(sn = %env.sn, "device info query");
                Ok(Some(builder::device_info_response(&self.identity, &env.sn)))
            }
            CmdType::DeviceStatus => {
                info!(sn = %env.sn, "device status query");
                Ok(Some(builder::device_status_response(
                    &self.identity.device_id,
                    &env.sn,
                )))
            }
            CmdType::DeviceControl => Ok(Some(self.handle_control(env))),
            CmdType::RecordInfo => Ok(Some(self.handle_record_info(env))),
            CmdType::Keepalive | CmdType::Alarm => {
                // 设备侧主动发出的通知类型，平台不应下发
                debug!(cmd = %env.cmd_type, "unexpected inbound notify command");
                Ok(None)
            }
            CmdType::Unknown(name) => {
                warn!(cmd = %name, "unsupported command type");
                Ok(None)
            }
        }
    }

    /// 设备控制：目前只实现云台指令，其余控制命令直接确认
    fn handle_control(&self, env: &Envelope) -> String {
        let result = match env.field("PTZCmd") {
            Some(raw) => match ptz::decode(raw) {
                Ok(cmd) => {
                    if !cmd.checksum_valid(raw) {
                        // 部分平台校验和计算有偏差，记录后仍然执行
                        warn!(payload = %raw, "ptz checksum mismatch");
                    }
                    let actions: Vec<String> =
                        cmd.actions.iter().map(|a| a.to_string()).collect();
                    info!(
                        actions = %actions.join("+"),
                        h_speed = cmd.horizontal_speed,
                        v_speed = cmd.vertical_speed,
                        "ptz control"
                    );
                    if self.identity.ptz_support() {
                        "OK"
                    } else {
                        "ERROR"
                    }
                }
                Err(e) => {
                    warn!(payload = %raw, error = %e, "bad ptz payload");
                    "ERROR"
                }
            },
            None => {
                info!("device control without ptz payload, acknowledging");
                "OK"
            }
        };
        builder::device_control_response(&self.identity.device_id, &env.sn, result)
    }

    /// 录像查询：录像类设备按时间窗生成模拟条目，其余设备返回空列表
    /// 时间窗缺失时取截止当前的最近 24 小时
    fn handle_record_info(&self, env: &Envelope) -> String {
        let records = if self.identity.kind().is_recording() {
            match record_window(env) {
                Some((start, end)) => generate_records(&self.identity, start, end),
                None => {
                    warn!(sn = %env.sn, "record query with unparseable time window");
                    Vec::new()
                }
            }
        } else {
            debug!("record query on non-recording device, returning empty list");
            Vec::new()
        };

        info!(sn = %env.sn, count = records.len(), "record info query");
        builder::record_info_response(&self.identity.device_id, &env.sn, &records)
    }
}

/// 计算查询时间窗：两端齐全则按请求解析，任一端缺失退回最近 24 小时
/// 给出但无法解析的时间返回 None
fn record_window(env: &Envelope) -> Option<(NaiveDateTime, NaiveDateTime)> {
    match (env.field("StartTime"), env.field("EndTime")) {
        (Some(s), Some(e)) => {
            let start = NaiveDateTime::parse_from_str(s, TIME_FMT).ok()?;
            let end = NaiveDateTime::parse_from_str(e, TIME_FMT).ok()?;
            Some((start, end))
        }
        _ => {
            let now = Utc::now().naive_utc();
            Some((now - Duration::hours(24), now))
        }
    }
}

/// 在时间窗内为每个通道按小时生成模拟录像条目
pub fn generate_records(
    identity: &DeviceIdentity,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Vec<RecordItem> {
    let mut records = Vec::new();
    if end <= start {
        return records;
    }

    for channel in &identity.channels {
        let mut t = start;
        let mut count = 0;
        while t < end && count < MAX_RECORDS_PER_CHANNEL {
            let file_end = (t + Duration::hours(1)).min(end);
            let stamp = t.format("%Y%m%d%H%M%S");
            records.push(RecordItem {
                device_id: channel.channel_id.clone(),
                name: format!("{}-{}", channel.name, stamp),
                file_path: format!(
                    "/record/{}/{}/{}.mp4",
                    t.format("%Y%m%d"),
                    channel.channel_id,
                    count + 1
                ),
                start_time: t.format(TIME_FMT).to_string(),
                end_time: file_end.format(TIME_FMT).to_string(),
                secrecy: "0".to_string(),
                record_type: "time".to_string(),
                file_size: RECORD_FILE_SIZE.to_string(),
            });
            t += Duration::hours(1);
            count += 1;
        }
    }
    records
}
