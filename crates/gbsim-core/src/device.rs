// GB28181 模拟设备模型
// 设备身份、通道列表与设备类型能力集

/// 设备类型（取自 20 位国标编码的第 11-13 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// 数字视频录像机
    Dvr,
    /// 网络视频录像机
    Nvr,
    /// 报警控制器
    AlarmController,
    /// 摄像机
    Camera,
    /// 网络摄像机
    Ipc,
    /// 显示器
    Display,
    /// 报警输入设备
    AlarmInput,
    /// 报警输出设备
    AlarmOutput,
    /// 语音输入设备
    VoiceInput,
    /// 语音输出设备
    VoiceOutput,
    /// 移动传输设备
    Mobile,
}

impl DeviceKind {
    /// 设备类型编码（设备 ID 第 11-13 位）
    pub fn code(&self) -> &'static str {
        match self {
            DeviceKind::Dvr => "111",
            DeviceKind::Nvr => "118",
            DeviceKind::AlarmController => "117",
            DeviceKind::Camera => "132",
            DeviceKind::Ipc => "215",
            DeviceKind::Display => "131",
            DeviceKind::AlarmInput => "134",
            DeviceKind::AlarmOutput => "135",
            DeviceKind::VoiceInput => "136",
            DeviceKind::VoiceOutput => "137",
            DeviceKind::Mobile => "138",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "111" => Some(DeviceKind::Dvr),
            "118" => Some(DeviceKind::Nvr),
            "117" => Some(DeviceKind::AlarmController),
            "132" => Some(DeviceKind::Camera),
            "215" => Some(DeviceKind::Ipc),
            "131" => Some(DeviceKind::Display),
            "134" => Some(DeviceKind::AlarmInput),
            "135" => Some(DeviceKind::AlarmOutput),
            "136" => Some(DeviceKind::VoiceInput),
            "137" => Some(DeviceKind::VoiceOutput),
            "138" => Some(DeviceKind::Mobile),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::Dvr => "DVR",
            DeviceKind::Nvr => "NVR",
            DeviceKind::AlarmController => "AlarmController",
            DeviceKind::Camera => "Camera",
            DeviceKind::Ipc => "IPC",
            DeviceKind::Display => "Display",
            DeviceKind::AlarmInput => "AlarmInput",
            DeviceKind::AlarmOutput => "AlarmOutput",
            DeviceKind::VoiceInput => "VoiceInput",
            DeviceKind::VoiceOutput => "VoiceOutput",
            DeviceKind::Mobile => "Mobile",
        }
    }

    /// 视频类设备（可被点播）
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            DeviceKind::Camera | DeviceKind::Ipc | DeviceKind::Dvr | DeviceKind::Nvr
        )
    }

    /// 录像类设备（支持 RecordInfo 查询）
    pub fn is_recording(&self) -> bool {
        matches!(self, DeviceKind::Dvr | DeviceKind::Nvr)
    }

    /// 报警类设备（支持报警通知）
    pub fn is_alarm(&self) -> bool {
        matches!(
            self,
            DeviceKind::AlarmController | DeviceKind::AlarmInput | DeviceKind::AlarmOutput
        )
    }

    /// 语音类设备
    pub fn is_audio(&self) -> bool {
        matches!(self, DeviceKind::VoiceInput | DeviceKind::VoiceOutput)
    }

    pub fn is_display(&self) -> bool {
        matches!(self, DeviceKind::Display)
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, DeviceKind::Mobile)
    }
}

/// 设备通道（摄像头）
#[derive(Debug, Clone)]
pub struct Channel {
    /// 通道 ID（20 位国标编码）
    pub channel_id: String,

    /// 通道名称
    pub name: String,

    /// 是否支持云台控制
    pub ptz: bool,
}

/// 设备身份（加载后不可变）
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// 设备 ID（20 位国标编码）
    pub device_id: String,

    /// 设备名称
    pub name: String,

    /// 制造商
    pub manufacturer: String,

    /// 型号
    pub model: String,

    /// 固件版本
    pub firmware: String,

    /// SIP 认证用户名
    pub sip_user: String,

    /// SIP 认证密码
    pub sip_password: String,

    /// 通道列表
    pub channels: Vec<Channel>,
}

impl DeviceIdentity {
    /// 从设备 ID 中提取设备类型，编码无效时按 IPC 处理
    pub fn kind(&self) -> DeviceKind {
        extract_kind(&self.device_id).unwrap_or(DeviceKind::Ipc)
    }

    /// 任一通道支持云台即认为设备支持 PTZ（显示器除外）
    pub fn ptz_support(&self) -> bool {
        !self.kind().is_display() && self.channels.iter().any(|c| c.ptz)
    }
}

/// 从 20 位设备 ID 中提取类型编码（第 11-13 位）
pub fn extract_kind(device_id: &str) -> Option<DeviceKind> {
    if device_id.len() < 13 {
        return None;
    }
    DeviceKind::from_code(&device_id[10..13])
}
