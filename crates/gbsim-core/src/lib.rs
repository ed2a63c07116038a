// gbsim-core: GB28181 设备模拟协议引擎
//
// 架构设计：
// - 每个模拟设备一个独立的 UDP 传输任务，设备间无共享可变状态
// - SIP 信令（REGISTER/MESSAGE/INVITE/ACK/BYE）+ MANSCDP XML 子协议
// - 媒体推流通过 StreamTransport 接口委托给外部进程

pub mod client;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod manscdp;
pub mod ptz;
pub mod sip;
pub mod stream;

// 重新导出常用类型
pub use client::{DeviceClient, DeviceStatus, PlatformConfig};
pub use device::{Channel, DeviceIdentity, DeviceKind};
pub use error::{Result, SimError};
pub use stream::{StreamInfo, StreamTransport};
