//! 操作码定义与响应校验表
//!
//! byte 1 携带操作码。响应校验方式因操作码而异：
//! 部分命令以首字节 ACK（0x02）应答，部分在 byte 15 回显操作码，
//! `SystemReset` 则不应答（设备会从 USB 总线掉线）。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 出站帧操作码（byte 1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    /// 读取设备信息（固件版本、电压、温度）
    DeviceInfo = 0x01,
    /// 系统复位（设备将断开 USB）
    SystemReset = 0x02,
    /// 写驱动器设置块
    WriteDriverSettings = 0x80,
    /// 读驱动器设置块
    ReadDriverSettings = 0x81,
    /// 修改速度/加速度/减速度配置
    ChangeConfiguration = 0x87,
    /// 读取当前配置
    ReadConfiguration = 0x88,
    /// 设置请求速度
    SetRequestedSpeed = 0x90,
    /// 开启实时数据流
    EnableRtStream = 0xA0,
    /// 运行/休眠
    RunSleep = 0xA1,
    /// 设置 PWM 占空比
    SetPwm = 0xB0,
    /// 轨迹移动
    MoveTrajectory = 0xB1,
    /// 停止轨迹
    StopTrajectory = 0xB2,
    /// 位置计数器清零
    ResetPositionZero = 0xB3,
}

/// 响应校验方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCheck {
    /// 首字节 == 0x02
    Ack,
    /// byte 15 回显操作码
    Echo,
    /// 无响应
    None,
}

impl Opcode {
    /// 此操作码的响应校验方式
    pub fn response_check(self) -> ResponseCheck {
        match self {
            Opcode::SetRequestedSpeed
            | Opcode::MoveTrajectory
            | Opcode::ReadDriverSettings
            | Opcode::WriteDriverSettings
            | Opcode::ChangeConfiguration
            | Opcode::ReadConfiguration
            | Opcode::SetPwm
            | Opcode::DeviceInfo => ResponseCheck::Echo,
            Opcode::EnableRtStream
            | Opcode::RunSleep
            | Opcode::StopTrajectory
            | Opcode::ResetPositionZero => ResponseCheck::Ack,
            Opcode::SystemReset => ResponseCheck::None,
        }
    }

    /// 此操作码是否需要读取响应
    pub fn expects_response(self) -> bool {
        !matches!(self.response_check(), ResponseCheck::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(u8::from(Opcode::SetRequestedSpeed), 0x90);
        assert_eq!(u8::from(Opcode::MoveTrajectory), 0xB1);
        assert_eq!(u8::from(Opcode::StopTrajectory), 0xB2);
        assert_eq!(u8::from(Opcode::ResetPositionZero), 0xB3);
        assert_eq!(u8::from(Opcode::EnableRtStream), 0xA0);
        assert_eq!(u8::from(Opcode::RunSleep), 0xA1);
    }

    #[test]
    fn test_opcode_try_from() {
        assert_eq!(Opcode::try_from(0x81).unwrap(), Opcode::ReadDriverSettings);
        assert!(Opcode::try_from(0xFF).is_err());
    }

    #[test]
    fn test_system_reset_has_no_response() {
        assert!(!Opcode::SystemReset.expects_response());
        assert!(Opcode::RunSleep.expects_response());
    }
}
