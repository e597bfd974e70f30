//! 反馈帧解析：实时状态流、设备信息、运动配置
//!
//! 实时流的 position/speed/final 三元组为 **Big Endian**，
//! 与出站运动命令的 Little Endian 不对称，属固件既定格式。

use num_enum::FromPrimitive;

use crate::frame::Frame;

/// 实时状态流解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamStatus {
    /// 当前位置（steps）
    pub position: i32,
    /// 当前速度
    pub speed: i32,
    /// 轨迹终点位置
    pub final_position: i32,
    /// 限位开关状态
    pub end_switch: bool,
}

/// 解析实时状态流帧
///
/// Big Endian i32 三元组位于 bytes 20..32；
/// 限位开关布尔位于 byte 6 的 bit 6。
pub fn decode_stream(frame: &Frame) -> StreamStatus {
    StreamStatus {
        position: frame.get_i32_be(20),
        speed: frame.get_i32_be(24),
        final_position: frame.get_i32_be(28),
        end_switch: (frame.byte(6) >> 6) & 0x01 != 0,
    }
}

/// 设备运行状态（device info byte 46）
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum RunState {
    Sleep = 0x01,
    Active = 0x02,
    Idle = 0x03,
    Overheated = 0x04,
    Pwm = 0x05,
    #[num_enum(default)]
    Unknown = 0x00,
}

/// 设备信息（固件版本、供电电压、温度）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceInfo {
    /// Bootloader 固件版本
    pub bootloader_version: u16,
    /// 应用固件版本
    pub app_version: u16,
    /// 供电电压（V）
    pub supply_voltage: f32,
    /// 设备温度（°C）
    pub temperature: f32,
    /// 运行状态
    pub run_state: RunState,
}

/// 解析设备信息响应帧
pub fn decode_device_info(frame: &Frame) -> DeviceInfo {
    let b = frame.as_bytes();
    DeviceInfo {
        bootloader_version: (u16::from(b[1]) << 8) | u16::from(b[2]),
        app_version: (u16::from(b[3]) << 8) | u16::from(b[4]),
        supply_voltage: (f32::from(b[8]) * 256.0 + f32::from(b[9])) * 0.072,
        temperature: (f32::from(b[44]) * 256.0 + f32::from(b[45])) * 0.125,
        run_state: RunState::from_primitive(b[46]),
    }
}

/// 运动配置读取结果（0x88 响应）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveConfig {
    /// 最大速度（steps/s）
    pub velocity: u32,
    /// 加速度（steps/s²）
    pub acceleration: u32,
    /// 减速度（steps/s²）
    pub deceleration: u32,
    /// 设置字节
    pub settings: u8,
}

/// 解析配置读取响应帧
///
/// velocity/accel/decel 为 Little Endian，位于 24..36；设置字节位于 36。
pub fn decode_configuration(frame: &Frame) -> DriveConfig {
    DriveConfig {
        velocity: frame.get_u32_le(24),
        acceleration: frame.get_u32_le(28),
        deceleration: frame.get_u32_le(32),
        settings: frame.byte(36),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_stream_big_endian() {
        let mut frame = Frame::default();
        frame.bytes_mut()[20..24].copy_from_slice(&1234i32.to_be_bytes());
        frame.bytes_mut()[24..28].copy_from_slice(&(-400i32).to_be_bytes());
        frame.bytes_mut()[28..32].copy_from_slice(&5000i32.to_be_bytes());
        let status = decode_stream(&frame);
        assert_eq!(status.position, 1234);
        assert_eq!(status.speed, -400);
        assert_eq!(status.final_position, 5000);
        assert!(!status.end_switch);
    }

    #[test]
    fn test_decode_stream_end_switch_bit() {
        let mut frame = Frame::default();
        frame.set_byte(6, 0b0100_0000);
        assert!(decode_stream(&frame).end_switch);
        frame.set_byte(6, 0b1011_1111);
        assert!(!decode_stream(&frame).end_switch);
    }

    #[test]
    fn test_decode_device_info() {
        let mut frame = Frame::default();
        {
            let b = frame.bytes_mut();
            b[1] = 0x01;
            b[2] = 0x02; // bootloader 0x0102
            b[3] = 0x03;
            b[4] = 0x04; // app 0x0304
            b[8] = 1;
            b[9] = 44; // (256 + 44) * 0.072 = 21.6 V
            b[44] = 0;
            b[45] = 200; // 25.0 °C
            b[46] = 0x03;
        }
        let info = decode_device_info(&frame);
        assert_eq!(info.bootloader_version, 0x0102);
        assert_eq!(info.app_version, 0x0304);
        assert!((info.supply_voltage - 21.6).abs() < 1e-4);
        assert!((info.temperature - 25.0).abs() < 1e-4);
        assert_eq!(info.run_state, RunState::Idle);
    }

    #[test]
    fn test_unknown_run_state() {
        let mut frame = Frame::default();
        frame.set_byte(46, 0x7F);
        assert_eq!(decode_device_info(&frame).run_state, RunState::Unknown);
    }

    #[test]
    fn test_decode_configuration_little_endian() {
        let mut frame = Frame::default();
        frame.put_u32_le(24, 40_000);
        frame.put_u32_le(28, 20_000);
        frame.put_u32_le(32, 3_000);
        frame.set_byte(36, 9);
        let config = decode_configuration(&frame);
        assert_eq!(config.velocity, 40_000);
        assert_eq!(config.acceleration, 20_000);
        assert_eq!(config.deceleration, 3_000);
        assert_eq!(config.settings, 9);
    }
}
