//! 命令帧构建
//!
//! 所有编码函数都返回填充好的 64 字节 [`Frame`]。
//! 字段偏移与字节序以控制器固件为准：运动命令一律 Little Endian。

use crate::Direction;
use crate::frame::Frame;
use crate::opcode::Opcode;

/// 步进时钟基准：step_interval = 480000 / speed
///
/// speed = 0 时直接写入该常量本身（最大步进间隔，即停止）。
pub const STEP_INTERVAL_BASE: u32 = 480_000;

/// 限位开关接线方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EndSwitchMode {
    /// 常开
    NormallyOpen,
    /// 常闭
    NormallyClosed,
}

/// 轨迹运动限制（速度/加速度/减速度 + 可选限位开关）
///
/// 由调用方在每次 `move_trajectory` 时显式传入；
/// 设备不保证跨轴保留这些配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionLimits {
    /// 最大速度（steps/s）
    pub max_speed: u32,
    /// 最大加速度（steps/s²）
    pub max_accel: u32,
    /// 最大减速度（steps/s²）
    pub max_decel: u32,
    /// 限位开关配置，`None` 表示不启用
    pub end_switch: Option<EndSwitchMode>,
}

impl Default for MotionLimits {
    fn default() -> Self {
        MotionLimits {
            max_speed: 50_000,
            max_accel: 40_000,
            max_decel: 3_000,
            end_switch: None,
        }
    }
}

/// PWM 占空比设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PwmDuty {
    pub duty1_ccw: u8,
    pub duty2_ccw: u8,
    pub duty1_cw: u8,
    pub duty2_cw: u8,
}

/// 编码速度设置帧（0x90）
///
/// 步进间隔 = 480000 / speed（speed = 0 时为常量本身），
/// Little Endian u32 写入 bytes 20..24；byte 24 = 1 表示 CCW。
///
/// 注意：此帧必须连续写两次（固件偶发丢失第一帧，已知线上怪癖）。
/// 双写由传输层负责，见 `postep-usb`。
pub fn encode_set_requested_speed(speed: u32, direction: Direction) -> Frame {
    let mut frame = Frame::command(Opcode::SetRequestedSpeed);
    let step_interval = if speed != 0 {
        STEP_INTERVAL_BASE / speed
    } else {
        STEP_INTERVAL_BASE
    };
    frame.put_u32_le(20, step_interval);
    if direction == Direction::Ccw {
        frame.set_byte(24, 0x01);
    }
    frame
}

/// 编码轨迹移动帧（0xB1）
///
/// byte 2 = 0（不启用 autorun）；目标位置为有符号 32 位，
/// 速度/加速度/减速度为无符号 32 位，全部 Little Endian；
/// byte 36 打包 `NCSw << 1 | SwEn`。
pub fn encode_move_trajectory(position: i32, limits: &MotionLimits) -> Frame {
    let mut frame = Frame::command(Opcode::MoveTrajectory);
    frame.set_byte(2, 0b0000_0000);
    frame.put_i32_le(20, position);
    frame.put_u32_le(24, limits.max_speed);
    frame.put_u32_le(28, limits.max_accel);
    frame.put_u32_le(32, limits.max_decel);
    if let Some(mode) = limits.end_switch {
        let mut sw = 0b0000_0001u8;
        if mode == EndSwitchMode::NormallyClosed {
            sw |= 0b0000_0010;
        }
        frame.set_byte(36, sw);
    }
    frame
}

/// 编码运行/休眠帧（0xA1）
pub fn encode_run_sleep(run: bool) -> Frame {
    let mut frame = Frame::command(Opcode::RunSleep);
    if run {
        frame.set_byte(20, 0x01);
    }
    frame
}

/// 编码实时流开启帧（0xA0）
pub fn encode_enable_rt_stream() -> Frame {
    Frame::command(Opcode::EnableRtStream)
}

/// 编码轨迹停止帧（0xB2）
pub fn encode_stop_trajectory() -> Frame {
    Frame::command(Opcode::StopTrajectory)
}

/// 编码位置清零帧（0xB3）
pub fn encode_reset_position_zero() -> Frame {
    Frame::command(Opcode::ResetPositionZero)
}

/// 编码系统复位帧（0x02）
///
/// 设备收到后会从 USB 掉线，无响应。
pub fn encode_system_reset() -> Frame {
    Frame::command(Opcode::SystemReset)
}

/// 编码设备信息读取帧（0x01）
pub fn encode_device_info() -> Frame {
    Frame::command(Opcode::DeviceInfo)
}

/// 编码配置读取帧（0x88）
pub fn encode_read_configuration() -> Frame {
    Frame::command(Opcode::ReadConfiguration)
}

/// 编码配置修改帧（0x87）
///
/// velocity/accel/decel Little Endian 写入 24..36，settings 字节写入 36。
pub fn encode_change_configuration(
    velocity: u32,
    acceleration: u32,
    deceleration: u32,
    settings: u8,
) -> Frame {
    let mut frame = Frame::command(Opcode::ChangeConfiguration);
    frame.put_u32_le(24, velocity);
    frame.put_u32_le(28, acceleration);
    frame.put_u32_le(32, deceleration);
    frame.set_byte(36, settings);
    frame
}

/// 编码 PWM 设置帧（0xB0）
pub fn encode_set_pwm(duty: PwmDuty) -> Frame {
    let mut frame = Frame::command(Opcode::SetPwm);
    frame.set_byte(23, 24);
    frame.set_byte(45, duty.duty1_ccw);
    frame.set_byte(46, duty.duty1_cw);
    frame.set_byte(47, duty.duty2_ccw);
    frame.set_byte(48, duty.duty2_cw);
    frame
}

/// 编码驱动器设置块读取帧（0x81）
pub fn encode_read_driver_settings() -> Frame {
    Frame::command(Opcode::ReadDriverSettings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_frame_step_interval() {
        let frame = encode_set_requested_speed(400, Direction::Cw);
        // 480000 / 400 = 1200
        assert_eq!(frame.get_u32_le(20), 1200);
        assert_eq!(frame.byte(24), 0x00);
    }

    #[test]
    fn test_speed_zero_maps_to_base_interval() {
        let frame = encode_set_requested_speed(0, Direction::Cw);
        assert_eq!(frame.get_u32_le(20), STEP_INTERVAL_BASE);
    }

    #[test]
    fn test_speed_frame_ccw_flag() {
        let frame = encode_set_requested_speed(100, Direction::Ccw);
        assert_eq!(frame.byte(24), 0x01);
    }

    #[test]
    fn test_trajectory_frame_packing() {
        let limits = MotionLimits {
            max_speed: 40_000,
            max_accel: 20_000,
            max_decel: 5_000,
            end_switch: None,
        };
        let frame = encode_move_trajectory(-90_000, &limits);
        assert_eq!(frame.opcode_byte(), 0xB1);
        assert_eq!(frame.byte(2), 0);
        assert_eq!(
            &frame.as_bytes()[20..24],
            &(-90_000i32).to_le_bytes()
        );
        assert_eq!(frame.get_u32_le(24), 40_000);
        assert_eq!(frame.get_u32_le(28), 20_000);
        assert_eq!(frame.get_u32_le(32), 5_000);
        assert_eq!(frame.byte(36), 0);
    }

    #[test]
    fn test_trajectory_end_switch_bits() {
        let mut limits = MotionLimits::default();
        limits.end_switch = Some(EndSwitchMode::NormallyOpen);
        assert_eq!(encode_move_trajectory(0, &limits).byte(36), 0b01);

        limits.end_switch = Some(EndSwitchMode::NormallyClosed);
        assert_eq!(encode_move_trajectory(0, &limits).byte(36), 0b11);
    }

    #[test]
    fn test_run_sleep_flag() {
        assert_eq!(encode_run_sleep(true).byte(20), 0x01);
        assert_eq!(encode_run_sleep(false).byte(20), 0x00);
    }

    #[test]
    fn test_pwm_frame_layout() {
        let frame = encode_set_pwm(PwmDuty {
            duty1_ccw: 10,
            duty2_ccw: 20,
            duty1_cw: 30,
            duty2_cw: 40,
        });
        assert_eq!(frame.byte(23), 24);
        assert_eq!(frame.byte(45), 10);
        assert_eq!(frame.byte(46), 30);
        assert_eq!(frame.byte(47), 20);
        assert_eq!(frame.byte(48), 40);
    }

    #[test]
    fn test_change_configuration_layout() {
        let frame = encode_change_configuration(10_000, 2_000, 2_000, 7);
        assert_eq!(frame.get_u32_le(24), 10_000);
        assert_eq!(frame.get_u32_le(28), 2_000);
        assert_eq!(frame.get_u32_le(32), 2_000);
        assert_eq!(frame.byte(36), 7);
    }
}
