//! 驱动器设置块：读改写与定点换算
//!
//! 设置以不透明的 64 字节块读出（0x81），按字段原地修补后整块写回（0x80）。
//! 电流字段采用「尾数 + 2 位指数」寄存器对编码，换算公式为固件文档给定。

use crate::frame::{Frame, FRAME_LEN};
use crate::opcode::Opcode;

/// 电流换算的固定分度：current = reg0 / 123（reg1 归一化到 3 后）
const CURRENT_SCALE: f64 = 123.0;

/// isgain → 增益查找表 {0:5, 1:10, 2:20, 3:40}
pub fn map_gain(isgain: u8) -> u32 {
    match isgain & 0x03 {
        0 => 5,
        1 => 10,
        2 => 20,
        _ => 40,
    }
}

/// 电流（A）→ 寄存器对（尾数, 2 位指数）
///
/// 尾数超过 255 时指数递减、尾数右移，迭代到装得下为止。
pub fn current_to_reg(current: f64) -> (u8, u8) {
    let mut reg0 = (current * CURRENT_SCALE) as u32;
    let mut reg1 = 3i32;
    while reg0 > 255 {
        reg1 -= 1;
        reg0 >>= 1;
    }
    (reg0 as u8, reg1 as u8)
}

/// 寄存器对 → 电流（A）
pub fn reg_to_current(reg0: u8, reg1: u8) -> f64 {
    let mut reg0 = u32::from(reg0);
    let mut reg1 = u32::from(reg1);
    while reg1 < 3 {
        reg0 <<= 1;
        reg1 += 1;
    }
    f64::from(reg0) / CURRENT_SCALE
}

/// 满量程电流（A）→ 扭矩寄存器值（上限 255）
pub fn fullscale_current_to_torque(fsc: f64, isgain: u8) -> u8 {
    let torque = (256.0 * f64::from(map_gain(isgain)) * 0.033 * fsc) / 2.75;
    (torque as u32).min(255) as u8
}

/// 扭矩寄存器值 → 满量程电流（A）
pub fn torque_to_fullscale_current(torque: u8, isgain: u8) -> f64 {
    (2.75 * f64::from(torque)) / (256.0 * f64::from(map_gain(isgain)) * 0.033)
}

/// 解码后的驱动器设置摘要
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverSettings {
    /// 微步设置（0-8，表示 2^n 细分）
    pub microstepping: u8,
    /// 电流增益选择（0-3）
    pub isgain: u8,
    /// 扭矩寄存器原始值
    pub torque: u8,
    /// 满量程电流（A）
    pub fullscale_current: f64,
    /// 空闲电流（A）
    pub idle_current: f64,
    /// 过热电流（A）
    pub overheat_current: f64,
}

/// 要修补的设置字段（`None` 表示保持原值）
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingsPatch {
    /// 微步细分（写入控制寄存器 bit 3..6）
    pub microstep: Option<u8>,
    /// 满量程电流（A）
    pub fullscale_current: Option<f64>,
    /// 空闲电流（A）
    pub idle_current: Option<f64>,
    /// 过热电流（A）
    pub overheat_current: Option<f64>,
    /// 步进模式字节
    pub step_mode: Option<u8>,
}

/// 不透明的驱动器设置块（0x81 响应原样缓存）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsBlock {
    bytes: [u8; FRAME_LEN],
}

impl SettingsBlock {
    /// 从 0x81 响应帧构建
    pub fn from_frame(frame: &Frame) -> Self {
        SettingsBlock {
            bytes: *frame.as_bytes(),
        }
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// 微步设置：(block[40] & 0x78) >> 3
    pub fn microstepping(&self) -> u8 {
        (self.bytes[40] & 0x78) >> 3
    }

    /// isgain：block[41] & 0x03
    pub fn isgain(&self) -> u8 {
        self.bytes[41] & 0x03
    }

    /// 扭矩寄存器原始值：block[42]
    pub fn torque(&self) -> u8 {
        self.bytes[42]
    }

    /// 空闲电流（A）
    pub fn idle_current(&self) -> f64 {
        reg_to_current(self.bytes[57], self.bytes[58])
    }

    /// 过热电流（A）
    pub fn overheat_current(&self) -> f64 {
        reg_to_current(self.bytes[59], self.bytes[60])
    }

    /// 解码为设置摘要
    pub fn decode(&self) -> DriverSettings {
        let isgain = self.isgain();
        let torque = self.torque();
        DriverSettings {
            microstepping: self.microstepping(),
            isgain,
            torque,
            fullscale_current: torque_to_fullscale_current(torque, isgain),
            idle_current: self.idle_current(),
            overheat_current: self.overheat_current(),
        }
    }

    /// 按补丁原地修补设置块
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(microstep) = patch.microstep {
            let ctrl = self.bytes[40] & 0x87;
            self.bytes[40] = ctrl | ((microstep & 0x0F) << 3);
        }
        if let Some(fsc) = patch.fullscale_current {
            self.bytes[42] = fullscale_current_to_torque(fsc, self.isgain());
        }
        if let Some(idle) = patch.idle_current {
            let (reg0, reg1) = current_to_reg(idle);
            self.bytes[57] = reg0;
            self.bytes[58] = reg1;
        }
        if let Some(overheat) = patch.overheat_current {
            let (reg0, reg1) = current_to_reg(overheat);
            self.bytes[59] = reg0;
            self.bytes[60] = reg1;
        }
        if let Some(step_mode) = patch.step_mode {
            self.bytes[37] = step_mode;
        }
    }

    /// 编码设置块写回帧（0x80）
    ///
    /// 写帧与设置块的偏移映射由固件给定：
    /// frame 20..36 ← block 40..56，frame 37 ← block 62，
    /// frame 38..44 ← block 56..62，frame 44 ← block 63。
    /// 此帧必须双写并等待约 1 s 后再读响应（见 `postep-usb`）。
    pub fn encode_write_frame(&self) -> Frame {
        let mut frame = Frame::command(Opcode::WriteDriverSettings);
        let out = frame.bytes_mut();
        out[20..36].copy_from_slice(&self.bytes[40..56]);
        out[37] = self.bytes[62];
        out[38..44].copy_from_slice(&self.bytes[56..62]);
        out[44] = self.bytes[63];
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_map_gain_table() {
        assert_eq!(map_gain(0), 5);
        assert_eq!(map_gain(1), 10);
        assert_eq!(map_gain(2), 20);
        assert_eq!(map_gain(3), 40);
    }

    #[test]
    fn test_current_to_reg_small_value() {
        // 1.0 A * 123 = 123 < 255，指数保持 3
        assert_eq!(current_to_reg(1.0), (123, 3));
    }

    #[test]
    fn test_current_to_reg_shifts_exponent() {
        // 4.0 A * 123 = 492 → 右移一次得 246，指数 2
        assert_eq!(current_to_reg(4.0), (246, 2));
    }

    #[test]
    fn test_reg_to_current_normalizes_exponent() {
        let current = reg_to_current(246, 2);
        assert!((current - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_torque_conversion_clamps() {
        assert_eq!(fullscale_current_to_torque(100.0, 3), 255);
    }

    #[test]
    fn test_settings_block_field_decode() {
        let mut frame = Frame::default();
        {
            let b = frame.bytes_mut();
            b[40] = 0b0010_0000; // microstepping = 4
            b[41] = 0x02; // isgain = 2
            b[42] = 100; // torque
            b[57] = 123;
            b[58] = 3; // idle 1.0 A
            b[59] = 246;
            b[60] = 2; // overheat 4.0 A
        }
        let block = SettingsBlock::from_frame(&frame);
        assert_eq!(block.microstepping(), 4);
        assert_eq!(block.isgain(), 2);
        assert_eq!(block.torque(), 100);
        assert!((block.idle_current() - 1.0).abs() < 1e-9);
        assert!((block.overheat_current() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_microstep_preserves_other_ctrl_bits() {
        let mut frame = Frame::default();
        frame.set_byte(40, 0x87); // 全部非微步位置 1
        let mut block = SettingsBlock::from_frame(&frame);
        block.apply(&SettingsPatch {
            microstep: Some(2),
            ..Default::default()
        });
        assert_eq!(block.as_bytes()[40], 0x87 | (2 << 3));
        assert_eq!(block.microstepping(), 2);
    }

    #[test]
    fn test_write_frame_offset_mapping() {
        let mut frame = Frame::default();
        {
            let b = frame.bytes_mut();
            for (i, byte) in b.iter_mut().enumerate().skip(40).take(24) {
                *byte = i as u8;
            }
        }
        let block = SettingsBlock::from_frame(&frame);
        let write = block.encode_write_frame();
        assert_eq!(write.opcode_byte(), 0x80);
        assert_eq!(&write.as_bytes()[20..36], &block.as_bytes()[40..56]);
        assert_eq!(write.byte(37), block.as_bytes()[62]);
        assert_eq!(&write.as_bytes()[38..44], &block.as_bytes()[56..62]);
        assert_eq!(write.byte(44), block.as_bytes()[63]);
    }

    proptest! {
        /// 电流 ↔ 寄存器对在量化误差内互逆
        #[test]
        fn prop_current_reg_roundtrip(current in 0.01f64..8.0) {
            let (reg0, reg1) = current_to_reg(current);
            let back = reg_to_current(reg0, reg1);
            // 量化步长随指数增大，最大 2^3 / 123
            let tolerance = f64::from(1u32 << (3 - u32::from(reg1))) / 123.0 + 1e-9;
            prop_assert!((back - current).abs() <= tolerance);
        }

        /// 扭矩 ↔ 满量程电流在整数量化内互逆
        #[test]
        fn prop_torque_roundtrip(torque in 0u8..=255, isgain in 0u8..4) {
            let fsc = torque_to_fullscale_current(torque, isgain);
            let back = fullscale_current_to_torque(fsc, isgain);
            prop_assert!(i16::from(back).abs_diff(i16::from(torque)) <= 1);
        }
    }
}
