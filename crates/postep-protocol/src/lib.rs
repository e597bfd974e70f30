//! # PoStep Protocol
//!
//! PoStep256 步进电机控制器的 USB 帧协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `opcode`: 操作码常量与响应校验表
//! - `frame`: 64 字节定长帧抽象
//! - `command`: 命令帧构建
//! - `stream`: 实时状态流与反馈帧解析
//! - `settings`: 驱动器设置块的读改写与定点换算
//!
//! ## 字节序
//!
//! 出站运动命令（速度、轨迹）使用 Little Endian；
//! 实时状态流的 position/speed/final 三元组使用 **Big Endian**。
//! 这一不对称来自控制器固件，必须原样保留以保证线上兼容。

pub mod command;
pub mod error;
pub mod frame;
pub mod opcode;
pub mod settings;
pub mod stream;

// 重新导出常用类型
pub use command::*;
pub use error::ProtocolError;
pub use frame::*;
pub use opcode::*;
pub use settings::*;
pub use stream::*;

/// 旋转方向
///
/// 线格式：速度帧 byte 24 = 1 表示 CCW，0 表示 CW。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// 顺时针
    #[default]
    Cw,
    /// 逆时针
    Ccw,
}

impl Direction {
    /// 反向
    pub fn reversed(self) -> Self {
        match self {
            Direction::Cw => Direction::Ccw,
            Direction::Ccw => Direction::Cw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Direction;

    #[test]
    fn test_direction_reversed() {
        assert_eq!(Direction::Cw.reversed(), Direction::Ccw);
        assert_eq!(Direction::Ccw.reversed(), Direction::Cw);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_direction_serde_lowercase() {
        let json = serde_json::to_string(&Direction::Ccw).unwrap();
        assert_eq!(json, "\"ccw\"");
    }
}
