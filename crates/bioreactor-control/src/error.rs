//! 控制层错误类型

use thiserror::Error;

use postep_usb::UsbError;

use crate::storage::PersistenceError;

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControlError {
    /// 设备通信失败（轴将转入 Error 状态）
    #[error(transparent)]
    Usb(#[from] UsbError),

    /// 倾斜目标超出配置的行程范围（设备 I/O 前拒绝）
    #[error("Target position {target} out of range [{min}, {max}]")]
    OutOfRange { target: i32, min: i32, max: i32 },

    /// 超时未到达目标位置（轨迹已停止）
    #[error("Failed to reach target position {target} within timeout")]
    Timeout { target: i32 },

    /// 找不到指定的标定或软管配置
    #[error("Unknown calibration reference: {0}")]
    UnknownCalibration(String),

    /// 持久化失败（可恢复，批次会重新排队）
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::ControlError;

    #[test]
    fn test_out_of_range_display() {
        let err = ControlError::OutOfRange {
            target: 99,
            min: -45,
            max: 45,
        };
        let msg = err.to_string();
        assert!(msg.contains("99") && msg.contains("-45"));
    }
}
