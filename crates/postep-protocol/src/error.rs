//! 协议层错误类型

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 响应帧长度不足 64 字节
    #[error("Short frame: {actual} bytes (expected {expected})")]
    ShortFrame { expected: usize, actual: usize },

    /// 响应首字节与 ACK 常量不匹配
    #[error("Bad ack byte: 0x{actual:02X} (expected 0x{expected:02X})")]
    BadAck { expected: u8, actual: u8 },

    /// 响应回显字节（偏移 15）与操作码不匹配
    #[error("Bad echo byte for opcode 0x{opcode:02X}: got 0x{actual:02X}")]
    BadEcho { opcode: u8, actual: u8 },
}

#[cfg(test)]
mod tests {
    use super::ProtocolError;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::BadEcho {
            opcode: 0x90,
            actual: 0x00,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x90") && msg.contains("0x00"));

        let err = ProtocolError::ShortFrame {
            expected: 64,
            actual: 12,
        };
        assert!(err.to_string().contains("12"));
    }
}
