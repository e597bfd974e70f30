//! 64 字节定长帧抽象
//!
//! PoStep256 的所有命令与响应都是 64 字节的 USB bulk 帧：
//! byte 1 携带操作码，负载字段按操作码占用固定字节区间。

use crate::error::ProtocolError;
use crate::opcode::{Opcode, ResponseCheck};

/// 帧长度（命令与响应相同）
pub const FRAME_LEN: usize = 64;

/// 响应帧首字节的 ACK 常量
pub const ACK_BYTE: u8 = 0x02;

/// 响应帧中回显操作码的偏移
pub const ECHO_OFFSET: usize = 15;

/// 64 字节命令/响应帧
///
/// # 设计目的
///
/// `Frame` 是协议层和传输层之间的中间抽象：
/// - 固定 64 字节，无堆分配，`Copy` 零成本复制
/// - 编译期保证长度正确，避免裸字节切片越界
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Default for Frame {
    fn default() -> Self {
        Frame {
            bytes: [0u8; FRAME_LEN],
        }
    }
}

impl Frame {
    /// 创建一个除操作码外全零的命令帧
    pub fn command(opcode: Opcode) -> Self {
        let mut frame = Frame::default();
        frame.bytes[1] = opcode.into();
        frame
    }

    /// 从收到的字节构建响应帧
    ///
    /// 长度不足 64 字节时返回 `ShortFrame`。
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < FRAME_LEN {
            return Err(ProtocolError::ShortFrame {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }
        let mut bytes = [0u8; FRAME_LEN];
        bytes.copy_from_slice(&data[..FRAME_LEN]);
        Ok(Frame { bytes })
    }

    /// 帧的操作码字节（byte 1）
    pub fn opcode_byte(&self) -> u8 {
        self.bytes[1]
    }

    /// 原始字节
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// 可变原始字节
    pub fn bytes_mut(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.bytes
    }

    /// 读取单字节
    pub fn byte(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    /// 写入单字节
    pub fn set_byte(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    /// 在固定偏移写入 Little Endian u32
    pub fn put_u32_le(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// 在固定偏移写入 Little Endian i32
    pub fn put_i32_le(&mut self, offset: usize, value: i32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// 在固定偏移读取 Little Endian u32
    pub fn get_u32_le(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_le_bytes(buf)
    }

    /// 在固定偏移读取 Big Endian i32（实时流专用）
    pub fn get_i32_be(&self, offset: usize) -> i32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[offset..offset + 4]);
        i32::from_be_bytes(buf)
    }

    /// 校验响应帧是否与请求的操作码匹配
    ///
    /// 每个操作码要求 ACK（首字节 0x02）或回显（byte 15 == 操作码）之一，
    /// 见 [`Opcode::response_check`]。
    pub fn validate_response(&self, opcode: Opcode) -> Result<(), ProtocolError> {
        match opcode.response_check() {
            ResponseCheck::Ack => {
                if self.bytes[0] != ACK_BYTE {
                    return Err(ProtocolError::BadAck {
                        expected: ACK_BYTE,
                        actual: self.bytes[0],
                    });
                }
                Ok(())
            },
            ResponseCheck::Echo => {
                let expected: u8 = opcode.into();
                if self.bytes[ECHO_OFFSET] != expected {
                    return Err(ProtocolError::BadEcho {
                        opcode: expected,
                        actual: self.bytes[ECHO_OFFSET],
                    });
                }
                Ok(())
            },
            ResponseCheck::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_sets_opcode() {
        let frame = Frame::command(Opcode::SetRequestedSpeed);
        assert_eq!(frame.opcode_byte(), 0x90);
        // 其余字节为零
        assert!(frame.as_bytes().iter().enumerate().all(|(i, &b)| i == 1 || b == 0));
    }

    #[test]
    fn test_from_bytes_short_frame() {
        let err = Frame::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ShortFrame {
                expected: 64,
                actual: 10
            }
        );
    }

    #[test]
    fn test_le_roundtrip() {
        let mut frame = Frame::default();
        frame.put_u32_le(24, 0xDEAD_BEEF);
        assert_eq!(frame.get_u32_le(24), 0xDEAD_BEEF);
        frame.put_i32_le(20, -123_456);
        assert_eq!(frame.byte(20), (-123_456i32).to_le_bytes()[0]);
    }

    #[test]
    fn test_be_decode() {
        let mut frame = Frame::default();
        frame.bytes_mut()[20..24].copy_from_slice(&(-42i32).to_be_bytes());
        assert_eq!(frame.get_i32_be(20), -42);
    }

    #[test]
    fn test_validate_ack_response() {
        let mut resp = Frame::default();
        resp.set_byte(0, ACK_BYTE);
        assert!(resp.validate_response(Opcode::RunSleep).is_ok());

        resp.set_byte(0, 0x00);
        assert!(matches!(
            resp.validate_response(Opcode::RunSleep),
            Err(ProtocolError::BadAck { actual: 0x00, .. })
        ));
    }

    #[test]
    fn test_validate_echo_response() {
        let mut resp = Frame::default();
        resp.set_byte(ECHO_OFFSET, 0xB1);
        assert!(resp.validate_response(Opcode::MoveTrajectory).is_ok());
        assert!(resp.validate_response(Opcode::SetRequestedSpeed).is_err());
    }
}
