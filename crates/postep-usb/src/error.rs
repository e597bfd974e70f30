//! USB 传输层与设备层错误类型

use thiserror::Error;

use postep_protocol::ProtocolError;

/// USB 传输层与设备层错误类型
#[derive(Error, Debug)]
pub enum UsbError {
    /// 底层 libusb 错误
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// 扫描不到目标设备，或索引超出已发现设备数
    #[error("Device not found: index {index} (discovered {found} device(s))")]
    DeviceNotFound { index: usize, found: usize },

    /// 设备尚未初始化
    #[error("Device not initialized, call initialize() first")]
    NotInitialized,

    /// 多次重试后仍读不到有效响应
    #[error("Read timed out after {retries} attempt(s)")]
    ReadTimeout { retries: usize },

    /// 响应帧校验失败
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::UsbError;
    use postep_protocol::ProtocolError;

    #[test]
    fn test_error_display() {
        let err = UsbError::DeviceNotFound { index: 2, found: 1 };
        assert!(err.to_string().contains("index 2"));

        let err = UsbError::from(ProtocolError::BadAck {
            expected: 0x02,
            actual: 0x00,
        });
        assert!(err.to_string().contains("0x00"));
    }
}
