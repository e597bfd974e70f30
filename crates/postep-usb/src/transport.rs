//! USB 传输层：帧级读写抽象与 libusb 实现
//!
//! [`Transport`] 只负责 64 字节帧的收发，重试与响应校验在设备层完成。
//! Mock 实现见 `mock` 模块（`mock` feature）。

use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};
use tracing::{debug, info, warn};

use postep_protocol::{Frame, FRAME_LEN};

use crate::error::UsbError;

/// PoStep256 的 USB Vendor ID
pub const VENDOR_ID: u16 = 0x1DC3;

/// PoStep256 的 USB Product ID
pub const PRODUCT_ID: u16 = 0x0641;

/// Bulk OUT 端点
pub const OUT_ENDPOINT: u8 = 0x01;

/// Bulk IN 端点
pub const IN_ENDPOINT: u8 = 0x81;

/// 单次 bulk 传输超时
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// 实时流读取超时（无须等待完整响应周期）
pub const STREAM_TIMEOUT: Duration = Duration::from_millis(200);

/// 帧级传输抽象
///
/// 实现者只需要保证单帧的原子写入与读取；
/// 双写、重试、响应校验等协议语义由 [`crate::device::PoStep256`] 负责。
pub trait Transport: Send {
    /// 写出一帧
    fn write_frame(&mut self, frame: &Frame) -> Result<(), UsbError>;

    /// 读入一帧（阻塞至多 `timeout`）
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, UsbError>;
}

/// 枚举总线上所有 PoStep256 设备的序列号
///
/// 返回值顺序即 `device_index` 的寻址顺序。
/// 读不到序列号描述符的设备以空字符串占位，保持索引稳定。
pub fn discover() -> Result<Vec<String>, UsbError> {
    let mut serials = Vec::new();
    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(_) => continue,
        };
        if desc.vendor_id() != VENDOR_ID || desc.product_id() != PRODUCT_ID {
            continue;
        }
        let serial = device
            .open()
            .and_then(|handle| handle.read_serial_number_string_ascii(&desc))
            .unwrap_or_default();
        debug!(
            bus = device.bus_number(),
            address = device.address(),
            serial = %serial,
            "found PoStep256 device"
        );
        serials.push(serial);
    }
    Ok(serials)
}

/// 基于 libusb 的传输实现
pub struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    kernel_driver_detached: bool,
}

impl UsbTransport {
    /// 打开第 `index` 个 PoStep256 设备
    ///
    /// 会按需卸载内核驱动并 claim interface 0，
    /// 打开后执行一次端口复位以清除上次会话的残留状态。
    pub fn open(index: usize) -> Result<Self, UsbError> {
        let mut candidates = Vec::new();
        for device in rusb::devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if desc.vendor_id() == VENDOR_ID && desc.product_id() == PRODUCT_ID {
                candidates.push(device);
            }
        }
        let found = candidates.len();
        let device = candidates
            .into_iter()
            .nth(index)
            .ok_or(UsbError::DeviceNotFound { index, found })?;

        let mut handle = device.open()?;
        let mut kernel_driver_detached = false;
        if handle.kernel_driver_active(0).unwrap_or(false) {
            handle.detach_kernel_driver(0)?;
            kernel_driver_detached = true;
        }
        // 配置必须在 claim 之前选定；已配置的设备上失败可忽略
        if let Err(e) = handle.set_active_configuration(1) {
            debug!("set active configuration failed: {}", e);
        }
        handle.claim_interface(0)?;
        if let Err(e) = handle.reset() {
            warn!("device reset failed, continuing anyway: {}", e);
        }
        info!(
            bus = device.bus_number(),
            address = device.address(),
            "opened PoStep256 device"
        );
        Ok(UsbTransport {
            handle,
            kernel_driver_detached,
        })
    }
}

impl Transport for UsbTransport {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), UsbError> {
        self.handle
            .write_bulk(OUT_ENDPOINT, frame.as_bytes(), RESPONSE_TIMEOUT)?;
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, UsbError> {
        let mut buf = [0u8; FRAME_LEN];
        let n = self.handle.read_bulk(IN_ENDPOINT, &mut buf, timeout)?;
        Ok(Frame::from_bytes(&buf[..n])?)
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(0) {
            debug!("release interface failed: {}", e);
        }
        if self.kernel_driver_detached {
            if let Err(e) = self.handle.attach_kernel_driver(0) {
                debug!("reattach kernel driver failed: {}", e);
            }
        }
    }
}
