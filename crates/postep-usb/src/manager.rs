//! 设备仲裁
//!
//! 多个轴控制器共享同一台物理控制器，所有线上往返都必须在
//! 同一把互斥锁内完成，避免一个轴的命令与另一个轴的响应交叉。
//! [`DeviceManager`] 持有唯一的 [`PoStep256`] 句柄并以
//! `Arc<Mutex<_>>` 形式出借。

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use postep_protocol::MotionLimits;

use crate::device::PoStep256;
use crate::error::UsbError;
use crate::transport::{self, Transport, UsbTransport};

/// 共享设备句柄：一次只有一个持有者能做线上往返
pub type SharedDevice = Arc<Mutex<PoStep256>>;

/// 设备管理器
///
/// 负责发现、初始化与出借唯一的设备句柄，并缓存最近一次
/// 读到的位置计数，供状态查询在不占用总线的情况下使用。
pub struct DeviceManager {
    slot: Mutex<Option<SharedDevice>>,
    initialized: AtomicBool,
    position: AtomicI32,
}

impl DeviceManager {
    /// 创建未初始化的管理器
    pub fn new() -> Self {
        DeviceManager {
            slot: Mutex::new(None),
            initialized: AtomicBool::new(false),
            position: AtomicI32::new(0),
        }
    }

    /// 初始化第 `device_index` 个 PoStep256 设备
    ///
    /// 幂等：已初始化时直接返回 Ok，不重复打开设备。
    /// 并发调用由双检查锁保证只有一个真正执行初始化。
    pub fn initialize(&self, limits: MotionLimits, device_index: usize) -> Result<(), UsbError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Ok(());
        }

        let serials = transport::discover()?;
        info!(count = serials.len(), "discovered PoStep256 devices");
        if device_index >= serials.len() {
            return Err(UsbError::DeviceNotFound {
                index: device_index,
                found: serials.len(),
            });
        }
        let transport = UsbTransport::open(device_index)?;
        let device = self.bring_up(Box::new(transport), limits)?;
        *slot = Some(device);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// 用外部提供的传输初始化（mock 测试入口）
    pub fn initialize_with_transport(
        &self,
        transport: Box<dyn Transport>,
        limits: MotionLimits,
    ) -> Result<(), UsbError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Ok(());
        }
        let device = self.bring_up(transport, limits)?;
        *slot = Some(device);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// 上电序列：开实时流、读设置块、读一帧位置
    fn bring_up(
        &self,
        transport: Box<dyn Transport>,
        limits: MotionLimits,
    ) -> Result<SharedDevice, UsbError> {
        let mut device = PoStep256::new(transport);
        device.set_limits(limits);
        device.enable_rt_stream()?;
        device.read_driver_settings()?;
        // 流开启后首帧可能要等一会，读不到时位置缓存从 0 起步
        match device.read_stream() {
            Ok(status) => {
                self.position.store(status.position, Ordering::Release);
                info!(position = status.position, "device initialized");
            },
            Err(e) => {
                warn!("initial stream read failed, position cache starts at 0: {}", e);
                self.position.store(0, Ordering::Release);
                info!("device initialized");
            },
        }
        Ok(Arc::new(Mutex::new(device)))
    }

    /// 是否已初始化
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// 出借共享设备句柄
    pub fn handle(&self) -> Result<SharedDevice, UsbError> {
        self.slot.lock().clone().ok_or(UsbError::NotInitialized)
    }

    /// 最近一次观测到的位置计数
    pub fn position(&self) -> i32 {
        self.position.load(Ordering::Acquire)
    }

    /// 更新位置缓存（由读到实时流的一方回填）
    pub fn update_position(&self, position: i32) {
        self.position.store(position, Ordering::Release);
    }

    /// 关停：尽力把设备切到休眠
    pub fn shutdown(&self) {
        if let Some(device) = self.slot.lock().as_ref() {
            if let Err(e) = device.lock().run_sleep(false) {
                warn!("sleep on shutdown failed: {}", e);
            }
        }
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn test_bring_up_survives_quiet_stream() {
        let (transport, handle) = MockTransport::new();
        handle.with_state(|s| {
            s.position = 777;
            // 读重试预算耗尽也出不来一帧流
            s.inject_stream_timeouts = 16;
        });
        let manager = DeviceManager::new();
        manager
            .initialize_with_transport(Box::new(transport), MotionLimits::default())
            .unwrap();
        assert!(manager.is_initialized());
        assert_eq!(manager.position(), 0);
    }

    #[test]
    fn test_bring_up_caches_stream_position() {
        let (transport, handle) = MockTransport::new();
        handle.with_state(|s| s.position = 777);
        let manager = DeviceManager::new();
        manager
            .initialize_with_transport(Box::new(transport), MotionLimits::default())
            .unwrap();
        assert_eq!(manager.position(), 777);
    }
}
