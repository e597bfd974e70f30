//! # PoStep USB
//!
//! PoStep256 控制器的 USB 传输、设备句柄与仲裁层
//!
//! ## 分层
//!
//! - [`transport`]: 帧级读写抽象与 libusb 实现
//! - [`device`]: 设备句柄，一个方法一条线上操作（双写、重试、校验在此完成）
//! - [`manager`]: 设备仲裁，唯一句柄以 `Arc<Mutex<_>>` 出借
//! - [`mock`]: 脚本化 Mock 传输（`mock` feature）
//!
//! ## 并发模型
//!
//! 物理设备同一时刻只能处理一条命令的完整往返，
//! 所有「写命令 + 读响应」序列都必须持有同一把设备锁，
//! 否则一个轴的响应可能被另一个轴当作自己的应答消费。

pub mod device;
pub mod error;
pub mod manager;
#[cfg(feature = "mock")]
pub mod mock;
pub mod transport;

pub use device::PoStep256;
pub use error::UsbError;
pub use manager::{DeviceManager, SharedDevice};
pub use transport::{Transport, UsbTransport};
