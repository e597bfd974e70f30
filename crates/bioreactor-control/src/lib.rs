//! # Bioreactor Control
//!
//! 生物反应器夹具的三轴运动控制：倾斜（位置轴）、
//! 旋转与蠕动泵（速度轴），共用一台 PoStep256 控制器。
//!
//! ## 模块
//!
//! - [`types`]: 数据模型（状态、分段、场景、样本、标定）
//! - [`calibration`]: 流量 ↔ RPM 换算与标定斜率拟合
//! - [`cancel`]: 协作式 stop/pause/resume 标志
//! - [`ramp`]: 台阶式加减速原语
//! - [`measurement`]: 样本缓冲与批量落盘管线
//! - [`axis`]: 速度轴共享控制器骨架
//! - [`rotary`] / [`peristaltic`] / [`tilt`]: 轴专属控制器
//! - [`storage`] / [`events`]: 持久化与事件协作接口
//!
//! ## 设备仲裁
//!
//! 三个轴共享 `postep-usb` 的 [`DeviceManager`](postep_usb::DeviceManager)；
//! 每条线上往返都在设备锁内完成，轴之间不会交叉收发帧。

pub mod axis;
pub mod calibration;
pub mod cancel;
pub mod error;
pub mod events;
pub mod join;
pub mod measurement;
pub mod peristaltic;
pub mod ramp;
pub mod rotary;
pub mod storage;
pub mod tilt;
pub mod types;

pub use axis::{SpeedAxisController, SpeedProfile};
pub use calibration::{compute_slope, flow_from_rpm, rpm_from_flow, FLOW_RATIO_CONSTANT};
pub use error::ControlError;
pub use events::{EventSink, NullEventSink};
pub use measurement::MeasurementQueue;
pub use peristaltic::PeristalticController;
pub use rotary::RotaryController;
pub use storage::{MemoryStorage, PersistenceError, Storage};
pub use tilt::{TiltConfig, TiltController};
pub use types::*;
