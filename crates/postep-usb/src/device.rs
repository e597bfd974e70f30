//! PoStep256 设备句柄
//!
//! 把协议帧的编解码与传输层的读写缝合成一个方法一条线上操作。
//! 句柄自身不做并发保护，跨线程共享由 [`crate::manager::DeviceManager`]
//! 以 `Arc<Mutex<_>>` 统一仲裁。

use std::time::Duration;

use tracing::{debug, trace, warn};

use postep_protocol::{
    command, decode_configuration, decode_device_info, decode_stream, DeviceInfo, Direction,
    DriveConfig, DriverSettings, Frame, MotionLimits, Opcode, ProtocolError, PwmDuty,
    SettingsBlock, SettingsPatch, StreamStatus,
};

use crate::error::UsbError;
use crate::transport::{Transport, RESPONSE_TIMEOUT, STREAM_TIMEOUT};

/// 响应读取重试次数（对超时与空读）
pub const READ_RETRIES: usize = 3;

/// 命令级重试次数（对回显校验失败，轨迹与设置读取适用）
pub const COMMAND_RETRIES: usize = 3;

/// 设置块写回后的固件落盘等待
pub const SETTINGS_SETTLE: Duration = Duration::from_secs(1);

/// PoStep256 设备句柄
///
/// 每个线上操作对应一个 `&mut self` 方法；
/// 方法内部完成命令编码、（必要时的）双写、响应读取与校验。
pub struct PoStep256 {
    transport: Box<dyn Transport>,
    limits: MotionLimits,
    settings: Option<SettingsBlock>,
    settle: Duration,
}

impl PoStep256 {
    /// 在给定传输上创建句柄
    pub fn new(transport: Box<dyn Transport>) -> Self {
        PoStep256 {
            transport,
            limits: MotionLimits::default(),
            settings: None,
            settle: SETTINGS_SETTLE,
        }
    }

    /// 覆盖设置写回后的等待时长（测试用）
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.set_settle(settle);
        self
    }

    /// 覆盖设置写回后的等待时长（测试用）
    pub fn set_settle(&mut self, settle: Duration) {
        self.settle = settle;
    }

    /// 当前缓存的轨迹运动限制
    pub fn limits(&self) -> MotionLimits {
        self.limits
    }

    /// 更新轨迹运动限制（只改缓存，下次 `move_to` 生效）
    pub fn set_limits(&mut self, limits: MotionLimits) {
        self.limits = limits;
    }

    /// 读取一帧响应，超时与空读重试 [`READ_RETRIES`] 次
    fn read_response(&mut self, timeout: Duration) -> Result<Frame, UsbError> {
        for attempt in 1..=READ_RETRIES {
            match self.transport.read_frame(timeout) {
                Ok(frame) => return Ok(frame),
                Err(UsbError::Usb(rusb::Error::Timeout))
                | Err(UsbError::Protocol(ProtocolError::ShortFrame { .. })) => {
                    trace!(attempt, "read retry");
                },
                Err(e) => return Err(e),
            }
        }
        Err(UsbError::ReadTimeout {
            retries: READ_RETRIES,
        })
    }

    /// 写一帧并读取校验后的响应
    fn transact(&mut self, frame: Frame, opcode: Opcode) -> Result<Frame, UsbError> {
        self.transport.write_frame(&frame)?;
        if !opcode.expects_response() {
            return Ok(Frame::default());
        }
        let resp = self.read_response(RESPONSE_TIMEOUT)?;
        resp.validate_response(opcode)?;
        Ok(resp)
    }

    /// 设置请求速度（0x90）
    ///
    /// 固件偶发丢失第一帧，此命令固定双写后只读一次响应。
    pub fn set_requested_speed(
        &mut self,
        speed: u32,
        direction: Direction,
    ) -> Result<(), UsbError> {
        let frame = command::encode_set_requested_speed(speed, direction);
        self.transport.write_frame(&frame)?;
        self.transport.write_frame(&frame)?;
        let resp = self.read_response(RESPONSE_TIMEOUT)?;
        resp.validate_response(Opcode::SetRequestedSpeed)?;
        trace!(speed, ?direction, "requested speed set");
        Ok(())
    }

    /// 轨迹移动到绝对位置（0xB1），使用缓存的运动限制
    pub fn move_to(&mut self, position: i32) -> Result<(), UsbError> {
        let limits = self.limits;
        self.move_trajectory(position, &limits)
    }

    /// 轨迹移动到绝对位置（0xB1），显式传入运动限制
    ///
    /// 回显校验失败时整条命令重试 [`COMMAND_RETRIES`] 次。
    pub fn move_trajectory(
        &mut self,
        position: i32,
        limits: &MotionLimits,
    ) -> Result<(), UsbError> {
        let frame = command::encode_move_trajectory(position, limits);
        let mut last_err = None;
        for attempt in 1..=COMMAND_RETRIES {
            match self.transact(frame, Opcode::MoveTrajectory) {
                Ok(_) => {
                    debug!(position, "trajectory move issued");
                    return Ok(());
                },
                Err(e @ UsbError::Protocol(_)) | Err(e @ UsbError::ReadTimeout { .. }) => {
                    warn!(attempt, "trajectory move rejected: {}", e);
                    last_err = Some(e);
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(UsbError::ReadTimeout {
            retries: COMMAND_RETRIES,
        }))
    }

    /// 停止当前轨迹（0xB2）
    pub fn stop_trajectory(&mut self) -> Result<(), UsbError> {
        self.transact(command::encode_stop_trajectory(), Opcode::StopTrajectory)?;
        Ok(())
    }

    /// 位置计数器清零（0xB3）
    pub fn reset_position_zero(&mut self) -> Result<(), UsbError> {
        self.transact(
            command::encode_reset_position_zero(),
            Opcode::ResetPositionZero,
        )?;
        Ok(())
    }

    /// 运行/休眠切换（0xA1）
    pub fn run_sleep(&mut self, run: bool) -> Result<(), UsbError> {
        self.transact(command::encode_run_sleep(run), Opcode::RunSleep)?;
        debug!(run, "run/sleep toggled");
        Ok(())
    }

    /// 开启实时状态流（0xA0）
    pub fn enable_rt_stream(&mut self) -> Result<(), UsbError> {
        self.transact(command::encode_enable_rt_stream(), Opcode::EnableRtStream)?;
        Ok(())
    }

    /// 读取一帧实时状态流（纯读，不发命令）
    pub fn read_stream(&mut self) -> Result<StreamStatus, UsbError> {
        let frame = self.read_response(STREAM_TIMEOUT)?;
        Ok(decode_stream(&frame))
    }

    /// 读取设备信息（0x01）
    pub fn device_info(&mut self) -> Result<DeviceInfo, UsbError> {
        let resp = self.transact(command::encode_device_info(), Opcode::DeviceInfo)?;
        Ok(decode_device_info(&resp))
    }

    /// 读取速度/加速度配置（0x88）
    pub fn read_configuration(&mut self) -> Result<DriveConfig, UsbError> {
        let resp = self.transact(
            command::encode_read_configuration(),
            Opcode::ReadConfiguration,
        )?;
        Ok(decode_configuration(&resp))
    }

    /// 修改速度/加速度配置（0x87）
    pub fn change_configuration(
        &mut self,
        velocity: u32,
        acceleration: u32,
        deceleration: u32,
        settings: u8,
    ) -> Result<(), UsbError> {
        let frame =
            command::encode_change_configuration(velocity, acceleration, deceleration, settings);
        self.transact(frame, Opcode::ChangeConfiguration)?;
        Ok(())
    }

    /// 设置 PWM 占空比（0xB0）
    pub fn set_pwm(&mut self, duty: PwmDuty) -> Result<(), UsbError> {
        self.transact(command::encode_set_pwm(duty), Opcode::SetPwm)?;
        Ok(())
    }

    /// 系统复位（0x02），设备将从 USB 掉线，无响应
    pub fn system_reset(&mut self) -> Result<(), UsbError> {
        self.transact(command::encode_system_reset(), Opcode::SystemReset)?;
        Ok(())
    }

    /// 读取驱动器设置块（0x81）并缓存
    ///
    /// 回显校验失败时整条命令重试 [`COMMAND_RETRIES`] 次。
    pub fn read_driver_settings(&mut self) -> Result<SettingsBlock, UsbError> {
        let frame = command::encode_read_driver_settings();
        let mut last_err = None;
        for attempt in 1..=COMMAND_RETRIES {
            match self.transact(frame, Opcode::ReadDriverSettings) {
                Ok(resp) => {
                    let block = SettingsBlock::from_frame(&resp);
                    self.settings = Some(block);
                    return Ok(block);
                },
                Err(e @ UsbError::Protocol(_)) | Err(e @ UsbError::ReadTimeout { .. }) => {
                    warn!(attempt, "settings read rejected: {}", e);
                    last_err = Some(e);
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(UsbError::ReadTimeout {
            retries: COMMAND_RETRIES,
        }))
    }

    /// 读取并解码驱动器设置摘要
    pub fn get_driver_settings(&mut self) -> Result<DriverSettings, UsbError> {
        Ok(self.read_driver_settings()?.decode())
    }

    /// 整块写回驱动器设置（0x80）
    ///
    /// 固件要求双写，且落盘需约 1 s，等待后才读响应。
    pub fn write_driver_settings(&mut self, block: &SettingsBlock) -> Result<(), UsbError> {
        let frame = block.encode_write_frame();
        self.transport.write_frame(&frame)?;
        self.transport.write_frame(&frame)?;
        std::thread::sleep(self.settle);
        let resp = self.read_response(RESPONSE_TIMEOUT)?;
        resp.validate_response(Opcode::WriteDriverSettings)?;
        self.settings = Some(*block);
        debug!("driver settings written");
        Ok(())
    }

    /// 读改写：按补丁修补设置块并写回
    ///
    /// 有缓存块时直接在缓存上打补丁，避免多余的读往返。
    pub fn patch_driver_settings(&mut self, patch: &SettingsPatch) -> Result<(), UsbError> {
        let mut block = match self.settings {
            Some(block) => block,
            None => self.read_driver_settings()?,
        };
        block.apply(patch);
        self.write_driver_settings(&block)
    }
}
