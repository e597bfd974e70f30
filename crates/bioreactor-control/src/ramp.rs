//! 加减速原语
//!
//! 设备速度按固定台阶（5 个速度单位）逐级逼近目标，
//! 每级之间等一个轴专属的台阶延时。换向绝不隐式过零：
//! 先在旧方向降到零，再在新方向升速。
//! 每级发送前回调一次 `on_step`，调用方用它生成瞬时样本。

use std::time::Duration;

use postep_protocol::Direction;
use postep_usb::SharedDevice;

use crate::cancel::CancelFlags;
use crate::error::ControlError;

/// 速度台阶
pub const RAMP_STEP: u32 = 5;

/// 加减速结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampOutcome {
    /// 到达目标速度
    Completed,
    /// 中途观测到 stop/pause，已降到零
    Aborted,
}

/// 从 `current` 逐级降到零
///
/// 降速不检查取消标志（它本身就是取消的执行路径）。
pub fn ramp_down(
    device: &SharedDevice,
    current: u32,
    direction: Direction,
    step_delay: Duration,
    on_step: &mut dyn FnMut(u32),
) -> Result<(), ControlError> {
    let mut speed = current;
    while speed > 0 {
        speed = speed.saturating_sub(RAMP_STEP);
        on_step(speed);
        device.lock().set_requested_speed(speed, direction)?;
        std::thread::sleep(step_delay);
    }
    device.lock().set_requested_speed(0, direction)?;
    Ok(())
}

/// 从 `current` 逐级逼近 `target`
///
/// 方向与 `prev_direction` 不同且当前速度非零时，
/// 先在旧方向降到零再升速。每个台阶检查 stop/pause，
/// 观测到即降回零并返回 [`RampOutcome::Aborted`]。
/// 返回值包含结束时的实际速度。
#[allow(clippy::too_many_arguments)]
pub fn ramp_to(
    device: &SharedDevice,
    flags: &CancelFlags,
    current: u32,
    target: u32,
    direction: Direction,
    prev_direction: Direction,
    step_delay: Duration,
    on_step: &mut dyn FnMut(u32),
) -> Result<(u32, RampOutcome), ControlError> {
    let mut speed = current;
    if direction != prev_direction && speed > 0 {
        ramp_down(device, speed, prev_direction, step_delay, on_step)?;
        speed = 0;
    }

    while speed != target {
        if flags.stop_requested() || flags.pause_requested() {
            ramp_down(device, speed, direction, step_delay, on_step)?;
            return Ok((0, RampOutcome::Aborted));
        }
        if target > speed {
            speed = (speed + RAMP_STEP).min(target);
        } else {
            speed = speed.saturating_sub(RAMP_STEP).max(target);
        }
        on_step(speed);
        device.lock().set_requested_speed(speed, direction)?;
        std::thread::sleep(step_delay);
    }
    Ok((speed, RampOutcome::Completed))
}
