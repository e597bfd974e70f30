//! Mock 传输（`mock` feature）
//!
//! 按操作码脚本化响应的内存传输，记录所有写出的帧，
//! 并模拟轨迹运动与实时状态流，供上层控制逻辑在无硬件时测试。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use postep_protocol::{Frame, Opcode, ACK_BYTE, ECHO_OFFSET};

use crate::error::UsbError;
use crate::transport::Transport;

/// Mock 设备状态
#[derive(Debug)]
pub struct MockState {
    /// 按写出顺序记录的所有帧
    pub written: Vec<Frame>,
    /// 待读取的响应队列
    pending: VecDeque<Frame>,
    /// 当前位置计数
    pub position: i32,
    /// 当前轨迹目标
    pub target: i32,
    /// 限位开关状态
    pub end_switch: bool,
    /// 再读多少帧实时流后限位开关释放（模拟归位离开开关）
    pub end_switch_release_after: Option<u32>,
    /// 每次轨迹命令后，位置经过多少帧实时流到达目标
    pub move_ticks: u32,
    move_ticks_remaining: u32,
    /// 运行/休眠状态
    pub running: bool,
    /// 实时流是否已开启
    pub streaming: bool,
    /// 接下来 N 次读直接返回超时（模拟丢帧）
    pub inject_read_timeouts: u32,
    /// 接下来 N 次流读（无待读响应时）返回超时（模拟安静的流）
    pub inject_stream_timeouts: u32,
    /// 接下来 N 次回显响应携带错误的回显字节
    pub inject_bad_echo: u32,
    /// 0x81 响应携带的设置块字节
    pub settings: [u8; 64],
    /// 0x88 响应携带的配置（velocity, accel, decel, settings）
    pub configuration: (u32, u32, u32, u8),
}

impl MockState {
    fn new() -> Self {
        // 默认设置块：microstep=4、isgain=2、torque=100、空闲/过热电流 ≈ 1 A / 4 A
        let mut settings = [0u8; 64];
        settings[40] = 0b0010_0000;
        settings[41] = 0x02;
        settings[42] = 100;
        settings[57] = 123;
        settings[58] = 3;
        settings[59] = 246;
        settings[60] = 2;
        MockState {
            written: Vec::new(),
            pending: VecDeque::new(),
            position: 0,
            target: 0,
            end_switch: false,
            end_switch_release_after: None,
            move_ticks: 1,
            move_ticks_remaining: 0,
            running: false,
            streaming: false,
            inject_read_timeouts: 0,
            inject_stream_timeouts: 0,
            inject_bad_echo: 0,
            settings,
            configuration: (50_000, 40_000, 3_000, 0),
        }
    }

    fn push_response(&mut self, frame: Frame) {
        // 双写命令会触发两次响应生成，只保留最新一份，
        // 与真机「双写一读」的消费节奏一致
        self.pending.clear();
        self.pending.push_back(frame);
    }

    fn echo_response(&mut self, opcode: Opcode) -> Frame {
        let mut frame = Frame::default();
        if self.inject_bad_echo > 0 {
            self.inject_bad_echo -= 1;
            frame.set_byte(ECHO_OFFSET, 0xEE);
        } else {
            frame.set_byte(ECHO_OFFSET, opcode.into());
        }
        frame
    }

    fn ack_response(&self) -> Frame {
        let mut frame = Frame::default();
        frame.set_byte(0, ACK_BYTE);
        frame
    }

    fn handle_command(&mut self, frame: &Frame) {
        let Ok(opcode) = Opcode::try_from(frame.opcode_byte()) else {
            return;
        };
        match opcode {
            Opcode::EnableRtStream => {
                self.streaming = true;
                let resp = self.ack_response();
                self.push_response(resp);
            },
            Opcode::RunSleep => {
                self.running = frame.byte(20) == 0x01;
                let resp = self.ack_response();
                self.push_response(resp);
            },
            Opcode::StopTrajectory => {
                self.target = self.position;
                self.move_ticks_remaining = 0;
                let resp = self.ack_response();
                self.push_response(resp);
            },
            Opcode::ResetPositionZero => {
                self.position = 0;
                self.target = 0;
                let resp = self.ack_response();
                self.push_response(resp);
            },
            Opcode::MoveTrajectory => {
                self.target = i32::from_le_bytes([
                    frame.byte(20),
                    frame.byte(21),
                    frame.byte(22),
                    frame.byte(23),
                ]);
                self.move_ticks_remaining = self.move_ticks;
                let resp = self.echo_response(opcode);
                self.push_response(resp);
            },
            Opcode::ReadDriverSettings => {
                let echo = self.echo_response(opcode).byte(ECHO_OFFSET);
                let mut bytes = self.settings;
                bytes[ECHO_OFFSET] = echo;
                let mut resp = Frame::default();
                resp.bytes_mut().copy_from_slice(&bytes);
                self.push_response(resp);
            },
            Opcode::WriteDriverSettings => {
                // 写帧偏移映射的逆变换，让后续 0x81 读到写入的值
                self.settings[40..56].copy_from_slice(&frame.as_bytes()[20..36]);
                self.settings[62] = frame.byte(37);
                self.settings[56..62].copy_from_slice(&frame.as_bytes()[38..44]);
                self.settings[63] = frame.byte(44);
                let resp = self.echo_response(opcode);
                self.push_response(resp);
            },
            Opcode::ChangeConfiguration => {
                self.configuration = (
                    frame.get_u32_le(24),
                    frame.get_u32_le(28),
                    frame.get_u32_le(32),
                    frame.byte(36),
                );
                let resp = self.echo_response(opcode);
                self.push_response(resp);
            },
            Opcode::ReadConfiguration => {
                let mut resp = self.echo_response(opcode);
                let (velocity, accel, decel, settings) = self.configuration;
                resp.put_u32_le(24, velocity);
                resp.put_u32_le(28, accel);
                resp.put_u32_le(32, decel);
                resp.set_byte(36, settings);
                self.push_response(resp);
            },
            Opcode::DeviceInfo => {
                let mut resp = self.echo_response(opcode);
                resp.set_byte(8, 1);
                resp.set_byte(9, 44); // 约 21.6 V
                resp.set_byte(45, 200); // 25 °C
                resp.set_byte(46, 0x03);
                self.push_response(resp);
            },
            Opcode::SetRequestedSpeed | Opcode::SetPwm => {
                let resp = self.echo_response(opcode);
                self.push_response(resp);
            },
            Opcode::SystemReset => {},
        }
    }

    fn stream_frame(&mut self) -> Frame {
        if self.move_ticks_remaining > 0 {
            self.move_ticks_remaining -= 1;
            if self.move_ticks_remaining == 0 {
                self.position = self.target;
            }
        }
        if let Some(remaining) = self.end_switch_release_after {
            if remaining == 0 {
                self.end_switch = false;
                self.end_switch_release_after = None;
            } else {
                self.end_switch_release_after = Some(remaining - 1);
            }
        }
        let mut frame = Frame::default();
        frame.bytes_mut()[20..24].copy_from_slice(&self.position.to_be_bytes());
        frame.bytes_mut()[28..32].copy_from_slice(&self.target.to_be_bytes());
        if self.end_switch {
            frame.set_byte(6, 0b0100_0000);
        }
        frame
    }
}

/// Mock 状态的共享句柄，测试侧用来注入故障与断言写出的帧
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// 在锁内访问状态
    pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// 所有写出的帧
    pub fn written(&self) -> Vec<Frame> {
        self.state.lock().written.clone()
    }

    /// 指定操作码的写出帧
    pub fn frames_with(&self, opcode: Opcode) -> Vec<Frame> {
        let code = u8::from(opcode);
        self.state
            .lock()
            .written
            .iter()
            .filter(|f| f.opcode_byte() == code)
            .copied()
            .collect()
    }

    /// 最近一帧指定操作码的写出帧
    pub fn last_frame_with(&self, opcode: Opcode) -> Option<Frame> {
        self.frames_with(opcode).last().copied()
    }

    /// 当前位置
    pub fn position(&self) -> i32 {
        self.state.lock().position
    }

    /// 运行/休眠状态
    pub fn running(&self) -> bool {
        self.state.lock().running
    }
}

/// 脚本化 Mock 传输
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// 创建传输与配套的状态句柄
    pub fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::new()));
        (
            MockTransport {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }
}

impl Transport for MockTransport {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), UsbError> {
        let mut state = self.state.lock();
        state.written.push(*frame);
        state.handle_command(frame);
        Ok(())
    }

    fn read_frame(&mut self, _timeout: Duration) -> Result<Frame, UsbError> {
        let mut state = self.state.lock();
        if state.inject_read_timeouts > 0 {
            state.inject_read_timeouts -= 1;
            return Err(UsbError::Usb(rusb::Error::Timeout));
        }
        if let Some(frame) = state.pending.pop_front() {
            return Ok(frame);
        }
        if state.inject_stream_timeouts > 0 {
            state.inject_stream_timeouts -= 1;
            return Err(UsbError::Usb(rusb::Error::Timeout));
        }
        Ok(state.stream_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postep_protocol::{Direction, MotionLimits};

    use crate::device::PoStep256;

    fn mock_device() -> (PoStep256, MockHandle) {
        let (transport, handle) = MockTransport::new();
        let device =
            PoStep256::new(Box::new(transport)).with_settle(Duration::from_millis(1));
        (device, handle)
    }

    #[test]
    fn test_speed_command_is_double_written() {
        let (mut device, handle) = mock_device();
        device.set_requested_speed(400, Direction::Cw).unwrap();
        let frames = handle.frames_with(Opcode::SetRequestedSpeed);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
        assert_eq!(frames[0].get_u32_le(20), 1200);
    }

    #[test]
    fn test_trajectory_reaches_target_in_stream() {
        let (mut device, handle) = mock_device();
        device.enable_rt_stream().unwrap();
        device
            .move_trajectory(5_000, &MotionLimits::default())
            .unwrap();
        let status = device.read_stream().unwrap();
        assert_eq!(status.position, 5_000);
        assert_eq!(handle.position(), 5_000);
    }

    #[test]
    fn test_stop_trajectory_freezes_position() {
        let (mut device, handle) = mock_device();
        handle.with_state(|s| s.move_ticks = 10);
        device
            .move_trajectory(5_000, &MotionLimits::default())
            .unwrap();
        device.stop_trajectory().unwrap();
        let status = device.read_stream().unwrap();
        assert_eq!(status.position, 0);
        assert_eq!(handle.position(), 0);
    }

    #[test]
    fn test_read_retries_survive_injected_timeouts() {
        let (mut device, handle) = mock_device();
        handle.with_state(|s| s.inject_read_timeouts = 2);
        device.run_sleep(true).unwrap();
        assert!(handle.running());
    }

    #[test]
    fn test_read_gives_up_after_retry_budget() {
        let (mut device, handle) = mock_device();
        handle.with_state(|s| s.inject_read_timeouts = 10);
        let err = device.run_sleep(true).unwrap_err();
        assert!(matches!(err, UsbError::ReadTimeout { .. }));
    }

    #[test]
    fn test_trajectory_retries_on_bad_echo() {
        let (mut device, handle) = mock_device();
        handle.with_state(|s| s.inject_bad_echo = 2);
        device
            .move_trajectory(100, &MotionLimits::default())
            .unwrap();
        assert_eq!(handle.frames_with(Opcode::MoveTrajectory).len(), 3);
    }

    #[test]
    fn test_settings_roundtrip_through_write_frame_mapping() {
        let (mut device, _handle) = mock_device();
        let before = device.read_driver_settings().unwrap();
        device
            .patch_driver_settings(&postep_protocol::SettingsPatch {
                microstep: Some(2),
                step_mode: Some(2),
                ..Default::default()
            })
            .unwrap();
        let after = device.read_driver_settings().unwrap();
        assert_eq!(after.microstepping(), 2);
        assert_eq!(after.isgain(), before.isgain());
        assert_eq!(after.torque(), before.torque());
    }

    #[test]
    fn test_reset_position_zero() {
        let (mut device, handle) = mock_device();
        device
            .move_trajectory(777, &MotionLimits::default())
            .unwrap();
        let _ = device.read_stream().unwrap();
        device.reset_position_zero().unwrap();
        assert_eq!(handle.position(), 0);
    }
}
