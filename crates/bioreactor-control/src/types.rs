//! 数据模型
//!
//! 所有对外可见的模型都带 serde 派生，供上层 API 序列化。

use serde::{Deserialize, Serialize};

pub use postep_protocol::Direction;

/// 记录条目 ID
pub type EntryId = u64;

/// 电机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorStatus {
    Idle,
    Moving,
    Error,
}

/// 记录会话条目：运动开始时创建，之后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub name: String,
    /// 关联的场景名（手动运动时为空）
    pub scenario_name: Option<String>,
}

/// 轴状态快照
///
/// 经 `ArcSwap` 发布，`get_status()` 为无锁读取，任意线程可调用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSnapshot {
    pub status: MotorStatus,
    /// 设备步数计的位置
    pub position: i32,
    /// 当前速度（轴自身单位：RPM 或 mL/min）
    pub speed: f64,
    pub direction: Direction,
    pub is_moving: bool,
    pub initialized: bool,
    /// 正在记录的条目，空闲时为 None
    pub active_entry_id: Option<EntryId>,
}

impl Default for AxisSnapshot {
    fn default() -> Self {
        AxisSnapshot {
            status: MotorStatus::Idle,
            position: 0,
            speed: 0.0,
            direction: Direction::Cw,
            is_moving: false,
            initialized: false,
            active_entry_id: None,
        }
    }
}

/// 运动分段
///
/// `magnitude` 对旋转轴是 RPM，对蠕动泵是流量（mL/min）；
/// 蠕动泵分段在执行前会按标定斜率改写成 RPM。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementSegment {
    /// 分段时长（秒），0 表示一直运行到被停止
    pub duration_s: f64,
    pub direction: Direction,
    pub magnitude: f64,
}

/// 测量样本的轴专属负载
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "axis")]
pub enum SamplePayload {
    Tilt {
        angle: f64,
        state: MotorStatus,
    },
    Rotary {
        speed_rpm: f64,
        direction: Direction,
    },
    Peristaltic {
        flow_ml_min: f64,
        direction: Direction,
    },
}

/// 测量样本
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub entry_id: EntryId,
    #[serde(flatten)]
    pub payload: SamplePayload,
    /// 距运动开始的秒数
    pub time_s: f64,
}

/// 倾斜场景的结束停靠位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndPosition {
    Min,
    Center,
    Max,
}

/// 倾斜场景
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiltScenario {
    pub name: String,
    /// 微步细分（2^n）
    pub microstepping: u8,
    /// 最小倾角（度）
    pub min_tilt: i32,
    /// 最大倾角（度）
    pub max_tilt: i32,
    /// 完整往返周期数，0 表示一直运行到被停止
    pub repetitions: u32,
    /// 单次移动时长（秒）
    pub move_duration_s: f64,
    pub end_position: EndPosition,
    /// 左侧驻留（秒）
    pub standstill_left_s: f64,
    /// 水平驻留（秒）
    pub standstill_horizontal_s: f64,
    /// 右侧驻留（秒）
    pub standstill_right_s: f64,
}

/// 旋转场景
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationScenario {
    pub name: String,
    pub segments: Vec<MovementSegment>,
}

/// 蠕动泵的标定引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "name")]
pub enum CalibrationRef {
    /// 已保存的标定
    Saved(String),
    /// 软管配置预设（flow_rate 直接作为斜率）
    Tube(String),
}

/// 蠕动泵场景
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeristalticScenario {
    pub name: String,
    pub segments: Vec<MovementSegment>,
    pub calibration: CalibrationRef,
}

/// 软管配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TubeConfiguration {
    pub name: String,
    /// 内径（mm）
    pub diameter_mm: f64,
    /// 预设流量斜率（mL/min per RPM）
    pub flow_rate: f64,
    pub preset: bool,
}

/// 蠕动泵标定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub name: String,
    /// 标定运行时长（秒）
    pub duration_s: u32,
    pub low_rpm: u32,
    pub high_rpm: u32,
    /// 低速档收集体积（mL）
    pub low_rpm_volume: f64,
    /// 高速档收集体积（mL）
    pub high_rpm_volume: f64,
    /// 拟合斜率（mL/min per RPM）
    pub slope: f64,
    /// 软管内径（mm）
    pub diameter_mm: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&MotorStatus::Moving).unwrap(),
            "\"moving\""
        );
    }

    #[test]
    fn test_sample_payload_roundtrip() {
        let sample = MeasurementSample {
            entry_id: 7,
            payload: SamplePayload::Peristaltic {
                flow_ml_min: 2.5,
                direction: Direction::Ccw,
            },
            time_s: 1.25,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"axis\":\"peristaltic\""));
        let back: MeasurementSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_calibration_ref_serde() {
        let json = serde_json::to_string(&CalibrationRef::Tube("3mm".into())).unwrap();
        assert!(json.contains("\"kind\":\"tube\""));
    }
}
