//! 蠕动泵标定换算
//!
//! 斜率（mL/min per RPM）把泵转速映射到流量；
//! 设备速度单位与 RPM 之间隔着固定的传动系数。

/// 泵设备速度单位 / RPM 的固定传动系数
pub const FLOW_RATIO_CONSTANT: f64 = 5.34;

/// RPM → 流量（mL/min）
pub fn flow_from_rpm(rpm: f64, slope: f64) -> f64 {
    rpm * slope
}

/// 流量（mL/min）→ RPM
pub fn rpm_from_flow(flow: f64, slope: f64) -> f64 {
    flow / slope
}

/// 设备速度单位 → 流量（mL/min）
pub fn flow_from_device_speed(device_speed: f64, slope: f64) -> f64 {
    (device_speed / FLOW_RATIO_CONSTANT) * slope
}

/// 过原点最小二乘拟合标定斜率
///
/// 数据点为 (0, 0)、(low_rpm, low_vol/duration_min)、
/// (high_rpm, high_vol/duration_min)，结果再乘回 duration_min
/// 折算成 mL/min per RPM。
pub fn compute_slope(
    duration_s: u32,
    low_rpm: u32,
    high_rpm: u32,
    low_rpm_volume: f64,
    high_rpm_volume: f64,
) -> f64 {
    let duration_min = f64::from(duration_s) / 60.0;
    let xs = [0.0, f64::from(low_rpm), f64::from(high_rpm)];
    let ys = [
        0.0,
        low_rpm_volume / duration_min,
        high_rpm_volume / duration_min,
    ];
    let sum_xy: f64 = xs.iter().zip(ys.iter()).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = xs.iter().map(|x| x * x).sum();
    (sum_xy / sum_xx) * duration_min
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compute_slope_collinear_points() {
        // 完全共线：10 RPM → 5 mL、20 RPM → 10 mL（60 s）
        // 斜率 = 5 mL / 10 RPM / 1 min = 0.5
        let slope = compute_slope(60, 10, 20, 5.0, 10.0);
        assert!((slope - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_compute_slope_duration_invariant() {
        // 过原点拟合下时长在公式中约掉，体积不变则斜率不变
        let a = compute_slope(60, 10, 20, 5.0, 10.0);
        let b = compute_slope(120, 10, 20, 5.0, 10.0);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_flow_from_device_speed() {
        // 设备速度 5.34 = 1 RPM，斜率 0.5 → 0.5 mL/min
        let flow = flow_from_device_speed(5.34, 0.5);
        assert!((flow - 0.5).abs() < 1e-9);
    }

    proptest! {
        /// rpm ↔ flow 在浮点误差内互逆
        #[test]
        fn prop_rpm_flow_roundtrip(rpm in 0.01f64..500.0, slope in 0.01f64..10.0) {
            let flow = flow_from_rpm(rpm, slope);
            let back = rpm_from_flow(flow, slope);
            prop_assert!((back - rpm).abs() < 1e-9 * rpm.max(1.0));
        }
    }
}
