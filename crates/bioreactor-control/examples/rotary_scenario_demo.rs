//! 旋转轴场景演示（mock 传输，无硬件）
//!
//! 展示完整的一次场景运行：初始化设备管理器、启动分段场景、
//! 中途暂停/恢复、等待自然结束后读回持久化的样本。
//!
//! # 使用说明
//!
//! ```bash
//! cargo run --example rotary_scenario_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use bioreactor_control::{
    ControlError, Direction, MemoryStorage, MovementSegment, NullEventSink, RotaryController,
    RotationScenario, Storage,
};
use postep_protocol::MotionLimits;
use postep_usb::mock::MockTransport;
use postep_usb::DeviceManager;

fn main() -> Result<(), ControlError> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rotary_scenario_demo=info".parse().unwrap()),
        )
        .init();

    println!("════════════════════════════════════════");
    println!("       旋转轴场景演示");
    println!("════════════════════════════════════════");
    println!();

    // === 1. 初始化设备（mock 传输替代真机）===

    let (transport, _mock) = MockTransport::new();
    let manager = Arc::new(DeviceManager::new());
    manager.initialize_with_transport(Box::new(transport), MotionLimits::default())?;
    manager
        .handle()?
        .lock()
        .set_settle(Duration::from_millis(1));
    println!("✅ 设备已初始化");

    // === 2. 构建控制器并启动场景 ===

    let storage = Arc::new(MemoryStorage::new());
    let axis = RotaryController::new(manager, storage.clone(), Arc::new(NullEventSink));
    axis.initialize()?;

    let scenario = RotationScenario {
        name: "demo spin".into(),
        segments: vec![
            MovementSegment {
                duration_s: 1.0,
                direction: Direction::Cw,
                magnitude: 0.2,
            },
            MovementSegment {
                duration_s: 1.0,
                direction: Direction::Ccw,
                magnitude: 0.1,
            },
        ],
    };
    axis.start("demo run", &scenario)?;
    println!("✅ 场景已启动（2 个分段，共约 2 秒）");

    // === 3. 中途暂停再恢复 ===

    std::thread::sleep(Duration::from_millis(500));
    axis.pause();
    println!("⏸  已暂停");
    std::thread::sleep(Duration::from_millis(500));
    axis.resume(None);
    println!("▶  已恢复");

    // === 4. 等待结束并读回样本 ===

    axis.wait_idle(Duration::from_secs(10));
    let snap = axis.status();
    println!();
    println!("运行结束，状态: {:?}", snap.status);

    if let Some(entry) = storage.entries()?.first() {
        let samples = storage.measurements(entry.id, 10)?;
        println!("条目 #{} 「{}」前 {} 个样本:", entry.id, entry.name, samples.len());
        for sample in &samples {
            println!("  t={:.2}s {:?}", sample.time_s, sample.payload);
        }
    }
    Ok(())
}
