//! # Example: simulated_session
//!
//! Runs a full experiment against a simulated camera pair and a fake gripper.
//!
//! Shows how to:
//! - Implement the [`Task`] trait with all four hooks.
//! - Sequence actions with [`TaskContext::queue_actions`].
//! - Plug in a [`SensorSource`] closure.
//! - Consume previews from a UI-side loop while the experiment runs.
//!
//! ## Flow
//! ```text
//! Coordinator::run()
//!     ├─► task-runner: startup ─► perform_task (every 3rd cycle fails) ─► reset / recover
//!     ├─► relay:       session dir N, status.txt, recorder retargets
//!     ├─► capture:     simulated camera at `fps` ─► Video/, Bottom_Video/, states.json
//!     └─► preview loop (below) ─► prints the newest gripper state
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example simulated_session
//! ```
//! Recordings land under `./recorded_data/simulated/`. Ctrl-C stops early.

use std::{sync::Arc, time::Duration};

use capturevisor::{
    Config, Coordinator, Frame, LogWriter, SensorError, SensorReading, Subscribe, Task,
    TaskContext, TaskError,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

/// Opens and closes a fake gripper; every third cycle drops the object.
struct Gripper {
    cycles: u32,
    max_cycles: u32,
}

impl Task for Gripper {
    fn name(&self) -> &str {
        "gripper"
    }

    fn startup(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        println!("[task] homing arm (cycle {})", self.cycles + 1);
        Ok(())
    }

    fn perform_task(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.cycles += 1;
        ctx.queue_actions(
            ["open", "descend", "close", "lift"],
            |step| {
                println!("[task] {step}");
                Ok(())
            },
            true,
        )?;

        if self.cycles >= self.max_cycles {
            ctx.finish();
            return Ok(());
        }
        if self.cycles % 3 == 0 {
            return Err(TaskError::fail("object dropped"));
        }
        Ok(())
    }

    fn reset_task(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.queue_actions(["place", "open"], |_| Ok(()), true)
    }

    fn recover_after_fail(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        println!("[task] recovering after failure");
        ctx.queue_actions(["search", "grasp", "place"], |_| Ok(()), true)
    }
}

/// Simulated camera pair: a moving gradient on top, a flat frame below.
fn simulated_camera() -> impl FnMut() -> Result<SensorReading, SensorError> + Send + 'static {
    let mut tick: u32 = 0;
    move || -> Result<SensorReading, SensorError> {
        tick = tick.wrapping_add(1);
        let shade = (tick % 256) as u8;
        let top: Vec<u8> = (0..WIDTH * HEIGHT * 3)
            .map(|i| shade.wrapping_add((i % 256) as u8))
            .collect();
        let bottom = vec![shade; (WIDTH * HEIGHT) as usize];
        let t = f64::from(tick) / 10.0;

        Ok(SensorReading {
            primary: Frame::new(WIDTH, HEIGHT, 3, top),
            secondary: Frame::new(WIDTH, HEIGHT, 1, bottom),
            state: json!({ "gripper": (t.sin() + 1.0) / 2.0, "z": t.cos() }),
            timestamp: t,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = Config::for_testing("simulated", "recorded_data", 15);
    cfg.experiment.timeout_between_experiments = Duration::from_millis(500);
    cfg.experiment.time_between_orders = Duration::from_millis(100);
    cfg.camera.clip_length = Some(30);
    cfg.runtime.handle_os_signals = true;

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let coordinator = Coordinator::builder(cfg)
        .with_task(Gripper {
            cycles: 0,
            max_cycles: 5,
        })
        .with_sensor(simulated_camera())
        .with_subscribers(subs)
        .build()?;

    let ui = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            while !coordinator.shutdown().is_signaled() {
                if let Some(p) = coordinator.get_preview().await {
                    println!("[ui] frame #{} state={}", p.seq, p.state);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    };

    coordinator.run().await?;
    ui.await?;
    println!("\nfinished");
    Ok(())
}
