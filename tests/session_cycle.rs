//! Drives full experiments through the public API only.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capturevisor::{
    Config, Coordinator, Event, EventKind, Frame, SensorError, SensorReading, Subscribe, Task,
    TaskContext, TaskError, TaskState, IMAGES_DIR, STATE_LOG_FILE,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

fn camera() -> impl FnMut() -> Result<SensorReading, SensorError> + Send + 'static {
    let mut tick = 0u32;
    move || -> Result<SensorReading, SensorError> {
        tick += 1;
        Ok(SensorReading {
            primary: Frame::new(2, 2, 3, vec![tick as u8; 12]),
            secondary: Frame::new(2, 2, 1, vec![tick as u8; 4]),
            state: json!({ "tick": tick }),
            timestamp: f64::from(tick) / 100.0,
        })
    }
}

fn config(root: &Path, yaml_camera: &str) -> Config {
    let text = format!(
        r#"
experiment:
  name: integration
  output_root: {root}
  timeout_between_experiments: 30ms
  time_between_orders: 5ms
camera:
{yaml_camera}
runtime:
  quantum: 10ms
  start_settle: 20ms
  task_time_margin: 20ms
  finish_grace: 20ms
  grace: 5s
  handle_os_signals: false
"#,
        root = root.display(),
    );
    Config::from_yaml_str(&text).unwrap()
}

#[derive(Default)]
struct Hooks {
    startup: AtomicU32,
    reset: AtomicU32,
    recover: AtomicU32,
}

/// Drops the object on the first cycle, finishes on the third.
struct Sorter {
    hooks: Arc<Hooks>,
    cycle: u32,
}

impl Task for Sorter {
    fn name(&self) -> &str {
        "sorter"
    }

    fn startup(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.hooks.startup.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn perform_task(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.cycle += 1;
        assert!(ctx.output_dir().is_some(), "recorder target set before start");
        ctx.queue_actions(["pick", "place"], |_| Ok(()), true)?;
        match self.cycle {
            1 => Err(TaskError::fail("object dropped")),
            3 => {
                ctx.finish();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn reset_task(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        self.hooks.reset.fetch_add(1, Ordering::Relaxed);
        ctx.queue_actions(["home"], |_| Ok(()), true)
    }

    fn recover_after_fail(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        assert!(ctx.is_failed());
        self.hooks.recover.fetch_add(1, Ordering::Relaxed);
        ctx.queue_actions(["search", "home"], |_| Ok(()), true)
    }
}

#[derive(Default)]
struct Transitions(Mutex<Vec<TaskState>>);

#[async_trait]
impl Subscribe for Transitions {
    async fn on_event(&self, ev: &Event) {
        if ev.kind == EventKind::StateChanged {
            if let Some(state) = ev.state {
                self.0.lock().push(state);
            }
        }
    }

    fn name(&self) -> &'static str {
        "transitions"
    }
}

fn entries(path: &Path) -> Vec<Value> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn snapshot_policy_records_one_frame_per_action() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(
        tmp.path(),
        "  record: true\n  record_only_after_action: true\n  fps: 50\n  save_images_individually: true\n",
    );
    let base = cfg.session_base();
    let hooks = Arc::new(Hooks::default());
    let transitions = Arc::new(Transitions::default());

    let coordinator = Coordinator::builder(cfg)
        .with_task(Sorter {
            hooks: Arc::clone(&hooks),
            cycle: 0,
        })
        .with_sensor(camera())
        .with_subscribers(vec![transitions.clone() as Arc<dyn Subscribe>])
        .build()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(15), coordinator.run())
        .await
        .expect("experiment did not finish")
        .unwrap();

    use TaskState::*;
    assert_eq!(
        *transitions.0.lock(),
        vec![Active, Resetting, Startup, Active, Resetting, Startup, Active, Finished]
    );
    assert_eq!(hooks.startup.load(Ordering::Relaxed), 3);
    assert_eq!(hooks.recover.load(Ordering::Relaxed), 1);
    assert_eq!(hooks.reset.load(Ordering::Relaxed), 1);

    let session = |id: u32| base.join(id.to_string());
    assert_eq!(std::fs::read_to_string(session(1).join("status.txt")).unwrap(), "fail");
    assert_eq!(std::fs::read_to_string(session(2).join("status.txt")).unwrap(), "success");

    // Two actions per task phase; restore phases ran "search, home" then "home".
    for id in 1..=3 {
        let log = entries(&session(id).join("task").join(STATE_LOG_FILE));
        assert_eq!(log.len(), 2, "session {id} task log");
        let times: Vec<f64> = log.iter().map(|e| e["time"].as_f64().unwrap()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert!(session(id).join("task").join(IMAGES_DIR).join("image_top_1.ppm").exists());
    }
    assert_eq!(entries(&session(1).join("restore").join(STATE_LOG_FILE)).len(), 2);
    assert_eq!(entries(&session(2).join("restore").join(STATE_LOG_FILE)).len(), 1);
    assert_eq!(coordinator.recorder().unwrap().persisted_frames(), 2 * 3 + 2 + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnected_sensor_stops_the_experiment() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(
        tmp.path(),
        "  record: true\n  record_only_after_action: false\n  fps: 50\n  save_images_individually: false\n",
    );
    let mut reads = 0u32;
    let flaky = move || -> Result<SensorReading, SensorError> {
        reads += 1;
        if reads > 5 {
            return Err(SensorError::Disconnected {
                reason: "usb unplugged".into(),
            });
        }
        Ok(SensorReading {
            primary: Frame::new(1, 1, 3, vec![0; 3]),
            secondary: Frame::new(1, 1, 1, vec![0; 1]),
            state: json!({}),
            timestamp: f64::from(reads),
        })
    };
    let coordinator = Coordinator::builder(cfg)
        .with_task(capturevisor::TaskFn::new("wait", |ctx: &TaskContext| {
            ctx.sleep(Duration::from_secs(60))
        }))
        .with_sensor(flaky)
        .build()
        .unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), coordinator.run())
        .await
        .expect("shutdown did not propagate")
        .unwrap_err();
    assert_eq!(err.as_label(), "runtime_sensor");
    assert!(coordinator.shutdown().is_signaled());
}
