//! Run a motion trigger and a cascading trigger against synthetic cameras.
//!
//! Usage: `vigil-sim [config.json]`. Without a configuration file, the defaults are used.

use log::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vigil::config::{AudioTriggerConfig, CascadeConfig, TriggerConfig};
use vigil::prelude::v1::*;

mod synthetic;

use synthetic::{LogTarget, Scene, SyntheticCamera, SyntheticMicrophone};

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct SimConfig {
    /// How long to run for, in seconds.
    seconds: f64,
    fps: f64,
    /// Resolution of the camera the motion trigger watches.
    lores: (usize, usize),
    /// Resolution of the camera the cascading trigger records.
    hires: (usize, usize),
    /// Length of one quiet + active scene cycle, in seconds.
    period: f64,
    /// Seconds of motion at the end of every cycle.
    active: f64,
    motion: TriggerConfig,
    cascade: CascadeConfig,
    audio: Option<AudioTriggerConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let mut motion = TriggerConfig {
            id: "lores".into(),
            warm_up: 5,
            ..Default::default()
        };

        motion.parameters.insert("min-n-frames".into(), Value::Int(2));
        motion
            .parameters
            .insert("min-pixels-changed-percentage".into(), Value::Double(0.5));

        Self {
            seconds: 12.0,
            fps: 15.0,
            lores: (160, 120),
            hires: (640, 480),
            period: 5.0,
            active: 2.0,
            motion,
            cascade: CascadeConfig {
                id: "hires".into(),
                pre_motion_record_duration: 15,
                ..Default::default()
            },
            audio: None,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    info!("vigil-sim (rustc {})", vigil::RUSTC_VERSION);

    let cfg: SimConfig = match std::env::args().nth(1) {
        Some(path) => {
            let file = std::fs::File::open(&path).with_context(|| format!("cannot open {path}"))?;
            serde_json::from_reader(file).with_context(|| format!("cannot parse {path}"))?
        }
        None => SimConfig::default(),
    };

    if cfg.fps <= 0.0 || cfg.period <= cfg.active || cfg.active <= 0.0 {
        bail!(
            "invalid scene timing: fps={}, period={}, active={}",
            cfg.fps,
            cfg.period,
            cfg.active
        );
    }

    let scene = Scene {
        start: Instant::now(),
        period: Duration::from_secs_f64(cfg.period),
        active: Duration::from_secs_f64(cfg.active),
    };

    let lores = Arc::new(SyntheticCamera::new("lores-cam", cfg.lores, cfg.fps, scene));
    let hires = Arc::new(SyntheticCamera::new("hires-cam", cfg.hires, cfg.fps, scene));

    let event_log = Arc::new(MemoryEventLog::new());
    let meta = Arc::new(MetaBoard::new());

    let lores_target = LogTarget::new("lores-recorder");
    let hires_target = LogTarget::new("hires-recorder");

    let mut motion = cfg
        .motion
        .build(lores, event_log.clone(), meta.clone())?
        .with_targets(vec![Box::new(lores_target.clone())]);

    let audio = match &cfg.audio {
        Some(audio) => {
            let trigger = audio.build(Box::new(SyntheticMicrophone::new(8000, scene)));
            motion.listen_to(trigger.hub());
            Some(trigger)
        }
        None => None,
    };

    let cascade = cfg
        .cascade
        .build(hires, &[motion.link()])?
        .with_targets(vec![Box::new(hires_target.clone())]);

    let workers = std::iter::once(TriggerWorker::spawn(motion)?)
        .chain(std::iter::once(TriggerWorker::spawn(cascade)?))
        .chain(audio.map(TriggerWorker::spawn).transpose()?)
        .collect::<Vec<_>>();

    std::thread::sleep(Duration::from_secs_f64(cfg.seconds.max(0.0)));

    for worker in workers {
        worker.stop();
    }

    if let Some(pct) = meta.get_double(vigil::meta::PIXELS_CHANGED) {
        println!("last frame: {pct:.2}% of the pixels changed");
    }

    println!(
        "{} low resolution and {} high resolution recordings",
        lores_target.recordings(),
        hires_target.recordings()
    );

    for event in event_log.events() {
        let duration = event
            .end_us
            .map(|end| format!("{:.2}s", (end - event.start_us) as f64 / 1e6))
            .unwrap_or_else(|| "open".into());

        println!(
            "event {}: {} {:?} ({}, {})",
            event.id, event.trigger_id, event.kind, event.note, duration
        );
    }

    Ok(())
}
