//! Headless frame loop.
//!
//! A reader task relays script lines over a channel. Every interval tick
//! the loop stages whatever arrived, runs one animation-frame tick and then
//! the session frame.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use xremu_common::{EmulatorSettings, KeyValueStore};
use xremu_device::{DeviceHost, EmulatedDevice, ManualScheduler, RenderState, SessionInit, SessionState};
use xremu_vr::{device_or_default, SessionMode};

use crate::headless::{parse_line, HeadlessLayer, StdoutCallbacks};

const SCRIPT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_FRAMEBUFFER: (u32, u32) = (1920, 1080);

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub device_key: Option<String>,
    pub script: Option<PathBuf>,
    pub mode: SessionMode,
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub fps: u32,
    pub max_frames: Option<u64>,
    pub origin: String,
}

async fn relay_lines<R>(reader: R, tx: mpsc::Sender<String>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if tx.send(line).await.is_err() {
            break;
        }
    }
    Ok(())
}

fn spawn_reader(script: Option<PathBuf>, tx: mpsc::Sender<String>) {
    tokio::spawn(async move {
        let result = match script {
            Some(path) => match tokio::fs::File::open(&path).await {
                Ok(file) => relay_lines(BufReader::new(file), tx).await,
                Err(err) => Err(err).with_context(|| format!("failed to open {}", path.display())),
            },
            None => relay_lines(BufReader::new(tokio::io::stdin()), tx).await,
        };
        if let Err(err) = result {
            warn!(error = %err, "control script reader stopped");
        }
    });
}

/// Run the device until the script ends, the session ends or the frame
/// budget runs out. Returns the store for the caller to persist into.
pub async fn run(config: RunConfig, store: Box<dyn KeyValueStore>) -> Result<Box<dyn KeyValueStore>> {
    let mut settings = EmulatorSettings::load(store.as_ref());
    let key = config
        .device_key
        .clone()
        .unwrap_or_else(|| settings.device_key.clone());
    let definition = device_or_default(&key);
    let framebuffer = definition
        .resolution
        .map(|r| (r.width, r.height))
        .unwrap_or(DEFAULT_FRAMEBUFFER);

    let mut device = EmulatedDevice::new(
        definition,
        DeviceHost {
            scheduler: Box::new(ManualScheduler::new()),
            callbacks: Arc::new(StdoutCallbacks),
            store,
            origin: config.origin.clone(),
        },
    );
    device.apply_settings(&settings);

    let init = SessionInit {
        required_features: config.required_features.clone(),
        optional_features: config.optional_features.clone(),
        dom_overlay_root: None,
    };
    let session = device
        .request_session(config.mode, &init)
        .with_context(|| format!("{} session rejected", config.mode.as_str()))?;
    device.on_base_layer_set(session, Box::new(HeadlessLayer::new(framebuffer.0, framebuffer.1)))?;

    let (tx, mut rx) = mpsc::channel(SCRIPT_CHANNEL_CAPACITY);
    spawn_reader(config.script.clone(), tx);

    let period = Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1)));
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let started = Instant::now();
    let render = RenderState::default();
    let mut frames = 0u64;
    let mut script_done = false;

    loop {
        interval.tick().await;

        loop {
            match rx.try_recv() {
                Ok(line) => {
                    if let Some(action) = parse_line(&line) {
                        device.apply_action(action);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    script_done = true;
                    break;
                }
            }
        }

        let now_ms = started.elapsed().as_secs_f64() * 1000.0;
        device.on_animation_frame(now_ms);
        if device.session_state(session)? == SessionState::Ended {
            info!(frames, "session ended");
            break;
        }
        if let Err(err) = device
            .on_frame_start(session, &render)
            .and_then(|_| device.on_frame_end(session))
        {
            warn!(error = %err, "frame failed");
        }
        for event in device.take_events(session) {
            info!(?event, "session event");
        }
        frames += 1;

        if script_done {
            debug!(frames, "control script finished");
            break;
        }
        if config.max_frames.is_some_and(|max| frames >= max) {
            info!(frames, "frame budget reached");
            break;
        }
    }

    if device.session_state(session)? != SessionState::Ended {
        device.end_session(session)?;
    }
    settings.device_key = device.definition().id.clone();
    let mut store = device.into_store();
    settings.write(store.as_mut())?;
    Ok(store)
}
