use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::environment::Environment;
use crate::hat::KeyIndex;
use crate::target::{STAGE_HEIGHT, STAGE_WIDTH};

/// Host input, as produced by a window loop or the stdin reader.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    KeyDown(u32),
    /// Screen pixels, origin top-left.
    PointerDown { x: f64, y: f64 },
    Broadcast(String),
    Quit,
}

/// Size of the surface that screen coordinates refer to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: STAGE_WIDTH,
            height: STAGE_HEIGHT,
        }
    }
}

impl Viewport {
    /// Maps a screen pixel to stage coordinates (centre origin, y up).
    pub fn to_stage(&self, sx: f64, sy: f64) -> (f64, f64) {
        let x = sx * STAGE_WIDTH / self.width.max(1.0) - STAGE_WIDTH / 2.0;
        let y = STAGE_HEIGHT / 2.0 - sy * STAGE_HEIGHT / self.height.max(1.0);
        (x, y)
    }
}

#[derive(Default)]
pub struct PumpStatus {
    pub launched: Vec<JoinHandle<()>>,
    pub quit: bool,
}

/// Receiving end of the input channel; drained once per frame.
pub struct EventPump {
    receiver: Receiver<InputEvent>,
    viewport: Viewport,
}

impl EventPump {
    pub fn channel(viewport: Viewport) -> (Sender<InputEvent>, Self) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (sender, Self { receiver, viewport })
    }

    /// Turns every queued event into a hat firing.
    pub fn drain(&self, env: &Arc<Environment>) -> PumpStatus {
        let mut status = PumpStatus::default();
        for event in self.receiver.try_iter() {
            debug!("[Hatch input] {event:?}");
            match event {
                InputEvent::KeyDown(code) => status.launched.extend(env.key_down(code)),
                InputEvent::PointerDown { x, y } => {
                    let (sx, sy) = self.viewport.to_stage(x, y);
                    status.launched.extend(env.pointer_down(sx, sy));
                }
                InputEvent::Broadcast(message) => status.launched.extend(env.broadcast(&message)),
                InputEvent::Quit => {
                    status.quit = true;
                    break;
                }
            }
        }
        status
    }
}

/// Parses one command line: `key <name>`, `click <x> <y>`, `broadcast <message>` or `quit`.
pub fn parse_line(line: &str) -> Result<InputEvent, String> {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "key" => KeyIndex::from_name(rest)
            .map(|key| InputEvent::KeyDown(key.code()))
            .ok_or_else(|| format!("Unknown key: {rest}")),
        "click" => {
            let mut coords = rest.split_whitespace().map(str::parse::<f64>);
            match (coords.next(), coords.next(), coords.next()) {
                (Some(Ok(x)), Some(Ok(y)), None) => Ok(InputEvent::PointerDown { x, y }),
                _ => Err(format!("Expected 'click <x> <y>', got '{line}'")),
            }
        }
        "broadcast" if !rest.is_empty() => Ok(InputEvent::Broadcast(rest.to_string())),
        "quit" | "exit" => Ok(InputEvent::Quit),
        _ => Err(format!("Unknown command: {line}")),
    }
}
