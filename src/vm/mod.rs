pub mod operators;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::environment::Environment;
use crate::error::{HatchError, HatchResult};
use crate::lock;
use crate::opcode::Opcode;
use crate::scheduler::BoxFuture;
use crate::script::{Block, Expr, Script};
use crate::target::Target;
use crate::value::{compare, Value};

use operators::number;

/// Longest single wait honoured, in seconds.
const MAX_WAIT_SECS: f64 = 86_400.0;

fn seconds(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.min(MAX_WAIT_SECS))
}

fn warn_unsupported(name: &str) {
    static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let mut seen = lock(WARNED.get_or_init(Default::default));
    if seen.insert(name.to_string()) {
        warn!("[Hatch vm] Unsupported opcode '{name}', skipping");
    }
}

fn substack<'b>(block: &'b Block, name: &str) -> Option<&'b Arc<Script>> {
    match block.arg(name) {
        Some(Expr::Script(script)) => Some(script),
        _ => None,
    }
}

/// Executes scripts on behalf of one target. One `Vm` backs one execution unit.
pub struct Vm {
    target: Arc<Target>,
    env: Arc<Environment>,
    /// Stop epoch seen at start; a later "stop all" moves the environment past it.
    epoch: u64,
}

impl Vm {
    pub fn new(target: Arc<Target>, env: Arc<Environment>) -> Self {
        let epoch = env.stop_epoch();
        Self::with_epoch(target, env, epoch)
    }

    /// A VM that halts once the environment moves past `epoch`. Launchers read
    /// the epoch when the unit is created, not when it is first polled.
    pub fn with_epoch(target: Arc<Target>, env: Arc<Environment>, epoch: u64) -> Self {
        Self { target, env, epoch }
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    /// Runs every block in order, suspending after each, and returns the last
    /// block's result.
    pub fn run<'a>(&'a self, script: &'a Script) -> BoxFuture<'a, HatchResult<Option<Value>>> {
        Box::pin(async move {
            let mut last = None;
            for block in script.blocks() {
                last = self.execute(block).await?;
                self.suspend().await?;
            }
            Ok(last)
        })
    }

    pub async fn eval(&self, expr: &Expr) -> HatchResult<Option<Value>> {
        match expr {
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Color(rgb) => Ok(Some(Value::Color(*rgb))),
            Expr::Variable(name) => Ok(Some(self.target.scope().resolve(name)?.get())),
            Expr::Script(script) => self.run(script).await,
        }
    }

    fn check(&self) -> HatchResult<()> {
        if self.env.stop_epoch() != self.epoch {
            return Err(HatchError::Halted);
        }
        Ok(())
    }

    /// Per-block pacing point.
    async fn suspend(&self) -> HatchResult<()> {
        let delay = self.env.config().step_delay;
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        self.check()
    }

    /// Loop iteration boundary; always gives other units a turn.
    async fn yield_once(&self) -> HatchResult<()> {
        tokio::task::yield_now().await;
        self.check()
    }

    /// Sleeps in frame-sized slices so a scoped stop is noticed promptly.
    async fn wait(&self, duration: Duration) -> HatchResult<()> {
        let deadline = tokio::time::Instant::now() + duration;
        let slice = self.env.config().frame_interval();
        loop {
            self.check()?;
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(slice)).await;
        }
    }

    async fn arg(&self, block: &Block, name: &str) -> HatchResult<Value> {
        match block.arg(name) {
            Some(expr) => Ok(self.eval(expr).await?.unwrap_or_default()),
            None => Ok(Value::empty()),
        }
    }

    async fn num(&self, block: &Block, name: &str) -> HatchResult<f64> {
        let value = self.arg(block, name).await?;
        number(&value, &block.name)
    }

    async fn text(&self, block: &Block, name: &str) -> HatchResult<String> {
        Ok(self.arg(block, name).await?.to_string())
    }

    async fn condition(&self, block: &Block) -> HatchResult<bool> {
        Ok(self.arg(block, "condition").await?.is_truthy())
    }

    async fn body(&self, block: &Block, name: &str) -> HatchResult<()> {
        if let Some(script) = substack(block, name) {
            self.run(script).await?;
        }
        Ok(())
    }

    async fn execute(&self, block: &Block) -> HatchResult<Option<Value>> {
        let target = &self.target;
        let out = match block.opcode {
            // motion
            Opcode::MoveSteps => {
                target.move_steps(self.num(block, "steps").await?);
                None
            }
            Opcode::TurnRight => {
                target.turn(self.num(block, "degrees").await?);
                None
            }
            Opcode::TurnLeft => {
                target.turn(-self.num(block, "degrees").await?);
                None
            }
            Opcode::GoToXY => {
                let x = self.num(block, "x").await?;
                let y = self.num(block, "y").await?;
                target.go_to(x, y);
                None
            }
            Opcode::PointInDirection => {
                target.point_in_direction(self.num(block, "direction").await?);
                None
            }
            Opcode::ChangeXBy => {
                let dx = self.num(block, "dx").await?;
                target.update(|s| s.x += dx);
                None
            }
            Opcode::SetX => {
                let x = self.num(block, "x").await?;
                target.update(|s| s.x = x);
                None
            }
            Opcode::ChangeYBy => {
                let dy = self.num(block, "dy").await?;
                target.update(|s| s.y += dy);
                None
            }
            Opcode::SetY => {
                let y = self.num(block, "y").await?;
                target.update(|s| s.y = y);
                None
            }
            Opcode::IfOnEdgeBounce => {
                target.if_on_edge_bounce();
                None
            }
            Opcode::XPosition => Some(Value::Number(target.state().x)),
            Opcode::YPosition => Some(Value::Number(target.state().y)),
            Opcode::Direction => Some(Value::Number(target.state().direction)),

            // looks
            Opcode::SwitchCostumeTo => {
                let which = self.arg(block, "costume").await?;
                target.switch_costume(&which);
                None
            }
            Opcode::CostumeMenu => Some(self.arg(block, "costume").await?),
            Opcode::NextCostume => {
                target.next_costume();
                None
            }
            Opcode::SwitchBackdropTo => {
                let which = self.arg(block, "backdrop").await?;
                self.env.switch_backdrop(&which);
                None
            }
            Opcode::BackdropsMenu => Some(self.arg(block, "backdrop").await?),
            Opcode::Say => {
                target.say(Some(self.text(block, "message").await?));
                None
            }
            Opcode::SayForSecs => {
                let message = self.text(block, "message").await?;
                let secs = self.num(block, "secs").await?;
                target.say(Some(message));
                self.wait(seconds(secs)).await?;
                target.say(None);
                None
            }
            Opcode::Show => {
                target.set_visible(true);
                None
            }
            Opcode::Hide => {
                target.set_visible(false);
                None
            }
            Opcode::SetSizeTo => {
                target.set_size(self.num(block, "size").await?);
                None
            }
            Opcode::ChangeSizeBy => {
                let change = self.num(block, "change").await?;
                target.set_size(target.state().size + change);
                None
            }
            Opcode::Size => Some(Value::Number(target.state().size)),

            // sound
            Opcode::PlaySound => {
                let name = self.text(block, "sound_menu").await?;
                self.env.audio().play(target.name(), &name)?;
                None
            }
            Opcode::PlaySoundUntilDone => {
                let name = self.text(block, "sound_menu").await?;
                let sound = self.env.audio().play(target.name(), &name)?;
                self.wait(sound.duration).await?;
                None
            }
            Opcode::SoundsMenu => Some(self.arg(block, "sound_menu").await?),
            Opcode::StopAllSounds => {
                self.env.audio().stop_all();
                None
            }

            // events
            Opcode::Broadcast => {
                let message = self.text(block, "broadcast_input").await?;
                self.env.broadcast(&message);
                None
            }
            Opcode::BroadcastAndWait => {
                let message = self.text(block, "broadcast_input").await?;
                for handle in self.env.broadcast(&message) {
                    if let Err(e) = handle.await {
                        debug!("[Hatch vm] '{message}' receiver did not complete: {e}");
                    }
                    self.check()?;
                }
                None
            }

            // control
            Opcode::Wait => {
                let secs = self.num(block, "duration").await?;
                self.wait(seconds(secs)).await?;
                None
            }
            Opcode::Forever => loop {
                self.body(block, "substack").await?;
                self.yield_once().await?;
            },
            Opcode::Repeat => {
                let times = self.num(block, "times").await?.round();
                let mut done = 0.0;
                while done < times {
                    self.body(block, "substack").await?;
                    self.yield_once().await?;
                    done += 1.0;
                }
                None
            }
            Opcode::If => {
                if self.condition(block).await? {
                    self.body(block, "substack").await?;
                }
                None
            }
            Opcode::IfElse => {
                if self.condition(block).await? {
                    self.body(block, "substack").await?;
                } else {
                    self.body(block, "substack2").await?;
                }
                None
            }
            Opcode::WaitUntil => {
                while !self.condition(block).await? {
                    self.yield_once().await?;
                }
                None
            }
            Opcode::RepeatUntil => {
                while !self.condition(block).await? {
                    self.body(block, "substack").await?;
                    self.yield_once().await?;
                }
                None
            }
            Opcode::Stop => {
                let option = self.text(block, "stop_option").await?;
                match option.as_str() {
                    "all" => {
                        self.env.stop_all();
                        return Err(HatchError::Halted);
                    }
                    "this script" => return Err(HatchError::ScriptStopped),
                    other => {
                        warn!("[Hatch vm] control_stop '{other}' is not supported, ignoring");
                        None
                    }
                }
            }

            // sensing
            Opcode::TouchingObject => {
                let which = self.text(block, "touchingobjectmenu").await?;
                let touching = match which.as_str() {
                    "_mouse_" => {
                        let (x, y) = self.env.pointer();
                        target.touches_point(x, y)
                    }
                    "_edge_" => target.touches_edge(),
                    name => {
                        let other = self
                            .env
                            .target(name)
                            .ok_or_else(|| HatchError::UnknownTarget(name.to_string()))?;
                        target.touches(&other)
                    }
                };
                Some(Value::Bool(touching))
            }
            Opcode::TouchingObjectMenu => Some(self.arg(block, "touchingobjectmenu").await?),
            Opcode::MouseX => Some(Value::Number(self.env.pointer().0)),
            Opcode::MouseY => Some(Value::Number(self.env.pointer().1)),
            Opcode::Timer => Some(Value::Number(self.env.timer())),
            Opcode::ResetTimer => {
                self.env.reset_timer();
                None
            }

            // operators
            Opcode::Add | Opcode::Subtract | Opcode::Multiply | Opcode::Divide | Opcode::Mod => {
                let a = self.num(block, "num1").await?;
                let b = self.num(block, "num2").await?;
                let n = match block.opcode {
                    Opcode::Add => a + b,
                    Opcode::Subtract => a - b,
                    Opcode::Multiply => a * b,
                    Opcode::Divide => a / b,
                    _ => operators::modulo(a, b),
                };
                Some(Value::Number(n))
            }
            Opcode::Gt | Opcode::Lt | Opcode::Equals => {
                let a = self.arg(block, "operand1").await?;
                let b = self.arg(block, "operand2").await?;
                let order = compare(&a, &b);
                Some(Value::Bool(match block.opcode {
                    Opcode::Gt => order > 0.0,
                    Opcode::Lt => order < 0.0,
                    _ => order == 0.0,
                }))
            }
            Opcode::And => {
                let result = self.arg(block, "operand1").await?.is_truthy()
                    && self.arg(block, "operand2").await?.is_truthy();
                Some(Value::Bool(result))
            }
            Opcode::Or => {
                let result = self.arg(block, "operand1").await?.is_truthy()
                    || self.arg(block, "operand2").await?.is_truthy();
                Some(Value::Bool(result))
            }
            Opcode::Not => Some(Value::Bool(!self.arg(block, "operand").await?.is_truthy())),
            Opcode::Random => {
                let from = self.arg(block, "from").await?;
                let to = self.arg(block, "to").await?;
                let picked = operators::random_between(&mut *self.env.rng(), &from, &to)?;
                Some(picked)
            }
            Opcode::Join => {
                let a = self.text(block, "string1").await?;
                let b = self.text(block, "string2").await?;
                Some(Value::Text(a + &b))
            }
            Opcode::LetterOf => {
                let index = self.num(block, "letter").await?;
                let text = self.text(block, "string").await?;
                Some(Value::Text(operators::letter_of(index, &text)?))
            }
            Opcode::Length => {
                let text = self.text(block, "string").await?;
                Some(Value::Int(text.chars().count() as i64))
            }
            Opcode::Contains => {
                let haystack = self.text(block, "string1").await?;
                let needle = self.text(block, "string2").await?;
                Some(Value::Bool(operators::contains(&haystack, &needle)))
            }
            Opcode::Round => Some(Value::Number(self.num(block, "num").await?.round())),
            Opcode::MathOp => {
                let op = self.text(block, "operator").await?;
                let n = self.num(block, "num").await?;
                Some(Value::Number(operators::math_op(&op, n)?))
            }

            // data
            Opcode::SetVariableTo => {
                let name = self.text(block, "variable").await?;
                let value = self.arg(block, "value").await?;
                target.scope().resolve(&name)?.set(value);
                None
            }
            Opcode::ChangeVariableBy => {
                let name = self.text(block, "variable").await?;
                let delta = self.num(block, "value").await?;
                let var = target.scope().resolve(&name)?;
                let current = number(&var.get(), &block.name)?;
                var.set(Value::Number(current + delta));
                None
            }

            Opcode::Unsupported => {
                warn_unsupported(&block.name);
                None
            }
        };
        Ok(out)
    }
}
