//! Macro engine.
//!
//! A cooperative interpreter driven by [`MacroEngine::tick`] from the main
//! loop. Each tick performs at most one command, or the due part of a
//! command's timed micro-steps. Nothing here sleeps: every wait is a
//! timestamp compared against the clock on a later tick.
//!
//! Control commands (`RepeatStart`, `RepeatEnd`, `ExecuteMacro`) take no
//! time and run in the same tick as the command that follows them. Default
//! pacing is owed after each completed command and paid just before the
//! next one that produces output, so nothing is paid after the last one.

use std::collections::{BTreeSet, VecDeque};
use std::mem;

use macropad_keymap::macros::{MAX_CLICKS, MAX_MOUSE_SPEED, MIN_MOUSE_SPEED};
use macropad_keymap::{ascii_to_key, KeyboardReport, MacroCommand, MacroLibrary};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::clock::Millis;
use crate::error::{Error, Result};
use crate::hid::{HidController, HidError, HidTransport};

/// Maximum number of suspended callers.
pub const STACK_CAPACITY: usize = 5;

const KEY_HOLD_MS: Millis = 10;
const TYPE_PRESS_MS: Millis = 10;
const TYPE_RELEASE_MS: Millis = 5;
const CLICK_HOLD_MS: Millis = 10;
const CLICK_GAP_MS: Millis = 50;
const MOVE_STEP_MS: Millis = 10;
const MOUSE_DELTA_MAX: i32 = 127;

/// Counters for one execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Id the execution was started with.
    pub macro_id: String,
    /// Commands that produced output (everything but delays and control).
    pub commands: usize,
    /// Sum of `Delay` and `RandomDelay` waits.
    pub delay_ms: u64,
    /// Sum of default pacing waits.
    pub pacing_ms: u64,
    /// Sum of waits inside commands (key holds, typing, clicks).
    pub step_ms: u64,
    pub aborted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Step {
    Press(Vec<u8>),
    Release(Vec<u8>),
    Consumer(u16),
    Buttons(u8),
    Move { dx: i8, dy: i8, wheel: i8 },
}

impl Step {
    fn apply<T: HidTransport>(
        &self,
        hid: &mut HidController<T>,
    ) -> std::result::Result<(), HidError> {
        match self {
            Step::Press(codes) => hid.press_keys(codes).map(drop),
            Step::Release(codes) => hid.release_keys(codes).map(drop),
            Step::Consumer(usage) => hid.send_consumer(*usage).map(drop),
            Step::Buttons(buttons) => hid.set_mouse_buttons(*buttons).map(drop),
            Step::Move { dx, dy, wheel } => hid.mouse_move(*dx, *dy, *wheel),
        }
    }
}

#[derive(Clone, Debug)]
struct Timed {
    step: Step,
    /// Wait before the next micro-step of the same command.
    wait_after: Millis,
}

fn timed(step: Step, wait_after: Millis) -> Timed {
    Timed { step, wait_after }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RepeatFrame {
    start_pc: usize,
    total: u16,
    done: u16,
}

/// A suspended caller.
#[derive(Clone, Debug)]
struct Frame {
    macro_id: String,
    pc: usize,
    repeat: Option<RepeatFrame>,
}

enum Flow {
    Continue,
    Finished,
    Aborted(Error),
}

struct Execution {
    current: String,
    pc: usize,
    stack: Vec<Frame>,
    repeat: Option<RepeatFrame>,
    next_step_at: Millis,
    steps: VecDeque<Timed>,
    pace_pending: bool,
    /// Keys pressed by `KeyDown` and not yet released.
    held: BTreeSet<u8>,
    stats: ExecutionStats,
}

impl Execution {
    fn new(id: &str, now: Millis) -> Self {
        Self {
            current: id.to_string(),
            pc: 0,
            stack: Vec::with_capacity(STACK_CAPACITY),
            repeat: None,
            next_step_at: now,
            steps: VecDeque::new(),
            pace_pending: false,
            held: BTreeSet::new(),
            stats: ExecutionStats {
                macro_id: id.to_string(),
                ..ExecutionStats::default()
            },
        }
    }

    /// Run queued micro-steps until one asks for a wait. A transport that
    /// is not ready leaves the step queued for the next tick.
    fn run_steps<T: HidTransport>(&mut self, now: Millis, hid: &mut HidController<T>) -> Flow {
        while let Some(front) = self.steps.front() {
            if let Err(e) = front.step.apply(hid) {
                debug!(macro_id = %self.current, error = %e, "macro step deferred");
                return Flow::Continue;
            }
            let wait = front.wait_after;
            self.steps.pop_front();
            if wait > 0 && !self.steps.is_empty() {
                self.next_step_at = now + wait;
                self.stats.step_ms += wait;
                return Flow::Continue;
            }
        }
        self.pace_pending = true;
        Flow::Continue
    }

    fn execute_next<T: HidTransport>(
        &mut self,
        now: Millis,
        lib: &MacroLibrary,
        hid: &mut HidController<T>,
        engine: &EngineTiming,
        rng: &mut StdRng,
    ) -> Flow {
        loop {
            let Some(mac) = lib.get(&self.current) else {
                return Flow::Aborted(Error::UnknownMacro(self.current.clone()));
            };
            let Some(command) = mac.commands.get(self.pc) else {
                match self.stack.pop() {
                    Some(frame) => {
                        trace!(macro_id = %frame.macro_id, pc = frame.pc, "return to caller");
                        self.current = frame.macro_id;
                        self.pc = frame.pc;
                        self.repeat = frame.repeat;
                        continue;
                    }
                    None => return Flow::Finished,
                }
            };

            match command {
                MacroCommand::RepeatStart { count } => {
                    self.repeat = Some(RepeatFrame {
                        start_pc: self.pc,
                        total: *count,
                        done: 0,
                    });
                    self.pc += 1;
                }
                MacroCommand::RepeatEnd => {
                    let jump = match self.repeat.as_mut() {
                        Some(frame) if frame.done + 1 < frame.total => {
                            frame.done += 1;
                            Some(frame.start_pc + 1)
                        }
                        _ => None,
                    };
                    match jump {
                        Some(pc) => self.pc = pc,
                        None => {
                            self.repeat = None;
                            self.pc += 1;
                        }
                    }
                }
                MacroCommand::ExecuteMacro { id } => {
                    if let Err(e) = self.enter(id, lib) {
                        return Flow::Aborted(e);
                    }
                }
                MacroCommand::Delay { ms } => {
                    self.pc += 1;
                    self.delay(now, *ms as Millis);
                    return Flow::Continue;
                }
                MacroCommand::RandomDelay { min_ms, max_ms } => {
                    let (lo, hi) = (*min_ms.min(max_ms), *min_ms.max(max_ms));
                    let ms = rng.gen_range(lo..=hi);
                    self.pc += 1;
                    self.delay(now, ms as Millis);
                    return Flow::Continue;
                }
                effect => {
                    if self.pace_pending && engine.pacing_ms > 0 {
                        self.pace_pending = false;
                        self.next_step_at = now + engine.pacing_ms;
                        self.stats.pacing_ms += engine.pacing_ms;
                        return Flow::Continue;
                    }
                    self.pace_pending = false;
                    trace!(
                        macro_id = %self.current,
                        pc = self.pc,
                        command = effect.type_name(),
                        "macro command"
                    );
                    self.steps = self.expand(effect, engine);
                    self.pc += 1;
                    self.stats.commands += 1;
                    return self.run_steps(now, hid);
                }
            }
        }
    }

    fn delay(&mut self, now: Millis, ms: Millis) {
        self.next_step_at = now + ms;
        self.stats.delay_ms += ms;
    }

    /// Suspend the current macro and switch to `id`.
    fn enter(&mut self, id: &str, lib: &MacroLibrary) -> Result<()> {
        if self.current == id || self.stack.iter().any(|f| f.macro_id == id) {
            return Err(Error::RecursiveMacro(id.to_string()));
        }
        if !lib.contains(id) {
            return Err(Error::UnknownMacro(id.to_string()));
        }
        if self.stack.len() >= STACK_CAPACITY {
            return Err(Error::MacroStackOverflow(STACK_CAPACITY));
        }
        let caller = mem::replace(&mut self.current, id.to_string());
        trace!(caller = %caller, callee = id, depth = self.stack.len() + 1, "nested macro");
        self.stack.push(Frame {
            macro_id: caller,
            pc: self.pc + 1,
            repeat: self.repeat.take(),
        });
        self.pc = 0;
        Ok(())
    }

    /// Turn an output command into its timed micro-steps.
    fn expand(&mut self, command: &MacroCommand, engine: &EngineTiming) -> VecDeque<Timed> {
        let mut steps = VecDeque::new();
        match command {
            MacroCommand::KeyPress { report } => {
                let codes = report.keycodes();
                steps.push_back(timed(Step::Press(codes.clone()), KEY_HOLD_MS));
                steps.push_back(timed(Step::Release(codes), 0));
            }
            MacroCommand::KeyDown { report } => {
                let codes = report.keycodes();
                self.held.extend(codes.iter().copied());
                steps.push_back(timed(Step::Press(codes), 0));
            }
            MacroCommand::KeyUp => {
                if !self.held.is_empty() {
                    let codes = mem::take(&mut self.held).into_iter().collect();
                    steps.push_back(timed(Step::Release(codes), 0));
                }
            }
            MacroCommand::ConsumerPress { usage } => {
                steps.push_back(timed(Step::Consumer(*usage), engine.consumer_hold_ms));
                steps.push_back(timed(Step::Consumer(0), 0));
            }
            MacroCommand::TypeText { text } => {
                for c in text.chars() {
                    let Some((modifiers, code)) = ascii_to_key(c) else {
                        trace!(?c, "no key for character, skipped");
                        continue;
                    };
                    let codes = KeyboardReport::from_keycodes(modifiers, &[code]).keycodes();
                    steps.push_back(timed(Step::Press(codes.clone()), TYPE_PRESS_MS));
                    steps.push_back(timed(Step::Release(codes), TYPE_RELEASE_MS));
                }
            }
            MacroCommand::MouseMove { dx, dy, speed } => {
                mouse_move_steps(&mut steps, *dx, *dy, *speed)
            }
            MacroCommand::MouseClick { buttons, clicks } => {
                for _ in 0..(*clicks).clamp(1, MAX_CLICKS) {
                    steps.push_back(timed(Step::Buttons(*buttons), CLICK_HOLD_MS));
                    steps.push_back(timed(Step::Buttons(0), CLICK_GAP_MS));
                }
            }
            MacroCommand::MouseScroll { amount } => {
                steps.push_back(timed(
                    Step::Move {
                        dx: 0,
                        dy: 0,
                        wheel: *amount,
                    },
                    0,
                ));
            }
            MacroCommand::Delay { .. }
            | MacroCommand::RandomDelay { .. }
            | MacroCommand::ExecuteMacro { .. }
            | MacroCommand::RepeatStart { .. }
            | MacroCommand::RepeatEnd => {}
        }
        steps
    }
}

/// Queue one relative move, split into reports that fit a signed byte.
fn push_move(steps: &mut VecDeque<Timed>, mut dx: i32, mut dy: i32, wait_after: Millis) {
    loop {
        let sx = dx.clamp(-MOUSE_DELTA_MAX, MOUSE_DELTA_MAX);
        let sy = dy.clamp(-MOUSE_DELTA_MAX, MOUSE_DELTA_MAX);
        dx -= sx;
        dy -= sy;
        let last = dx == 0 && dy == 0;
        steps.push_back(timed(
            Step::Move {
                dx: sx as i8,
                dy: sy as i8,
                wheel: 0,
            },
            if last { wait_after } else { 0 },
        ));
        if last {
            break;
        }
    }
}

/// Slow speeds (1..=5) glide in `10 - speed` increments; fast speeds jump
/// by the delta scaled with `speed - 4`.
fn mouse_move_steps(steps: &mut VecDeque<Timed>, dx: i32, dy: i32, speed: u8) {
    let speed = speed.clamp(MIN_MOUSE_SPEED, MAX_MOUSE_SPEED) as i32;
    if speed <= 5 {
        let n = 10 - speed;
        let (sx, sy) = (dx / n, dy / n);
        for _ in 0..n {
            push_move(steps, sx, sy, MOVE_STEP_MS);
        }
        let (rx, ry) = (dx - sx * n, dy - sy * n);
        if rx != 0 || ry != 0 {
            push_move(steps, rx, ry, MOVE_STEP_MS);
        }
    } else {
        let scale = speed - 4;
        push_move(steps, dx.saturating_mul(scale), dy.saturating_mul(scale), 0);
    }
}

struct EngineTiming {
    pacing_ms: Millis,
    consumer_hold_ms: Millis,
}

pub struct MacroEngine {
    execution: Option<Execution>,
    timing: EngineTiming,
    rng: StdRng,
    last_stats: Option<ExecutionStats>,
}

impl MacroEngine {
    pub fn new(pacing_ms: Millis, consumer_hold_ms: Millis) -> Self {
        Self::with_rng(pacing_ms, consumer_hold_ms, StdRng::from_entropy())
    }

    /// Engine with a reproducible `RandomDelay` sequence.
    pub fn with_seed(pacing_ms: Millis, consumer_hold_ms: Millis, seed: u64) -> Self {
        Self::with_rng(pacing_ms, consumer_hold_ms, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(pacing_ms: Millis, consumer_hold_ms: Millis, rng: StdRng) -> Self {
        Self {
            execution: None,
            timing: EngineTiming {
                pacing_ms,
                consumer_hold_ms,
            },
            rng,
            last_stats: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.execution.is_some()
    }

    /// Macro whose commands are currently being executed.
    pub fn current_macro(&self) -> Option<&str> {
        self.execution.as_ref().map(|e| e.current.as_str())
    }

    pub fn stack_depth(&self) -> usize {
        self.execution.as_ref().map_or(0, |e| e.stack.len())
    }

    /// Counters of the execution in progress.
    pub fn stats(&self) -> Option<&ExecutionStats> {
        self.execution.as_ref().map(|e| &e.stats)
    }

    /// Counters of the most recently ended execution.
    pub fn last_stats(&self) -> Option<&ExecutionStats> {
        self.last_stats.as_ref()
    }

    /// Begin executing `id` on the next tick. Returns `Ok(false)` when an
    /// execution is already in progress; the request is dropped.
    pub fn start(&mut self, id: &str, now: Millis, lib: &MacroLibrary) -> Result<bool> {
        if let Some(exec) = &self.execution {
            info!(
                macro_id = id,
                running = %exec.stats.macro_id,
                "macro already running, start ignored"
            );
            return Ok(false);
        }
        if !lib.contains(id) {
            return Err(Error::UnknownMacro(id.to_string()));
        }
        info!(macro_id = id, "macro started");
        self.execution = Some(Execution::new(id, now));
        Ok(true)
    }

    pub fn tick<T: HidTransport>(
        &mut self,
        now: Millis,
        lib: &MacroLibrary,
        hid: &mut HidController<T>,
    ) {
        let Some(exec) = self.execution.as_mut() else {
            return;
        };
        if now < exec.next_step_at {
            return;
        }
        let flow = if exec.steps.is_empty() {
            exec.execute_next(now, lib, hid, &self.timing, &mut self.rng)
        } else {
            exec.run_steps(now, hid)
        };
        match flow {
            Flow::Continue => {}
            Flow::Finished => self.finish(hid, false),
            Flow::Aborted(e) => {
                warn!(error = %e, "macro aborted");
                self.finish(hid, true);
            }
        }
    }

    /// Stop the execution in progress, if any, and release everything.
    pub fn abort<T: HidTransport>(&mut self, hid: &mut HidController<T>) {
        if self.execution.is_some() {
            info!("macro aborted on request");
            self.finish(hid, true);
        }
    }

    fn finish<T: HidTransport>(&mut self, hid: &mut HidController<T>, aborted: bool) {
        let Some(exec) = self.execution.take() else {
            return;
        };
        let mut stats = exec.stats;
        stats.aborted = aborted;
        debug!(
            macro_id = %stats.macro_id,
            commands = stats.commands,
            delay_ms = stats.delay_ms,
            pacing_ms = stats.pacing_ms,
            aborted,
            "macro ended"
        );
        if let Err(e) = hid.clear_all() {
            debug!(error = %e, "empty reports deferred");
        }
        self.last_stats = Some(stats);
    }
}
