// One controller per physical servo. Servos always seek at full speed, so the
// controller fakes smooth travel by stepping the angle with a short delay, and
// rationalizes bursts of queued motion requests down to the minimal action set
// before each pass so a backlog never turns into jerky full-range swings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use rusttune_core::MotionSettings;

use crate::hw::ServoDriver;

pub const HOME_ANGLE: u8 = 0;
pub const MAX_ANGLE: u8 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoId {
    Tx,
    Ant,
}

impl ServoId {
    pub fn label(self) -> &'static str {
        match self {
            ServoId::Tx => "tx",
            ServoId::Ant => "ant",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoCommand {
    Home,
    Move(u8),
    TestRange,
    SetPulseRange { low: u16, high: u16 },
    Configure(MotionSettings),
}

#[derive(Debug, Clone)]
pub struct ServoTiming {
    /// Pending-queue poll cadence; also bounds how fast terminate is observed.
    pub poll: Duration,
    /// Pause between the two legs of the test sweep.
    pub test_pause: Duration,
}

impl Default for ServoTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            test_pause: Duration::from_secs(2),
        }
    }
}

/// Producer-side handle to a running servo controller.
pub struct ServoHandle {
    id: ServoId,
    cmd_tx: mpsc::UnboundedSender<ServoCommand>,
    term: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ServoHandle {
    /// Enqueue a command; never blocks, safe against the running loop.
    pub fn post(&self, cmd: ServoCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    /// New pulse-width mapping for subsequent moves. Values are the caller's
    /// responsibility.
    pub fn set_pulse_range(&self, low: u16, high: u16) {
        self.post(ServoCommand::SetPulseRange { low, high });
    }

    pub fn test_range(&self) {
        self.post(ServoCommand::TestRange);
    }

    pub fn configure(&self, settings: MotionSettings) {
        self.post(ServoCommand::Configure(settings));
    }

    pub fn id(&self) -> ServoId {
        self.id
    }

    /// Cooperative stop, observed within one poll interval (or one motion
    /// step). Any motion in flight stops at the last commanded angle; the
    /// servo is NOT homed first.
    pub async fn shutdown(self) {
        self.term.store(true, Ordering::Relaxed);
        if let Err(e) = self.task.await {
            error!(servo = self.id.label(), error = %e, "servo task failed");
        }
    }
}

pub fn spawn(
    id: ServoId,
    driver: Box<dyn ServoDriver>,
    pulse_range: (u16, u16),
    timing: ServoTiming,
    progress: mpsc::UnboundedSender<u8>,
) -> ServoHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let term = Arc::new(AtomicBool::new(false));
    let worker = ServoLoop {
        id,
        driver,
        angle: HOME_ANGLE,
        settings: MotionSettings::default(),
        cmd_rx,
        progress,
        term: term.clone(),
        timing,
    };
    let task = tokio::spawn(worker.run(pulse_range));
    ServoHandle {
        id,
        cmd_tx,
        term,
        task,
    }
}

/// What one drain of the pending queue boils down to.
#[derive(Debug, Default, PartialEq, Eq)]
struct Plan {
    settings: Option<MotionSettings>,
    pulse_range: Option<(u16, u16)>,
    home: bool,
    target: Option<u8>,
    test: bool,
}

struct ServoLoop {
    id: ServoId,
    driver: Box<dyn ServoDriver>,
    angle: u8,
    settings: MotionSettings,
    cmd_rx: mpsc::UnboundedReceiver<ServoCommand>,
    progress: mpsc::UnboundedSender<u8>,
    term: Arc<AtomicBool>,
    timing: ServoTiming,
}

impl ServoLoop {
    async fn run(mut self, pulse_range: (u16, u16)) {
        if let Err(e) = self.driver.set_pulse_range(pulse_range.0, pulse_range.1) {
            error!(servo = self.id.label(), error = %e, "initial pulse range failed");
        }
        let mut tick = interval(self.timing.poll);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.term.load(Ordering::Relaxed) {
            tick.tick().await;
            let plan = self.drain();
            self.execute(plan).await;
        }
        info!(servo = self.id.label(), "servo loop stopped");
    }

    /// Drain the whole queue, keeping only the last home, the last move target
    /// and the test flag; configuration entries are last-value-wins too.
    fn drain(&mut self) -> Plan {
        let mut plan = Plan::default();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                ServoCommand::Home => plan.home = true,
                ServoCommand::Move(angle) => plan.target = Some(angle),
                ServoCommand::TestRange => plan.test = true,
                ServoCommand::SetPulseRange { low, high } => {
                    plan.pulse_range = Some((low, high));
                }
                ServoCommand::Configure(s) => plan.settings = Some(s),
            }
        }
        plan
    }

    async fn execute(&mut self, plan: Plan) {
        if let Some(s) = plan.settings {
            debug!(servo = self.id.label(), ?s, "settings updated");
            self.settings = s;
        }
        if let Some((low, high)) = plan.pulse_range {
            if let Err(e) = self.driver.set_pulse_range(low, high) {
                error!(servo = self.id.label(), error = %e, "pulse range failed");
            }
        }
        if plan.home {
            self.home();
        }
        if let Some(target) = plan.target {
            let delay = Duration::from_millis(self.settings.track_delay_ms);
            self.smooth_move(target, self.settings.track_inc, delay).await;
        }
        if plan.test {
            self.test_sweep().await;
        }
    }

    /// Instantaneous jump to 0, always reported.
    fn home(&mut self) {
        if let Err(e) = self.driver.set_angle(HOME_ANGLE) {
            error!(servo = self.id.label(), error = %e, "home failed");
            return;
        }
        self.angle = HOME_ANGLE;
        self.report(HOME_ANGLE);
    }

    /// Step from the current angle toward `target`, reporting every position.
    /// The final report of `target` itself is unconditional, so a move to the
    /// current angle still reports exactly once.
    async fn smooth_move(&mut self, target: u8, inc: u8, delay: Duration) {
        let t = i32::from(target);
        let mut at = i32::from(self.angle);
        let step = if t >= at {
            i32::from(inc.max(1))
        } else {
            -i32::from(inc.max(1))
        };
        loop {
            let next = at + step;
            if (step > 0 && next >= t) || (step < 0 && next <= t) {
                break;
            }
            if self.term.load(Ordering::Relaxed) {
                debug!(servo = self.id.label(), "terminated mid-move");
                return;
            }
            if let Err(e) = self.driver.set_angle(next as u8) {
                error!(servo = self.id.label(), error = %e, "step failed; aborting move");
                return;
            }
            self.angle = next as u8;
            self.report(next as u8);
            sleep(delay).await;
            at = next;
        }
        if let Err(e) = self.driver.set_angle(target) {
            error!(servo = self.id.label(), error = %e, "seek failed");
            return;
        }
        self.angle = target;
        self.report(target);
    }

    async fn test_sweep(&mut self) {
        let inc = self.settings.scan_inc;
        let delay = Duration::from_millis(self.settings.scan_delay_ms);
        self.smooth_move(HOME_ANGLE, inc, delay).await;
        sleep(self.timing.test_pause).await;
        self.smooth_move(MAX_ANGLE, inc, delay).await;
    }

    fn report(&self, angle: u8) {
        let _ = self.progress.send(angle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::SimServo;

    fn fast_timing() -> ServoTiming {
        ServoTiming {
            poll: Duration::from_millis(100),
            test_pause: Duration::from_millis(200),
        }
    }

    fn spawn_sim() -> (ServoHandle, mpsc::UnboundedReceiver<u8>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn(
            ServoId::Tx,
            Box::new(SimServo::new("tx")),
            (600, 2000),
            fast_timing(),
            tx,
        );
        (handle, rx)
    }

    async fn collect_until(rx: &mut mpsc::UnboundedReceiver<u8>, last: u8) -> Vec<u8> {
        let mut got = Vec::new();
        while let Some(angle) = rx.recv().await {
            got.push(angle);
            if angle == last {
                break;
            }
        }
        got
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_moves_collapses_to_the_last_target() {
        let (handle, mut rx) = spawn_sim();
        handle.post(ServoCommand::Move(45));
        handle.post(ServoCommand::Move(90));

        let got = collect_until(&mut rx, 90).await;
        assert_eq!(got, (1..=90).collect::<Vec<u8>>());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn home_executes_before_the_move() {
        let (handle, mut rx) = spawn_sim();
        handle.post(ServoCommand::Move(45));
        handle.post(ServoCommand::Home);
        handle.post(ServoCommand::Move(90));

        let got = collect_until(&mut rx, 90).await;
        let mut expected = vec![0];
        expected.extend(1..=90);
        assert_eq!(got, expected);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn move_to_the_current_angle_reports_exactly_once() {
        let (handle, mut rx) = spawn_sim();
        handle.post(ServoCommand::Move(0));
        assert_eq!(rx.recv().await, Some(0));

        // Nothing else pending: the next report can only come from a new move.
        handle.post(ServoCommand::Move(2));
        let got = collect_until(&mut rx, 2).await;
        assert_eq!(got, vec![1, 2]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn downward_moves_step_negative() {
        let (handle, mut rx) = spawn_sim();
        handle.post(ServoCommand::Move(3));
        assert_eq!(collect_until(&mut rx, 3).await, vec![1, 2, 3]);

        handle.post(ServoCommand::Move(0));
        assert_eq!(collect_until(&mut rx, 0).await, vec![2, 1, 0]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_the_step_size() {
        let (handle, mut rx) = spawn_sim();
        handle.configure(MotionSettings {
            track_inc: 4,
            track_delay_ms: 10,
            scan_inc: 1,
            scan_delay_ms: 10,
        });
        handle.post(ServoCommand::Move(9));

        let got = collect_until(&mut rx, 9).await;
        assert_eq!(got, vec![4, 8, 9]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_homes_then_runs_to_full_scale() {
        let (handle, mut rx) = spawn_sim();
        handle.post(ServoCommand::Move(30));
        collect_until(&mut rx, 30).await;

        handle.test_range();
        let got = collect_until(&mut rx, MAX_ANGLE).await;
        let mut expected: Vec<u8> = (0..30).rev().collect();
        expected.extend(1..=MAX_ANGLE);
        assert_eq!(got, expected);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_range_reaches_the_driver() {
        let (driver, journal) = SimServo::recording("tx");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn(ServoId::Tx, Box::new(driver), (600, 2000), fast_timing(), tx);

        handle.set_pulse_range(500, 2400);
        handle.post(ServoCommand::Move(1));
        collect_until(&mut rx, 1).await;

        let ranges = journal.lock().unwrap().pulse_ranges.clone();
        assert_eq!(ranges, vec![(600, 2000), (500, 2400)]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_prompt_and_silences_progress() {
        let (handle, mut rx) = spawn_sim();
        handle.post(ServoCommand::Move(5));
        collect_until(&mut rx, 5).await;

        handle.shutdown().await;
        assert_eq!(rx.recv().await, None);
    }
}
