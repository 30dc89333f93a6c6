//! Link activity: watch non-chat traffic on the interface and poke the link awake when it goes quiet.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufRead;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::capture::{CaptureError, CaptureStream};

/// Opaque action that may bring the link back. No result, no guaranteed effect.
pub trait LinkTrigger: Send + Sync {
    fn invoke(&self);
}

/// Runs an external program (e.g. the AirDrop window script) without waiting for it.
pub struct CommandTrigger {
    program: String,
    args: Vec<String>,
}

impl LinkTrigger for CommandTrigger {
    fn invoke(&self) {
        let spawned = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(e) => log::warn!("link trigger {} failed: {e}", self.program),
        }
    }
}

/// Used when no trigger is configured.
pub struct NoopTrigger;

impl LinkTrigger for NoopTrigger {
    fn invoke(&self) {
        log::info!("link is idle and no link_trigger is configured");
    }
}

/// Build the trigger from `[program, args...]`; empty means none.
pub fn trigger_from_argv(argv: &[String]) -> Arc<dyn LinkTrigger> {
    match argv.split_first() {
        Some((program, args)) => Arc::new(CommandTrigger {
            program: program.clone(),
            args: args.to_vec(),
        }),
        None => Arc::new(NoopTrigger),
    }
}

/// When the link last showed signs of life.
#[derive(Default)]
pub struct LinkActivity {
    last: Mutex<Option<Instant>>,
}

impl LinkActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark(&self) {
        *self.last.lock().await = Some(Instant::now());
    }

    /// Time since the last activity; `Duration::MAX` if there never was any.
    pub async fn idle_for(&self) -> Duration {
        match *self.last.lock().await {
            Some(t) => t.elapsed(),
            None => Duration::MAX,
        }
    }
}

/// Mark activity for every line of capture output. Returns when the capture fails.
pub async fn run_activity_monitor<R: AsyncBufRead + Unpin>(
    mut stream: CaptureStream<R>,
    activity: Arc<LinkActivity>,
) -> CaptureError {
    loop {
        match stream.next_line().await {
            Ok(_) => activity.mark().await,
            Err(e) => return e,
        }
    }
}

/// Startup check: wait up to `within` for activity. Returns whether any was seen.
pub async fn wait_for_activity(activity: &LinkActivity, within: Duration) -> bool {
    let deadline = Instant::now().checked_add(within);
    loop {
        if activity.idle_for().await <= within {
            return true;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Every `check_every`, invoke the trigger if the link has been idle longer than `idle`.
/// Activity is reset after each invocation so the trigger does not fire on every check.
pub async fn run_watchdog(
    activity: Arc<LinkActivity>,
    idle: Duration,
    check_every: Duration,
    trigger: Arc<dyn LinkTrigger>,
) {
    loop {
        tokio::time::sleep(check_every).await;
        if activity.idle_for().await > idle {
            log::info!("no link activity for {idle:?}; invoking link trigger");
            trigger.invoke();
            activity.mark().await;
        }
    }
}
