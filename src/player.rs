// ▶️ Player - runs a Scheduler on the tokio clock
//
// One task owns the Scheduler. It sleeps until the next deadline or until a
// command arrives; the sleep future is rebuilt every iteration, so any command
// drops the pending timer before a new one is armed.

use crate::error::{Error, Result};
use crate::scheduler::{QuotePhase, Scheduler, SchedulerState};
use crate::timeline::{SchedulePolicy, TimelineEntry};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub enum PlayerCommand {
    ReplaceTimeline(Vec<TimelineEntry>),
    Suspend,
    Resume,
    Shutdown,
}

/// Snapshot published after every state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowShowing {
    pub index: usize,
    pub total: usize,
    pub entry: TimelineEntry,
    pub phase: QuotePhase,
    pub state: SchedulerState,
}

impl NowShowing {
    fn from_scheduler(scheduler: &Scheduler) -> Self {
        NowShowing {
            index: scheduler.current_index(),
            total: scheduler.timeline().len(),
            entry: scheduler.current().clone(),
            phase: scheduler.quote_phase(),
            state: scheduler.state(),
        }
    }
}

pub struct Player {
    commands: mpsc::Sender<PlayerCommand>,
    now_showing: watch::Receiver<NowShowing>,
    handle: JoinHandle<()>,
}

impl Player {
    /// Spawn the player task on the current tokio runtime
    pub fn spawn(timeline: Vec<TimelineEntry>, policy: SchedulePolicy) -> Self {
        let scheduler = Scheduler::new(timeline, policy);
        let (tx, now_showing) = watch::channel(NowShowing::from_scheduler(&scheduler));
        let (commands, rx) = mpsc::channel(32);

        let handle = tokio::spawn(run(scheduler, rx, tx));

        Player {
            commands,
            now_showing,
            handle,
        }
    }

    pub async fn replace_timeline(&self, timeline: Vec<TimelineEntry>) -> Result<()> {
        self.send(PlayerCommand::ReplaceTimeline(timeline)).await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.send(PlayerCommand::Suspend).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(PlayerCommand::Resume).await
    }

    /// Latest published snapshot
    pub fn now_showing(&self) -> NowShowing {
        self.now_showing.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NowShowing> {
        self.now_showing.clone()
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) -> Result<()> {
        // The task may already be gone; joining below is what matters
        let _ = self.commands.send(PlayerCommand::Shutdown).await;
        self.handle.await.map_err(|_| Error::PlayerStopped)
    }

    async fn send(&self, command: PlayerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::PlayerStopped)
    }
}

async fn run(
    mut scheduler: Scheduler,
    mut commands: mpsc::Receiver<PlayerCommand>,
    now_showing: watch::Sender<NowShowing>,
) {
    let epoch = Instant::now();
    let now_ms = move || epoch.elapsed().as_millis() as u64;

    scheduler.start(now_ms());
    now_showing.send_replace(NowShowing::from_scheduler(&scheduler));
    info!(entries = scheduler.timeline().len(), "player started");

    loop {
        let deadline = scheduler.next_deadline();
        let sleep = async move {
            match deadline {
                Some(ms) => tokio::time::sleep_until(epoch + Duration::from_millis(ms)).await,
                None => std::future::pending::<()>().await,
            }
        };

        let changed = tokio::select! {
            _ = sleep => !scheduler.tick(now_ms()).is_empty(),
            command = commands.recv() => match command {
                Some(PlayerCommand::ReplaceTimeline(timeline)) => {
                    scheduler.replace_timeline(timeline, now_ms())
                }
                Some(PlayerCommand::Suspend) => {
                    debug!("display suspended");
                    scheduler.suspend();
                    true
                }
                Some(PlayerCommand::Resume) => {
                    debug!("display resumed");
                    scheduler.resume(now_ms());
                    true
                }
                Some(PlayerCommand::Shutdown) | None => break,
            },
        };

        if changed {
            now_showing.send_replace(NowShowing::from_scheduler(&scheduler));
        }
    }

    info!("player stopped");
}

// ============================================================================
// TESTS
// ============================================================================
