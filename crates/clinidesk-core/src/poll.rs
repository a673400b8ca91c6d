//! Summary generation poll loop.
//!
//! `Idle -> Polling -> Ready -> Idle`, with dismissal returning to `Idle` from
//! anywhere. Timer events carry the generation of the session that scheduled
//! them, so anything still queued from a cancelled session is ignored.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::gateway::ApiGateway;
use crate::schedule::ScheduledTask;

/// Status reported while the server is still working
pub const PROCESSING: &str = "processing";

pub const IN_PROGRESS_MESSAGE: &str = "Generating summary, this can take a moment...";
pub const REFRESHING_MESSAGE: &str = "Summary finished. Refreshing consultations...";

pub fn generate_summary_path(consultation_id: i64) -> String {
    format!("/consultations/generate-summary/{}/", consultation_id)
}

pub fn summary_status_path(consultation_id: i64) -> String {
    format!("/consultations/{}/summary_status/", consultation_id)
}

/// Ask the server to start generating a summary
pub async fn request_summary(gateway: &ApiGateway, consultation_id: i64) -> bool {
    gateway.post(&generate_summary_path(consultation_id), None).await.ok
}

/// Current job status, `None` when the check failed or carried no status
pub async fn fetch_summary_status(gateway: &ApiGateway, consultation_id: i64) -> Option<String> {
    let response = gateway.get(&summary_status_path(consultation_id)).await;
    if !response.ok {
        return None;
    }
    response
        .json()
        .and_then(|v| v.get("status"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    Tick { generation: u64 },
    Close { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling { consultation_id: i64, generation: u64 },
    Ready { consultation_id: i64, generation: u64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryDialog {
    pub visible: bool,
    pub message: String,
}

pub struct SummaryPoller<M> {
    state: PollState,
    dialog: SummaryDialog,
    generation: u64,
    timer: Option<ScheduledTask>,
    interval: Duration,
    close_delay: Duration,
    tx: UnboundedSender<M>,
}

impl<M> SummaryPoller<M>
where
    M: From<PollEvent> + Send + 'static,
{
    pub fn new(interval: Duration, close_delay: Duration, tx: UnboundedSender<M>) -> Self {
        Self {
            state: PollState::Idle,
            dialog: SummaryDialog::default(),
            generation: 0,
            timer: None,
            interval,
            close_delay,
            tx,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn dialog(&self) -> &SummaryDialog {
        &self.dialog
    }

    pub fn is_idle(&self) -> bool {
        self.state == PollState::Idle
    }

    pub fn consultation_id(&self) -> Option<i64> {
        match self.state {
            PollState::Idle => None,
            PollState::Polling { consultation_id, .. } | PollState::Ready { consultation_id, .. } => {
                Some(consultation_id)
            }
        }
    }

    /// Begin tracking a job whose generation request succeeded. Any session
    /// already running is cancelled first.
    pub fn start(&mut self, consultation_id: i64) -> u64 {
        self.stop_timer();
        self.generation += 1;
        let generation = self.generation;

        self.state = PollState::Polling { consultation_id, generation };
        self.dialog = SummaryDialog {
            visible: true,
            message: IN_PROGRESS_MESSAGE.to_string(),
        };
        self.timer = Some(ScheduledTask::every(self.interval, self.tx.clone(), move || {
            M::from(PollEvent::Tick { generation })
        }));

        info!(consultation_id, generation, "polling summary status");
        generation
    }

    /// Route a timer event. Returns the consultation whose status should be
    /// checked now, if any.
    pub fn handle(&mut self, event: PollEvent) -> Option<i64> {
        match event {
            PollEvent::Tick { generation } => self.on_tick(generation),
            PollEvent::Close { generation } => {
                self.on_close(generation);
                None
            }
        }
    }

    pub fn on_tick(&self, generation: u64) -> Option<i64> {
        match self.state {
            PollState::Polling { consultation_id, generation: live } if live == generation => {
                Some(consultation_id)
            }
            _ => None,
        }
    }

    /// Feed the result of a status check. `None` means the check failed and
    /// is treated like "processing". Returns true when the consultation list
    /// should be reloaded.
    pub fn on_status(&mut self, generation: u64, status: Option<&str>) -> bool {
        let PollState::Polling { consultation_id, generation: live } = self.state else {
            return false;
        };
        if live != generation {
            return false;
        }

        match status {
            None | Some(PROCESSING) => {
                debug!(consultation_id, "summary still processing");
                false
            }
            Some(terminal) => {
                info!(consultation_id, status = terminal, "summary job finished");
                self.stop_timer();
                self.state = PollState::Ready { consultation_id, generation };
                self.dialog.message = REFRESHING_MESSAGE.to_string();
                self.timer = Some(ScheduledTask::after(
                    self.close_delay,
                    self.tx.clone(),
                    M::from(PollEvent::Close { generation }),
                ));
                true
            }
        }
    }

    pub fn on_close(&mut self, generation: u64) {
        if let PollState::Ready { generation: live, .. } = self.state {
            if live == generation {
                self.finish();
            }
        }
    }

    /// The user closed the dialog. The server keeps working, we stop watching.
    pub fn dismiss(&mut self) {
        if !self.is_idle() {
            info!(consultation_id = ?self.consultation_id(), "summary dialog dismissed");
        }
        self.finish();
    }

    pub fn shutdown(&mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.stop_timer();
        self.state = PollState::Idle;
        self.dialog = SummaryDialog::default();
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}
