use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info};

use crate::events::{emit, Event, EventSink};
use crate::notifier::Notifier;
use crate::retry::CancelToken;
use crate::strategy::Strategy;

/// Single-flight cooperative loop over the registered strategies.
///
/// One tick evaluates every strategy in registration order (earliest
/// registered wins ties) and runs eligible ones sequentially; no two
/// strategies ever execute concurrently. The cancel token is consulted
/// between strategy executions and between ticks.
pub struct Scheduler {
    strategies: Vec<Box<dyn Strategy>>,
    tick: Duration,
    cancel: CancelToken,
    sink: Arc<dyn EventSink>,
    notifier: Option<Notifier>,
}

impl Scheduler {
    pub fn new(tick: Duration, cancel: CancelToken, sink: Arc<dyn EventSink>) -> Self {
        Self {
            strategies: Vec::new(),
            tick,
            cancel,
            sink,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        info!(strategy = strategy.name(), "strategy registered");
        self.strategies.push(strategy);
    }

    pub fn stop_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(&mut self) {
        info!(
            strategies = self.strategies.len(),
            tick_secs = self.tick.as_secs(),
            "scheduler started"
        );
        while !self.cancel.is_cancelled() {
            self.run_tick(Utc::now()).await;
            if !self.cancel.sleep(self.tick).await {
                break;
            }
        }
        info!("scheduler stopped");
    }

    /// One evaluation pass. A strategy error is logged and journaled but
    /// never stops the remaining strategies or future ticks.
    pub async fn run_tick(&mut self, now: DateTime<Utc>) {
        let cancel = self.cancel.clone();
        for strategy in &mut self.strategies {
            if cancel.is_cancelled() {
                break;
            }
            if !strategy.should_execute(now).await {
                continue;
            }
            info!(strategy = strategy.name(), "executing strategy");
            match strategy.execute(now).await {
                Ok(outcome) => {
                    info!(strategy = strategy.name(), outcome = ?outcome, "strategy finished");
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(strategy = strategy.name(), error = %message, "strategy execution failed");
                    emit(
                        self.sink.as_ref(),
                        Event::new(
                            "strategy_error",
                            json!({
                                "strategy": strategy.name(),
                                "error": message,
                            }),
                        ),
                    );
                    if let Some(notifier) = &self.notifier {
                        let _ = notifier
                            .alert(&format!("{} failed: {message}", strategy.name()))
                            .await;
                    }
                }
            }
        }
    }
}
