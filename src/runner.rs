//! Sequential playbook execution with per-step failure policy and deferred handlers.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::errors::ProvisionError;
use crate::step::{Context, Handler, OnFailure, Playbook, State, Step};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum Outcome {
    Satisfied,
    Applied,
    WouldApply(String),
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub policy: OnFailure,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandlerRecord {
    pub handler: Handler,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub playbook: String,
    pub dry_run: bool,
    pub steps: Vec<StepRecord>,
    pub handlers: Vec<HandlerRecord>,
    /// Name of the step (or handler) that stopped the run.
    pub aborted_at: Option<String>,
}

impl Report {
    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.outcome)).count()
    }

    pub fn changed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Applied))
    }

    /// Failed steps whose policy let the run continue.
    pub fn warnings(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.policy == OnFailure::Continue && matches!(s.outcome, Outcome::Failed(_)))
            .count()
    }

    fn failure_message(&self, at: &str) -> Option<String> {
        let from_steps = self.steps.iter().find_map(|s| match &s.outcome {
            Outcome::Failed(m) if s.name == at => Some(m.clone()),
            _ => None,
        });
        from_steps.or_else(|| {
            self.handlers.iter().find_map(|h| match &h.outcome {
                Outcome::Failed(m) if format!("handler: {}", h.handler) == at => Some(m.clone()),
                _ => None,
            })
        })
    }

    pub fn into_result(self) -> Result<Report, ProvisionError> {
        match &self.aborted_at {
            None => Ok(self),
            Some(step) => Err(ProvisionError::Aborted {
                step: step.clone(),
                message: self
                    .failure_message(step)
                    .unwrap_or_else(|| "failed".to_string()),
            }),
        }
    }
}

/// Progress sink; the CLI prints colored lines, tests stay silent.
pub trait Progress {
    fn step_started(&self, _name: &str) {}
    fn step_finished(&self, _name: &str, _outcome: &Outcome) {}
    fn handler_finished(&self, _handler: Handler, _outcome: &Outcome) {}
}

pub struct Silent;
impl Progress for Silent {}

pub struct Runner<'a> {
    cx: &'a Context,
    dry_run: bool,
    progress: &'a dyn Progress,
}

impl<'a> Runner<'a> {
    pub fn new(cx: &'a Context, dry_run: bool, progress: &'a dyn Progress) -> Self {
        Self {
            cx,
            dry_run,
            progress,
        }
    }

    pub fn run(&self, playbook: &Playbook) -> Report {
        tracing::info!(playbook = %playbook.name, dry_run = self.dry_run, "playbook started");
        let mut report = Report {
            playbook: playbook.name.clone(),
            dry_run: self.dry_run,
            steps: Vec::new(),
            handlers: Vec::new(),
            aborted_at: None,
        };
        let mut pending: BTreeSet<Handler> = BTreeSet::new();

        for step in &playbook.steps {
            let name = step.name();
            if report.aborted_at.is_some() {
                report.steps.push(StepRecord {
                    name,
                    policy: step.on_failure(),
                    outcome: Outcome::Skipped("an earlier step aborted".to_string()),
                });
                continue;
            }
            if step.flushes_handlers() && !self.flush(&mut pending, &mut report) {
                report.steps.push(StepRecord {
                    name,
                    policy: step.on_failure(),
                    outcome: Outcome::Skipped("a handler failed".to_string()),
                });
                continue;
            }

            self.progress.step_started(&name);
            let outcome = self.run_step(step.as_ref());
            self.progress.step_finished(&name, &outcome);
            match &outcome {
                Outcome::Applied | Outcome::WouldApply(_) => {
                    pending.extend(step.notifies());
                    tracing::info!(step = %name, ?outcome, "step changed");
                }
                Outcome::Failed(msg) => {
                    if step.on_failure() == OnFailure::Abort {
                        tracing::error!(step = %name, error = %msg, "step failed, aborting");
                        report.aborted_at = Some(name.clone());
                    } else {
                        tracing::warn!(step = %name, error = %msg, "step failed, continuing");
                    }
                }
                _ => tracing::debug!(step = %name, ?outcome, "step"),
            }
            report.steps.push(StepRecord {
                name,
                policy: step.on_failure(),
                outcome,
            });
        }

        // Handlers still run after an abort so configs already written take effect.
        self.flush(&mut pending, &mut report);
        tracing::info!(
            playbook = %playbook.name,
            changed = report.changed(),
            aborted = report.aborted_at.is_some(),
            "playbook finished"
        );
        report
    }

    fn run_step(&self, step: &dyn Step) -> Outcome {
        let state = match step.check(self.cx) {
            Ok(s) => s,
            Err(e) => return Outcome::Failed(format!("probe failed: {}", chain(&e))),
        };
        let reason = match state {
            State::Satisfied => return Outcome::Satisfied,
            State::Missing(reason) => reason,
        };
        if self.dry_run {
            return Outcome::WouldApply(reason);
        }
        if let Err(e) = step.apply(self.cx) {
            return Outcome::Failed(chain(&e));
        }
        match step.verify(self.cx) {
            Ok(()) => Outcome::Applied,
            Err(e) => Outcome::Failed(format!("verification failed: {}", chain(&e))),
        }
    }

    /// Run and clear pending handlers. Returns false if one failed (the run is then aborted).
    fn flush(&self, pending: &mut BTreeSet<Handler>, report: &mut Report) -> bool {
        let mut ok = true;
        for handler in std::mem::take(pending) {
            let outcome = if self.dry_run {
                Outcome::WouldApply("queued by a changed step".to_string())
            } else {
                match handler.run(self.cx) {
                    Ok(()) => Outcome::Applied,
                    Err(e) => Outcome::Failed(chain(&e)),
                }
            };
            self.progress.handler_finished(handler, &outcome);
            if let Outcome::Failed(msg) = &outcome {
                tracing::error!(%handler, error = %msg, "handler failed");
                ok = false;
                if report.aborted_at.is_none() {
                    report.aborted_at = Some(format!("handler: {handler}"));
                }
            }
            report.handlers.push(HandlerRecord { handler, outcome });
        }
        ok
    }
}

fn chain(e: &anyhow::Error) -> String {
    crate::errors::display_error_chain(e)
}
