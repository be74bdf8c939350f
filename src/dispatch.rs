// Dispatcher - bounded worker pool, two phases
//
// Phase 1 applies every identity row, Phase 2 every affiliation row. Each
// phase admits at most `workers` rows at a time; the first hard error stops
// admission, already admitted rows are drained, then the error is returned.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::cache::RefKind;
use crate::config::RunConfig;
use crate::context::{RunContext, UpdateCounts};
use crate::enrollment::reconcile_enrollment;
use crate::error::ReconcileError;
use crate::identity::reconcile_identity;
use crate::outcome::{Outcome, Tally};
use crate::row::ChangeRow;
use crate::store::Store;

/// Signature shared by both reconcilers.
pub type Reconciler =
    fn(&RunContext, &dyn Store, &ChangeRow) -> Result<Outcome, ReconcileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Identities,
    Enrollments,
}

impl Phase {
    pub fn reconciler(self) -> Reconciler {
        match self {
            Phase::Identities => reconcile_identity,
            Phase::Enrollments => reconcile_enrollment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseState {
    NotStarted,
    Running,
    /// No more rows are admitted; in-flight rows are finishing.
    Draining,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub state: PhaseState,
    pub tally: Tally,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            state: PhaseState::NotStarted,
            tally: Tally::default(),
        }
    }

    fn transition(&mut self, next: PhaseState) {
        debug!("{:?} phase: {:?} -> {:?}", self.phase, self.state, next);
        self.state = next;
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub identities: PhaseReport,
    pub enrollments: PhaseReport,
    pub updated: UpdateCounts,
    pub missing_organizations: Vec<String>,
    pub missing_slugs: Vec<String>,
}

pub struct Dispatcher<'s> {
    store: &'s dyn Store,
    ctx: RunContext,
    /// Every phase that ran, including one that stopped on an error.
    reports: Mutex<Vec<PhaseReport>>,
}

impl<'s> Dispatcher<'s> {
    pub fn new(store: &'s dyn Store, config: RunConfig) -> Self {
        Self {
            store,
            ctx: RunContext::new(config),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn reports(&self) -> Vec<PhaseReport> {
        self.reports.lock().clone()
    }

    /// Run both phases. Phase 2 only starts once Phase 1 finished cleanly.
    pub fn run(
        &self,
        identities: &[ChangeRow],
        enrollments: &[ChangeRow],
    ) -> Result<RunReport, ReconcileError> {
        let identities = self.run_phase(Phase::Identities, identities)?;
        self.ctx.locks.reset();
        let enrollments = self.run_phase(Phase::Enrollments, enrollments)?;

        Ok(RunReport {
            identities,
            enrollments,
            updated: self.ctx.update_counts(),
            missing_organizations: self.ctx.cache.missing_keys(RefKind::Organization),
            missing_slugs: self.ctx.cache.missing_keys(RefKind::ProjectSlug),
        })
    }

    pub fn run_phase(
        &self,
        phase: Phase,
        rows: &[ChangeRow],
    ) -> Result<PhaseReport, ReconcileError> {
        let workers = self.ctx.config.workers.max(1);
        let reconcile = phase.reconciler();
        let ctx = &self.ctx;
        let store = self.store;

        let mut report = PhaseReport::new(phase);
        let mut first_error: Option<ReconcileError> = None;
        info!("{:?}: {} rows, {} workers", phase, rows.len(), workers);
        report.transition(PhaseState::Running);

        std::thread::scope(|scope| {
            let (job_tx, job_rx) = crossbeam_channel::bounded::<&ChangeRow>(workers);
            let (result_tx, result_rx) = crossbeam_channel::unbounded();

            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for row in job_rx.iter() {
                        if result_tx.send(reconcile(ctx, store, row)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            let mut in_flight = 0usize;
            for row in rows {
                while let Ok(result) = result_rx.try_recv() {
                    in_flight -= 1;
                    settle(result, &mut report.tally, &mut first_error);
                }
                if first_error.is_none() && in_flight >= workers {
                    if let Ok(result) = result_rx.recv() {
                        in_flight -= 1;
                        settle(result, &mut report.tally, &mut first_error);
                    }
                }
                if first_error.is_some() {
                    break;
                }
                if job_tx.send(row).is_err() {
                    break;
                }
                in_flight += 1;
            }

            report.transition(PhaseState::Draining);
            drop(job_tx);
            for result in result_rx.iter() {
                settle(result, &mut report.tally, &mut first_error);
            }
        });

        report.transition(PhaseState::Done);
        self.reports.lock().push(report.clone());
        if let Some(err) = first_error {
            error!(
                "{:?}: stopped after {} rows ({} errors)",
                phase, report.tally.rows, report.tally.errors
            );
            return Err(err);
        }

        let counts = self.ctx.update_counts();
        let tally = &report.tally;
        match phase {
            Phase::Identities => info!(
                "Updated {} identities, {} uidentities, {} profiles",
                counts.identities, counts.uidentities, counts.profiles
            ),
            Phase::Enrollments => info!(
                "Updated {} enrollments, {} uidentities, {} profiles",
                counts.enrollments, counts.uidentities, counts.profiles
            ),
        }
        info!(
            "{:?}: {} applied, {} unchanged, {} dry run, {} collisions, {} warnings",
            phase, tally.applied, tally.no_change, tally.dry_run, tally.collisions, tally.warnings
        );

        Ok(report)
    }
}

fn settle(
    result: Result<Outcome, ReconcileError>,
    tally: &mut Tally,
    first_error: &mut Option<ReconcileError>,
) {
    match result {
        Ok(outcome) => tally.record(&outcome),
        Err(err) => {
            tally.record_error();
            if first_error.is_none() {
                *first_error = Some(err);
            } else {
                error!("{}", err);
            }
        }
    }
}
