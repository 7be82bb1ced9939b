//! The background driver: one task per session running the
//! plan → (review* → decide → moderate?)* → finalize state machine.
//!
//! The driver is the only writer to its session's store entries. An
//! iteration commits atomically: reviews are persisted only after every
//! reviewer succeeded, and a fatal error anywhere inside the iteration
//! leaves no partial artifacts behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::convergence::{decide, document_delta, ConvergencePolicy, DELTA_METRIC};
use crate::runtime::RuntimeInner;
use parley_agents::{MetaPlanner, Moderator, PlanRequest, Reviewer};
use parley_core::{
    ConvergenceCheck, ConvergenceReport, DocumentVersion, IterationRecord, LogLevel, ParleyError,
    ParticipantSummary, Result, Review, SessionEvent, SessionMeta, SessionStatus, SeverityCounts,
    StopDecision, StopRule,
};

pub(crate) enum DriveMode {
    /// Brand-new session: plan the roundtable, persist v1 from `content`.
    Fresh { content: String },
    /// Continuation: participants and history come from the store.
    Resume,
}

/// Entry point for the spawned task. Converts every failure into the
/// session's terminal state; never panics the runtime.
pub(crate) async fn drive(
    inner: Arc<RuntimeInner>,
    mut meta: SessionMeta,
    mode: DriveMode,
    cancel: Arc<AtomicBool>,
) {
    let session_id = meta.session_id.clone();
    match drive_inner(&inner, &mut meta, mode, &cancel).await {
        Ok(()) => {}
        Err(ParleyError::Cancelled) => {
            info!(session = %session_id, "session cancelled");
            meta.status = SessionStatus::Cancelled;
            meta.ended_at = Some(Utc::now());
            if let Err(e) = inner.store.update_session(&meta) {
                error!(session = %session_id, error = %e, "failed to persist cancelled status");
            }
            inner.bus.emit(
                &session_id,
                SessionEvent::log(LogLevel::Warn, "runtime", "session cancelled"),
            );
        }
        Err(e) => {
            error!(session = %session_id, error = %e, "session failed");
            meta.status = SessionStatus::Failed;
            meta.stopped_by = Some(StopRule::Error);
            meta.convergence_reason = Some(e.to_string());
            meta.ended_at = Some(Utc::now());
            if let Err(persist_err) = inner.store.update_session(&meta) {
                error!(session = %session_id, error = %persist_err, "failed to persist failed status");
            }
            // The last event before termination on the failure path.
            inner.bus.emit(
                &session_id,
                SessionEvent::log(LogLevel::Error, "runtime", e.to_string()),
            );
        }
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        Err(ParleyError::Cancelled)
    } else {
        Ok(())
    }
}

async fn drive_inner(
    inner: &Arc<RuntimeInner>,
    meta: &mut SessionMeta,
    mode: DriveMode,
    cancel: &AtomicBool,
) -> Result<()> {
    let session_id = meta.session_id.clone();
    let primary_model = meta
        .config
        .model
        .clone()
        .unwrap_or_else(|| inner.default_model.clone());

    // ── Planning / resumption ──────────────────────────────────
    let (mut current, mut history) = match mode {
        DriveMode::Fresh { content } => {
            meta.status = SessionStatus::Planning;
            inner.store.update_session(meta)?;
            inner.bus.emit(
                &session_id,
                SessionEvent::RoundtableGenerating {
                    message: "Generating roundtable participants".into(),
                    num_participants: meta.config.num_participants,
                },
            );

            let v1 = DocumentVersion::initial(&meta.title, &meta.document_type, &content);
            inner.store.save_version(&session_id, &v1)?;

            let planner = MetaPlanner::new(Arc::clone(&inner.client), &primary_model);
            let planned = planner
                .plan(&PlanRequest {
                    title: meta.title.clone(),
                    document_type: meta.document_type.clone(),
                    content,
                    goal: meta.goal.clone(),
                    participant_style: meta.config.participant_style.clone(),
                    num_participants: meta.config.num_participants,
                    preset: meta.config.preset,
                    model_strategy: meta.config.model_strategy,
                    primary_model: primary_model.clone(),
                })
                .await?;

            for warning in &planned.warnings {
                inner.bus.emit(
                    &session_id,
                    SessionEvent::log(LogLevel::Warn, "planner", warning.clone()),
                );
            }
            meta.participants = planned.participants;
            meta.moderator_focus = planned.moderator_focus;
            meta.convergence_criteria = planned.convergence_criteria;
            meta.warnings.extend(planned.warnings);
            meta.add_tokens("meta_planner", &planned.tokens);

            inner.bus.emit(
                &session_id,
                SessionEvent::RoundtableGenerated {
                    participants: meta.participants.iter().map(ParticipantSummary::from).collect(),
                    moderator_focus: meta.moderator_focus.clone(),
                },
            );

            meta.status = SessionStatus::Running;
            inner.store.update_session(meta)?;
            (v1, Vec::new())
        }
        DriveMode::Resume => {
            let report = inner
                .store
                .load_report(&session_id)?
                .ok_or_else(|| ParleyError::ReportNotReady(session_id.clone()))?;
            let current = inner.store.load_version(&session_id, report.final_version)?;
            info!(
                session = %session_id,
                from_iteration = report.iterations_count,
                from_version = report.final_version,
                "resuming refinement"
            );
            inner.bus.emit(
                &session_id,
                SessionEvent::log(
                    LogLevel::Info,
                    "runtime",
                    format!(
                        "resuming from iteration {} at v{}",
                        report.iterations_count, report.final_version
                    ),
                ),
            );
            (current, report.history)
        }
    };

    let policy = ConvergencePolicy::from(&meta.config);
    let participants = meta.participants.clone();
    let reviewers: Vec<Arc<Reviewer>> = participants
        .iter()
        .map(|spec| {
            Arc::new(Reviewer::new(
                spec.clone(),
                Arc::clone(&inner.client),
                &primary_model,
            ))
        })
        .collect();
    let moderator = Moderator::new(
        meta.moderator_focus.clone(),
        Arc::clone(&inner.client),
        &primary_model,
    );

    // ── Iteration loop ─────────────────────────────────────────
    loop {
        check_cancel(cancel)?;

        let iteration = history.len() as u32 + 1;
        let started_at = Utc::now();
        inner.bus.emit(
            &session_id,
            SessionEvent::IterationStart {
                iteration,
                max_iterations: meta.config.max_iterations,
            },
        );

        // Fan out one reviewer task per participant. Reviewers read the
        // immutable document and write into distinct result slots.
        let mut join_set = JoinSet::new();
        for (idx, reviewer) in reviewers.iter().enumerate() {
            let reviewer = Arc::clone(reviewer);
            let doc = current.clone();
            let bus = Arc::clone(&inner.bus);
            let sid = session_id.clone();
            join_set.spawn(async move {
                bus.emit(
                    &sid,
                    SessionEvent::CriticReviewStart {
                        critic: reviewer.name().to_string(),
                    },
                );
                let result = reviewer.review(&doc).await;
                if let Ok(outcome) = &result {
                    if outcome.salvaged {
                        bus.emit(
                            &sid,
                            SessionEvent::log(
                                LogLevel::Warn,
                                "reviewer",
                                format!("{} response salvaged after reformat", reviewer.name()),
                            ),
                        );
                    }
                    let review = &outcome.review;
                    bus.emit(
                        &sid,
                        SessionEvent::CriticReviewComplete {
                            critic: review.reviewer_name.clone(),
                            issues_count: review.issues.len(),
                            counts: SeverityCounts::from_reviews(std::slice::from_ref(review)),
                            top_issues: review.issues.iter().take(3).cloned().collect(),
                            tokens: review.tokens,
                        },
                    );
                }
                (idx, result)
            });
        }

        let mut slots: Vec<Option<Review>> = participants.iter().map(|_| None).collect();
        let mut failure: Option<ParleyError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, Ok(outcome))) => slots[idx] = Some(outcome.review),
                Ok((_, Err(e))) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
                Err(join_err) => {
                    if failure.is_none() {
                        failure = Some(ParleyError::SessionFailed(format!(
                            "reviewer task panicked: {join_err}"
                        )));
                    }
                }
            }
        }

        // Tokens consumed by completed reviewers count even when the
        // iteration is later discarded (failure or cancel).
        for (idx, slot) in slots.iter().enumerate() {
            if let Some(review) = slot {
                meta.add_tokens(&participants[idx].name, &review.tokens);
            }
        }

        if let Some(err) = failure {
            // One reviewer's failure fails the whole iteration; nothing
            // from it is persisted, except the raw output kept for
            // debugging a malformed review.
            if let ParleyError::MalformedReview { reviewer, raw, .. } = &err {
                inner
                    .store
                    .save_malformed_output(&session_id, current.version, reviewer, raw)?;
            }
            return Err(err);
        }
        check_cancel(cancel)?;

        // One review per participant, matched by name, in stable order.
        let mut reviews: Vec<Review> = Vec::with_capacity(participants.len());
        for (idx, slot) in slots.into_iter().enumerate() {
            let review = slot.ok_or_else(|| {
                ParleyError::SessionFailed(format!(
                    "missing review from {}",
                    participants[idx].name
                ))
            })?;
            if review.reviewer_name != participants[idx].name {
                return Err(ParleyError::SessionFailed(format!(
                    "review attributed to {} but slot belongs to {}",
                    review.reviewer_name, participants[idx].name
                )));
            }
            reviews.push(review);
        }

        inner.store.save_reviews(&session_id, current.version, &reviews)?;

        let counts = SeverityCounts::from_reviews(&reviews);
        let delta = if current.version == 1 {
            0.0
        } else {
            let prev = inner.store.load_version(&session_id, current.version - 1)?;
            document_delta(&prev.content, &current.content)
        };

        history.push(IterationRecord {
            iteration,
            input_version: current.version,
            convergence: ConvergenceCheck {
                counts,
                delta,
                converged: false,
                reason: String::new(),
                stopped_by: None,
            },
            output_version: None,
            started_at,
            ended_at: Utc::now(),
        });

        let decision = decide(&policy, &history);
        {
            let last = history.last_mut().expect("just pushed");
            last.convergence.converged = decision.should_stop;
            last.convergence.reason = decision.reason.clone();
            last.convergence.stopped_by = decision.stopped_by;
        }

        inner.bus.emit(
            &session_id,
            SessionEvent::ConvergenceCheck {
                iteration,
                counts,
                converged: decision.should_stop,
                reason: decision.reason.clone(),
            },
        );

        meta.current_iteration = iteration;
        inner.store.update_session(meta)?;

        if decision.should_stop {
            history.last_mut().expect("just pushed").ended_at = Utc::now();
            finalize(inner, meta, &history, current.version, &decision)?;
            return Ok(());
        }

        // ── Moderation ─────────────────────────────────────────
        inner
            .bus
            .emit(&session_id, SessionEvent::ModeratorStart { iteration });

        let (refined, mod_tokens) = moderator
            .refine(&current, &reviews, meta.goal.as_deref())
            .await?;
        meta.add_tokens("moderator", &mod_tokens);
        // Cancel observed after the moderator returns: tokens are
        // accounted, the produced text is discarded.
        check_cancel(cancel)?;

        let next = current.next(refined, iteration);
        inner.store.save_version(&session_id, &next)?;
        inner.bus.emit(
            &session_id,
            SessionEvent::ModeratorComplete {
                new_version: next.version,
                tokens: mod_tokens,
            },
        );

        {
            let last = history.last_mut().expect("just pushed");
            last.output_version = Some(next.version);
            last.ended_at = Utc::now();
        }
        inner.store.update_session(meta)?;
        current = next;
    }
}

fn finalize(
    inner: &Arc<RuntimeInner>,
    meta: &mut SessionMeta,
    history: &[IterationRecord],
    final_version: u32,
    decision: &StopDecision,
) -> Result<()> {
    let session_id = meta.session_id.clone();
    let stopped_by = decision.stopped_by.unwrap_or(StopRule::Error);
    let converged = matches!(
        stopped_by,
        StopRule::NoHighIssues | StopRule::DeltaThreshold | StopRule::Custom
    );
    let final_issue_count = history
        .last()
        .map(|r| r.convergence.counts)
        .unwrap_or_default();

    meta.status = SessionStatus::Completed;
    meta.ended_at = Some(Utc::now());
    meta.final_version = Some(final_version);
    meta.convergence_reason = Some(decision.reason.clone());
    meta.stopped_by = Some(stopped_by);

    let report = ConvergenceReport {
        session_id: session_id.clone(),
        title: meta.title.clone(),
        document_type: meta.document_type.clone(),
        initial_version: 1,
        final_version,
        iterations_count: history.len() as u32,
        converged,
        convergence_reason: decision.reason.clone(),
        stopped_by,
        total_issues_identified: history.iter().map(|r| r.convergence.counts.total()).sum(),
        final_issue_count,
        started_at: meta.created_at,
        ended_at: meta.ended_at.expect("set above"),
        history: history.to_vec(),
        token_usage: meta.token_usage.clone(),
        participants: meta.participants.iter().map(ParticipantSummary::from).collect(),
        continued_from_iteration: meta.continued_from_iteration,
        delta_metric: DELTA_METRIC.into(),
    };

    inner.store.save_report(&session_id, &report)?;
    inner.store.update_session(meta)?;

    inner.bus.emit(
        &session_id,
        SessionEvent::RefinementComplete {
            final_version,
            converged,
            stopped_by,
            iterations_count: report.iterations_count,
            final_issue_count,
            total_tokens: meta.total_tokens(),
        },
    );

    if !converged && final_issue_count.high > 0 {
        warn!(
            session = %session_id,
            high = final_issue_count.high,
            "refinement ended with high severity issues outstanding"
        );
    }
    info!(
        session = %session_id,
        final_version,
        converged,
        stopped_by = %stopped_by,
        "refinement complete"
    );
    Ok(())
}
