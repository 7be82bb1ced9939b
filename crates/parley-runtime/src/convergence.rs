//! The composite stop rule evaluated after every iteration, plus the
//! document delta metric. Pure functions: no I/O, no clock reads,
//! deterministic in their inputs.

use std::sync::Arc;

use parley_core::{IterationRecord, SessionConfig, StopDecision, StopRule};

/// Which delta definition this build records in every report, so runs are
/// comparable across implementations.
pub const DELTA_METRIC: &str = "similar::TextDiff char ratio (1 - ratio)";

/// Custom stop predicate over the full iteration history.
pub type StopPredicate = Arc<dyn Fn(&[IterationRecord]) -> bool + Send + Sync>;

/// Stop-rule configuration. Mirrors the session config's stop fields plus
/// an optional custom predicate that only library callers can install.
#[derive(Clone)]
pub struct ConvergencePolicy {
    pub max_iterations: u32,
    pub delta_threshold: f64,
    pub stop_on_no_high_issues: bool,
    pub force_max_iterations: bool,
    pub custom: Option<StopPredicate>,
}

impl From<&SessionConfig> for ConvergencePolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            delta_threshold: config.delta_threshold,
            stop_on_no_high_issues: config.stop_on_no_high_issues,
            force_max_iterations: config.force_max_iterations,
            custom: None,
        }
    }
}

/// Change between two document versions as a scalar in [0, 1]:
/// 0 iff identical, 1 when exactly one side is empty, symmetric, and
/// monotone in the size of the change for pure insertions/deletions.
pub fn document_delta(prev: &str, current: &str) -> f64 {
    if prev == current {
        return 0.0;
    }
    if prev.is_empty() || current.is_empty() {
        return 1.0;
    }
    1.0 - similar::TextDiff::from_chars(prev, current).ratio() as f64
}

/// Decide whether the roundtable should stop, given the ordered history of
/// iterations up to and including the just-completed one.
///
/// Rules are evaluated in priority order; the first match wins:
/// 1. `force_max_iterations` below the cap suppresses every stop rule.
/// 2. Custom predicate.
/// 3. No high-severity issues remaining.
/// 4. Iteration cap reached.
/// 5. Document stable (delta below threshold, needs two iterations).
pub fn decide(policy: &ConvergencePolicy, iterations: &[IterationRecord]) -> StopDecision {
    let last = match iterations.last() {
        Some(last) => last,
        None => return StopDecision::go_on("no iterations completed yet"),
    };
    let count = iterations.len() as u32;
    let high = last.convergence.counts.high;

    // Rule 1: run the full budget regardless of anything below.
    if policy.force_max_iterations && count < policy.max_iterations {
        return StopDecision::go_on(format!(
            "forcing all {} iterations ({count} completed)",
            policy.max_iterations
        ));
    }

    // Rule 2: caller-supplied predicate.
    if let Some(ref custom) = policy.custom {
        if custom(iterations) {
            return StopDecision::stop(StopRule::Custom, "custom stop condition met");
        }
    }

    // Rule 3: nothing blocking remains.
    if policy.stop_on_no_high_issues && high == 0 {
        return StopDecision::stop(
            StopRule::NoHighIssues,
            "No high severity issues remaining (0 remaining)",
        );
    }

    // Rule 4: budget exhausted.
    if count >= policy.max_iterations {
        let reason = if high > 0 {
            format!(
                "Max iterations reached ({}). {high} high severity issues remain.",
                policy.max_iterations
            )
        } else {
            format!("Max iterations reached ({}).", policy.max_iterations)
        };
        return StopDecision::stop(StopRule::MaxIterations, reason);
    }

    // Rule 5: the document stopped changing. Iteration 1 never qualifies.
    if count >= 2 && last.convergence.delta < policy.delta_threshold {
        return StopDecision::stop(
            StopRule::DeltaThreshold,
            format!("Document stable (delta: {:.2}%)", last.convergence.delta * 100.0),
        );
    }

    StopDecision::go_on(format!("{high} high severity issues remain"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_core::{ConvergenceCheck, SeverityCounts};

    fn policy(max_iterations: u32) -> ConvergencePolicy {
        ConvergencePolicy {
            max_iterations,
            delta_threshold: 0.05,
            stop_on_no_high_issues: true,
            force_max_iterations: false,
            custom: None,
        }
    }

    fn record(iteration: u32, high: u32, delta: f64) -> IterationRecord {
        IterationRecord {
            iteration,
            input_version: iteration,
            convergence: ConvergenceCheck {
                counts: SeverityCounts {
                    high,
                    medium: 0,
                    low: 0,
                },
                delta,
                converged: false,
                reason: String::new(),
                stopped_by: None,
            },
            output_version: None,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn empty_history_continues() {
        let decision = decide(&policy(3), &[]);
        assert!(!decision.should_stop);
    }

    #[test]
    fn stops_when_no_high_issues() {
        let decision = decide(&policy(3), &[record(1, 0, 0.0)]);
        assert!(decision.should_stop);
        assert_eq!(decision.stopped_by, Some(StopRule::NoHighIssues));
        assert!(decision.reason.contains("0 remaining"));
    }

    #[test]
    fn stops_at_max_iterations_and_reports_remaining_high() {
        let history = vec![record(1, 1, 0.0), record(2, 3, 0.4)];
        let decision = decide(&policy(2), &history);
        assert!(decision.should_stop);
        assert_eq!(decision.stopped_by, Some(StopRule::MaxIterations));
        assert!(decision.reason.contains("Max iterations reached (2)"));
        assert!(decision.reason.contains("3 high severity issues remain"));
    }

    #[test]
    fn stops_when_document_stable() {
        let history = vec![record(1, 1, 0.0), record(2, 1, 0.01)];
        let decision = decide(&policy(10), &history);
        assert!(decision.should_stop);
        assert_eq!(decision.stopped_by, Some(StopRule::DeltaThreshold));
    }

    #[test]
    fn threshold_is_strict() {
        // delta == threshold does not stop
        let history = vec![record(1, 1, 0.0), record(2, 1, 0.05)];
        let decision = decide(&policy(10), &history);
        assert!(!decision.should_stop);
    }

    #[test]
    fn iteration_one_never_delta_stops() {
        let decision = decide(&policy(10), &[record(1, 1, 0.0)]);
        assert!(!decision.should_stop);
        assert!(decision.reason.contains("1 high severity issues remain"));
    }

    #[test]
    fn continues_while_high_issues_remain() {
        let decision = decide(&policy(5), &[record(1, 2, 0.0)]);
        assert!(!decision.should_stop);
        assert!(decision.reason.contains("2 high severity issues remain"));
    }

    #[test]
    fn custom_predicate_wins_over_no_high() {
        let mut p = policy(10);
        p.custom = Some(Arc::new(|iterations| iterations.len() >= 2));
        // No high issues, but the custom rule is evaluated first
        let history = vec![record(1, 0, 0.0), record(2, 0, 0.5)];
        let decision = decide(&p, &history);
        assert!(decision.should_stop);
        assert_eq!(decision.stopped_by, Some(StopRule::Custom));

        // Below the custom threshold, rule 3 still fires
        let decision = decide(&p, &[record(1, 0, 0.0)]);
        assert_eq!(decision.stopped_by, Some(StopRule::NoHighIssues));
    }

    #[test]
    fn force_max_suppresses_everything_below_the_cap() {
        let mut p = policy(3);
        p.force_max_iterations = true;
        p.custom = Some(Arc::new(|_| true));

        // Clean iteration, custom predicate true, stable document — still runs
        let history = vec![record(1, 0, 0.0), record(2, 0, 0.0)];
        let decision = decide(&p, &history);
        assert!(!decision.should_stop);
        assert!(decision.reason.contains("forcing all 3 iterations"));

        // At the cap the suppression ends; custom fires first
        let history = vec![record(1, 0, 0.0), record(2, 0, 0.0), record(3, 0, 0.0)];
        let decision = decide(&p, &history);
        assert!(decision.should_stop);
        assert_eq!(decision.stopped_by, Some(StopRule::Custom));
    }

    #[test]
    fn force_max_without_custom_ends_in_max_or_no_high() {
        let mut p = policy(2);
        p.force_max_iterations = true;
        let history = vec![record(1, 0, 0.0), record(2, 0, 0.0)];
        let decision = decide(&p, &history);
        // At the cap with zero high issues, rule 3 fires before rule 4
        assert_eq!(decision.stopped_by, Some(StopRule::NoHighIssues));
    }

    // ── Delta metric properties ────────────────────────────────

    #[test]
    fn delta_zero_iff_identical() {
        assert_eq!(document_delta("hello world", "hello world"), 0.0);
        assert_eq!(document_delta("", ""), 0.0);
        assert!(document_delta("hello", "hello!") > 0.0);
    }

    #[test]
    fn delta_one_when_one_side_empty() {
        assert_eq!(document_delta("", "abc"), 1.0);
        assert_eq!(document_delta("abc", ""), 1.0);
    }

    #[test]
    fn delta_is_symmetric() {
        let cases = [("aaa", "zzz"), ("short", "much longer text"), ("abc", "abd")];
        for (a, b) in cases {
            assert!((document_delta(a, b) - document_delta(b, a)).abs() < 1e-9);
        }
    }

    #[test]
    fn delta_stays_in_bounds() {
        let cases = [("aaa", "zzz"), ("", "x"), ("same", "same"), ("a", "ab")];
        for (a, b) in cases {
            let d = document_delta(a, b);
            assert!((0.0..=1.0).contains(&d), "delta {d} out of bounds");
        }
    }

    #[test]
    fn delta_high_for_disjoint_content() {
        assert!(document_delta("aaa", "zzz") > 0.9);
    }

    #[test]
    fn delta_low_for_small_edits() {
        let d = document_delta(
            "The quick brown fox jumps over the lazy dog",
            "The quick brown fox leaps over the lazy dog",
        );
        assert!(d > 0.0 && d < 0.2, "delta was {d}");
    }

    #[test]
    fn delta_monotone_for_growing_insertions() {
        let small = document_delta("aaaa", "aaaab");
        let large = document_delta("aaaa", "aaaabbbb");
        assert!(small < large);
    }
}
