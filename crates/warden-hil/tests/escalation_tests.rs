//! Escalation path tests

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use warden_core::{
    DecidedBy, HilAction, HilConfig, HilContext, HilDecision, HilOption, Priority, RiskTier,
    TicketId,
};
use warden_hil::HilEngine;
use warden_test_utils::{FailingHandler, RecordingNotifier, ScriptedHandler, StallingHandler};

fn ticket_options(ctx: HilContext) -> HilContext {
    let ticket = TicketId::new();
    ctx.with_option(HilOption::new("approve", "Approve", "", HilAction::ApproveTicket { ticket }, RiskTier::Low))
        .with_option(HilOption::new("reject", "Reject", "", HilAction::RejectTicket { ticket }, RiskTier::Low))
}

#[tokio::test]
async fn forced_decision_escalates_despite_high_confidence() {
    let engine = HilEngine::new(HilConfig::default(), RecordingNotifier::new());
    let handler = ScriptedHandler::new(HilDecision::Denied, Some("reject"));
    engine.register_handler("janitor", handler.clone());

    let ctx = ticket_options(HilContext::new("janitor", "delete", 0.99, Priority::High));
    let response = engine.request_hil(ctx).await;

    assert_eq!(handler.calls(), 1);
    assert_eq!(response.decision, HilDecision::Denied);
    assert_eq!(response.decided_by, DecidedBy::Handler);
    assert!(response.request_id.is_some());

    let stats = engine.stats();
    assert_eq!(stats.escalated, 1);
    assert_eq!(stats.auto_approved, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn default_processing_approves_after_review_window() {
    let notifier = RecordingNotifier::new();
    let engine = HilEngine::new(HilConfig::default(), notifier.clone());

    let ctx = ticket_options(HilContext::new("approval", "ticket_approval", 0.5, Priority::High));
    let started = tokio::time::Instant::now();
    let response = engine.request_hil(ctx).await;

    assert_eq!(response.decision, HilDecision::Approved);
    assert_eq!(response.decided_by, DecidedBy::DefaultPolicy);
    assert_eq!(response.option_id.as_deref(), Some("approve"));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(notifier.count(), 1);
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn review_window_is_bounded_by_timeout() {
    let config = HilConfig::default()
        .with_review_delay(Duration::from_secs(600))
        .with_timeout(Duration::from_secs(3));
    let engine = HilEngine::new(config, RecordingNotifier::new());

    let started = tokio::time::Instant::now();
    let response = engine
        .request_hil(HilContext::new("approval", "ticket_approval", 0.2, Priority::Medium))
        .await;

    assert_eq!(response.decision, HilDecision::Approved);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn failing_handler_falls_back_to_default() {
    let notifier = RecordingNotifier::failing();
    let engine = HilEngine::new(HilConfig::default(), notifier.clone());
    engine.register_handler("approval", Arc::new(FailingHandler));

    let response = engine
        .request_hil(HilContext::new("approval", "ticket_approval", 0.5, Priority::High))
        .await;

    assert_eq!(response.decided_by, DecidedBy::DefaultPolicy);
    assert_eq!(response.decision, HilDecision::Approved);
    assert_eq!(engine.stats().handler_failures, 1);
    // Notification failure is swallowed
    assert_eq!(notifier.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_handler_times_out() {
    let config = HilConfig::default().with_timeout(Duration::from_secs(5));
    let engine = HilEngine::new(config, RecordingNotifier::new());
    engine.register_handler("security", Arc::new(StallingHandler));

    let response = engine
        .request_hil(HilContext::new("security", "block", 0.8, Priority::Critical))
        .await;

    assert_eq!(response.decision, HilDecision::Monitor);
    assert_eq!(engine.stats().timeouts, 1);
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reviewer_resolves_pending_request() {
    let config = HilConfig::default().with_review_delay(Duration::from_secs(120));
    let engine = Arc::new(HilEngine::new(config, RecordingNotifier::new()));

    let requester = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .request_hil(ticket_options(HilContext::new("approval", "ticket_approval", 0.3, Priority::High)))
                .await
        })
    };

    while engine.pending_count() == 0 {
        tokio::task::yield_now().await;
    }
    let pending = engine.pending_requests();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].agent, "approval");

    engine
        .resolve_request(pending[0].id, HilDecision::Denied, Some("reject"), "too risky")
        .unwrap();

    let response = requester.await.unwrap();
    assert_eq!(response.decision, HilDecision::Denied);
    assert_eq!(response.decided_by, DecidedBy::Reviewer);
    assert_eq!(response.option_id.as_deref(), Some("reject"));
    assert_eq!(response.request_id, Some(pending[0].id));
    assert_eq!(engine.stats().reviewer_decisions, 1);
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test]
async fn threshold_boundary_is_inclusive() {
    let engine = HilEngine::new(HilConfig::default(), RecordingNotifier::new());
    let response = engine
        .request_hil(HilContext::new("approval", "ticket_approval", 0.95, Priority::Low))
        .await;
    assert_eq!(response.decided_by, DecidedBy::Automatic);
}
