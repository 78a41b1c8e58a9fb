//! Deduplication: shared compilations, ordered replay, replay failures,
//! stall detection and re-dispatch.

use std::sync::Arc;
use std::time::Duration;

use smelt_sched::context::SchedulerConfig;
use smelt_sched::event::EndStatus;
use smelt_sched::result::{FailureCause, FinalCompileResult, PartialCompileResult};
use smelt_test_utils::{StubBehavior, TestHarness};

fn leaf_success(result: &smelt_sched::result::ResultDag) -> &smelt_sched::result::PartialSuccess {
    result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("leaf success")
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_compilation() {
    let harness = TestHarness::new();
    harness
        .compiler
        .behave("a", StubBehavior::SucceedSlowly(Duration::from_millis(50)));
    let dag = harness.dag(&[("a", &[])]);
    let client2 = harness.second_client();

    let (r1, r2) = tokio::join!(
        harness.traverse(&dag, false),
        harness.traverse_as(&client2, &dag, false)
    );

    // Exactly one compile invocation; both clients succeed.
    assert_eq!(harness.compiler.invocation_count(), 1);
    assert!(leaf_success(&r1).result.clone().await.is_ok());
    assert!(leaf_success(&r2).result.clone().await.is_ok());
}

#[tokio::test]
async fn late_subscriber_replays_the_producer_stream_in_order() {
    let harness = TestHarness::new();
    harness
        .compiler
        .behave("a", StubBehavior::SucceedSlowly(Duration::from_millis(50)));
    let dag = harness.dag(&[("a", &[])]);
    let client2 = harness.second_client();

    let (_, r2) = tokio::join!(
        harness.traverse(&dag, false),
        harness.traverse_as(&client2, &dag, false)
    );
    assert!(leaf_success(&r2).result.clone().await.is_ok());

    let produced = harness.client.recording().events();
    let replayed = client2.recording().events();
    assert!(!produced.is_empty());
    assert_eq!(
        produced, replayed,
        "late subscriber must observe the producer's exact event sequence"
    );
}

#[tokio::test]
async fn sequential_identical_requests_reuse_the_memoized_result() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);

    let r1 = harness.traverse(&dag, false).await;
    let first = leaf_success(&r1).result.clone().await;
    let r2 = harness.traverse(&dag, false).await;
    let second = leaf_success(&r2).result.clone().await;

    // The second call deduplicates: no new compilation is scheduled and
    // both calls observe the identical products.
    assert_eq!(harness.compiler.invocation_count(), 1);
    let (p1, p2) = (
        first.products().expect("first products").clone(),
        second.products().expect("second products").clone(),
    );
    assert!(Arc::ptr_eq(&p1, &p2));
}

#[tokio::test]
async fn replay_failure_yields_global_error_without_touching_the_producer() {
    let harness = Arc::new(TestHarness::new());
    harness
        .compiler
        .behave("a", StubBehavior::SucceedSlowly(Duration::from_millis(80)));
    let dag = harness.dag(&[("a", &[])]);

    let owner = {
        let harness = Arc::clone(&harness);
        let dag = Arc::clone(&dag);
        tokio::spawn(async move { harness.traverse(&dag, false).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The late client's sink rejects every event.
    let client2 = harness.second_client();
    client2.recording().fail_after(0);
    let r2 = harness.traverse_as(&client2, &dag, false).await;

    // The deduplicated client keeps the success shape but observes a
    // global error.
    let outcome = leaf_success(&r2).result.clone().await;
    assert!(matches!(outcome, FinalCompileResult::GlobalError { ref message }
        if message.contains("deduplication failed")));

    // The producer's result is untouched.
    let r1 = owner.await.expect("owner task");
    assert!(leaf_success(&r1).result.clone().await.is_ok());
    assert_eq!(harness.compiler.invocation_count(), 1);
}

#[tokio::test]
async fn stalled_producer_is_disconnected_and_redispatched() {
    let harness = Arc::new(TestHarness::with_config(
        SchedulerConfig::with_disconnect_timeout(Duration::from_millis(100)),
    ));
    harness.compiler.behave("a", StubBehavior::HangTimes(1));
    let dag = harness.dag(&[("a", &[])]);

    let owner = {
        let harness = Arc::clone(&harness);
        let dag = Arc::clone(&dag);
        tokio::spawn(async move { harness.traverse(&dag, false).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The subscriber sees the start event, then nothing: it disconnects,
    // unregisters the stalled entry, and re-dispatches.
    let client2 = harness.second_client();
    let r2 = harness.traverse_as(&client2, &dag, false).await;
    assert!(leaf_success(&r2).result.clone().await.is_ok());

    // The re-dispatch is a fresh compilation, not a dedup against the
    // cancelled ongoing.
    assert_eq!(harness.compiler.invocations_for("a"), 2);
    assert_eq!(harness.ctx.registry().running_count(), 1);

    // The cancelled owner observes a cancelled compilation with exactly
    // one end event.
    let r1 = owner.await.expect("owner task");
    let failure = r1
        .value()
        .and_then(PartialCompileResult::failure)
        .expect("owner result is cancelled");
    assert!(matches!(failure.cause, FailureCause::Cancelled));
    assert_eq!(
        harness.client.recording().end_statuses(),
        vec![EndStatus::Cancelled]
    );

    // The subscriber saw the cancelled end of the stalled attempt, then
    // the successful end of the re-dispatched one.
    let statuses = client2.recording().end_statuses();
    assert_eq!(
        statuses
            .iter()
            .filter(|s| matches!(s, EndStatus::Cancelled))
            .count(),
        1
    );
    assert_eq!(statuses.last(), Some(&EndStatus::Ok));
}

#[tokio::test]
async fn pipelined_subscriber_survives_stall_redispatch() {
    let harness = Arc::new(TestHarness::with_config(
        SchedulerConfig::with_disconnect_timeout(Duration::from_millis(100)),
    ));
    harness.compiler.behave("a", StubBehavior::HangTimes(1));
    let upstream_only = harness.dag(&[("a", &[])]);
    let full = harness.dag(&[("a", &[]), ("b", &["a"])]);

    let owner = {
        let harness = Arc::clone(&harness);
        let dag = Arc::clone(&upstream_only);
        tokio::spawn(async move { harness.traverse(&dag, true).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The subscriber's A deduplicates against the stalled producer and B
    // gates on A's signature handle. After the disconnection timeout the
    // entry is re-dispatched; B must observe the fresh attempt's
    // signatures, not the cancelled attempt's failed promises.
    let client2 = harness.second_client();
    let result = harness.traverse_as(&client2, &full, true).await;
    let root = result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("b was dispatched");
    assert!(root.result.clone().await.is_ok());

    assert_eq!(harness.compiler.invocations_for("a"), 2);
    assert_eq!(harness.compiler.invocations_for("b"), 1);

    // The cancelled owner still observes its cancelled leaf.
    let r1 = owner.await.expect("owner task");
    let leaf = r1
        .value()
        .and_then(PartialCompileResult::success)
        .expect("owner leaf was dispatched");
    assert!(matches!(
        leaf.result.clone().await,
        FinalCompileResult::Cancelled
    ));
}

#[tokio::test]
async fn user_cancellation_completes_with_cancelled_result() {
    let harness = Arc::new(TestHarness::new());
    harness
        .compiler
        .behave("a", StubBehavior::SucceedSlowly(Duration::from_millis(500)));
    let dag = harness.dag(&[("a", &[])]);

    let cancel = tokio_util::sync::CancellationToken::new();
    let traversal = {
        let harness = Arc::clone(&harness);
        let dag = Arc::clone(&dag);
        let client = Arc::clone(&harness.client);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            harness
                .traverse_with_cancel(&client, &dag, false, cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = traversal.await.expect("traversal task");
    let failure = result
        .value()
        .and_then(PartialCompileResult::failure)
        .expect("cancelled result");
    assert!(matches!(failure.cause, FailureCause::Cancelled));
    assert!(matches!(
        failure.result.clone().await,
        FinalCompileResult::Cancelled
    ));

    // The cancelled entry does not linger in the registry.
    assert_eq!(harness.ctx.registry().running_count(), 0);
    assert_eq!(
        harness.client.recording().end_statuses(),
        vec![EndStatus::Cancelled]
    );
}
