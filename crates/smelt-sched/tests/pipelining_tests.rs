//! Pipelined traversal: early starts on signatures, Java signal folding,
//! signature table ordering.

use std::time::Duration;

use smelt_sched::compile::JavaSignal;
use smelt_sched::dag::Dag;
use smelt_sched::oracle::Signature;
use smelt_sched::result::{FailureCause, FinalCompileResult, PartialCompileResult};
use smelt_test_utils::{StubBehavior, TestHarness};

async fn await_all_outcomes(result: &std::sync::Arc<smelt_sched::result::ResultDag>) {
    for node in result.dfs() {
        if let Some(success) = node.value().and_then(PartialCompileResult::success) {
            let _ = success.result.clone().await;
        }
    }
}

#[tokio::test]
async fn downstream_starts_before_upstream_finishes() {
    let harness = TestHarness::new();
    harness
        .compiler
        .behave("a", StubBehavior::SignatureGap(Duration::from_millis(100)));
    let dag = harness.dag(&[("a", &[]), ("b", &["a"])]);

    let result = harness.traverse(&dag, true).await;
    await_all_outcomes(&result).await;

    let root = result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("root success");
    assert!(root.result.clone().await.is_ok());

    // B's compile was invoked with A's signatures before A finished.
    let b_invoked = harness.compiler.invoked_at("b").expect("b invoked");
    let a_completed = harness.compiler.completed_at("a").expect("a completed");
    assert!(
        b_invoked < a_completed,
        "pipelined downstream must start before its upstream completes"
    );

    // A eventually succeeded, so B's Java phase proceeded.
    assert_eq!(
        harness.compiler.observed_signal("b"),
        Some(JavaSignal::ContinueCompilation)
    );
    assert_eq!(
        harness.compiler.observed_signatures("b"),
        Some(vec![Signature::new("a.Api", 1)])
    );
}

#[tokio::test]
async fn signature_lookup_order_is_dfs_first_occurrence_wins() {
    let harness = TestHarness::new();
    harness
        .compiler
        .set_signatures("a", vec![Signature::new("com.X", 1)]);
    harness.compiler.set_signatures(
        "b",
        vec![Signature::new("com.X", 2), Signature::new("com.Y", 3)],
    );
    let dag = harness.dag(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);

    let result = harness.traverse(&dag, true).await;
    await_all_outcomes(&result).await;

    // C depends on [a, b]: a's com.X shadows b's, b contributes com.Y.
    assert_eq!(
        harness.compiler.observed_signatures("c"),
        Some(vec![Signature::new("com.X", 1), Signature::new("com.Y", 3)])
    );
}

#[tokio::test]
async fn upstream_failing_after_signatures_fails_fast_the_java_phase() {
    let harness = TestHarness::new();
    harness.compiler.behave(
        "a",
        StubBehavior::FailAfterSignatures(vec![smelt_sched::event::Problem::error(
            "a broke after signatures",
        )]),
    );
    let dag = harness.dag(&[("a", &[]), ("b", &["a"])]);

    let result = harness.traverse(&dag, true).await;
    await_all_outcomes(&result).await;

    // B started (signatures were published) but aborted its Java phase.
    assert_eq!(harness.compiler.invocations_for("b"), 1);
    assert_eq!(
        harness.compiler.observed_signal("b"),
        Some(JavaSignal::FailFastCompilation(vec!["a".to_string()]))
    );

    let root = result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("b was dispatched");
    assert!(matches!(
        root.result.clone().await,
        FinalCompileResult::Failed { .. }
    ));
}

#[tokio::test]
async fn upstream_failing_before_signatures_blocks_the_parent() {
    let harness = TestHarness::new();
    harness.compiler.fail("a", "broken before signatures");
    let dag = harness.dag(&[("a", &[]), ("b", &["a"])]);

    let result = harness.traverse(&dag, true).await;

    let Dag::Parent(value, _) = &*result else {
        panic!("expected parent result");
    };
    let failure = value.failure().expect("parent blocked");
    assert!(matches!(failure.cause, FailureCause::FailedOrCancelledPromise));
    assert!(matches!(
        failure.result.clone().await,
        FinalCompileResult::Blocked { ref upstream } if upstream == &vec!["a".to_string()]
    ));
    assert_eq!(harness.compiler.invocations_for("b"), 0);
}

#[tokio::test]
async fn pipelined_result_tree_keeps_the_input_shape() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

    let result = harness.traverse(&dag, true).await;
    await_all_outcomes(&result).await;

    // Parent(c, [Parent(b, [Leaf(a)])])
    let Dag::Parent(c, c_children) = &*result else {
        panic!("expected parent at root");
    };
    assert!(c.success().is_some());
    let Dag::Parent(b, b_children) = &*c_children[0] else {
        panic!("expected parent below root");
    };
    assert!(b.success().is_some());
    assert!(matches!(&*b_children[0], Dag::Leaf(_)));
}

#[tokio::test]
async fn pipelined_leaf_gets_a_ready_continue_signal() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);

    let result = harness.traverse(&dag, true).await;
    await_all_outcomes(&result).await;

    assert_eq!(
        harness.compiler.observed_signal("a"),
        Some(JavaSignal::ContinueCompilation)
    );
}
