//! Traversal correctness: shapes, blocking, memoization, setup failures.

use smelt_core::ProjectId;
use smelt_sched::dag::Dag;
use smelt_sched::result::{FailureCause, FinalCompileResult, PartialCompileResult};
use smelt_test_utils::TestHarness;

#[tokio::test]
async fn leaf_success_produces_a_leaf_result() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);

    let result = harness.traverse(&dag, false).await;

    assert!(matches!(&*result, Dag::Leaf(_)));
    let success = result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("leaf success");
    let outcome = success.result.clone().await;
    assert!(outcome.is_ok());
    assert_eq!(harness.compiler.invocation_count(), 1);
}

#[tokio::test]
async fn leaf_success_registers_last_successful_with_one_reference() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);

    let result = harness.traverse(&dag, false).await;
    let outcome = result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("leaf success")
        .result
        .clone()
        .await;
    let products = outcome.products().expect("products").clone();

    let registry = harness.ctx.registry();
    let last = registry
        .last_successful(&ProjectId::new("a"))
        .expect("last successful registered");
    assert_eq!(last.classes_dir(), products.new_classes_dir.as_path());
    assert_eq!(registry.classes_dir_refcount(last.classes_dir()), 1);
}

#[tokio::test]
async fn parent_is_blocked_by_failing_child() {
    let harness = TestHarness::new();
    harness.compiler.fail("a", "type error in A");
    let dag = harness.dag(&[("a", &[]), ("b", &["a"])]);

    let result = harness.traverse(&dag, false).await;

    let Dag::Parent(value, children) = &*result else {
        panic!("expected a parent result, got {result:?}");
    };
    assert_eq!(children.len(), 1);
    assert!(
        children[0]
            .value()
            .and_then(PartialCompileResult::failure)
            .is_some(),
        "child A must fail"
    );

    let failure = value
        .failure()
        .expect("parent must be blocked, not compiled");
    assert!(matches!(
        &failure.cause,
        FailureCause::Blocked { upstream } if upstream == &vec!["a".to_string()]
    ));
    let outcome = failure.result.clone().await;
    assert!(matches!(
        outcome,
        FinalCompileResult::Blocked { ref upstream } if upstream == &vec!["a".to_string()]
    ));

    // B's compile is never invoked.
    assert_eq!(harness.compiler.invocations_for("b"), 0);
    assert_eq!(harness.compiler.invocations_for("a"), 1);
}

#[tokio::test]
async fn aggregate_maps_to_parent_with_empty_value() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[]), ("b", &[])]);
    assert!(matches!(&*dag, Dag::Aggregate(_)));

    let result = harness.traverse(&dag, false).await;

    let Dag::Parent(value, children) = &*result else {
        panic!("aggregate must map to Parent(Empty, children), got {result:?}");
    };
    assert!(matches!(value, PartialCompileResult::Empty));
    assert_eq!(children.len(), 2);
    for child in children {
        assert!(child.value().and_then(PartialCompileResult::success).is_some());
    }
}

#[tokio::test]
async fn shared_dependency_compiles_once_in_a_diamond() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[
        ("a", &[]),
        ("b", &["a"]),
        ("c", &["a"]),
        ("d", &["b", "c"]),
    ]);

    let result = harness.traverse(&dag, false).await;

    let success = result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("root success");
    assert!(success.result.clone().await.is_ok());

    assert_eq!(harness.compiler.invocations_for("a"), 1);
    assert_eq!(harness.compiler.invocation_count(), 4);
}

#[tokio::test]
async fn setup_failure_is_localized_to_one_leaf() {
    let harness = TestHarness::new();
    harness.setup.fail_setup("bad");
    let dag = harness.dag(&[("bad", &[]), ("good", &[])]);

    let result = harness.traverse(&dag, false).await;

    let Dag::Parent(_, children) = &*result else {
        panic!("expected aggregate result");
    };

    let bad = children[0]
        .value()
        .and_then(PartialCompileResult::failure)
        .expect("bad leaf fails");
    assert!(matches!(&bad.cause, FailureCause::SetupFailed(_)));
    assert!(matches!(
        bad.result.clone().await,
        FinalCompileResult::GlobalError { .. }
    ));

    // Sibling work continues.
    let good = children[1]
        .value()
        .and_then(PartialCompileResult::success)
        .expect("good leaf compiles");
    assert!(good.result.clone().await.is_ok());
    assert_eq!(harness.compiler.invocations_for("good"), 1);
    assert_eq!(harness.compiler.invocations_for("bad"), 0);
}

#[tokio::test]
async fn failure_in_a_deep_chain_blocks_all_ancestors() {
    let harness = TestHarness::new();
    harness.compiler.fail("a", "broken");
    let dag = harness.dag(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

    let result = harness.traverse(&dag, false).await;

    let root = result.value().and_then(PartialCompileResult::failure).expect("root blocked");
    assert!(matches!(&root.cause, FailureCause::Blocked { .. }));

    assert_eq!(harness.compiler.invocations_for("b"), 0);
    assert_eq!(harness.compiler.invocations_for("c"), 0);
}

#[tokio::test]
async fn client_receives_one_start_and_one_end_event() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);

    harness.traverse(&dag, false).await;

    let sink = harness.client.recording();
    assert_eq!(sink.start_count(), 1);
    assert_eq!(sink.end_statuses().len(), 1);
}
