//! Last-successful artifact lifecycle: supersession, refcounts, delayed
//! deletion.

use smelt_core::ProjectId;
use smelt_sched::result::PartialCompileResult;
use smelt_test_utils::TestHarness;

async fn leaf_products(
    result: &smelt_sched::result::ResultDag,
) -> std::sync::Arc<smelt_sched::bundle::CompileProducts> {
    result
        .value()
        .and_then(PartialCompileResult::success)
        .expect("leaf success")
        .result
        .clone()
        .await
        .products()
        .expect("products")
        .clone()
}

#[tokio::test]
async fn superseded_classes_directory_is_deleted_after_population() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);
    let project = ProjectId::new("a");
    let registry = harness.ctx.registry();

    // Run 1 produces dir1.
    let r1 = harness.traverse(&dag, false).await;
    let products1 = leaf_products(&r1).await;
    let dir1 = products1.new_classes_dir.clone();
    assert!(dir1.exists(), "run 1 must materialize its output");
    assert_eq!(registry.classes_dir_refcount(&dir1), 1);

    // An edit changes the inputs; run 2 produces dir2.
    harness.setup.set_digest("a", "v2");
    let r2 = harness.traverse(&dag, false).await;
    let products2 = leaf_products(&r2).await;
    let dir2 = products2.new_classes_dir.clone();
    assert_ne!(dir1, dir2);

    // r2 is now current; deletion of dir1 runs after the populating
    // composite completes.
    let last = registry.last_successful(&project).expect("current result");
    assert_eq!(last.classes_dir(), dir2.as_path());
    last.populating().await;

    assert!(!dir1.exists(), "superseded directory must be deleted");
    assert_eq!(registry.classes_dir_refcount(&dir1), 0);
    assert_eq!(registry.classes_dir_refcount(&dir2), 1);
}

#[tokio::test]
async fn failed_recompilation_keeps_the_previous_result() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);
    let project = ProjectId::new("a");
    let registry = harness.ctx.registry();

    let r1 = harness.traverse(&dag, false).await;
    let dir1 = leaf_products(&r1).await.new_classes_dir.clone();

    harness.setup.set_digest("a", "v2");
    harness.compiler.fail("a", "broken edit");
    let r2 = harness.traverse(&dag, false).await;
    assert!(r2.value().and_then(PartialCompileResult::failure).is_some());

    // The previous successful result stays current and referenced.
    let last = registry.last_successful(&project).expect("still current");
    assert_eq!(last.classes_dir(), dir1.as_path());
    assert_eq!(registry.classes_dir_refcount(&dir1), 1);
    assert!(dir1.exists());

    // The failed entry does not linger for future deduplication.
    assert_eq!(registry.running_count(), 1);
}

#[tokio::test]
async fn clear_successful_results_resets_between_scenarios() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);
    let project = ProjectId::new("a");

    harness.traverse(&dag, false).await;
    assert!(harness.ctx.registry().last_successful(&project).is_some());

    harness.ctx.clear_successful_results();
    assert!(harness.ctx.registry().last_successful(&project).is_none());
}

#[tokio::test]
async fn refcounts_stay_balanced_across_repeated_supersessions() {
    let harness = TestHarness::new();
    let dag = harness.dag(&[("a", &[])]);
    let project = ProjectId::new("a");
    let registry = harness.ctx.registry();

    let mut previous_dir = None;
    for version in 2..=4 {
        harness.setup.set_digest("a", &format!("v{version}"));
        let result = harness.traverse(&dag, false).await;
        let dir = leaf_products(&result).await.new_classes_dir.clone();

        let last = registry.last_successful(&project).expect("current");
        assert_eq!(last.classes_dir(), dir.as_path());
        last.populating().await;

        assert_eq!(registry.classes_dir_refcount(&dir), 1);
        if let Some(old) = previous_dir.replace(dir) {
            assert_eq!(registry.classes_dir_refcount(&old), 0);
            assert!(!old.exists());
        }
    }
}
