//! Plans whose hooks are expected to fail

use mtv_common::crd::HookStep;
use mtv_migration::RunState;

use super::helpers::{run, scenario};

#[tokio::test]
#[ignore = "requires a live cluster with Forklift, a source provider and failing hooks configured"]
async fn story_failing_pre_hook_stops_the_migration() {
    let scenario = scenario(
        r#"
name: e2e-prehook
virtual_machines:
  - name: "{vm}"
    source_vm_power: "off"
pre_hook: true
expected_migration_result: fail
"#,
    );

    let outcome = run(&scenario).await;

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failed_step, Some(HookStep::PreHook));
    assert!(!outcome.verified);
}

#[tokio::test]
#[ignore = "requires a live cluster with Forklift, a source provider and failing hooks configured"]
async fn story_failing_post_hook_still_leaves_a_verified_vm() {
    let scenario = scenario(
        r#"
name: e2e-posthook
virtual_machines:
  - name: "{vm}"
    source_vm_power: "off"
post_hook: true
expected_migration_result: fail
expected_failed_step: PostHook
"#,
    );

    let outcome = run(&scenario).await;

    assert_eq!(outcome.state, RunState::Failed);
    assert_eq!(outcome.failed_step, Some(HookStep::PostHook));
    assert!(outcome.verified);
}
