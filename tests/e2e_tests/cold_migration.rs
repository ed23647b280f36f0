//! A stopped VM is migrated cold and every post-migration check passes

use mtv_migration::RunState;

use super::helpers::{run, scenario};

#[tokio::test]
#[ignore = "requires a live cluster with Forklift and a source provider"]
async fn story_cold_migration_of_a_stopped_vm() {
    let scenario = scenario(
        r#"
name: e2e-cold
virtual_machines:
  - name: "{vm}"
    source_vm_power: "off"
    guest_agent: false
warm_migration: false
"#,
    );

    let outcome = run(&scenario).await;

    assert_eq!(outcome.state, RunState::Succeeded);
    assert!(outcome.verified);
    assert!(outcome.failed_step.is_none());
}
