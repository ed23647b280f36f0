//! A running VM is migrated warm with a scheduled cut-over

use mtv_migration::RunState;

use super::helpers::{run, scenario};

#[tokio::test]
#[ignore = "requires a live cluster with Forklift and a source provider"]
async fn story_warm_migration_cuts_over_after_pre_copies() {
    let scenario = scenario(
        r#"
name: e2e-warm
virtual_machines:
  - name: "{vm}"
    source_vm_power: "on"
    guest_agent: true
warm_migration: true
pre_copies_before_cut_over: 2
cut_over_after_secs: 300
"#,
    );

    let outcome = run(&scenario).await;

    assert_eq!(outcome.state, RunState::Succeeded);
    assert!(outcome.verified);
}
