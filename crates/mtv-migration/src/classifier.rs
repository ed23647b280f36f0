//! Hook failure classification
//!
//! For a migration expected to fail because of a hook, every VM must have
//! stopped at the same pipeline step and that step must be the one the
//! scenario expects. The per-VM step comes from the Migration resource, not
//! the Plan: only the Migration carries the pipeline.

use tracing::{info, warn};

use mtv_common::crd::{HookStep, Migration, ObjectRef};
use mtv_common::{Error, Result};

use crate::client::MigrationClient;
use crate::submit::VmRef;

/// Failed step lookup result for one VM
pub type VmFailedStep = (String, Result<String>);

/// Most recent Migration referencing `plan`
///
/// A 404 listing Migrations and an empty match both yield
/// [`Error::MigrationNotFound`].
pub async fn find_migration<C>(client: &C, plan: &ObjectRef) -> Result<Migration>
where
    C: MigrationClient + ?Sized,
{
    let not_found = || Error::MigrationNotFound {
        plan: plan.name.clone(),
        namespace: plan.namespace.clone(),
    };
    let migrations = match client.list_migrations(&plan.namespace).await {
        Ok(list) => list,
        Err(Error::Kube {
            source: kube::Error::Api(ae),
        }) if ae.code == 404 => return Err(not_found()),
        Err(e) => return Err(e),
    };

    let matching: Vec<Migration> = migrations
        .into_iter()
        .filter(|m| m.is_for_plan(&plan.name, &plan.namespace))
        .collect();
    if matching.len() > 1 {
        warn!(
            plan = %plan,
            count = matching.len(),
            "Several Migrations reference the plan, using the most recent"
        );
    }
    matching
        .into_iter()
        .max_by_key(|m| m.metadata.creation_timestamp.as_ref().map(|t| t.0))
        .ok_or_else(not_found)
}

/// Name of the first pipeline step with an error for `vm` (name or id)
pub fn failed_step(migration: &Migration, vm: &str) -> Result<String> {
    let migration_name = migration.metadata.name.clone().unwrap_or_default();
    let vms = migration
        .status
        .as_ref()
        .map(|s| s.vms.as_slice())
        .unwrap_or_default();
    if vms.is_empty() {
        return Err(Error::MigrationStatusMissing {
            migration: migration_name,
        });
    }

    let status = vms
        .iter()
        .find(|s| s.matches(vm))
        .ok_or_else(|| Error::VmNotFoundInRun {
            vm: vm.to_string(),
            migration: migration_name.clone(),
        })?;
    let step = status.failed_step().ok_or_else(|| Error::VmPipelineMissing {
        vm: vm.to_string(),
        migration: migration_name,
    })?;
    info!(
        vm,
        step = %step.name,
        reasons = ?step.error.as_ref().map(|e| &e.reasons),
        "VM failed at pipeline step"
    );
    Ok(step.name.clone())
}

/// Failed step for every VM, looked up independently
///
/// Classification lookup errors are logged and kept per VM; any other
/// error aborts the whole lookup.
pub async fn all_failed_steps<C>(
    client: &C,
    plan: &ObjectRef,
    vms: &[String],
) -> Result<Vec<VmFailedStep>>
where
    C: MigrationClient + ?Sized,
{
    let mut steps = Vec::with_capacity(vms.len());
    for vm in vms {
        let step = match find_migration(client, plan).await {
            Ok(migration) => failed_step(&migration, vm),
            Err(e) => Err(e),
        };
        match step {
            Ok(step) => steps.push((vm.clone(), Ok(step))),
            Err(e) if e.is_classification_lookup() => {
                warn!(vm = %vm, error = %e, "Could not get failed step");
                steps.push((vm.clone(), Err(e)));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(steps)
}

/// The step every VM failed at
///
/// The first lookup error (in VM order) is returned as is; disagreeing
/// steps are [`Error::InconsistentFailureStep`].
pub fn validate_same_step(steps: Vec<VmFailedStep>) -> Result<String> {
    let mut resolved = Vec::with_capacity(steps.len());
    for (vm, step) in steps {
        resolved.push((vm, step?));
    }
    let Some(first) = resolved.first().map(|(_, step)| step.clone()) else {
        return Err(Error::validation_for("Plan", "no VMs to classify"));
    };
    if resolved.iter().any(|(_, step)| *step != first) {
        return Err(Error::InconsistentFailureStep { steps: resolved });
    }
    Ok(first)
}

/// Step the scenario expects the hook failure at
///
/// An explicit expectation wins; otherwise a configured pre-hook implies
/// `PreHook` and anything else `PostHook`.
pub fn expected_failure_step(explicit: Option<HookStep>, has_pre_hook: bool) -> HookStep {
    explicit.unwrap_or(if has_pre_hook {
        HookStep::PreHook
    } else {
        HookStep::PostHook
    })
}

/// Check the common failed step against the expected one
pub fn validate_expected(actual: &str, expected: HookStep) -> Result<()> {
    if actual != expected.as_str() {
        return Err(Error::UnexpectedFailureStep {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Classify a hook-induced failure for `vms`, returning the common step
pub async fn classify_hook_failure<C>(
    client: &C,
    plan: &ObjectRef,
    vms: &[String],
    expected: HookStep,
) -> Result<HookStep>
where
    C: MigrationClient + ?Sized,
{
    let step = validate_same_step(all_failed_steps(client, plan, vms).await?)?;
    validate_expected(&step, expected)?;
    info!(plan = %plan, %step, "Hook failure matched expectation");
    Ok(expected)
}

/// Names of planned VMs that no Migration status entry matches by id or name
pub fn missing_from_run(migration: &Migration, vms: &[VmRef]) -> Vec<String> {
    let statuses = migration
        .status
        .as_ref()
        .map(|s| s.vms.as_slice())
        .unwrap_or_default();
    vms.iter()
        .filter(|vm| !statuses.iter().any(|s| s.matches(&vm.id) || s.matches(&vm.name)))
        .map(|vm| vm.name.clone())
        .collect()
}

/// Require every planned VM to appear in the terminal run's status
///
/// Returns [`Error::VmNotFoundInRun`] for the first VM the run dropped.
pub async fn ensure_run_covers<C>(client: &C, plan: &ObjectRef, vms: &[VmRef]) -> Result<()>
where
    C: MigrationClient + ?Sized,
{
    let migration = find_migration(client, plan).await?;
    let missing = missing_from_run(&migration, vms);
    if let Some(vm) = missing.first() {
        let migration_name = migration.metadata.name.clone().unwrap_or_default();
        warn!(plan = %plan, migration = %migration_name, ?missing, "Planned VMs missing from run");
        return Err(Error::VmNotFoundInRun {
            vm: vm.clone(),
            migration: migration_name,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMigrationClient;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use mtv_common::crd::MigrationSpec;

    fn migration(name: &str, plan: &str, created_min: u32, status: serde_json::Value) -> Migration {
        let mut m = Migration::new(
            name,
            MigrationSpec {
                plan: ObjectRef::new(plan, "mtv-tests"),
                cutover: None,
            },
        );
        m.metadata.namespace = Some("mtv-tests".to_string());
        m.metadata.creation_timestamp = Some(Time(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, created_min, 0).unwrap(),
        ));
        if !status.is_null() {
            m.status = Some(serde_json::from_value(status).unwrap());
        }
        m
    }

    fn failed_at(vms: &[(&str, &str, &str)]) -> serde_json::Value {
        serde_json::json!({
            "vms": vms.iter().map(|(id, name, step)| serde_json::json!({
                "id": id,
                "name": name,
                "pipeline": [
                    {"name": "Initialize", "phase": "Completed"},
                    {"name": step, "error": {"phase": "Running", "reasons": ["hook exited 1"]}}
                ]
            })).collect::<Vec<_>>()
        })
    }

    fn plan_ref() -> ObjectRef {
        ObjectRef::new("mtv-plan", "mtv-tests")
    }

    fn vms(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn client_with(migrations: Vec<Migration>) -> MockMigrationClient {
        let mut client = MockMigrationClient::new();
        client
            .expect_list_migrations()
            .returning(move |_| Ok(migrations.clone()));
        client
    }

    mod lookup {
        use super::*;

        #[tokio::test]
        async fn most_recent_migration_wins() {
            let client = client_with(vec![
                migration("m-new", "mtv-plan", 30, serde_json::Value::Null),
                migration("m-old", "mtv-plan", 5, serde_json::Value::Null),
                migration("m-other", "other-plan", 59, serde_json::Value::Null),
            ]);
            let found = find_migration(&client, &plan_ref()).await.unwrap();
            assert_eq!(found.metadata.name.as_deref(), Some("m-new"));
        }

        #[tokio::test]
        async fn no_matching_migration_is_not_found() {
            let client = client_with(vec![migration(
                "m-other",
                "other-plan",
                1,
                serde_json::Value::Null,
            )]);
            let err = find_migration(&client, &plan_ref()).await.unwrap_err();
            assert!(matches!(err, Error::MigrationNotFound { ref plan, .. } if plan == "mtv-plan"));
        }

        #[tokio::test]
        async fn api_404_is_not_found() {
            let mut client = MockMigrationClient::new();
            client.expect_list_migrations().returning(|_| {
                Err(Error::from(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "the server could not find the requested resource".to_string(),
                    reason: "NotFound".to_string(),
                    code: 404,
                })))
            });
            let err = find_migration(&client, &plan_ref()).await.unwrap_err();
            assert!(matches!(err, Error::MigrationNotFound { .. }));
        }

        #[tokio::test]
        async fn other_api_errors_propagate() {
            let mut client = MockMigrationClient::new();
            client.expect_list_migrations().returning(|_| {
                Err(Error::from(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                })))
            });
            let err = find_migration(&client, &plan_ref()).await.unwrap_err();
            assert!(matches!(err, Error::Kube { .. }));
        }
    }

    mod failed_step_lookup {
        use super::*;

        #[test]
        fn matches_vm_by_id_or_name() {
            let m = migration("m", "mtv-plan", 0, failed_at(&[("vm-1", "rhel9", "PostHook")]));
            assert_eq!(failed_step(&m, "rhel9").unwrap(), "PostHook");
            assert_eq!(failed_step(&m, "vm-1").unwrap(), "PostHook");
        }

        #[test]
        fn no_status_is_status_missing() {
            let m = migration("m", "mtv-plan", 0, serde_json::Value::Null);
            assert!(matches!(
                failed_step(&m, "rhel9").unwrap_err(),
                Error::MigrationStatusMissing { ref migration } if migration == "m"
            ));
        }

        #[test]
        fn empty_vm_list_is_status_missing() {
            let m = migration("m", "mtv-plan", 0, serde_json::json!({"vms": []}));
            assert!(matches!(
                failed_step(&m, "rhel9").unwrap_err(),
                Error::MigrationStatusMissing { .. }
            ));
        }

        #[test]
        fn absent_vm_is_not_found_in_run() {
            let m = migration("m", "mtv-plan", 0, failed_at(&[("vm-1", "rhel9", "PostHook")]));
            assert!(matches!(
                failed_step(&m, "win2019").unwrap_err(),
                Error::VmNotFoundInRun { ref vm, .. } if vm == "win2019"
            ));
        }

        #[test]
        fn clean_pipeline_is_pipeline_missing() {
            let m = migration(
                "m",
                "mtv-plan",
                0,
                serde_json::json!({"vms": [{"id": "vm-1", "name": "rhel9", "pipeline": [
                    {"name": "DiskTransfer", "phase": "Completed"}
                ]}]}),
            );
            assert!(matches!(
                failed_step(&m, "rhel9").unwrap_err(),
                Error::VmPipelineMissing { .. }
            ));
        }

        #[test]
        fn empty_pipeline_is_pipeline_missing() {
            let m = migration(
                "m",
                "mtv-plan",
                0,
                serde_json::json!({"vms": [{"id": "vm-1", "name": "rhel9"}]}),
            );
            assert!(matches!(
                failed_step(&m, "vm-1").unwrap_err(),
                Error::VmPipelineMissing { .. }
            ));
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn single_vm_is_trivially_consistent() {
            let step = validate_same_step(vec![("rhel9".to_string(), Ok("PostHook".to_string()))])
                .unwrap();
            assert_eq!(step, "PostHook");
        }

        #[test]
        fn disagreeing_steps_are_inconsistent() {
            let err = validate_same_step(vec![
                ("rhel9".to_string(), Ok("DiskTransfer".to_string())),
                ("win2019".to_string(), Ok("PostHook".to_string())),
            ])
            .unwrap_err();
            match err {
                Error::InconsistentFailureStep { steps } => {
                    assert_eq!(
                        steps,
                        vec![
                            ("rhel9".to_string(), "DiskTransfer".to_string()),
                            ("win2019".to_string(), "PostHook".to_string()),
                        ]
                    );
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn first_lookup_error_is_surfaced() {
            let err = validate_same_step(vec![
                ("rhel9".to_string(), Ok("PostHook".to_string())),
                (
                    "win2019".to_string(),
                    Err(Error::VmNotFoundInRun {
                        vm: "win2019".to_string(),
                        migration: "m".to_string(),
                    }),
                ),
            ])
            .unwrap_err();
            assert!(matches!(err, Error::VmNotFoundInRun { .. }));
        }

        #[test]
        fn no_vms_is_validation_error() {
            assert!(matches!(
                validate_same_step(Vec::new()).unwrap_err(),
                Error::Validation { .. }
            ));
        }

        #[test]
        fn expected_step_derivation() {
            assert_eq!(expected_failure_step(None, true), HookStep::PreHook);
            assert_eq!(expected_failure_step(None, false), HookStep::PostHook);
            assert_eq!(
                expected_failure_step(Some(HookStep::PostHook), true),
                HookStep::PostHook
            );
        }

        #[test]
        fn mismatched_step_is_unexpected() {
            assert!(validate_expected("PostHook", HookStep::PostHook).is_ok());
            let err = validate_expected("PreHook", HookStep::PostHook).unwrap_err();
            assert!(matches!(
                err,
                Error::UnexpectedFailureStep { ref expected, ref actual }
                    if expected == "PostHook" && actual == "PreHook"
            ));
        }
    }

    mod classify {
        use super::*;

        #[tokio::test]
        async fn single_vm_post_hook_failure() {
            let client = client_with(vec![migration(
                "m",
                "mtv-plan",
                0,
                failed_at(&[("vm-1", "rhel9", "PostHook")]),
            )]);
            let step = classify_hook_failure(&client, &plan_ref(), &vms(&["rhel9"]), HookStep::PostHook)
                .await
                .unwrap();
            assert_eq!(step, HookStep::PostHook);
        }

        #[tokio::test]
        async fn two_vms_at_different_steps_are_inconsistent() {
            let client = client_with(vec![migration(
                "m",
                "mtv-plan",
                0,
                failed_at(&[
                    ("vm-1", "rhel9", "DiskTransfer"),
                    ("vm-2", "win2019", "PostHook"),
                ]),
            )]);
            let err = classify_hook_failure(
                &client,
                &plan_ref(),
                &vms(&["rhel9", "win2019"]),
                HookStep::PostHook,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::InconsistentFailureStep { .. }));
        }

        #[tokio::test]
        async fn pre_hook_failure_when_post_hook_expected() {
            let client = client_with(vec![migration(
                "m",
                "mtv-plan",
                0,
                failed_at(&[("vm-1", "rhel9", "PreHook")]),
            )]);
            let err = classify_hook_failure(&client, &plan_ref(), &vms(&["rhel9"]), HookStep::PostHook)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::UnexpectedFailureStep { .. }));
        }

        #[tokio::test]
        async fn lookup_errors_are_kept_per_vm() {
            let client = client_with(vec![migration(
                "m",
                "mtv-plan",
                0,
                failed_at(&[("vm-1", "rhel9", "PostHook")]),
            )]);
            let steps = all_failed_steps(&client, &plan_ref(), &vms(&["rhel9", "win2019"]))
                .await
                .unwrap();
            assert_eq!(steps.len(), 2);
            assert_eq!(steps[0].1.as_deref().unwrap(), "PostHook");
            assert!(matches!(steps[1].1, Err(Error::VmNotFoundInRun { .. })));
        }
    }

    mod coverage {
        use super::*;

        fn vm_ref(name: &str, id: &str) -> VmRef {
            VmRef {
                name: name.to_string(),
                id: id.to_string(),
            }
        }

        #[test]
        fn planned_vms_match_by_id_or_name() {
            let m = migration(
                "m",
                "mtv-plan",
                0,
                failed_at(&[("vm-1", "rhel9", "PostHook"), ("vm-2", "win-renamed", "PostHook")]),
            );
            let planned = [vm_ref("rhel9", "vm-x"), vm_ref("win2019", "vm-2")];
            assert!(missing_from_run(&m, &planned).is_empty());
            let planned = [vm_ref("rhel9", "vm-1"), vm_ref("centos7", "vm-3")];
            assert_eq!(missing_from_run(&m, &planned), vec!["centos7"]);
        }

        #[tokio::test]
        async fn dropped_vm_is_not_found_in_run() {
            let client = client_with(vec![migration(
                "m",
                "mtv-plan",
                0,
                failed_at(&[("vm-1", "rhel9", "PostHook")]),
            )]);
            let planned = [vm_ref("rhel9", "vm-1"), vm_ref("win2019", "vm-2")];
            let err = ensure_run_covers(&client, &plan_ref(), &planned)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                Error::VmNotFoundInRun { ref vm, ref migration } if vm == "win2019" && migration == "m"
            ));
        }

        #[tokio::test]
        async fn full_run_is_covered() {
            let client = client_with(vec![migration(
                "m",
                "mtv-plan",
                0,
                failed_at(&[("vm-1", "rhel9", "PostHook")]),
            )]);
            ensure_run_covers(&client, &plan_ref(), &[vm_ref("rhel9", "vm-1")])
                .await
                .unwrap();
        }
    }
}
