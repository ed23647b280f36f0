//! Migration state poller
//!
//! A run is `Executing` until the plan carries an `Advisory` condition of
//! type `Succeeded` or `Failed` with status `True`. Classification is a pure
//! function of the condition list, so sampling twice without a change in
//! between always yields the same state.

use std::fmt;
use std::time::Duration;

use tracing::{info, trace, warn};

use mtv_common::crd::{Condition, ObjectRef, CATEGORY_ADVISORY};
use mtv_common::{Error, Result, STATUS_TRUE};

use crate::client::MigrationClient;

/// Terminal condition type for a successful run
pub const CONDITION_SUCCEEDED: &str = "Succeeded";
/// Terminal condition type for a failed run
pub const CONDITION_FAILED: &str = "Failed";

/// Observed state of a migration run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No terminal condition yet
    Executing,
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed,
}

impl RunState {
    /// Whether the run has finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Executing)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Executing => "Executing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        })
    }
}

/// Classify a plan's condition list
///
/// The first matching Advisory condition wins.
pub fn classify(conditions: &[Condition]) -> RunState {
    conditions
        .iter()
        .filter(|c| c.category() == CATEGORY_ADVISORY && c.status == STATUS_TRUE)
        .find_map(|c| match c.type_.as_str() {
            CONDITION_SUCCEEDED => Some(RunState::Succeeded),
            CONDITION_FAILED => Some(RunState::Failed),
            _ => None,
        })
        .unwrap_or(RunState::Executing)
}

/// Take one sample of the plan, returning its state and raw status
pub async fn sample<C>(client: &C, plan: &ObjectRef) -> Result<(RunState, serde_json::Value)>
where
    C: MigrationClient + ?Sized,
{
    let obj = client
        .get_plan(&plan.name, &plan.namespace)
        .await?
        .ok_or_else(|| {
            Error::internal_with_context("poller", format!("plan {plan} no longer exists"))
        })?;
    let status = serde_json::to_value(&obj.status)?;
    Ok((classify(obj.conditions()), status))
}

/// Block until the run reaches a terminal state
///
/// Transitions are logged once at info; individual samples at trace.
/// Transient read errors are retried until the deadline; any other read
/// error is returned unchanged. Returns
/// [`Error::MigrationFailed`] with the last status on `Failed` and
/// [`Error::MigrationTimeout`] if no terminal state is seen in time.
pub async fn await_completion<C>(
    client: &C,
    plan: &ObjectRef,
    timeout: Duration,
    interval: Duration,
) -> Result<()>
where
    C: MigrationClient + ?Sized,
{
    let start = tokio::time::Instant::now();
    let mut last_state: Option<RunState> = None;
    let mut last_status = serde_json::Value::Null;

    loop {
        match sample(client, plan).await {
            Ok((state, status)) => {
                trace!(plan = %plan, %state, "Sampled migration state");
                if last_state != Some(state) {
                    info!(plan = %plan, status = %state, "Migration status changed");
                    last_state = Some(state);
                }
                last_status = status;
                match state {
                    RunState::Succeeded => return Ok(()),
                    RunState::Failed => {
                        return Err(Error::MigrationFailed {
                            plan: plan.name.clone(),
                            status: last_status.to_string(),
                        })
                    }
                    RunState::Executing => {}
                }
            }
            Err(e @ Error::Internal { .. }) => return Err(e),
            Err(e) if e.is_retryable() => {
                warn!(plan = %plan, error = %e, "Sampling failed, retrying")
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() >= timeout {
            warn!(plan = %plan, status = %last_status, "Migration did not finish in time");
            return Err(Error::MigrationTimeout {
                plan: plan.name.clone(),
                timeout_secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockMigrationClient;
    use mtv_common::crd::{Plan, PlanSpec, PlanStatus, CATEGORY_REQUIRED};
    use rstest::rstest;

    fn cond(type_: &str, status: &str, category: &str) -> Condition {
        Condition::new(type_, status, category)
    }

    fn plan_with(conditions: Vec<Condition>) -> Plan {
        let mut plan = Plan::new("mtv-plan", PlanSpec::default());
        plan.status = Some(PlanStatus {
            conditions,
            migration: None,
        });
        plan
    }

    fn plan_ref() -> ObjectRef {
        ObjectRef::new("mtv-plan", "mtv-tests")
    }

    mod classification {
        use super::*;

        #[rstest]
        #[case::no_conditions(vec![], RunState::Executing)]
        #[case::ready_only(vec![cond("Ready", "True", CATEGORY_REQUIRED)], RunState::Executing)]
        #[case::executing(vec![cond("Executing", "True", CATEGORY_ADVISORY)], RunState::Executing)]
        #[case::succeeded(vec![cond("Succeeded", "True", CATEGORY_ADVISORY)], RunState::Succeeded)]
        #[case::failed(vec![cond("Failed", "True", CATEGORY_ADVISORY)], RunState::Failed)]
        #[case::false_status(vec![cond("Succeeded", "False", CATEGORY_ADVISORY)], RunState::Executing)]
        #[case::wrong_category(vec![cond("Failed", "True", "Critical")], RunState::Executing)]
        #[case::lowercase_true(vec![cond("Succeeded", "true", CATEGORY_ADVISORY)], RunState::Executing)]
        fn classify_conditions(#[case] conditions: Vec<Condition>, #[case] expected: RunState) {
            assert_eq!(classify(&conditions), expected);
        }

        #[test]
        fn first_terminal_condition_wins() {
            let conditions = vec![
                cond("Ready", "True", CATEGORY_REQUIRED),
                cond("Failed", "True", CATEGORY_ADVISORY),
                cond("Succeeded", "True", CATEGORY_ADVISORY),
            ];
            assert_eq!(classify(&conditions), RunState::Failed);
        }

        #[test]
        fn sampling_is_idempotent() {
            for conditions in [
                vec![],
                vec![cond("Executing", "True", CATEGORY_ADVISORY)],
                vec![cond("Succeeded", "True", CATEGORY_ADVISORY)],
                vec![cond("Failed", "True", CATEGORY_ADVISORY)],
            ] {
                assert_eq!(classify(&conditions), classify(&conditions));
            }
        }
    }

    mod completion {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn succeeds_after_executing() {
            let mut client = MockMigrationClient::new();
            let mut calls = 0;
            client.expect_get_plan().returning(move |_, _| {
                calls += 1;
                Ok(Some(plan_with(if calls < 4 {
                    vec![cond("Executing", "True", CATEGORY_ADVISORY)]
                } else {
                    vec![cond("Succeeded", "True", CATEGORY_ADVISORY)]
                })))
            });
            await_completion(&client, &plan_ref(), Duration::from_secs(600), Duration::from_secs(1))
                .await
                .unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn failure_carries_status_payload() {
            let mut client = MockMigrationClient::new();
            client.expect_get_plan().returning(|_, _| {
                let mut failed = cond("Failed", "True", CATEGORY_ADVISORY);
                failed.message = Some("The plan execution has FAILED.".to_string());
                Ok(Some(plan_with(vec![failed])))
            });
            let err = await_completion(
                &client,
                &plan_ref(),
                Duration::from_secs(600),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
            match err {
                Error::MigrationFailed { plan, status } => {
                    assert_eq!(plan, "mtv-plan");
                    assert!(status.contains("The plan execution has FAILED."));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn executing_past_deadline_is_timeout_not_failure() {
            let mut client = MockMigrationClient::new();
            client
                .expect_get_plan()
                .returning(|_, _| Ok(Some(plan_with(vec![cond("Executing", "True", CATEGORY_ADVISORY)]))));
            let err = await_completion(
                &client,
                &plan_ref(),
                Duration::from_secs(30),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::MigrationTimeout { timeout_secs: 30, .. }));
        }

        #[tokio::test(start_paused = true)]
        async fn transient_read_errors_are_retried() {
            let mut client = MockMigrationClient::new();
            let mut calls = 0;
            client.expect_get_plan().returning(move |_, _| {
                calls += 1;
                if calls < 3 {
                    Err(Error::provider("kube", "connection reset"))
                } else {
                    Ok(Some(plan_with(vec![cond("Succeeded", "True", CATEGORY_ADVISORY)])))
                }
            });
            await_completion(&client, &plan_ref(), Duration::from_secs(60), Duration::from_secs(1))
                .await
                .unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn deleted_plan_fails_immediately() {
            let mut client = MockMigrationClient::new();
            client.expect_get_plan().times(1).returning(|_, _| Ok(None));
            let err = await_completion(
                &client,
                &plan_ref(),
                Duration::from_secs(60),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, Error::Internal { .. }));
        }

        #[tokio::test(start_paused = true)]
        async fn forbidden_read_is_returned_not_timed_out() {
            let mut client = MockMigrationClient::new();
            client.expect_get_plan().times(1).returning(|_, _| {
                Err(Error::from(kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "plans.forklift.konveyor.io is forbidden".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                })))
            });
            let err = await_completion(
                &client,
                &plan_ref(),
                Duration::from_secs(600),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
            assert!(
                matches!(&err, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 403),
                "unexpected error: {err:?}"
            );
        }
    }
}
