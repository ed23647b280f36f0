//! Shared setup for live migration tests

use std::sync::Once;

use mtv_common::crd::{ObjectRef, ProviderPair};
use mtv_common::telemetry::{try_init_logging, LogFormat};
use mtv_common::HarnessConfig;
use mtv_e2e::{run_scenario, MigrationScenario, ScenarioOutcome};

static LOGGING: Once = Once::new();

/// VM used when `MTV_E2E_VM` is unset
const DEFAULT_VM: &str = "mtv-rhel8-sanity";

/// Load the harness configuration named by `MTV_E2E_CONFIG`
pub fn load_config() -> HarnessConfig {
    LOGGING.call_once(|| try_init_logging(LogFormat::Pretty));
    let path = std::env::var("MTV_E2E_CONFIG").expect("MTV_E2E_CONFIG must be set");
    HarnessConfig::load(&path).expect("harness config should load")
}

/// Provider pair from `MTV_SOURCE_PROVIDER` and `MTV_DESTINATION_PROVIDER`
pub fn providers(config: &HarnessConfig) -> ProviderPair {
    let source = std::env::var("MTV_SOURCE_PROVIDER").expect("MTV_SOURCE_PROVIDER must be set");
    let destination =
        std::env::var("MTV_DESTINATION_PROVIDER").unwrap_or_else(|_| "host".to_string());
    ProviderPair {
        source: ObjectRef::new(&source, &config.mtv_namespace),
        destination: ObjectRef::new(&destination, &config.mtv_namespace),
    }
}

/// Name of the source VM the stories migrate
pub fn test_vm() -> String {
    std::env::var("MTV_E2E_VM").unwrap_or_else(|_| DEFAULT_VM.to_string())
}

/// Parse a scenario, substituting `{vm}` with the test VM name
pub fn scenario(template: &str) -> MigrationScenario {
    let yaml = template.replace("{vm}", &test_vm());
    MigrationScenario::from_yaml_str(&yaml).expect("scenario should parse")
}

/// Run a scenario with the environment's config and providers
pub async fn run(scenario: &MigrationScenario) -> ScenarioOutcome {
    let config = load_config();
    let providers = providers(&config);
    match run_scenario(&config, scenario, providers).await {
        Ok(outcome) => outcome,
        Err(e) => panic!("scenario {} failed: {}", scenario.name, e),
    }
}
