//! mtv-e2e - run one VM migration scenario against a live cluster

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use mtv_common::crd::{ObjectRef, ProviderPair};
use mtv_common::telemetry::{try_init_logging, LogFormat};
use mtv_common::HarnessConfig;
use mtv_e2e::{run_scenario, MigrationScenario};

/// Run a VM migration scenario and check its outcome
#[derive(Parser, Debug)]
#[command(name = "mtv-e2e", version, about, long_about = None)]
struct Cli {
    /// Harness configuration YAML
    #[arg(short = 'c', long = "config", env = "MTV_E2E_CONFIG")]
    config_file: PathBuf,

    /// Scenario YAML
    #[arg(short = 's', long = "scenario")]
    scenario_file: PathBuf,

    /// Source Provider resource name
    #[arg(long, env = "MTV_SOURCE_PROVIDER")]
    source_provider: String,

    /// Destination Provider resource name
    #[arg(long, env = "MTV_DESTINATION_PROVIDER", default_value = "host")]
    destination_provider: String,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    try_init_logging(if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let config = HarnessConfig::load(&cli.config_file)?;
    let scenario_yaml = tokio::fs::read_to_string(&cli.scenario_file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read scenario {:?}: {}", cli.scenario_file, e))?;
    let scenario = MigrationScenario::from_yaml_str(&scenario_yaml)?;

    let providers = ProviderPair {
        source: ObjectRef::new(&cli.source_provider, &config.mtv_namespace),
        destination: ObjectRef::new(&cli.destination_provider, &config.mtv_namespace),
    };
    let outcome = run_scenario(&config, &scenario, providers).await?;
    info!(
        plan = %outcome.run.plan,
        migration = %outcome.run.migration,
        state = %outcome.state,
        failed_step = ?outcome.failed_step,
        verified = outcome.verified,
        "Scenario passed"
    );
    Ok(())
}
