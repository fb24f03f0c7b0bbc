// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use ramses_gateway::cfg::{cli::resolve_config_path, config::GatewayConfig, logger::init_logger};
use ramses_gateway::gateway::{EXIT_CONFIG_ERROR, Gateway};
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("config/logger.yaml").context("failed to init logger")?;

    let config_arg = std::env::args().nth(1).unwrap_or_else(|| "config/gateway.yaml".to_string());

    let gateway = match resolve_config_path(&config_arg).and_then(GatewayConfig::load_from_file) {
        Ok(cfg) => Gateway::new(cfg),
        Err(e) => {
            error!(error = %e, "failed to resolve or load config");
            std::process::exit(EXIT_CONFIG_ERROR);
        },
    };

    let code = gateway.start().await;
    std::process::exit(code);
}
