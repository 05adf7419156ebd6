//! HTTP server, `alertflow serve`.

use alertflow::config::AlertflowConfig;
use anyhow::Result;

pub async fn cmd_serve(config: AlertflowConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = config.with_cli_args(host, port);
    for warning in config.validate() {
        tracing::warn!(%warning, "configuration warning");
    }
    alertflow::http::serve(config).await
}
