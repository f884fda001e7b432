//! Serve command implementation

use crate::cli::commands::open;
use crate::server;
use clap::Args;
use std::sync::Arc;
use tokio::sync::watch;

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Override `server.bind`
    #[arg(long)]
    pub bind: Option<String>,
}

impl ServeArgs {
    /// Execute the serve command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        let (mut config, service) = match open(config_path).await {
            Ok(opened) => opened,
            Err(code) => return Ok(code),
        };
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }

        println!("🌐 Serving on http://{}", config.server.bind);
        server::serve(Arc::new(service), &config.server, shutdown_signal).await?;
        Ok(0)
    }
}
