use std::time::Duration;

use anyhow::Result;
use personapool_admin::admin_app;
use personapool_core::Services;
use poem::listener::TcpListener;
use poem::Server;
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let listen = config.store.http.listen;

    let services = Services::new(config).await?;
    let app = admin_app(&services);

    info!(%listen, "Admin API listening");
    Server::new(TcpListener::bind(listen.to_string()))
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
            },
            Some(Duration::from_secs(5)),
        )
        .await?;

    Ok(())
}
