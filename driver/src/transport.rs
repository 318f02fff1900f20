//! Stands up the QUIC listener local proxies connect to, and bridges
//! accepted connections into `underlayer::UnderlayerManager` (§4.7).
//!
//! The handshake/session-establishment flow itself belongs to
//! `underlayer`'s already-adapted `QuicServer`/`CertificateManager`; this
//! module only does the domain-scheduler-specific part: treat every
//! inbound message as a heartbeat, and register the sending local's
//! `Connection` with `UnderlayerManager` the first time it's seen.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use underlayer::{CertificateManager, QuicServer, TransportConfig};

pub async fn start(
    underlayer: Arc<underlayer::UnderlayerManager>,
    transport_config: TransportConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let cert = &transport_config.certificate;
    let cert_manager = Arc::new(
        CertificateManager::new_self_signed(
            cert.subject_name.clone(),
            cert.validity_days,
            cert.rotation_interval,
        )
        .await?,
    );

    let mut server = QuicServer::new(transport_config, cert_manager).await?;
    let local_addr = server.start().await?;
    info!(%local_addr, "underlayer transport listening");

    let mut receiver = server
        .take_message_receiver()
        .await
        .ok_or_else(|| anyhow::anyhow!("underlayer transport message receiver already taken"))?;
    let server = Arc::new(server);

    loop {
        tokio::select! {
            message = receiver.recv() => {
                let Some((sender, _message)) = message else {
                    info!("underlayer transport message channel closed");
                    break;
                };
                handle_inbound(&server, &underlayer, sender).await;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn handle_inbound(
    server: &Arc<QuicServer>,
    underlayer: &Arc<underlayer::UnderlayerManager>,
    sender: scheduler_shared::UnitId,
) {
    if underlayer.health_of(&sender).await.is_none() {
        match server.connection(&sender).await {
            Some(connection) => {
                underlayer.register_local(sender, connection).await;
                info!(local_id = %sender, "registered local with underlayer");
            }
            None => {
                warn!(local_id = %sender, "received message from an unregistered connection");
                return;
            }
        }
    }
    if underlayer.record_heartbeat(sender).await {
        debug!(local_id = %sender, "local recovered, resource view resync required");
    }
}
