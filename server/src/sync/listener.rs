/*
 * This file is part of meshreg.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! The inbound TCP accept loop: bind once, spawn a
//! [`PeerConnection`](super::PeerConnection) task per accepted stream,
//! bounded by a connection-count semaphore, and stop cleanly on a
//! broadcast shutdown signal.

use super::connection::PeerConnection;
use crate::auth::AuthGate;
use crate::config::ConfigurationSet;
use crate::registry::{Mount, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

pub struct SyncListener {
    listener: TcpListener,
    registry: Arc<Registry>,
    climit: Arc<Semaphore>,
    auth: AuthGate,
    cfg_protocol_version: u16,
    cfg_echo_ring_capacity: usize,
    shutdown: broadcast::Sender<()>,
}

impl SyncListener {
    pub async fn bind(
        cfg: &ConfigurationSet,
        registry: Arc<Registry>,
        auth: AuthGate,
        shutdown: broadcast::Sender<()>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind((cfg.host, cfg.port)).await?;
        Ok(Self {
            listener,
            registry,
            climit: Arc::new(Semaphore::new(cfg.maxcon)),
            auth,
            cfg_protocol_version: cfg.protocol_version,
            cfg_echo_ring_capacity: cfg.echo_ring_capacity,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener errs out or a shutdown is
    /// broadcast. Each accepted stream gets a `PeerConnection` in
    /// `Connecting` state, spawned on its own task; a dropped permit is
    /// retaken once that task finishes.
    pub async fn run(&self) -> std::io::Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            let permit = self.climit.clone().acquire_owned();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    log::info!("sync listener shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("accept error: {e}");
                            continue;
                        }
                    };
                    let permit = match permit.await {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let registry = self.registry.clone();
                    let auth = self.auth.clone();
                    let pseudo_cfg = AcceptedCfg {
                        protocol_version: self.cfg_protocol_version,
                        echo_ring_capacity: self.cfg_echo_ring_capacity,
                    };
                    tokio::spawn(async move {
                        let _permit = permit;
                        let mount = Mount {
                            local_base: "/".to_string(),
                            remote_base: "/".to_string(),
                            peer_addr,
                        };
                        let mut conn = PeerConnection::new(mount, &pseudo_cfg.into_config(), auth);
                        let state = conn.accept_driven(stream, registry).await;
                        log::info!("peer {peer_addr} connection ended in state {state:?}");
                    });
                }
            }
        }
    }
}

/// The slice of [`ConfigurationSet`] a freshly accepted connection
/// actually needs, so the listener doesn't have to keep a whole config
/// clone alive just to hand a `&ConfigurationSet` to `PeerConnection::new`.
struct AcceptedCfg {
    protocol_version: u16,
    echo_ring_capacity: usize,
}

impl AcceptedCfg {
    fn into_config(self) -> ConfigurationSet {
        ConfigurationSet {
            host: std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            port: 0,
            reconnect_interval: Duration::from_secs(2),
            send_queue_limit: 0,
            echo_ring_capacity: self.echo_ring_capacity,
            protocol_version: self.protocol_version,
            maxcon: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_picks_an_ephemeral_port_and_accepts_a_shutdown() {
        let mut cfg = ConfigurationSet::default();
        cfg.port = 0;
        let registry = Registry::new();
        let (tx, _rx) = broadcast::channel(1);
        let listener = SyncListener::bind(&cfg, registry, AuthGate::open(), tx.clone())
            .await
            .unwrap();
        assert!(listener.local_addr().unwrap().port() != 0);
        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_millis(200), listener.run()).await;
        assert!(result.is_ok());
    }
}
