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

//! One peer connection's state machine and command dispatch.
//!
//! `Init -> Connecting -> Syncing -> Connected -> (Error|Disconnected)
//! -> (Reconnecting -> Connecting)*`. A connection that reaches
//! `Disconnected` or `Error` and has a configured reconnect interval
//! moves itself to `Reconnecting` and is retried by the owning mount's
//! supervisor rather than torn down outright.

use super::mount::EchoRing;
use crate::auth::AuthGate;
use crate::config::ConfigurationSet;
use crate::event::{CallbackSubscriber, Event};
use crate::link::{Link, SyncFlags};
use crate::registry::{Mount, Registry};
use crate::util::IdGen;
use crate::wire::Record;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

static SEND_IDS: IdGen = IdGen::new();
static MONITOR_SUB_IDS: IdGen = IdGen::new();

/// A folder-content change queued for a peer that registered `monitor`
/// on one of our links; drained by `drive`'s select loop and written out
/// as a fresh `sync` line.
enum MonitorEvent {
    ChildCreated { path: String },
}

/// Walk `link`'s subtree depth-first, collecting each leaf's absolute
/// path and mode for a mount replay `sync` line. Folders recurse;
/// leaves are collected directly.
fn collect_leaves(link: &Arc<Link>, out: &mut Vec<(String, crate::link::Mode)>) {
    if link.is_folder() {
        for child in link.children() {
            collect_leaves(&child, out);
        }
    } else {
        out.push((link.full_path(), link.mode()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Init,
    Connecting,
    Syncing,
    Connected,
    Error,
    Disconnected,
    Reconnecting,
}

/// A parsed command verb plus its fields, decoded off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Sync(Record),
    Set(Record),
    Mode(Record),
    Ls(Record),
    Get(Record),
    Ver(Record),
    Exit,
    Nop,
    Destroy(Record),
    Monitor(Record),
    Unknown(Record),
}

impl Command {
    pub fn parse(record: Record) -> Self {
        let verb = record.fields.first().map(|f| f.key.clone()).unwrap_or_default();
        match verb.as_str() {
            super::CMD_SYNC => Command::Sync(record),
            super::CMD_SET => Command::Set(record),
            super::CMD_MODE => Command::Mode(record),
            super::CMD_LS => Command::Ls(record),
            super::CMD_GET => Command::Get(record),
            super::CMD_VER => Command::Ver(record),
            super::CMD_EXIT => Command::Exit,
            super::CMD_NOP => Command::Nop,
            super::CMD_DESTROY => Command::Destroy(record),
            super::CMD_MONITOR => Command::Monitor(record),
            _ => Command::Unknown(record),
        }
    }
}

/// A peer connection, either the listener's accepted side or the
/// mount supervisor's dialed-out side. Holds the state machine, the
/// echo ring for self-origin suppression, and the mount it serves.
pub struct PeerConnection {
    pub state: PeerState,
    pub mount: Mount,
    echo: EchoRing,
    auth: AuthGate,
    protocol_version: u16,
    monitor_tx: mpsc::UnboundedSender<MonitorEvent>,
    monitor_rx: mpsc::UnboundedReceiver<MonitorEvent>,
    /// Keeps each `monitor` subscription's liveness flag alive for as
    /// long as this connection runs; flipped false when the connection
    /// ends so the link's subscriber set sweeps them out.
    monitor_subscriptions: Vec<Arc<AtomicBool>>,
}

impl PeerConnection {
    pub fn new(mount: Mount, cfg: &ConfigurationSet, auth: AuthGate) -> Self {
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();
        Self {
            state: PeerState::Init,
            mount,
            echo: EchoRing::new(cfg.echo_ring_capacity),
            auth,
            protocol_version: cfg.protocol_version,
            monitor_tx,
            monitor_rx,
            monitor_subscriptions: Vec::new(),
        }
    }

    fn retire_monitor_subscriptions(&self) {
        for alive in &self.monitor_subscriptions {
            alive.store(false, Ordering::Release);
        }
    }

    /// Dial the peer and run the handshake + steady-state loop until
    /// the stream closes or a fatal record arrives. Returns the state
    /// to leave the connection in, so the caller's supervisor can
    /// decide whether to reconnect.
    pub async fn run(&mut self, registry: Arc<Registry>) -> PeerState {
        self.state = PeerState::Connecting;
        let stream = match TcpStream::connect(self.mount.peer_addr).await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("connect to {} failed: {e}", self.mount.peer_addr);
                self.state = PeerState::Error;
                return self.state;
            }
        };
        self.drive(stream, registry).await
    }

    /// Run the handshake + steady-state loop over an already-accepted
    /// stream (the listener side never dials out).
    pub async fn accept_driven(&mut self, stream: TcpStream, registry: Arc<Registry>) -> PeerState {
        self.state = PeerState::Connecting;
        self.drive(stream, registry).await
    }

    async fn drive(&mut self, stream: TcpStream, registry: Arc<Registry>) -> PeerState {
        let (rd, mut wr) = stream.into_split();
        let mut reader = BufReader::new(rd);

        self.state = PeerState::Syncing;
        let handshake = Record::new()
            .with(super::CMD_VER, self.protocol_version.to_string())
            .with(super::CMD_SYNC, self.mount.local_base.clone());
        if wr.write_all(&handshake.encode()).await.is_err() {
            self.state = PeerState::Error;
            return self.state;
        }

        let mut line = String::new();
        loop {
            line.clear();
            tokio::select! {
                biased;
                Some(event) = self.monitor_rx.recv() => {
                    if self.forward_monitor_event(event, &mut wr).await.is_err() {
                        self.retire_monitor_subscriptions();
                        self.state = PeerState::Error;
                        return self.state;
                    }
                }
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => {
                            self.retire_monitor_subscriptions();
                            self.state = PeerState::Disconnected;
                            return self.state;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::warn!("peer {} read error: {e}", self.mount.peer_addr);
                            self.retire_monitor_subscriptions();
                            self.state = PeerState::Error;
                            return self.state;
                        }
                    }
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    let record = Record::decode(trimmed);
                    let command = Command::parse(record);
                    match self.dispatch(command, &registry, &mut wr).await {
                        Ok(true) => {}
                        Ok(false) => {
                            self.retire_monitor_subscriptions();
                            self.state = PeerState::Disconnected;
                            return self.state;
                        }
                        Err(()) => {
                            self.retire_monitor_subscriptions();
                            self.state = PeerState::Error;
                            return self.state;
                        }
                    }
                }
            }
        }
    }

    /// Write one queued monitor notification out to the peer as a fresh
    /// `sync` line.
    async fn forward_monitor_event(
        &self,
        event: MonitorEvent,
        wr: &mut (impl AsyncWriteExt + Unpin),
    ) -> std::io::Result<()> {
        match event {
            MonitorEvent::ChildCreated { path } => {
                let record = Record::new().with(super::CMD_SYNC, path);
                wr.write_all(&record.encode()).await
            }
        }
    }

    /// On entering `Connected`, replay every locally-mounted object:
    /// `sync <path> <mode-flags>` for each leaf, recursing into folders.
    async fn replay_mounts(
        &self,
        registry: &Arc<Registry>,
        wr: &mut (impl AsyncWriteExt + Unpin),
    ) -> std::io::Result<()> {
        let Some(root) = registry.resolve(&self.mount.local_base) else {
            return Ok(());
        };
        let mut leaves = Vec::new();
        collect_leaves(&root, &mut leaves);
        for (path, mode) in leaves {
            let record = Record::new()
                .with(super::CMD_SYNC, path)
                .with("flags", mode.to_string());
            wr.write_all(&record.encode()).await?;
        }
        Ok(())
    }

    /// Handle one decoded command. `Ok(true)` to keep reading,
    /// `Ok(false)` on a clean `exit`, `Err(())` on a protocol fault.
    async fn dispatch(
        &mut self,
        command: Command,
        registry: &Arc<Registry>,
        wr: &mut (impl AsyncWriteExt + Unpin),
    ) -> Result<bool, ()> {
        match command {
            Command::Ver(record) => {
                let their_version: u16 = record.get(super::CMD_VER).and_then(|v| v.parse().ok()).unwrap_or(0);
                if their_version != self.protocol_version {
                    log::warn!(
                        "protocol mismatch with {}: local={} remote={their_version}",
                        self.mount.peer_addr,
                        self.protocol_version
                    );
                }
                self.state = PeerState::Connected;
                self.replay_mounts(registry, wr).await.map_err(|_| ())?;
                Ok(true)
            }
            Command::Nop => Ok(true),
            Command::Exit => Ok(false),
            Command::Set(record) => {
                let send_id: u64 = record.get("id").and_then(|v| v.parse().ok()).unwrap_or(0);
                if self.echo.is_only_echo(send_id) {
                    return Ok(true);
                }
                let Some(path) = record.get("path") else {
                    return Ok(true);
                };
                let Some(value) = record.get("value") else {
                    return Ok(true);
                };
                if let Some(rebased) =
                    crate::path::rebase(path, &self.mount.remote_base, &self.mount.local_base)
                {
                    if let Ok(link) = registry.resolve_or_create(&rebased) {
                        link.update_value(send_id, None, |cell| cell.set_text(value.to_string()));
                    }
                }
                Ok(true)
            }
            Command::Mode(record) => {
                let Some(path) = record.get("path") else {
                    return Ok(true);
                };
                if let Some(rebased) =
                    crate::path::rebase(path, &self.mount.remote_base, &self.mount.local_base)
                {
                    if let Some(link) = registry.resolve(&rebased) {
                        link.add_mode(crate::link::Mode::BIDIR);
                    }
                }
                Ok(true)
            }
            Command::Sync(record) => {
                let Some(path) = record.get(super::CMD_SYNC) else {
                    return Ok(true);
                };
                if let Some(rebased) =
                    crate::path::rebase(path, &self.mount.remote_base, &self.mount.local_base)
                {
                    let _ = registry.resolve_or_create(&rebased);
                }
                Ok(true)
            }
            Command::Ls(record) => {
                let Some(path) = record.get("path") else {
                    return Ok(true);
                };
                let mut reply = Record::new().with(super::CMD_LS, path.to_string());
                if let Some(rebased) =
                    crate::path::rebase(path, &self.mount.remote_base, &self.mount.local_base)
                {
                    if let Some(link) = registry.resolve(&rebased) {
                        for child in link.children() {
                            reply.push("child", Some(child.name().to_string()));
                        }
                    }
                }
                let _ = wr.write_all(&reply.encode()).await;
                Ok(true)
            }
            Command::Get(record) => {
                let reply = Record::new().with("ack", record.get("id").unwrap_or("0").to_string());
                let _ = wr.write_all(&reply.encode()).await;
                Ok(true)
            }
            Command::Destroy(record) => {
                if let Some(path) = record.get("path") {
                    if let Some(rebased) =
                        crate::path::rebase(path, &self.mount.remote_base, &self.mount.local_base)
                    {
                        if let Some(link) = registry.resolve(&rebased) {
                            registry.retire(&link, crate::link::RetireKind::LeafGlobal, rebased);
                        }
                    }
                }
                Ok(true)
            }
            Command::Monitor(record) => {
                let Some(path) = record.get("path") else {
                    return Ok(true);
                };
                if let Some(rebased) =
                    crate::path::rebase(path, &self.mount.remote_base, &self.mount.local_base)
                {
                    if let Some(link) = registry.resolve(&rebased) {
                        link.add_sync_flags(SyncFlags::MONITOR);
                        let tx = self.monitor_tx.clone();
                        let alive = Arc::new(AtomicBool::new(true));
                        self.monitor_subscriptions.push(alive.clone());
                        link.subscribe(Arc::new(CallbackSubscriber::new(
                            MONITOR_SUB_IDS.next(),
                            alive,
                            move |ev| {
                                if let Event::ChildCreated { path, .. } = ev {
                                    let _ = tx.send(MonitorEvent::ChildCreated { path });
                                }
                            },
                        )));
                    }
                }
                Ok(true)
            }
            Command::Unknown(record) => {
                log::warn!("unrecognised command from {}: {record:?}", self.mount.peer_addr);
                Ok(true)
            }
        }
    }

    /// Send a value change outward, recording the send-id in our own
    /// echo ring so a round-tripped copy of this exact write is
    /// recognized and dropped.
    pub async fn send_set(
        &mut self,
        wr: &mut (impl AsyncWriteExt + Unpin),
        path: &str,
        value: &str,
    ) -> std::io::Result<()> {
        let send_id = SEND_IDS.next();
        self.echo.remember(send_id);
        let record = Record::new()
            .with(super::CMD_SET, "")
            .with("id", send_id.to_string())
            .with("path", path.to_string())
            .with("value", value.to_string());
        wr.write_all(&record.encode()).await
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }
}

/// A handle the mount supervisor uses to tell a running connection task
/// to shut down cleanly.
pub type ShutdownTx = mpsc::Sender<()>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parse_recognises_all_verbs() {
        for (verb, expect_match) in [
            ("sync", matches!(Command::parse(Record::new().with_flag("sync")), Command::Sync(_))),
            ("set", matches!(Command::parse(Record::new().with_flag("set")), Command::Set(_))),
            ("mode", matches!(Command::parse(Record::new().with_flag("mode")), Command::Mode(_))),
            ("ls", matches!(Command::parse(Record::new().with_flag("ls")), Command::Ls(_))),
            ("get", matches!(Command::parse(Record::new().with_flag("get")), Command::Get(_))),
            ("ver", matches!(Command::parse(Record::new().with_flag("ver")), Command::Ver(_))),
            ("exit", matches!(Command::parse(Record::new().with_flag("exit")), Command::Exit)),
            ("nop", matches!(Command::parse(Record::new().with_flag("nop")), Command::Nop)),
            ("destroy", matches!(Command::parse(Record::new().with_flag("destroy")), Command::Destroy(_))),
            ("monitor", matches!(Command::parse(Record::new().with_flag("monitor")), Command::Monitor(_))),
        ] {
            assert!(expect_match, "verb {verb} did not parse to its own variant");
        }
    }

    #[test]
    fn unknown_verb_falls_back_to_unknown_variant() {
        assert!(matches!(
            Command::parse(Record::new().with_flag("frobnicate")),
            Command::Unknown(_)
        ));
    }

    fn test_connection() -> PeerConnection {
        let mount = Mount {
            local_base: "/".to_string(),
            remote_base: "/".to_string(),
            peer_addr: "127.0.0.1:0".parse().unwrap(),
        };
        PeerConnection::new(mount, &ConfigurationSet::default(), AuthGate::open())
    }

    #[tokio::test]
    async fn ls_replies_with_the_resolved_links_children() {
        let registry = Registry::new();
        registry.resolve_or_create("/service/echo").unwrap();
        registry.resolve_or_create("/service/health").unwrap();
        let mut conn = test_connection();
        let (mut client, mut server) = tokio::io::duplex(4096);

        let record = Record::new().with_flag(super::super::CMD_LS).with("path", "/service/");
        let command = Command::parse(record);
        conn.dispatch(command, &registry, &mut server).await.unwrap();
        drop(server);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        let reply = Record::decode(std::str::from_utf8(&out).unwrap().trim_end_matches('\n'));
        let children: Vec<&str> = reply
            .fields
            .iter()
            .filter(|f| f.key == "child")
            .filter_map(|f| f.value.as_deref())
            .collect();
        assert!(children.contains(&"echo"));
        assert!(children.contains(&"health"));
    }

    #[tokio::test]
    async fn monitor_sets_the_sync_flag_and_forwards_child_created() {
        let registry = Registry::new();
        let folder = registry.resolve_or_create("/service/").unwrap();
        let mut conn = test_connection();
        let (_client, mut server) = tokio::io::duplex(4096);

        let record = Record::new().with_flag(super::super::CMD_MONITOR).with("path", "/service/");
        let command = Command::parse(record);
        conn.dispatch(command, &registry, &mut server).await.unwrap();
        assert!(folder.sync_flags().has(SyncFlags::MONITOR));

        registry.resolve_or_create("/service/echo").unwrap();
        let event = conn.monitor_rx.recv().await.unwrap();
        assert!(matches!(event, MonitorEvent::ChildCreated { path } if path == "/service/echo"));
    }

    #[tokio::test]
    async fn connected_state_replays_every_mounted_leaf() {
        let registry = Registry::new();
        registry.resolve_or_create("/a").unwrap();
        registry.resolve_or_create("/b").unwrap();
        let mut conn = test_connection();
        let (mut client, mut server) = tokio::io::duplex(4096);

        let record = Record::new().with(super::super::CMD_VER, "0");
        let command = Command::parse(record);
        conn.dispatch(command, &registry, &mut server).await.unwrap();
        assert_eq!(conn.state, PeerState::Connected);
        drop(server);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("sync=/a"));
        assert!(text.contains("sync=/b"));
    }
}
