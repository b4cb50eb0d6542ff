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

//! YAML object representation for `--config`, mirrored field-for-field
//! onto [`super::Configset`] by [`from_file`].

use serde::Deserialize;
use std::net::IpAddr;

#[derive(Deserialize, Debug, PartialEq)]
pub struct Config {
    pub(super) server: ConfigKeyServer,
    pub(super) sync: Option<ConfigKeySync>,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct ConfigKeyServer {
    pub(super) host: IpAddr,
    pub(super) port: u16,
    pub(super) maxcon: Option<usize>,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct ConfigKeySync {
    /// Seconds between reconnect attempts
    pub(super) reconnect_interval: Option<u64>,
    pub(super) send_queue_limit: Option<usize>,
    pub(super) echo_ring_capacity: Option<usize>,
    pub(super) protocol_version: Option<u16>,
}

pub(super) fn from_file(cfg: Config) -> super::Configset {
    let mut cset = super::Configset::new_file();
    cset.server_tcp(
        Some(cfg.server.host),
        "server.host",
        Some(cfg.server.port),
        "server.port",
    );
    cset.server_maxcon(cfg.server.maxcon, "server.maxcon");
    let sync = cfg.sync.unwrap_or(ConfigKeySync {
        reconnect_interval: None,
        send_queue_limit: None,
        echo_ring_capacity: None,
        protocol_version: None,
    });
    cset.sync_settings(
        sync.reconnect_interval,
        "sync.reconnect_interval",
        sync.send_queue_limit,
        "sync.send_queue_limit",
        sync.echo_ring_capacity,
        "sync.echo_ring_capacity",
        sync.protocol_version,
        "sync.protocol_version",
    );
    cset
}
