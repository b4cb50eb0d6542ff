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

use super::Configset;
use clap::Parser;
use std::net::IpAddr;

#[derive(Parser, Debug)]
#[command(name = "meshregd", about = "distributed hierarchical live-data registry daemon")]
pub(super) struct Cli {
    /// Path to a YAML configuration file. Mutually exclusive with all
    /// other flags and with the environment sources.
    #[arg(long)]
    pub(super) config: Option<String>,
    /// Bind address for the peer-sync listener
    #[arg(long)]
    pub(super) host: Option<IpAddr>,
    /// Bind port for the peer-sync listener
    #[arg(long)]
    pub(super) port: Option<u16>,
    /// Maximum number of concurrent peer connections
    #[arg(long)]
    pub(super) maxcon: Option<usize>,
    /// Seconds between reconnect attempts for a disconnected peer
    #[arg(long)]
    pub(super) reconnect_interval: Option<u64>,
    /// Soft limit on pending messages per pipe send-queue
    #[arg(long)]
    pub(super) send_queue_limit: Option<usize>,
    /// Capacity of the per-link echo-suppression send-id ring
    #[arg(long)]
    pub(super) echo_ring_capacity: Option<usize>,
    /// Protocol major version accepted during peer `ver` exchange
    #[arg(long)]
    pub(super) protocol_version: Option<u16>,
}

pub(super) fn parse_cli_args(cli: &Cli) -> Configset {
    let mut defset = Configset::new_cli();
    defset.server_tcp(cli.host, "--host", cli.port, "--port");
    defset.server_maxcon(cli.maxcon, "--maxcon");
    defset.sync_settings(
        cli.reconnect_interval,
        "--reconnect-interval",
        cli.send_queue_limit,
        "--send-queue-limit",
        cli.echo_ring_capacity,
        "--echo-ring-capacity",
        cli.protocol_version,
        "--protocol-version",
    );
    defset
}
