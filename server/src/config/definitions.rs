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

use super::feedback::WarningStack;
use super::{DEFAULT_ECHO_RING_CAPACITY, DEFAULT_IPV4, DEFAULT_PORT, DEFAULT_SEND_QUEUE_LIMIT};
use std::net::IpAddr;
use std::time::Duration;

/// A fully merged configuration, ready to be handed to the registry and
/// the sync listener.
#[derive(Debug, PartialEq)]
pub struct ConfigurationSet {
    /// Bind address for the peer-sync TCP listener
    pub host: IpAddr,
    /// Bind port for the peer-sync TCP listener (default 2022)
    pub port: u16,
    /// Interval between reconnect attempts for a peer marked `Reconnecting`
    pub reconnect_interval: Duration,
    /// Soft limit on pending messages per pipe send-queue before the
    /// oldest non-matching entry is dropped
    pub send_queue_limit: usize,
    /// Capacity of the per-link self-origin send-id ring used for echo
    /// suppression
    pub echo_ring_capacity: usize,
    /// Protocol major version this process will accept during `ver` exchange
    pub protocol_version: u16,
    /// Maximum number of concurrent peer connections
    pub maxcon: usize,
}

impl ConfigurationSet {
    pub const PROTOCOL_VERSION: u16 = 1;

    pub fn default() -> Self {
        ConfigurationSet {
            host: DEFAULT_IPV4,
            port: DEFAULT_PORT,
            reconnect_interval: Duration::from_secs(2),
            send_queue_limit: DEFAULT_SEND_QUEUE_LIMIT,
            echo_ring_capacity: DEFAULT_ECHO_RING_CAPACITY,
            protocol_version: Self::PROTOCOL_VERSION,
            maxcon: 16384,
        }
    }
}

impl Default for ConfigurationSet {
    fn default() -> Self {
        Self::default()
    }
}

type RestoreFile = Option<String>;

/// The outcome of loading configuration: either the untouched defaults,
/// or a merged set carrying the warnings accumulated along the way.
#[derive(Debug, PartialEq)]
pub struct ConfigType {
    config: ConfigurationSet,
    restore: RestoreFile,
    is_custom: bool,
    warnings: Option<WarningStack>,
}

impl ConfigType {
    fn _new(
        config: ConfigurationSet,
        restore: RestoreFile,
        is_custom: bool,
        warnings: Option<WarningStack>,
    ) -> Self {
        Self {
            config,
            restore,
            is_custom,
            warnings,
        }
    }
    pub fn print_warnings(&self) {
        if let Some(warnings) = self.warnings.as_ref() {
            warnings.print_warnings()
        }
    }
    pub fn finish(self) -> (ConfigurationSet, Option<String>) {
        (self.config, self.restore)
    }
    pub fn config(&self) -> &ConfigurationSet {
        &self.config
    }
    pub fn is_custom(&self) -> bool {
        self.is_custom
    }
    pub fn new_custom(
        config: ConfigurationSet,
        restore: RestoreFile,
        warnings: WarningStack,
    ) -> Self {
        Self::_new(config, restore, true, Some(warnings))
    }
    pub fn new_default(restore: RestoreFile) -> Self {
        Self::_new(ConfigurationSet::default(), restore, false, None)
    }
}
