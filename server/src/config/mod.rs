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

//! Layered configuration: built-in defaults, an optional YAML file, the
//! environment, and CLI flags, merged in that order of increasing
//! precedence. Exactly one of (file, env, CLI) may supply a value for a
//! given run; mixing two non-default sources is a [`ConfigError::Conflict`].

// std imports
use core::str::FromStr;
use std::env::VarError;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
// internal modules
mod cfgcli;
mod cfgenv;
mod cfgfile;
mod definitions;
mod feedback;
#[cfg(test)]
mod tests;
// internal imports
use self::cfgfile::Config as ConfigFile;
pub use self::definitions::*;
use self::feedback::{ConfigError, ErrorStack, WarningStack};
use clap::Parser;

// server defaults
const DEFAULT_IPV4: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
const DEFAULT_PORT: u16 = 2022;
const DEFAULT_SEND_QUEUE_LIMIT: usize = 4096;
const DEFAULT_ECHO_RING_CAPACITY: usize = 256;

type StaticStr = &'static str;

#[derive(Debug)]
/// The outcome of a parse attempt for one configuration item from one
/// configuration source.
pub enum ConfigSourceParseResult<T> {
    Okay(T),
    Absent,
    ParseFailure,
}

/// A source a configuration value can be pulled from: an already-parsed
/// CLI argument, or a raw environment variable lookup.
pub trait TryFromConfigSource<T: Sized>: Sized {
    fn is_present(&self) -> bool;
    /// Attempt to mutate `target_value` if present, setting `trip` if a
    /// value was present at all (whether parseable or not). Returns true
    /// if a value was present but failed to parse.
    fn mutate_failed(self, target_value: &mut T, trip: &mut bool) -> bool;
    fn try_parse(self) -> ConfigSourceParseResult<T>;
}

/// CLI arguments arrive pre-parsed by `clap`, so the only question is
/// whether the user supplied them at all.
impl<T> TryFromConfigSource<T> for Option<T> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
    fn mutate_failed(self, target_value: &mut T, trip: &mut bool) -> bool {
        if let Some(v) = self {
            *trip = true;
            *target_value = v;
        }
        false
    }
    fn try_parse(self) -> ConfigSourceParseResult<T> {
        self.map(ConfigSourceParseResult::Okay)
            .unwrap_or(ConfigSourceParseResult::Absent)
    }
}

/// Environment variables are always strings and need a real parse.
impl<T: FromStr> TryFromConfigSource<T> for Result<String, VarError> {
    fn is_present(&self) -> bool {
        !matches!(self, Err(VarError::NotPresent))
    }
    fn mutate_failed(self, target_value: &mut T, trip: &mut bool) -> bool {
        match self {
            Ok(s) => s
                .parse()
                .map(|v| {
                    *trip = true;
                    *target_value = v;
                    false
                })
                .unwrap_or(true),
            Err(e) => {
                if matches!(e, VarError::NotPresent) {
                    false
                } else {
                    *trip = true;
                    true
                }
            }
        }
    }
    fn try_parse(self) -> ConfigSourceParseResult<T> {
        match self {
            Ok(s) => s
                .parse()
                .map(ConfigSourceParseResult::Okay)
                .unwrap_or(ConfigSourceParseResult::ParseFailure),
            Err(e) => match e {
                VarError::NotPresent => ConfigSourceParseResult::Absent,
                VarError::NotUnicode(_) => ConfigSourceParseResult::ParseFailure,
            },
        }
    }
}

/// A high-level configuration set that accumulates errors/warnings
/// while merging, rather than failing on the first bad key.
#[derive(Debug)]
pub struct Configset {
    did_mutate: bool,
    cfg: ConfigurationSet,
    estack: ErrorStack,
    wstack: WarningStack,
}

impl Configset {
    const EMSG_ENV: StaticStr = "Environment";
    const EMSG_CLI: StaticStr = "CLI arguments";
    const EMSG_FILE: StaticStr = "Configuration file";

    fn _new(feedback_source: StaticStr) -> Self {
        Self {
            did_mutate: false,
            cfg: ConfigurationSet::default(),
            estack: ErrorStack::new(feedback_source),
            wstack: WarningStack::new(feedback_source),
        }
    }
    pub fn new_env() -> Self {
        Self::_new(Self::EMSG_ENV)
    }
    pub fn new_cli() -> Self {
        Self::_new(Self::EMSG_CLI)
    }
    pub fn new_file() -> Self {
        Self {
            did_mutate: true,
            cfg: ConfigurationSet::default(),
            estack: ErrorStack::new(Self::EMSG_FILE),
            wstack: WarningStack::new(Self::EMSG_FILE),
        }
    }
    fn mutated(&mut self) {
        self.did_mutate = true;
    }
    fn epush(&mut self, field_key: StaticStr, expected: StaticStr) {
        self.estack
            .push(format!("Bad value for `{field_key}`. Expected {expected}"))
    }
    pub fn is_okay(&self) -> bool {
        self.estack.is_empty()
    }
    pub fn is_mutated(&self) -> bool {
        self.did_mutate
    }
    fn try_mutate<T>(
        &mut self,
        new: impl TryFromConfigSource<T>,
        target: &mut T,
        field_key: StaticStr,
        expected: StaticStr,
    ) {
        if new.mutate_failed(target, &mut self.did_mutate) {
            self.epush(field_key, expected)
        }
    }
    fn try_mutate_with_condcheck<T, F>(
        &mut self,
        new: impl TryFromConfigSource<T>,
        target: &mut T,
        field_key: StaticStr,
        expected: StaticStr,
        validation_fn: F,
    ) where
        F: Fn(&T) -> bool,
    {
        let mut needs_error = false;
        match new.try_parse() {
            ConfigSourceParseResult::Okay(ok) => {
                self.mutated();
                needs_error = !validation_fn(&ok);
                *target = ok;
            }
            ConfigSourceParseResult::ParseFailure => needs_error = true,
            ConfigSourceParseResult::Absent => {}
        }
        if needs_error {
            self.epush(field_key, expected)
        }
    }
    /// Chain configurations, returning the first one that was mutated.
    ///
    /// ## Panics
    /// Panics if both sets were mutated — callers must check for
    /// conflicting sources beforehand.
    pub fn and_then(self, other: Self) -> Self {
        if self.is_mutated() {
            if other.is_mutated() {
                panic!(
                    "double mutation: {env_a} and {env_b}",
                    env_a = self.estack.source(),
                    env_b = other.estack.source()
                );
            }
            self
        } else {
            other
        }
    }
}

// server settings
impl Configset {
    pub fn server_tcp(
        &mut self,
        nhost: impl TryFromConfigSource<IpAddr>,
        nhost_key: StaticStr,
        nport: impl TryFromConfigSource<u16>,
        nport_key: StaticStr,
    ) {
        let mut host = DEFAULT_IPV4;
        let mut port = DEFAULT_PORT;
        self.try_mutate(nhost, &mut host, nhost_key, "an IPv4/IPv6 address");
        self.try_mutate(nport, &mut port, nport_key, "a 16-bit positive integer");
        self.cfg.host = host;
        self.cfg.port = port;
    }
    pub fn server_maxcon(
        &mut self,
        nmaxcon: impl TryFromConfigSource<usize>,
        nmaxcon_key: StaticStr,
    ) {
        let mut maxcon = self.cfg.maxcon;
        self.try_mutate_with_condcheck(
            nmaxcon,
            &mut maxcon,
            nmaxcon_key,
            "a positive integer greater than zero",
            |max| *max > 0,
        );
        self.cfg.maxcon = maxcon;
    }
}

// sync settings
impl Configset {
    #[allow(clippy::too_many_arguments)]
    pub fn sync_settings(
        &mut self,
        nreconnect: impl TryFromConfigSource<u64>,
        nreconnect_key: StaticStr,
        nsendq: impl TryFromConfigSource<usize>,
        nsendq_key: StaticStr,
        nechoring: impl TryFromConfigSource<usize>,
        nechoring_key: StaticStr,
        nprotover: impl TryFromConfigSource<u16>,
        nprotover_key: StaticStr,
    ) {
        let mut reconnect_secs = self.cfg.reconnect_interval.as_secs();
        let mut sendq = self.cfg.send_queue_limit;
        let mut echoring = self.cfg.echo_ring_capacity;
        let mut protover = self.cfg.protocol_version;
        self.try_mutate_with_condcheck(
            nreconnect,
            &mut reconnect_secs,
            nreconnect_key,
            "a positive integer number of seconds",
            |v| *v > 0,
        );
        self.try_mutate_with_condcheck(
            nsendq,
            &mut sendq,
            nsendq_key,
            "a positive integer",
            |v| *v > 0,
        );
        self.try_mutate_with_condcheck(
            nechoring,
            &mut echoring,
            nechoring_key,
            "a positive integer",
            |v| *v > 0,
        );
        self.try_mutate(nprotover, &mut protover, nprotover_key, "a 16-bit integer");
        self.cfg.reconnect_interval = std::time::Duration::from_secs(reconnect_secs);
        self.cfg.send_queue_limit = sendq;
        self.cfg.echo_ring_capacity = echoring;
        self.cfg.protocol_version = protover;
    }
}

pub fn get_config() -> Result<ConfigType, ConfigError> {
    let cli = cfgcli::Cli::parse();
    let restore_file = None;

    let cfg_from_file = if let Some(file) = cli.config.as_deref() {
        let contents = fs::read_to_string(file)?;
        let cfg_file: ConfigFile = serde_yaml::from_str(&contents)?;
        Some(cfgfile::from_file(cfg_file))
    } else {
        None
    };

    let cfg_from_cli = cfgcli::parse_cli_args(&cli);
    let cfg_from_env = cfgenv::parse_env_config();
    let cfg_degree = cfg_from_cli.is_mutated() as u8
        + cfg_from_env.is_mutated() as u8
        + cfg_from_file.is_some() as u8;
    let has_conflict = cfg_degree > 1;
    if has_conflict {
        return Err(ConfigError::Conflict);
    }
    if cfg_degree == 0 {
        Ok(ConfigType::new_default(restore_file))
    } else {
        let final_config = if let Some(cfg) = cfg_from_file {
            cfg
        } else {
            cfg_from_env.and_then(cfg_from_cli)
        };
        if final_config.is_okay() {
            let Configset { cfg, wstack, .. } = final_config;
            Ok(ConfigType::new_custom(cfg, restore_file, wstack))
        } else {
            Err(ConfigError::CfgError(final_config.estack))
        }
    }
}
