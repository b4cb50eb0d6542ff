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

use super::cfgfile::{self, Config as ConfigFile};
use super::{ConfigurationSet, DEFAULT_IPV4, DEFAULT_PORT};

#[test]
fn yaml_defaults_when_sync_section_absent() {
    let yaml = "server:\n  host: 127.0.0.1\n  port: 2022\n";
    let cfg_file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
    let cset = cfgfile::from_file(cfg_file);
    assert!(cset.is_okay());
    assert_eq!(cset.cfg.host, DEFAULT_IPV4);
    assert_eq!(cset.cfg.port, DEFAULT_PORT);
    assert_eq!(cset.cfg.reconnect_interval.as_secs(), 2);
    assert_eq!(cset.cfg.send_queue_limit, 4096);
    assert_eq!(cset.cfg.echo_ring_capacity, 256);
}

#[test]
fn yaml_overrides_sync_tunables() {
    let yaml = "\
server:
  host: 0.0.0.0
  port: 9022
sync:
  reconnect_interval: 5
  send_queue_limit: 1024
  echo_ring_capacity: 64
";
    let cfg_file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
    let cset = cfgfile::from_file(cfg_file);
    assert!(cset.is_okay());
    assert_eq!(cset.cfg.port, 9022);
    assert_eq!(cset.cfg.reconnect_interval.as_secs(), 5);
    assert_eq!(cset.cfg.send_queue_limit, 1024);
    assert_eq!(cset.cfg.echo_ring_capacity, 64);
}

#[test]
fn bad_port_in_yaml_is_a_parse_error() {
    let yaml = "server:\n  host: 127.0.0.1\n  port: 700000\n";
    assert!(serde_yaml::from_str::<ConfigFile>(yaml).is_err());
}

#[test]
fn configurationset_default_matches_spec_defaults() {
    let cfg = ConfigurationSet::default();
    assert_eq!(cfg.port, 2022);
    assert_eq!(cfg.send_queue_limit, 4096);
    assert_eq!(cfg.echo_ring_capacity, 256);
    assert_eq!(cfg.protocol_version, ConfigurationSet::PROTOCOL_VERSION);
}
