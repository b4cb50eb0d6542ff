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
use std::env;

pub(super) fn parse_env_config() -> Configset {
    let mut defset = Configset::new_env();
    defset.server_tcp(
        env::var("MESHREG_HOST"),
        "MESHREG_HOST",
        env::var("MESHREG_PORT"),
        "MESHREG_PORT",
    );
    defset.server_maxcon(env::var("MESHREG_MAXCON"), "MESHREG_MAXCON");
    defset.sync_settings(
        env::var("MESHREG_RECONNECT_INTERVAL"),
        "MESHREG_RECONNECT_INTERVAL",
        env::var("MESHREG_SEND_QUEUE_LIMIT"),
        "MESHREG_SEND_QUEUE_LIMIT",
        env::var("MESHREG_ECHO_RING_CAPACITY"),
        "MESHREG_ECHO_RING_CAPACITY",
        env::var("MESHREG_PROTOCOL_VERSION"),
        "MESHREG_PROTOCOL_VERSION",
    );
    defset
}
