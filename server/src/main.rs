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

//! The `meshregd` daemon: load configuration, stand up the registry
//! and its sync listener, and run until a shutdown signal arrives.

use env_logger::Builder;
use meshreg::auth::AuthGate;
use meshreg::config::{self, ConfigType};
use meshreg::registry::Registry;
use meshreg::sync::SyncListener;
use std::env;
use tokio::signal;
use tokio::sync::broadcast;

fn main() {
    Builder::new()
        .parse_filters(&env::var("MESHREG_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    let config = match config::get_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    config.print_warnings();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("meshregd")
        .enable_all()
        .build()
        .expect("failed to start async runtime");

    runtime.block_on(run(config));
    log::info!("meshregd stopped accepting connections");
}

async fn run(config: ConfigType) {
    let registry = Registry::new();
    let auth = AuthGate::open();
    let (shutdown_tx, _) = broadcast::channel(1);

    let listener = match SyncListener::bind(config.config(), registry.clone(), auth, shutdown_tx.clone()).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("failed to bind sync listener: {e}");
            std::process::exit(1);
        }
    };
    log::info!(
        "meshregd listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    );

    tokio::select! {
        res = listener.run() => {
            if let Err(e) = res {
                log::error!("sync listener exited with error: {e}");
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    }
}
