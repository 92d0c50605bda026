// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: kapid entrypoint; loads the config named on the command line (or defaults) and
//! serves on the configured worker socket

use std::sync::atomic::AtomicBool;

use kapi_ipc::KapiConfig;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args_os().nth(1) {
        Some(path) => KapiConfig::load(path),
        None => Ok(KapiConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("kapid: {err}");
            std::process::exit(2);
        }
    };

    let stop = AtomicBool::new(false);
    if let Err(err) = kapid::service_main_loop(&config, &stop, kapid::ReadyNotifier::new(|| {})) {
        eprintln!("kapid: exited with error: {err}");
        std::process::exit(1);
    }
}
