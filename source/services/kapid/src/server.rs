// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use kapi_ipc::{ConfigError, DatagramTransport, IpcError, KapiConfig, UnixEndpoint, WorkerChannel, WorkerSection};
use log::info;
use thiserror::Error;

use crate::dispatcher::Dispatcher;
use crate::driver::Driver;
use crate::emulated::{EmulatedDriver, HostRegion};

/// Result alias used by the service.
pub type Result<T> = core::result::Result<T, ServerError>;

/// Errors that stop the service.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Worker socket could not be bound.
    #[error("failed to bind {path}: {source}")]
    Bind {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Transport failure while serving.
    #[error("transport error: {0}")]
    Transport(#[from] IpcError),
    /// `[worker] driver` names no known backend.
    #[error("unknown driver backend {0:?}")]
    UnknownDriver(String),
}

/// Notifies the supervisor when the service is ready.
pub struct ReadyNotifier(Box<dyn FnOnce() + Send>);

impl ReadyNotifier {
    /// Creates a notifier from `func`.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(func))
    }

    /// Emits the ready marker.
    pub fn notify(self) {
        (self.0)();
    }
}

/// Builds the driver named by `[worker] driver`.
pub fn build_driver(config: &WorkerSection) -> Result<Arc<EmulatedDriver>> {
    match config.driver.as_str() {
        "emulated" => {
            let host = Arc::new(HostRegion::new(config.host_region as usize));
            Ok(Arc::new(EmulatedDriver::new(config.device_memory, host)))
        }
        other => Err(ServerError::UnknownDriver(other.to_string())),
    }
}

/// Announces the worker on `channel` and serves until `stop` is set or the transport closes.
///
/// The announcement is retried until the caller is reachable. Returns the number of requests
/// handled.
pub fn run_with_transport<T, D>(
    channel: &WorkerChannel<T>,
    dispatcher: &Dispatcher<D>,
    stop: &AtomicBool,
    notifier: ReadyNotifier,
) -> Result<u64>
where
    T: DatagramTransport,
    D: Driver,
{
    if !channel.announce_until(stop) {
        info!("kapid: stopped before the caller came up");
        return Ok(0);
    }
    notifier.notify();
    info!("kapid: ready");
    let handled = channel.serve(stop, |frame: &[u8]| dispatcher.dispatch(frame))?;
    info!("kapid: stopped after {handled} requests");
    Ok(handled)
}

/// Runs the service over the unix sockets named in `config`.
pub fn service_main_loop(config: &KapiConfig, stop: &AtomicBool, notifier: ReadyNotifier) -> Result<u64> {
    let driver = build_driver(&config.worker)?;
    let path = &config.socket.worker_path;
    let endpoint = UnixEndpoint::bind(path, config.channel.max_datagram)
        .map_err(|source| ServerError::Bind { path: path.clone(), source })?;
    info!("kapid: {} driver on {}", config.worker.driver, path.display());
    let channel = WorkerChannel::new(endpoint, config.socket.caller_path.clone());
    let dispatcher = Dispatcher::new(driver);
    run_with_transport(&channel, &dispatcher, stop, notifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let section = WorkerSection { driver: "cuda".to_string(), ..WorkerSection::default() };
        assert!(matches!(build_driver(&section), Err(ServerError::UnknownDriver(name)) if name == "cuda"));
    }

    #[test]
    fn emulated_backend_uses_configured_sizes() {
        let section = WorkerSection { host_region: 4096, ..WorkerSection::default() };
        let driver = build_driver(&section).unwrap();
        assert_eq!(driver.host().len(), 4096);
    }

    #[test]
    fn waits_for_caller_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KapiConfig::default();
        config.socket.worker_path = dir.path().join("worker.sock");
        config.socket.caller_path = dir.path().join("caller.sock");
        let stop = AtomicBool::new(false);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::scope(|scope| {
            let service = scope.spawn(|| {
                let notifier = ReadyNotifier::new(move || {
                    let _ = ready_tx.send(());
                });
                service_main_loop(&config, &stop, notifier)
            });
            std::thread::sleep(std::time::Duration::from_millis(100));
            assert!(!service.is_finished());
            assert!(ready_rx.try_recv().is_err());

            stop.store(true, std::sync::atomic::Ordering::Release);
            assert_eq!(service.join().unwrap().unwrap(), 0);
        });
    }

    #[test]
    fn bind_failure_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KapiConfig::default();
        config.socket.worker_path = dir.path().join("missing").join("worker.sock");
        config.socket.caller_path = dir.path().join("caller.sock");
        let err = service_main_loop(&config, &AtomicBool::new(false), ReadyNotifier::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.to_string().contains("worker.sock"));
    }
}
