// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: kapi end-to-end tests
//! INTENT: Caller library drives the kapid worker through a real channel
//! DEPS: kapi (client), kapid (dispatcher + emulated driver), kapi-ipc (loopback and unix transports)
//! READINESS: Worker announced; caller learned its address
//! TESTS: memcpy round trip, kernel launch, sticky async failure, concurrent callers, unix sockets,
//!        worker started ahead of its caller

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kapi::{Handle, KapiClient, KapiConfig, KapiError, LaunchHeader, ResultCode, Wait};
use kapi_ipc::{CallerChannel, LoopbackBus, LoopbackEndpoint, UnixEndpoint, WorkerChannel};
use kapid::{Dispatcher, EmulatedDriver, HostRegion, ReadyNotifier};

const READY: Duration = Duration::from_secs(5);

struct Deployment {
    client: KapiClient<LoopbackEndpoint>,
    driver: Arc<EmulatedDriver>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<u64>>,
}

impl Drop for Deployment {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn deploy() -> Deployment {
    let config = KapiConfig::default();
    let bus = LoopbackBus::new(config.channel.max_datagram);
    let caller_end = bus.endpoint();
    let channel = WorkerChannel::new(bus.endpoint(), caller_end.id());

    let driver = Arc::new(EmulatedDriver::new(1 << 24, Arc::new(HostRegion::new(1 << 20))));
    let dispatcher = Dispatcher::new(Arc::clone(&driver));
    let stop = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = mpsc::channel();
    let worker = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let notifier = ReadyNotifier::new(move || {
                let _ = ready_tx.send(());
            });
            kapid::run_with_transport(&channel, &dispatcher, &stop, notifier).unwrap()
        })
    };
    ready_rx.recv_timeout(READY).unwrap();

    let client = KapiClient::connect(caller_end, &config, Wait::Timeout(READY)).unwrap();
    client.cuda().init(0).unwrap();
    Deployment { client, driver, stop, worker: Some(worker) }
}

fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached");
}

#[test]
fn malloc_memcpy_roundtrip() {
    let dep = deploy();
    let cuda = dep.client.cuda();
    let data: Vec<u8> = (0..=255).collect();
    dep.driver.host().write(0, &data).unwrap();

    let ptr = cuda.mem_alloc(4096).unwrap();
    cuda.memcpy_htod(ptr, 0, 256).unwrap();
    cuda.memcpy_dtoh(8192, ptr, 256).unwrap();
    assert_eq!(dep.driver.host().read(8192, 256).unwrap(), data);

    let err = cuda.memcpy_dtoh(8192, ptr, 4097).unwrap_err();
    assert_eq!(err.status(), Some(ResultCode::INVALID_VALUE));
    cuda.mem_free(ptr).unwrap();
    assert_eq!(dep.driver.device_used(), 0);
}

#[test]
fn kernel_launch_reaches_driver_with_arguments() {
    let dep = deploy();
    let cuda = dep.client.cuda();
    let ctx = cuda.ctx_create(0, cuda.device_get(0).unwrap()).unwrap();
    let module = cuda.module_load("/lib/kernels/vector_add.cubin").unwrap();
    let f = cuda.module_get_function(module, "_Z9vectorAddPfS_S_i").unwrap();
    let a = cuda.mem_alloc(4096).unwrap();
    let b = cuda.mem_alloc(4096).unwrap();
    let c = cuda.mem_alloc(4096).unwrap();
    let stream = cuda.stream_create(0).unwrap();

    let header = LaunchHeader { function: f, grid: [4, 1, 1], block: [256, 1, 1], shared_mem: 0, stream };
    let n = 1024i32.to_le_bytes();
    cuda.launch_kernel(header, &[&a.0.to_le_bytes(), &b.0.to_le_bytes(), &c.0.to_le_bytes(), &n])
        .unwrap();
    cuda.stream_synchronize(stream).unwrap();
    cuda.ctx_synchronize().unwrap();

    let launches = dep.driver.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].name, "_Z9vectorAddPfS_S_i");
    assert_eq!(launches[0].header, header);
    assert_eq!(launches[0].args[2], c.0.to_le_bytes());
    assert_eq!(launches[0].args[3], n);

    cuda.stream_destroy(stream).unwrap();
    cuda.ctx_destroy(ctx).unwrap();
}

#[test]
fn hip_launch_uses_the_same_worker() {
    let dep = deploy();
    let hip = dep.client.hip();
    let module = hip.module_load("/lib/kernels/scale.co").unwrap();
    let f = hip.module_get_function(module, "_Z5scalePfl").unwrap();
    let buf = hip.malloc(64).unwrap();
    let header = LaunchHeader { function: f, grid: [1, 1, 1], block: [64, 1, 1], ..LaunchHeader::default() };
    hip.module_launch_kernel(header, &[&buf.0.to_le_bytes(), &16i64.to_le_bytes()]).unwrap();
    hip.device_synchronize().unwrap();
    assert_eq!(dep.driver.launches()[0].args[1], 16i64.to_le_bytes());
}

#[test]
fn async_failure_is_reported_by_later_async_calls() {
    let dep = deploy();
    let cuda = dep.client.cuda();
    let ptr = cuda.mem_alloc(64).unwrap();
    let stream = cuda.stream_create(0).unwrap();

    // Fire-and-forget: the bad stream is only noticed by the worker.
    cuda.memcpy_htod_async(ptr, 0, 64, Handle(0xbad)).unwrap();
    wait_for(|| dep.client.channel().last_async_failure().is_some());

    let err = cuda.memcpy_htod_async(ptr, 0, 64, stream).unwrap_err();
    assert!(matches!(err, KapiError::AsyncFailure(ResultCode::INVALID_HANDLE)));
    cuda.stream_synchronize(stream).unwrap();
    wait_for(|| dep.client.channel().table().occupied() == 0);
}

#[test]
fn concurrent_callers_get_distinct_allocations() {
    let dep = deploy();
    let pointers: Vec<Handle> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let client = &dep.client;
                scope.spawn(move || {
                    (0..16).map(|_| client.cuda().mem_alloc(1024).unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });
    assert_eq!(pointers.iter().collect::<HashSet<_>>().len(), 128);
    assert_eq!(dep.driver.device_used(), 128 * 1024);
}

#[test]
fn unknown_function_never_reaches_worker() {
    let dep = deploy();
    let header = LaunchHeader { function: Handle(0x1234), grid: [1; 3], block: [1; 3], ..LaunchHeader::default() };
    let err = dep.client.cuda().launch_kernel(header, &[]).unwrap_err();
    assert!(matches!(err, KapiError::UnknownFunction(_)));
    assert!(dep.driver.launches().is_empty());
}

#[test]
fn unix_socket_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = KapiConfig::default();
    config.socket.caller_path = dir.path().join("caller.sock");
    config.socket.worker_path = dir.path().join("worker.sock");
    config.worker.device_memory = 1 << 20;
    config.worker.host_region = 1 << 16;

    let caller_end = UnixEndpoint::bind(&config.socket.caller_path, config.channel.max_datagram).unwrap();
    let channel = CallerChannel::start(caller_end, &config.channel).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = Arc::clone(&stop);
        let config = config.clone();
        thread::spawn(move || kapid::service_main_loop(&config, &stop, ReadyNotifier::new(|| {})))
    };

    assert_eq!(channel.wait_for_peer(Wait::Timeout(READY)).unwrap(), config.socket.worker_path);
    let client = KapiClient::new(channel);
    let cuda = client.cuda();
    cuda.init(0).unwrap();
    let ptr = cuda.mem_alloc(128).unwrap();
    let (_, pitch) = cuda.mem_alloc_pitch(600, 2, 8).unwrap();
    assert_eq!(pitch, 1024);
    cuda.mem_free(ptr).unwrap();
    assert_eq!(cuda.nvml_running_procs().unwrap(), 0);

    stop.store(true, Ordering::Release);
    let handled = worker.join().unwrap().unwrap();
    assert_eq!(handled, 5);
}

#[test]
fn worker_started_before_caller() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = KapiConfig::default();
    config.socket.caller_path = dir.path().join("caller.sock");
    config.socket.worker_path = dir.path().join("worker.sock");
    config.worker.device_memory = 1 << 20;
    config.worker.host_region = 1 << 16;

    let stop = Arc::new(AtomicBool::new(false));
    let (ready_tx, ready_rx) = mpsc::channel();
    let worker = {
        let stop = Arc::clone(&stop);
        let config = config.clone();
        thread::spawn(move || {
            let notifier = ReadyNotifier::new(move || {
                let _ = ready_tx.send(());
            });
            kapid::service_main_loop(&config, &stop, notifier)
        })
    };
    thread::sleep(Duration::from_millis(200));
    assert!(!worker.is_finished());

    let caller_end = UnixEndpoint::bind(&config.socket.caller_path, config.channel.max_datagram).unwrap();
    let client = KapiClient::connect(caller_end, &config, Wait::Timeout(READY)).unwrap();
    ready_rx.recv_timeout(READY).unwrap();
    client.cuda().init(0).unwrap();
    let ptr = client.cuda().mem_alloc(256).unwrap();
    client.cuda().mem_free(ptr).unwrap();

    stop.store(true, Ordering::Release);
    assert_eq!(worker.join().unwrap().unwrap(), 3);
}
