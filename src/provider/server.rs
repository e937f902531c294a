//! Provider server: accept loop, worker pool, dispatch.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, bounded};
use thiserror::Error;

use super::registry::{LookupError, RegistryError, ServiceRegistry};
use crate::config::Settings;
use crate::coord::{CoordClient, CreateMode, StoreError};
use crate::descriptor::{Completion, Service};
use crate::error::Transience;
use crate::message::{Message, MessageError};
use crate::wire::{self, Endian, RequestFrame, WireError};

const ACCEPT_IDLE: Duration = Duration::from_millis(25);

/// Name prefix for the ephemeral-sequential endpoint nodes under `/S/M`.
const ENDPOINT_PREFIX: &str = "ep-";

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("endpoint registration failed: {0}")]
    Store(#[from] StoreError),
}

impl ServeError {
    pub fn transience(&self) -> Transience {
        match self {
            ServeError::Io(_) => Transience::Unknown,
            ServeError::Store(e) => e.transience(),
        }
    }
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Wire(#[from] WireError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("request parse for {service}.{method} failed: {source}")]
    RequestParse {
        service: String,
        method: String,
        source: MessageError,
    },
}

/// Hosts registered services on a TCP endpoint and advertises them through
/// the coordination store.
///
/// Services are registered with [`notify_service`](Self::notify_service)
/// before [`run`](Self::run) or [`start`](Self::start); the registry is
/// frozen once the server starts. Store registration completes before the
/// accept loop begins, so a discovered endpoint is always accepting.
pub struct ProviderServer {
    registry: ServiceRegistry,
    coord: CoordClient,
    endian: Endian,
    workers: usize,
}

impl ProviderServer {
    pub fn new(settings: &Settings, coord: CoordClient) -> Self {
        Self {
            registry: ServiceRegistry::new(),
            coord,
            endian: settings.wire.endian,
            workers: settings.provider.effective_workers(),
        }
    }

    pub fn notify_service(&mut self, service: Arc<dyn Service>) -> Result<(), RegistryError> {
        self.registry.register(service)
    }

    /// Binds, registers endpoints, serves until shutdown. Returns only on a
    /// fatal startup error; use [`start`](Self::start) to retain a handle.
    pub fn run(self, host: &str, port: u16) -> Result<(), ServeError> {
        let handle = self.start(host, port)?;
        handle.join();
        Ok(())
    }

    pub fn start(self, host: &str, port: u16) -> Result<ProviderHandle, ServeError> {
        let listener = TcpListener::bind((host, port))?;
        let local_addr = listener.local_addr()?;

        register_endpoints(&self.coord, &self.registry, local_addr)?;

        listener.set_nonblocking(true)?;
        let registry = Arc::new(self.registry);
        let shutdown = Arc::new(AtomicBool::new(false));
        let (conn_tx, conn_rx) = bounded::<TcpStream>(self.workers * 2);

        let mut workers = Vec::with_capacity(self.workers);
        for i in 0..self.workers {
            let conn_rx = conn_rx.clone();
            let registry = Arc::clone(&registry);
            let endian = self.endian;
            let worker = thread::Builder::new()
                .name(format!("tether-worker-{i}"))
                .spawn(move || run_worker(conn_rx, registry, endian))?;
            workers.push(worker);
        }

        let accept_shutdown = Arc::clone(&shutdown);
        let accept = thread::Builder::new()
            .name("tether-accept".to_string())
            .spawn(move || run_accept_loop(listener, conn_tx, accept_shutdown))?;

        tracing::info!(%local_addr, workers = self.workers, "provider serving");

        Ok(ProviderHandle {
            shutdown,
            accept,
            workers,
            local_addr,
            coord: self.coord,
        })
    }
}

pub struct ProviderHandle {
    shutdown: Arc<AtomicBool>,
    accept: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
    coord: CoordClient,
}

impl ProviderHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Blocks until the accept loop exits.
    pub fn join(self) {
        let _ = self.accept.join();
        for worker in self.workers {
            let _ = worker.join();
        }
        self.coord.close();
    }

    /// Stops accepting, drains workers, and closes the coordination session
    /// (which cascades ephemeral de-registration).
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.accept.join();
        for worker in self.workers {
            let _ = worker.join();
        }
        self.coord.close();
    }
}

/// Creates `/S` and `/S/M` persistent nodes and one ephemeral-sequential
/// endpoint child per method, data `host:port`.
fn register_endpoints(
    coord: &CoordClient,
    registry: &ServiceRegistry,
    addr: SocketAddr,
) -> Result<(), StoreError> {
    let endpoint = addr.to_string();
    for (service_name, entry) in registry.entries() {
        let service_path = format!("/{service_name}");
        coord.create(&service_path, b"", CreateMode::Persistent)?;
        for method_name in entry.methods.keys() {
            let method_path = format!("{service_path}/{method_name}");
            coord.create(&method_path, b"", CreateMode::Persistent)?;
            let created = coord.create(
                &format!("{method_path}/{ENDPOINT_PREFIX}"),
                endpoint.as_bytes(),
                CreateMode::EphemeralSequential,
            )?;
            tracing::info!(path = %created, %endpoint, "advertised method endpoint");
        }
    }
    Ok(())
}

fn run_accept_loop(listener: TcpListener, conn_tx: Sender<TcpStream>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if conn_tx.send(stream).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_IDLE);
            }
            Err(err) => {
                tracing::warn!("accept error: {err}");
                thread::sleep(ACCEPT_IDLE);
            }
        }
    }
}

fn run_worker(conn_rx: Receiver<TcpStream>, registry: Arc<ServiceRegistry>, endian: Endian) {
    while let Ok(stream) = conn_rx.recv() {
        if let Err(err) = handle_connection(stream, &registry, endian) {
            tracing::warn!("connection dropped: {err}");
        }
    }
}

/// One request per connection: read a frame, dispatch, let the completion
/// write the response and close. Protocol errors close without a response.
fn handle_connection(
    mut stream: TcpStream,
    registry: &ServiceRegistry,
    endian: Endian,
) -> Result<(), ConnectionError> {
    stream.set_nodelay(true)?;

    let frame = match wire::read_request(endian, &mut stream)? {
        Some(frame) => frame,
        None => return Ok(()),
    };
    dispatch(stream, registry, frame)
}

fn dispatch(
    stream: TcpStream,
    registry: &ServiceRegistry,
    frame: RequestFrame,
) -> Result<(), ConnectionError> {
    let RequestFrame {
        service: service_name,
        method: method_name,
        args,
    } = frame;

    let (service, descriptor) = registry.lookup(&service_name, &method_name)?;

    let mut request = descriptor.new_request();
    request
        .parse_from_bytes(&args)
        .map_err(|source| ConnectionError::RequestParse {
            service: service_name.clone(),
            method: method_name.clone(),
            source,
        })?;
    let response = descriptor.new_response();

    tracing::debug!(service = %service_name, method = %method_name, "dispatching");

    let done = Completion::new(move |response: Box<dyn Message>| {
        write_response(stream, response);
    });
    service.call(descriptor, request, response, done);
    Ok(())
}

fn write_response(mut stream: TcpStream, response: Box<dyn Message>) {
    let bytes = match response.serialize_to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!("response serialize failed: {err}");
            return;
        }
    };
    if let Err(err) = stream.write_all(&bytes) {
        tracing::warn!("response write failed: {err}");
        return;
    }
    let _ = stream.shutdown(Shutdown::Both);
}
