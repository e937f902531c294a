//! Caller-side channel: stub call to network round-trip.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use thiserror::Error;

use crate::config::Settings;
use crate::controller::Controller;
use crate::coord::{CoordClient, StoreError};
use crate::descriptor::MethodDescriptor;
use crate::error::Transience;
use crate::message::{Message, MessageError};
use crate::wire::{self, Endian, WireError};

/// Optional per-call completion, invoked after the controller is settled.
pub type CallCompletion = Box<dyn FnOnce() + Send>;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("discovery miss at {path}: {reason}")]
    DiscoveryMiss { path: String, reason: String },
    #[error("discovery lookup at {path} failed: {source}")]
    Store { path: String, source: StoreError },
    #[error("request for {service}.{method} could not be serialized: {source}")]
    SerializeRequest {
        service: String,
        method: String,
        source: MessageError,
    },
    #[error("request for {service}.{method} could not be framed: {source}")]
    Frame {
        service: String,
        method: String,
        source: WireError,
    },
    #[error("transport error for {endpoint}: {source}")]
    Transport {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("transport error for {endpoint}: peer closed without a response")]
    EmptyResponse { endpoint: String },
    #[error("response for {service}.{method} could not be parsed: {source}")]
    ParseResponse {
        service: String,
        method: String,
        source: MessageError,
    },
}

impl CallError {
    pub fn transience(&self) -> Transience {
        match self {
            CallError::DiscoveryMiss { .. }
            | CallError::Transport { .. }
            | CallError::EmptyResponse { .. } => Transience::Retryable,
            CallError::Store { source, .. } => source.transience(),
            _ => Transience::Permanent,
        }
    }
}

/// Turns a stub invocation into one TCP round-trip.
///
/// Endpoint resolution goes through the coordination store; the request is
/// framed and written in one send, and the response is the unframed bytes
/// up to peer close (which also means a connection serves exactly one call
/// and cannot be reused). Safe to share across threads: every call opens
/// its own connection.
pub struct CallerChannel {
    coord: Arc<CoordClient>,
    endian: Endian,
}

impl CallerChannel {
    pub fn new(settings: &Settings, coord: Arc<CoordClient>) -> Self {
        Self {
            coord,
            endian: settings.wire.endian,
        }
    }

    /// Synchronous call: returns after the response is parsed (or the
    /// controller is marked failed) and the optional completion has run.
    /// The caller must check the controller before reading the response.
    pub fn call_method(
        &self,
        method: &MethodDescriptor,
        controller: &mut Controller,
        request: &dyn Message,
        response: &mut dyn Message,
        done: Option<CallCompletion>,
    ) {
        controller.reset();
        if let Err(err) = self.try_call(method, request, response) {
            tracing::debug!(
                service = method.service_name(),
                method = method.name(),
                "call failed: {err}"
            );
            controller.set_failed(err.to_string());
        }
        if let Some(done) = done {
            done();
        }
    }

    fn try_call(
        &self,
        method: &MethodDescriptor,
        request: &dyn Message,
        response: &mut dyn Message,
    ) -> Result<(), CallError> {
        let service_name = method.service_name();
        let method_name = method.name();

        let endpoint = self.resolve(service_name, method_name)?;

        let args = request
            .serialize_to_bytes()
            .map_err(|source| CallError::SerializeRequest {
                service: service_name.to_string(),
                method: method_name.to_string(),
                source,
            })?;
        let frame = wire::encode_request(self.endian, service_name, method_name, &args).map_err(
            |source| CallError::Frame {
                service: service_name.to_string(),
                method: method_name.to_string(),
                source,
            },
        )?;

        let transport = |source| CallError::Transport {
            endpoint: endpoint.clone(),
            source,
        };

        let mut stream = TcpStream::connect(&endpoint).map_err(transport)?;
        stream.set_nodelay(true).map_err(transport)?;
        stream.write_all(&frame).map_err(transport)?;

        let mut payload = Vec::new();
        stream.read_to_end(&mut payload).map_err(transport)?;
        if payload.is_empty() {
            return Err(CallError::EmptyResponse { endpoint });
        }

        response
            .parse_from_bytes(&payload)
            .map_err(|source| CallError::ParseResponse {
                service: service_name.to_string(),
                method: method_name.to_string(),
                source,
            })?;
        Ok(())
    }

    /// Resolves `/S/M` to a `host:port` endpoint: lexicographically first
    /// child, data parsed as address text.
    fn resolve(&self, service: &str, method: &str) -> Result<String, CallError> {
        let path = format!("/{service}/{method}");

        let children = self.coord.get_children(&path).map_err(|err| match err {
            StoreError::NoNode(_) => CallError::DiscoveryMiss {
                path: path.clone(),
                reason: "method node not found".to_string(),
            },
            other => CallError::Store {
                path: path.clone(),
                source: other,
            },
        })?;

        let first = children.first().ok_or_else(|| CallError::DiscoveryMiss {
            path: path.clone(),
            reason: "endpoint not found (no provider is advertising)".to_string(),
        })?;
        let child_path = format!("{path}/{first}");

        let data = self
            .coord
            .get_data(&child_path, false)
            .map_err(|err| match err {
                StoreError::NoNode(_) => CallError::DiscoveryMiss {
                    path: child_path.clone(),
                    reason: "endpoint node not found".to_string(),
                },
                other => CallError::Store {
                    path: child_path.clone(),
                    source: other,
                },
            })?;

        let text = String::from_utf8(data).map_err(|_| CallError::DiscoveryMiss {
            path: child_path.clone(),
            reason: "endpoint data is not utf-8".to_string(),
        })?;
        parse_endpoint(&text).ok_or_else(|| CallError::DiscoveryMiss {
            path: child_path,
            reason: format!("endpoint data {text:?} is not host:port"),
        })
    }
}

fn parse_endpoint(text: &str) -> Option<String> {
    let (host, port) = text.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::coord::{ANY_VERSION, CreateMode};
    use crate::test_harness::{LoginRequest, LoginResponse, TestCluster, UserStub};

    #[test]
    fn login_round_trip_succeeds() {
        let cluster = TestCluster::start();
        let stub = UserStub::new(cluster.channel());

        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        stub.login(
            &mut controller,
            &LoginRequest::new("alice", "pw"),
            &mut response,
        );

        assert!(!controller.failed(), "{}", controller.error_text());
        assert!(response.success);
        assert_eq!(response.errcode, 0);
        assert_eq!(response.errmsg, "ok");
        cluster.shutdown();
    }

    #[test]
    fn bad_credentials_fail_in_band() {
        let cluster = TestCluster::start();
        let stub = UserStub::new(cluster.channel());

        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        stub.login(
            &mut controller,
            &LoginRequest::new("alice", "wrong"),
            &mut response,
        );

        assert!(!controller.failed(), "{}", controller.error_text());
        assert!(!response.success);
        assert_eq!(response.errcode, -1);
        assert_eq!(response.errmsg, "login failed: user name or password error!");
        cluster.shutdown();
    }

    #[test]
    fn unregistered_service_reports_not_found() {
        let cluster = TestCluster::start();
        let channel = cluster.channel();

        let method = MethodDescriptor::new(
            "UnregisteredService",
            "Foo",
            || Box::new(LoginRequest::default()),
            || Box::new(LoginResponse::default()),
        );
        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        channel.call_method(
            &method,
            &mut controller,
            &LoginRequest::default(),
            &mut response,
            None,
        );

        assert!(controller.failed());
        assert!(
            controller.error_text().contains("not found"),
            "unexpected error text: {}",
            controller.error_text()
        );
        cluster.shutdown();
    }

    #[test]
    fn provider_side_unknown_method_surfaces_as_transport_error() {
        let cluster = TestCluster::start();
        let channel = cluster.channel();

        // Advertise a method the provider does not actually dispatch.
        let coordinator = cluster.coord_client();
        coordinator
            .create("/UserService/Logout", b"", CreateMode::Persistent)
            .unwrap();
        coordinator
            .create(
                "/UserService/Logout/ep-",
                cluster.provider_addr().to_string().as_bytes(),
                CreateMode::EphemeralSequential,
            )
            .unwrap();

        let method = MethodDescriptor::new(
            "UserService",
            "Logout",
            || Box::new(LoginRequest::default()),
            || Box::new(LoginResponse::default()),
        );
        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        channel.call_method(
            &method,
            &mut controller,
            &LoginRequest::default(),
            &mut response,
            None,
        );

        assert!(controller.failed());
        assert!(
            controller.error_text().contains("transport error"),
            "unexpected error text: {}",
            controller.error_text()
        );
        coordinator.close();
        cluster.shutdown();
    }

    #[test]
    fn malformed_endpoint_data_is_a_discovery_miss() {
        let cluster = TestCluster::start();
        let channel = cluster.channel();

        let coordinator = cluster.coord_client();
        let children = coordinator.get_children("/UserService/Login").unwrap();
        let child = format!("/UserService/Login/{}", children[0]);
        coordinator
            .set_data(&child, b"not-an-endpoint", ANY_VERSION)
            .unwrap();

        let stub = UserStub::new(channel);
        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        stub.login(
            &mut controller,
            &LoginRequest::new("alice", "pw"),
            &mut response,
        );

        assert!(controller.failed());
        assert!(controller.error_text().contains("host:port"));
        coordinator.close();
        cluster.shutdown();
    }

    #[test]
    fn completion_runs_after_controller_is_settled() {
        let cluster = TestCluster::start();
        let channel = cluster.channel();

        let method = MethodDescriptor::new(
            "UnregisteredService",
            "Foo",
            || Box::new(LoginRequest::default()),
            || Box::new(LoginResponse::default()),
        );
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        channel.call_method(
            &method,
            &mut controller,
            &LoginRequest::default(),
            &mut response,
            Some(Box::new(move || {
                flag.store(true, Ordering::SeqCst);
            })),
        );

        assert!(fired.load(Ordering::SeqCst));
        assert!(controller.failed());
        cluster.shutdown();
    }

    #[test]
    fn provider_restart_moves_traffic_to_the_new_endpoint() {
        let mut cluster = TestCluster::start();
        let store = cluster.store();

        cluster.shutdown_provider_only();

        // Advertisement is gone once the session closes.
        let observer = TestCluster::coord_client_for(&store);
        assert!(observer.get_children("/UserService/Login").unwrap().is_empty());

        let caller = TestCluster::channel_for(&store);
        let stub = UserStub::new(caller);
        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        stub.login(
            &mut controller,
            &LoginRequest::new("alice", "pw"),
            &mut response,
        );
        assert!(controller.failed());
        assert!(controller.error_text().contains("not found"));

        // A replacement provider takes over discovery.
        let replacement = TestCluster::start_provider_for(&store);
        let children = observer.get_children("/UserService/Login").unwrap();
        assert_eq!(children.len(), 1);

        let mut controller = Controller::new();
        let mut response = LoginResponse::default();
        stub.login(
            &mut controller,
            &LoginRequest::new("alice", "pw"),
            &mut response,
        );
        assert!(!controller.failed(), "{}", controller.error_text());
        assert!(response.success);

        observer.close();
        replacement.shutdown();
    }

    #[test]
    fn endpoint_parser_accepts_only_host_port() {
        assert!(parse_endpoint("127.0.0.1:8000").is_some());
        assert!(parse_endpoint("[::1]:8000").is_some());
        assert!(parse_endpoint("127.0.0.1").is_none());
        assert!(parse_endpoint(":8000").is_none());
        assert!(parse_endpoint("127.0.0.1:notaport").is_none());
        assert!(parse_endpoint("127.0.0.1:99999").is_none());
    }
}
