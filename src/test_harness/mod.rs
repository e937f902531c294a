//! Cross-subsystem test fixtures.
//!
//! A hand-written service, message, and stub set standing in for generated
//! code, plus helpers that wire a provider, a store, and a caller channel
//! together in-process.

use std::any::Any;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use minicbor::{Decoder, Encoder};

use crate::caller::CallerChannel;
use crate::config::Settings;
use crate::controller::Controller;
use crate::coord::{CoordClient, MemoryStore};
use crate::descriptor::{Completion, MethodDescriptor, Service, ServiceDescriptor};
use crate::message::{Message, MessageError};
use crate::provider::{ProviderHandle, ProviderServer};
use crate::wire::{Endian, encode_request};

// =========================================================================
// Messages (what the schema compiler would emit)
// =========================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoginRequest {
    pub name: String,
    pub pwd: String,
}

impl LoginRequest {
    pub fn new(name: impl Into<String>, pwd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pwd: pwd.into(),
        }
    }
}

impl Message for LoginRequest {
    fn serialize_to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        encode_result(|| {
            enc.map(2)?;
            enc.str("name")?;
            enc.str(&self.name)?;
            enc.str("pwd")?;
            enc.str(&self.pwd)?;
            Ok(())
        })?;
        Ok(buf)
    }

    fn parse_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        *self = decode_login_request(bytes).map_err(|e| MessageError::Parse(e.to_string()))?;
        Ok(())
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn decode_login_request(bytes: &[u8]) -> Result<LoginRequest, minicbor::decode::Error> {
    let mut dec = Decoder::new(bytes);
    let len = dec
        .map()?
        .ok_or_else(|| minicbor::decode::Error::message("indefinite map"))?;
    let mut out = LoginRequest::default();
    for _ in 0..len {
        match dec.str()? {
            "name" => out.name = dec.str()?.to_string(),
            "pwd" => out.pwd = dec.str()?.to_string(),
            _ => dec.skip()?,
        }
    }
    Ok(out)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoginResponse {
    pub errcode: i32,
    pub errmsg: String,
    pub success: bool,
}

impl Message for LoginResponse {
    fn serialize_to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let mut buf = Vec::new();
        let mut enc = Encoder::new(&mut buf);
        encode_result(|| {
            enc.map(3)?;
            enc.str("errcode")?;
            enc.i32(self.errcode)?;
            enc.str("errmsg")?;
            enc.str(&self.errmsg)?;
            enc.str("success")?;
            enc.bool(self.success)?;
            Ok(())
        })?;
        Ok(buf)
    }

    fn parse_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MessageError> {
        *self = decode_login_response(bytes).map_err(|e| MessageError::Parse(e.to_string()))?;
        Ok(())
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn decode_login_response(bytes: &[u8]) -> Result<LoginResponse, minicbor::decode::Error> {
    let mut dec = Decoder::new(bytes);
    let len = dec
        .map()?
        .ok_or_else(|| minicbor::decode::Error::message("indefinite map"))?;
    let mut out = LoginResponse::default();
    for _ in 0..len {
        match dec.str()? {
            "errcode" => out.errcode = dec.i32()?,
            "errmsg" => out.errmsg = dec.str()?.to_string(),
            "success" => out.success = dec.bool()?,
            _ => dec.skip()?,
        }
    }
    Ok(out)
}

fn encode_result(
    f: impl FnOnce() -> Result<(), minicbor::encode::Error<Infallible>>,
) -> Result<(), MessageError> {
    f().map_err(|e| MessageError::Serialize(e.to_string()))
}

// =========================================================================
// Service, descriptor, stub
// =========================================================================

pub fn user_service_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("UserService").with_method(
        "Login",
        || Box::new(LoginRequest::default()),
        || Box::new(LoginResponse::default()),
    )
}

/// In-process login service with a fixed credential table.
pub struct AuthService {
    descriptor: ServiceDescriptor,
    accounts: BTreeMap<String, String>,
}

impl Default for AuthService {
    fn default() -> Self {
        let mut accounts = BTreeMap::new();
        accounts.insert("alice".to_string(), "pw".to_string());
        accounts.insert("zhangsan".to_string(), "123456".to_string());
        Self {
            descriptor: user_service_descriptor(),
            accounts,
        }
    }
}

impl Service for AuthService {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn call(
        &self,
        method: &MethodDescriptor,
        request: Box<dyn Message>,
        mut response: Box<dyn Message>,
        done: Completion,
    ) {
        match method.name() {
            "Login" => {
                let request = request
                    .as_any()
                    .downcast_ref::<LoginRequest>()
                    .expect("login request type");
                let reply = response
                    .as_any_mut()
                    .downcast_mut::<LoginResponse>()
                    .expect("login response type");

                if self.accounts.get(&request.name) == Some(&request.pwd) {
                    reply.errcode = 0;
                    reply.errmsg = "ok".to_string();
                    reply.success = true;
                } else {
                    reply.errcode = -1;
                    reply.errmsg = "login failed: user name or password error!".to_string();
                    reply.success = false;
                }
                done.complete(response);
            }
            other => {
                // Dropping `done` closes the connection without a response.
                tracing::warn!(method = other, "auth service cannot dispatch method");
            }
        }
    }
}

/// What a generated stub for `UserService` would look like.
pub struct UserStub {
    channel: CallerChannel,
    login: MethodDescriptor,
}

impl UserStub {
    pub fn new(channel: CallerChannel) -> Self {
        let descriptor = user_service_descriptor();
        let login = descriptor
            .method("Login")
            .expect("descriptor has Login")
            .clone();
        Self { channel, login }
    }

    pub fn login(
        &self,
        controller: &mut Controller,
        request: &LoginRequest,
        response: &mut LoginResponse,
    ) {
        self.channel
            .call_method(&self.login, controller, request, response, None);
    }
}

/// A complete encoded login request frame, little-endian prefix.
pub fn login_frame(name: &str, pwd: &str) -> Vec<u8> {
    let args = LoginRequest::new(name, pwd)
        .serialize_to_bytes()
        .expect("serialize login request");
    encode_request(Endian::Little, "UserService", "Login", &args).expect("encode login frame")
}

// =========================================================================
// Cluster plumbing
// =========================================================================

/// One in-process store plus one provider hosting [`AuthService`].
pub struct TestCluster {
    store: MemoryStore,
    provider: Option<ProviderHandle>,
}

impl TestCluster {
    pub fn start() -> Self {
        let store = MemoryStore::new();
        let provider = Self::start_provider_for(&store);
        Self {
            store,
            provider: Some(provider),
        }
    }

    pub fn start_provider_for(store: &MemoryStore) -> ProviderHandle {
        let settings = Settings::default();
        let mut coord = CoordClient::new(
            Arc::new(store.clone()),
            settings.store.session_timeout(),
        );
        coord.start().expect("coord session");

        let mut server = ProviderServer::new(&settings, coord);
        server
            .notify_service(Arc::new(AuthService::default()))
            .expect("register auth service");
        server.start("127.0.0.1", 0).expect("start provider")
    }

    pub fn coord_client_for(store: &MemoryStore) -> CoordClient {
        let settings = Settings::default();
        let mut client = CoordClient::new(
            Arc::new(store.clone()),
            settings.store.session_timeout(),
        );
        client.start().expect("coord session");
        client
    }

    pub fn channel_for(store: &MemoryStore) -> CallerChannel {
        let settings = Settings::default();
        CallerChannel::new(&settings, Arc::new(Self::coord_client_for(store)))
    }

    pub fn store(&self) -> MemoryStore {
        self.store.clone()
    }

    pub fn provider_addr(&self) -> SocketAddr {
        self.provider
            .as_ref()
            .expect("provider is running")
            .local_addr()
    }

    pub fn channel(&self) -> CallerChannel {
        Self::channel_for(&self.store)
    }

    pub fn coord_client(&self) -> CoordClient {
        Self::coord_client_for(&self.store)
    }

    pub fn shutdown_provider_only(&mut self) {
        if let Some(provider) = self.provider.take() {
            provider.shutdown();
        }
    }

    pub fn shutdown(mut self) {
        self.shutdown_provider_only();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_messages_roundtrip() {
        let request = LoginRequest::new("alice", "pw");
        let bytes = request.serialize_to_bytes().unwrap();
        let mut decoded = LoginRequest::default();
        decoded.parse_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, request);

        let response = LoginResponse {
            errcode: -1,
            errmsg: "login failed: user name or password error!".to_string(),
            success: false,
        };
        let bytes = response.serialize_to_bytes().unwrap();
        let mut decoded = LoginResponse::default();
        decoded.parse_from_bytes(&bytes).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn parse_rejects_garbage() {
        let mut message = LoginResponse::default();
        let err = message.parse_from_bytes(&[0xff, 0x00]).unwrap_err();
        assert!(matches!(err, MessageError::Parse(_)));
    }

    #[test]
    fn clear_restores_prototype_state() {
        let mut request = LoginRequest::new("alice", "pw");
        request.clear();
        assert_eq!(request, LoginRequest::default());
    }
}
