//! Service and method metadata, plus the dispatch seam.

use crate::message::Message;

/// Produces a fresh, empty instance of a request or response type.
pub type MessageFactory = fn() -> Box<dyn Message>;

/// Metadata for one method of a service.
///
/// Descriptors are built by the schema compiler at startup and shared
/// read-only afterwards.
#[derive(Clone, Debug)]
pub struct MethodDescriptor {
    service_name: String,
    name: String,
    request_factory: MessageFactory,
    response_factory: MessageFactory,
}

impl MethodDescriptor {
    pub fn new(
        service_name: impl Into<String>,
        name: impl Into<String>,
        request_factory: MessageFactory,
        response_factory: MessageFactory,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            name: name.into(),
            request_factory,
            response_factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Fresh request object of this method's request type.
    pub fn new_request(&self) -> Box<dyn Message> {
        (self.request_factory)()
    }

    /// Fresh response object of this method's response type.
    pub fn new_response(&self) -> Box<dyn Message> {
        (self.response_factory)()
    }
}

/// Metadata for a service: its name and ordered method set.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(
        mut self,
        name: impl Into<String>,
        request_factory: MessageFactory,
        response_factory: MessageFactory,
    ) -> Self {
        let method =
            MethodDescriptor::new(self.name.clone(), name, request_factory, response_factory);
        self.methods.push(method);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name() == name)
    }
}

/// Single-shot delivery of a dispatched call's response.
///
/// The provider constructs one per dispatch; it owns the originating
/// connection. Invoking `complete` serialises the response, writes it, and
/// closes the connection. Ownership transfer makes the at-most-once contract
/// structural: `complete` consumes the value. Dropping a `Completion`
/// without completing it closes the connection without a response.
pub struct Completion {
    deliver: Option<Box<dyn FnOnce(Box<dyn Message>) + Send>>,
}

impl Completion {
    pub fn new(deliver: impl FnOnce(Box<dyn Message>) + Send + 'static) -> Self {
        Self {
            deliver: Some(Box::new(deliver)),
        }
    }

    pub fn complete(mut self, response: Box<dyn Message>) {
        if let Some(deliver) = self.deliver.take() {
            deliver(response);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.deliver.is_some() {
            tracing::warn!("dispatch completion dropped without a response");
        }
    }
}

/// A service the provider can host.
///
/// The capability set replaces inheritance-based dispatch: a service knows
/// its descriptor and can execute any of its methods. `call` must either
/// complete synchronously or hand `done` to whatever will eventually fire
/// it; `done` must not be invoked while holding locks taken from user code.
pub trait Service: Send + Sync {
    fn descriptor(&self) -> &ServiceDescriptor;

    fn call(
        &self,
        method: &MethodDescriptor,
        request: Box<dyn Message>,
        response: Box<dyn Message>,
        done: Completion,
    );
}
