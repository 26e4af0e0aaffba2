//! Authentication flows and flow selection.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::error::AuthenticationError;
use super::types::{Authentication, AuthenticationRequest};

/// A way of authenticating a client at the token endpoint.
#[async_trait]
pub trait AuthenticationFlow: Send + Sync {
    /// Name used to enable the flow in configuration.
    fn name(&self) -> &str;

    /// OAuth grant type the flow handles.
    fn grant_type(&self) -> &str;

    /// Token endpoint authentication method, as advertised in discovery.
    fn authentication_method(&self) -> &str;

    /// Whether the request carries what this flow needs to run.
    fn can_authenticate(&self, request: &AuthenticationRequest) -> bool;

    async fn authenticate(
        &self,
        request: &AuthenticationRequest,
    ) -> Result<Authentication, AuthenticationError>;
}

/// All flows known to the process, in registration order.
///
/// Selection walks flows in the order they were registered and returns the
/// first eligible one, so registration order decides between flows that
/// accept the same request.
#[derive(Default, Clone)]
pub struct FlowRegistry {
    flows: Vec<Arc<dyn AuthenticationFlow>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, flow: Arc<dyn AuthenticationFlow>) {
        self.flows.push(flow);
    }

    pub fn names(&self) -> Vec<&str> {
        self.flows.iter().map(|flow| flow.name()).collect()
    }

    /// Pick the flow that handles `request`.
    ///
    /// A flow is eligible when it is enabled, handles the request's grant
    /// type and accepts the request.
    pub fn select(
        &self,
        request: &AuthenticationRequest,
        enabled: &HashSet<String>,
    ) -> Option<Arc<dyn AuthenticationFlow>> {
        let grant_type = request.grant_type();
        if grant_type.is_empty() {
            return None;
        }

        self.flows
            .iter()
            .filter(|flow| enabled.contains(flow.name()))
            .filter(|flow| flow.grant_type() == grant_type)
            .find(|flow| {
                let eligible = flow.can_authenticate(request);
                if !eligible {
                    debug!(flow = %flow.name(), "Flow cannot authenticate request");
                }
                eligible
            })
            .cloned()
    }

    /// Distinct grant types, in registration order.
    pub fn grant_types(&self) -> Vec<String> {
        distinct(self.flows.iter().map(|flow| flow.grant_type()))
    }

    /// Distinct authentication methods, in registration order.
    pub fn authentication_methods(&self) -> Vec<String> {
        distinct(self.flows.iter().map(|flow| flow.authentication_method()))
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for value in values {
        if !result.iter().any(|existing| existing == value) {
            result.push(value.to_string());
        }
    }
    result
}
