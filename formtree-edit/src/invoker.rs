//! Collaborators reached over the network: the generation/validation
//! invoker and the collection instance persistence hook.

use async_trait::async_trait;
use formtree_types::{InstanceId, NodeId};
use serde_json::Value;

/// Calls a remote generation or validation function.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invokes `function_ref` with `payload`. Errors are plain messages;
    /// every failure is treated as recoverable.
    async fn invoke(&self, function_ref: &str, payload: Value) -> Result<Value, String>;
}

/// An invoker that answers every call with a closure.
pub struct FnInvoker<F> {
    f: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(&str, Value) -> Result<Value, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Invoker for FnInvoker<F>
where
    F: Fn(&str, Value) -> Result<Value, String> + Send + Sync,
{
    async fn invoke(&self, function_ref: &str, payload: Value) -> Result<Value, String> {
        (self.f)(function_ref, payload)
    }
}

/// An invoker with no remote functions; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInvoker;

#[async_trait]
impl Invoker for NoInvoker {
    async fn invoke(&self, function_ref: &str, _payload: Value) -> Result<Value, String> {
        Err(format!("no invoker configured for '{function_ref}'"))
    }
}

/// Persists collection instance changes.
///
/// `position` is the 1-based display position of the instance at the time
/// of the call.
#[async_trait]
pub trait InstanceHook: Send + Sync {
    async fn instance_added(
        &self,
        node_id: NodeId,
        scope: &str,
        instance_id: InstanceId,
    ) -> Result<(), String>;

    async fn instance_removed(
        &self,
        node_id: NodeId,
        scope: &str,
        instance_id: InstanceId,
        position: usize,
    ) -> Result<(), String>;
}

/// A hook that accepts every change without persisting anything. Instance
/// structure then lives only in the session's tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalInstances;

#[async_trait]
impl InstanceHook for LocalInstances {
    async fn instance_added(&self, _: NodeId, _: &str, _: InstanceId) -> Result<(), String> {
        Ok(())
    }

    async fn instance_removed(
        &self,
        _: NodeId,
        _: &str,
        _: InstanceId,
        _: usize,
    ) -> Result<(), String> {
        Ok(())
    }
}
