//! Resource provider abstraction over a cloud compute API.
//!
//! The provisioning pipeline, the ingress resolver and the in-instance reaper
//! all talk to the platform exclusively through [`Provider`]. The Scaleway
//! implementation lives in [`crate::scaleway`]; tests use the in-memory double
//! from [`crate::test_support`].

use std::future::Future;
use std::pin::Pin;

mod types;
mod wait;

pub use types::{
    InstanceDetails, InstanceId, InstanceSpec, InstanceState, IngressRule, PROVENANCE_TAG,
    Protocol, SecurityGroupId,
};
pub use wait::{PollPolicy, WaitError, wait_until_running};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability set of a cloud compute platform.
pub trait Provider: Send + Sync {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates exactly one instance and returns its identifier.
    ///
    /// When the spec carries a boot script, it must be in place before the
    /// instance first boots.
    fn create_instance<'a>(
        &'a self,
        spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceId, Self::Error>;

    /// Fetches the current details of an instance, or `None` when the
    /// platform does not (or does not yet) know about it.
    fn describe<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, Option<InstanceDetails>, Self::Error>;

    /// Enumerates every instance visible to the configured credentials.
    fn list_all(&self) -> ProviderFuture<'_, Vec<InstanceDetails>, Self::Error>;

    /// Powers an instance off without deleting it.
    fn stop<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error>;

    /// Deletes an instance together with its volumes and addresses.
    ///
    /// Terminating an instance that no longer exists succeeds.
    fn terminate<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error>;

    /// Looks up a security group by exact name.
    fn find_security_group<'a>(
        &'a self,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<SecurityGroupId>, Self::Error>;

    /// Creates an empty security group that drops unmatched inbound traffic.
    fn create_security_group<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> ProviderFuture<'a, SecurityGroupId, Self::Error>;

    /// Appends an inbound allow rule to a security group.
    fn add_ingress_rule<'a>(
        &'a self,
        group: &'a SecurityGroupId,
        rule: &'a IngressRule,
    ) -> ProviderFuture<'a, (), Self::Error>;
}

#[cfg(test)]
mod tests;
