use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::{DeviceErrorCode, Result};
use crate::method::Args;
use crate::protocol::{Endpoint, Reply};
use async_trait::async_trait;
use std::future::Future;

/// Anything that can run operations against a device
///
/// [`Device`] implements this over the native protocol. A device that does not
/// answer the native discovery call can be driven by another implementation.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Call one operation in a namespace
    async fn call_operation(&self, service: &str, method: &str, args: Args) -> Result<Reply>;

    /// Namespaces this controller can reach
    fn service_names(&self) -> Vec<String>;
}

#[async_trait]
impl Controller for Device {
    async fn call_operation(&self, service: &str, method: &str, args: Args) -> Result<Reply> {
        Device::call_operation(self, service, method, args).await
    }

    fn service_names(&self) -> Vec<String> {
        Device::service_names(self)
    }
}

/// Connect natively, or through `fallback` when the device lacks the native API
///
/// `fallback` only runs when the discovery call fails with `NoSuchMethod`; every
/// other failure is returned as is.
pub async fn connect_with_fallback<F, Fut>(
    endpoint: Endpoint,
    config: DeviceConfig,
    fallback: F,
) -> Result<Box<dyn Controller>>
where
    F: FnOnce(Endpoint, DeviceConfig) -> Fut,
    Fut: Future<Output = Result<Box<dyn Controller>>>,
{
    match Device::connect(endpoint.clone(), config.clone()).await {
        Ok(device) => Ok(Box::new(device)),
        Err(e) if e.device_error().map(|d| d.kind()) == Some(DeviceErrorCode::NoSuchMethod) => {
            tracing::warn!(
                "Native discovery not supported by {} ({}), using fallback",
                endpoint.base(),
                e
            );
            fallback(endpoint, config).await
        }
        Err(e) => Err(e),
    }
}
