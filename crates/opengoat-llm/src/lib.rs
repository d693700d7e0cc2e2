//! Provider abstraction: a uniform surface over CLI tools and HTTP model
//! endpoints, used by the orchestrator to invoke an agent's bound provider.

pub mod cli_provider;
pub mod error;
pub mod http_provider;
pub mod mock;
pub mod provider;
pub mod registry;

pub use cli_provider::{CliProvider, CliProviderConfig};
pub use error::{Error, Result};
pub use http_provider::{AuthHeader, HttpProtocol, HttpProvider, HttpProviderConfig};
pub use mock::MockProvider;
pub use provider::{Capabilities, Execution, InvokeOptions, Provider, ProviderKind, ProviderMeta};
pub use registry::ProviderRegistry;
