//! # Custom Resource Definitions
//!
//! CRD types for the Secret Sync Controller.
//!
//! ## Module Structure
//!
//! - `external_secret.rs` - `ExternalSecret` spec: data references, rewrites, target, template
//! - `store.rs` - `SecretStore` / `ClusterSecretStore` and provider configuration
//! - `generator.rs` - generator resources and durable `GeneratorState` records
//! - `status.rs` - status types shared by the resources above

mod external_secret;
mod generator;
mod status;
mod store;

pub use external_secret::{
    default_refresh_interval, ConflictPolicy, CreationPolicy, DecodingStrategy, DeletionPolicy,
    EngineVersion, ExternalSecret, ExternalSecretData, ExternalSecretDataFrom, ExternalSecretSpec,
    ExternalSecretTarget, FindName, FindRef, GeneratorRef, MergePolicy, MergeStrategy,
    PriorityPolicy, RefreshPolicy, RemoteRef, Rewrite, RewriteMerge, RewriteRegexp,
    RewriteTransform, SecretStoreRef, SourceRef, StoreKind, Template, TemplateFrom,
    TemplateMetadata, TemplateRef, TemplateRefItem, TemplateScope, TemplateTarget,
    CLUSTER_GENERATOR_KIND,
};
pub use generator::{
    ClusterGenerator, ClusterGeneratorSpec, Fake, FakeSpec, GeneratorState, GeneratorStateSpec,
    Password, PasswordSpec, Uuid, UuidSpec,
};
pub use status::{Condition, ExternalSecretStatus, SecretBinding, SecretStoreStatus, SourceStatus};
pub use store::{
    ClusterSecretStore, ClusterSecretStoreSpec, ClusterStoreCondition, FakeProvider, FakeProviderData, SecretStore,
    SecretStoreSpec, StoreProvider, WebhookProvider, WebhookResult,
};
