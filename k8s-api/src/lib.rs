#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod authorization_policy;
pub mod gateway;
pub mod virtual_service;

pub use self::{
    authorization_policy::AuthorizationPolicy, gateway::Gateway, virtual_service::VirtualService,
};
pub use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
pub use kube::api::{ObjectMeta, ResourceExt};
