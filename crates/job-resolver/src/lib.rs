//! Job resolution: criterion-driven cluster/command selection, load balancing, and
//! job specification building.

pub mod balancer;
pub mod resolver;
mod service;
pub mod specification;

pub use balancer::{LoadBalancerChain, RandomLoadBalancer, ScriptLoadBalancer};
pub use job_types::{ClusterLoadBalancer, LoadBalancerError, ResolutionError};
pub use resolver::{resolve, resolve_any, ClusterCommand};
pub use service::{JobResolver, ResolvedJob};
pub use specification::{ResolverSettings, SpecificationBuilder};
