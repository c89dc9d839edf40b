//! Krane reverse-proxy configuration.
//!
//! Deployments become reachable through a label-driven reverse proxy
//! (Traefik). This crate turns a deployment's routing intent into the flat
//! label set the proxy discovers on container metadata.
//!
//! # Components
//!
//! - **`routing`**: Structured router / service / middleware model built
//!   from a [`RoutingIntent`]
//! - **`labels`**: Serialization of that model into
//!   `traefik.http.{routers|services|middlewares}.<name>.<property>` labels
//!
//! Synthesis is pure: identical intents always produce identical label maps,
//! so re-running it on every reconciliation never churns container metadata.

pub mod labels;
pub mod routing;

pub use labels::{Labels, proxy_labels};
pub use routing::{Middleware, Router, RoutingConfig, RoutingIntent, Service, Tls};
