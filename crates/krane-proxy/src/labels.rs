//! Flat label serialization.
//!
//! Label keys follow `traefik.http.{routers|services|middlewares}.<name>.<property>`.
//! A `BTreeMap` keeps iteration order stable so the output is byte-identical
//! across runs.

use std::collections::BTreeMap;

use crate::routing::{Middleware, RoutingConfig, RoutingIntent};

/// Container labels, ordered by key.
pub type Labels = BTreeMap<String, String>;

/// Synthesize the proxy labels for a deployment.
pub fn proxy_labels(intent: &RoutingIntent<'_>) -> Labels {
    RoutingConfig::from_intent(intent).to_labels()
}

impl RoutingConfig {
    /// Serialize into the flat label grammar read by the proxy.
    pub fn to_labels(&self) -> Labels {
        let mut labels = Labels::new();
        labels.insert("traefik.enable".into(), "true".into());

        for router in &self.routers {
            let prefix = format!("traefik.http.routers.{}", router.name);
            if let Some(rule) = &router.rule {
                labels.insert(format!("{prefix}.rule"), rule.clone());
            }
            labels.insert(format!("{prefix}.entrypoints"), router.entrypoint.clone());
            if let Some(tls) = &router.tls {
                labels.insert(format!("{prefix}.tls"), "true".into());
                labels.insert(format!("{prefix}.tls.certresolver"), tls.cert_resolver.clone());
            }
            if !router.middlewares.is_empty() {
                labels.insert(format!("{prefix}.middlewares"), router.middlewares.join(","));
            }
        }

        for service in &self.services {
            let prefix = format!("traefik.http.services.{}.loadbalancer.server", service.name);
            labels.insert(format!("{prefix}.port"), service.port.clone());
            labels.insert(format!("{prefix}.scheme"), service.scheme.clone());
        }

        for middleware in &self.middlewares {
            match middleware {
                Middleware::RedirectScheme {
                    name,
                    scheme,
                    port,
                    permanent,
                } => {
                    let prefix = format!("traefik.http.middlewares.{name}.redirectscheme");
                    labels.insert(format!("{prefix}.scheme"), scheme.clone());
                    labels.insert(format!("{prefix}.port"), port.to_string());
                    labels.insert(format!("{prefix}.permanent"), permanent.to_string());
                }
                Middleware::RateLimit {
                    name,
                    average,
                    burst,
                } => {
                    let prefix = format!("traefik.http.middlewares.{name}.ratelimit");
                    labels.insert(format!("{prefix}.average"), average.to_string());
                    labels.insert(format!("{prefix}.burst"), burst.to_string());
                }
            }
        }

        labels
    }
}
