//! Routing model: what the proxy should do for one deployment.
//!
//! A deployment gets an insecure router (always), a TLS router (when
//! `secure`), one service per target port, and a middleware chain of
//! HTTPS redirect (when `secure`) followed by a per-deployment rate limit.

use std::collections::BTreeMap;

/// Entrypoint for plain HTTP traffic.
pub const INSECURE_ENTRYPOINT: &str = "web";

/// Entrypoint for TLS traffic.
pub const SECURE_ENTRYPOINT: &str = "web-secure";

/// Certificate resolver used by TLS routers.
pub const CERT_RESOLVER: &str = "lets-encrypt";

/// Shared HTTP → HTTPS redirect middleware.
pub const REDIRECT_MIDDLEWARE: &str = "redirect-to-https";

/// Everything the synthesizer needs to know about a deployment.
#[derive(Debug, Clone, Copy)]
pub struct RoutingIntent<'a> {
    pub deployment: &'a str,
    /// Hostnames, in rule order. Empty entries are ignored.
    pub aliases: &'a [String],
    pub secure: bool,
    /// Host port → container port.
    pub ports: &'a BTreeMap<String, String>,
    pub target_port: Option<&'a str>,
    /// Average requests per second.
    pub rate_limit: u32,
}

/// TLS settings of a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tls {
    pub cert_resolver: String,
}

/// An HTTP router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    pub name: String,
    /// Host-matching rule; `None` when the deployment has no aliases.
    pub rule: Option<String>,
    pub entrypoint: String,
    pub tls: Option<Tls>,
    /// Middleware names, applied in order.
    pub middlewares: Vec<String>,
}

/// A load-balanced service pointing at a container port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub port: String,
    pub scheme: String,
}

/// A middleware definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Middleware {
    RedirectScheme {
        name: String,
        scheme: String,
        port: u16,
        permanent: bool,
    },
    RateLimit {
        name: String,
        average: u32,
        burst: u32,
    },
}

impl Middleware {
    pub fn name(&self) -> &str {
        match self {
            Middleware::RedirectScheme { name, .. } | Middleware::RateLimit { name, .. } => name,
        }
    }
}

/// Full proxy configuration for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    pub routers: Vec<Router>,
    pub services: Vec<Service>,
    pub middlewares: Vec<Middleware>,
}

impl RoutingConfig {
    /// Build the routing model for a deployment.
    pub fn from_intent(intent: &RoutingIntent<'_>) -> Self {
        let deployment = intent.deployment;
        let rule = host_rule(intent.aliases);

        let mut middlewares = Vec::new();
        if intent.secure {
            middlewares.push(Middleware::RedirectScheme {
                name: REDIRECT_MIDDLEWARE.to_string(),
                scheme: "https".to_string(),
                port: 443,
                permanent: true,
            });
        }
        middlewares.push(Middleware::RateLimit {
            name: format!("{deployment}-ratelimit"),
            average: intent.rate_limit,
            burst: intent.rate_limit,
        });

        let chain: Vec<String> = middlewares.iter().map(|m| m.name().to_string()).collect();

        let mut routers = vec![Router {
            name: format!("{deployment}-insecure"),
            rule: rule.clone(),
            entrypoint: INSECURE_ENTRYPOINT.to_string(),
            tls: None,
            middlewares: chain.clone(),
        }];
        if intent.secure {
            // Redirecting https → https would loop.
            routers.push(Router {
                name: format!("{deployment}-secure"),
                rule,
                entrypoint: SECURE_ENTRYPOINT.to_string(),
                tls: Some(Tls {
                    cert_resolver: CERT_RESOLVER.to_string(),
                }),
                middlewares: chain
                    .into_iter()
                    .filter(|m| m != REDIRECT_MIDDLEWARE)
                    .collect(),
            });
        }

        let services = match intent.target_port {
            Some(port) => vec![Service {
                name: deployment.to_string(),
                port: port.to_string(),
                scheme: "http".to_string(),
            }],
            None => {
                let mut services: Vec<Service> = Vec::new();
                for port in intent.ports.values() {
                    // Two host ports may publish the same container port.
                    if services.iter().any(|s| &s.port == port) {
                        continue;
                    }
                    services.push(Service {
                        name: format!("{deployment}-{port}"),
                        port: port.clone(),
                        scheme: "http".to_string(),
                    });
                }
                services
            }
        };

        Self {
            routers,
            services,
            middlewares,
        }
    }
}

/// OR-combine one `Host(...)` matcher per non-empty alias.
pub fn host_rule(aliases: &[String]) -> Option<String> {
    let hosts: Vec<String> = aliases
        .iter()
        .filter(|a| !a.is_empty())
        .map(|a| format!("Host(`{a}`)"))
        .collect();
    (!hosts.is_empty()).then(|| hosts.join(" || "))
}
