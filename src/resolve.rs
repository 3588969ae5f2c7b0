//! Combining the three namespace probes into one availability verdict.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::NPM_WEBSITE_URL;
use crate::registry::{ProbeError, Registry};

/// One of the npm name registries a candidate can collide with.
///
/// Variants are declared in probe order, which is also npm's conflict
/// precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// A user account.
    User,
    /// A package scope (`@name/...`).
    Scope,
    /// An organization.
    Organization,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Scope => write!(f, "scope"),
            Self::Organization => write!(f, "organization"),
        }
    }
}

/// Whether a name exists in one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeResult {
    /// Which namespace was probed.
    pub namespace: Namespace,
    /// Whether the name is already in use there.
    pub exists: bool,
}

/// The final availability decision for a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[must_use]
pub struct Verdict {
    /// The name that was checked.
    pub name: String,
    /// True when no namespace already holds the name.
    pub is_available: bool,
    /// The namespace whose probe found a conflict, if any.
    pub conflicting_namespace: Option<Namespace>,
    /// The would-be organization page, populated whether or not the name is free.
    pub reference_url: String,
}

impl Verdict {
    fn from_probe(name: &str, probe: ProbeResult) -> Self {
        Self {
            name: name.to_owned(),
            is_available: !probe.exists,
            conflicting_namespace: probe.exists.then_some(probe.namespace),
            reference_url: org_url(name),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.conflicting_namespace {
            None => write!(f, "available"),
            Some(namespace) => write!(f, "taken ({namespace})"),
        }
    }
}

/// The canonical organization page for `name` on npm's website.
///
/// ```
/// assert_eq!(npm_avail::resolve::org_url("acme"), "https://www.npmjs.com/org/acme");
/// ```
#[must_use]
pub fn org_url(name: &str) -> String {
    format!("{NPM_WEBSITE_URL}/org/{name}")
}

/// Runs the user, scope and organization probes in order.
#[derive(Debug, Clone)]
pub struct Resolver<R> {
    registry: R,
}

impl<R: Registry> Resolver<R> {
    /// Create a resolver over `registry`.
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    /// The registry probes are issued against.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Decide whether `name` is free across all three namespaces.
    ///
    /// Probes run strictly one after another: user, then scope, then
    /// organization. The first one that finds the name decides the verdict
    /// and the remaining probes are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProbeError`] raised by a probe, unclassified.
    pub async fn resolve(&self, name: &str) -> Result<Verdict, ProbeError> {
        let user = ProbeResult {
            namespace: Namespace::User,
            exists: self.registry.user_exists(name).await?,
        };
        if user.exists {
            debug!(name, "taken by a user");
            return Ok(Verdict::from_probe(name, user));
        }

        let scope = ProbeResult {
            namespace: Namespace::Scope,
            exists: self.registry.scope_exists(name).await?,
        };
        if scope.exists {
            debug!(name, "taken by a scope");
            return Ok(Verdict::from_probe(name, scope));
        }

        let organization = ProbeResult {
            namespace: Namespace::Organization,
            exists: self.registry.organization_exists(name).await?,
        };
        let verdict = Verdict::from_probe(name, organization);
        debug!(name, %verdict, "resolved");
        Ok(verdict)
    }
}
