#![warn(missing_docs, missing_debug_implementations)]

//! Check whether a name is available as an npm user, scope, or organization.
//!
//! A name is validated locally against npm's naming rules, then probed
//! against three namespaces in a fixed order (user accounts, package scopes,
//! organizations). The first namespace that already holds the name decides
//! the verdict and the remaining probes are skipped. Requests go through a
//! CORS-bypass proxy by default and every probe is read-only.
//!
//! For interactive input, [`controller::CheckController`] debounces
//! keystrokes into a single check and publishes its state for a UI to render.
//!
//! # Example
//!
//! ```no_run
//! use npm_avail::config::Config;
//! use npm_avail::registry::HttpRegistry;
//! use npm_avail::resolve::Resolver;
//! use npm_avail::validate::validate;
//!
//! # async fn demo() {
//! let name = "my-cool-org";
//! if validate(name).is_valid {
//!     let resolver = Resolver::new(HttpRegistry::new(Config::default()));
//!     match resolver.resolve(name).await {
//!         Ok(verdict) if verdict.is_available => println!("{name} is free"),
//!         Ok(verdict) => println!("{name} is {verdict}"),
//!         Err(e) => eprintln!("error: {}", npm_avail::classify::classify(&e)),
//!     }
//! }
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod controller;
pub mod registry;
pub mod resolve;
pub mod validate;

pub use classify::{ClassifiedError, ErrorKind, classify};
pub use config::Config;
pub use controller::{CheckController, CheckState, Phase};
pub use registry::{HttpRegistry, ProbeError, Registry};
pub use resolve::{Namespace, Resolver, Verdict, org_url};
pub use validate::{ValidationOutcome, ViolationKind, validate};
