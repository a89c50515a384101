//! # Registry Harness
//!
//! One data-access interface over package registries stored in object
//! storage, whichever way the caller is authenticated.
//!
//! ## Architecture
//!
//! ```text
//!   RequestContext ──▶ Resolver ──▶ Backend (enum) ──implements──▶ Ops
//!                        │
//!        bearer token ───┼──▶ PlatformBackend      (GraphQL endpoint)
//!      native session ───┼──▶ LibraryBackend       (package store + exchanged creds)
//!   cloud credentials ───┘──▶ CredentialOnlyBackend (package store, read-only)
//!
//!   Ops::search_backends() ──▶ search::aggregate_search
//!        index │ graph │ registry-scan  → normalize → dedupe → rank
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ops`] | The `Ops` contract and aggregate search entry point |
//! | [`resolver`] | Auth-driven backend selection |
//! | [`backends`] | The three backend implementations |
//! | [`search`] | Multi-source search aggregation |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Domain types and descriptors |
//! | [`package_store`] | Manifest-based package revisions in a bucket |
//! | [`manifest`] | JSON-lines manifest format and top hash |
//! | [`storage`] | Object store abstraction (S3 and in-memory) |
//! | [`session`] | Native session file and credential exchange |
//! | [`graphql`] | GraphQL client |
//! | [`http`] | Shared HTTP client and retry policy |
//! | [`config`] | TOML + environment configuration |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`tools`] | Agent-callable tools |
//! | [`server`] | HTTP tool server |

pub mod backends;
pub mod config;
pub mod error;
pub mod graphql;
pub mod http;
pub mod logging;
pub mod manifest;
pub mod models;
pub mod ops;
pub mod package_store;
pub mod resolver;
pub mod search;
pub mod server;
pub mod session;
pub mod storage;
pub mod tools;
