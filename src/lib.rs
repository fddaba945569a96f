//! Step-driven acceptance test engine for multi-tenant CRUD APIs.
//!
//! Scenarios are ordered steps (context changes, requests, fixture
//! setup, history moves and assertions). Responses are kept in a
//! per-scenario [`ResponseHistory`]; setup resources are shared across
//! scenarios through a [`FixtureCache`]; placeholders such as
//! `<current_resource.id>` are materialized by the [`Resolver`].

pub mod client;
pub mod config;
pub mod coverage;
pub mod error;
pub mod fixture;
pub mod history;
pub mod model;
pub mod resolver;
pub mod runner;
pub mod validator;

pub use client::*;
pub use config::*;
pub use coverage::{analyze, CoverageLevel, CoverageReport, CoverageStats, Endpoint};
pub use error::*;
pub use fixture::*;
pub use history::*;
pub use model::*;
pub use resolver::Resolver;
pub use runner::*;
pub use validator::{evaluate, AssertionFailure, ErrorPayload};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
