//! # MSSQL Entra MCP Server
//!
//! A Model Context Protocol (MCP) server for Microsoft SQL Server with
//! Microsoft Entra ID authentication support.
//!
//! This crate provides:
//! - **Tools**: Execute SQL, inspect authentication, manage the token cache
//! - **Resources**: Browse user tables and read their data
//! - **Authentication**: SQL password plus five Entra ID methods, with an
//!   on-disk access token cache for the interactive flow
//!
//! ## Architecture
//!
//! All SQL flows through a single shared connection owned by a connection
//! manager that health-probes before reuse and transparently recovers from
//! stale cached tokens.

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod resources;
pub mod server;
pub mod tools;

pub use config::{AuthMethod, DbConfig};
pub use error::ServerError;
pub use server::MssqlEntraServer;
