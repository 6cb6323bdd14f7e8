//! Azure API interaction module
//!
//! # Module Structure
//!
//! - [`api`] - The [`CloudApi`](api::CloudApi) capability the collector consumes
//! - [`auth`] - Bearer tokens from the environment or the Azure CLI
//! - [`client`] - Resource Manager client implementing `CloudApi`
//! - [`http`] - HTTP utilities and the template download transport
//! - [`models`] - Typed resource records
//!
//! # Example
//!
//! ```ignore
//! use azinv::azure::{auth::ArmCredentials, client::ArmClient, api::CloudApi};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = ArmClient::new("00000000-0000-0000-0000-000000000000", ArmCredentials::from_env())?;
//!     let groups = client.list_resource_groups().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod http;
pub mod models;
