//! Azure Resource Manager interaction module
//!
//! This module provides the core functionality for talking to the Azure
//! control plane: authentication, HTTP client, and resource group lookup.
//!
//! # Module Structure
//!
//! - [`auth`] - Token acquisition (static token or client-credentials grant)
//! - [`client`] - Main ARM client with per-provider URL builders
//! - [`http`] - HTTP utilities for REST API calls
//! - [`groups`] - Resource group lookup
//!
//! # Example
//!
//! ```ignore
//! use crate::arm::auth::AzureCredentials;
//! use crate::arm::client::ArmClient;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let credentials = AzureCredentials::from_env()?;
//!     let client = ArmClient::new(credentials, "00000000-0000-0000-0000-000000000000")?;
//!     let vnet = client.get_optional(&client.vnet_url("rg-demo", "vnet-apim")).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod groups;
pub mod http;
