//! Pipeline stages
//!
//! Each submodule replaces one of the former numbered provisioning scripts:
//! a thin instantiation of the shared reconciler plus stage-specific
//! validation and exports. Stages are independent processes chained by
//! exported environment values, never by shared memory.

pub mod apim;
pub mod identity;
pub mod keyvault;
pub mod network;
pub mod peering;

use crate::arm::client::ArmClient;
use crate::config::Settings;

/// Shared inputs for one stage run
pub struct StageContext {
    pub client: ArmClient,
    pub settings: Settings,
    pub resource_group: String,
    pub location: String,
}
