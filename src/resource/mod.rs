//! Resource reconciliation layer
//!
//! One reconcile pass per resource: probe the control plane, create when
//! absent, poll long-running kinds to a terminal state, then export confirmed
//! identifiers for the next pipeline stage.
//!
//! # Architecture
//!
//! - [`descriptor`] - Resource identity and provisioning lifecycle types
//! - [`reconciler`] - The probe/create/poll pass, parameterized by [`reconciler::ResourceSpec`]
//! - [`outputs`] - Machine-consumable key/value exports

pub mod descriptor;
pub mod outputs;
pub mod reconciler;
