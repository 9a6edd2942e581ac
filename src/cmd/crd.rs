//! # Custom resource definition module
//!
//! This module provides the `custom-resource-definition` command line
//! interface: it prints the `AlfaTemplate` CRD manifest to stdout.

use std::sync::Arc;

use kube::CustomResourceExt;

use crate::svc::{cfg::Configuration, crd::AlfaTemplate};

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// view function

pub async fn view(_config: Arc<Configuration>) -> Result<(), Error> {
    let crd = serde_yaml::to_string(&AlfaTemplate::crd()).map_err(Error::Serialize)?;

    print!("{crd}");
    Ok(())
}
