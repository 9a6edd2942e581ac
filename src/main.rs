//! # Alfa operator
//!
//! A kubernetes operator that renders and reconciles templated custom
//! resources, driven by `AlfaTemplate` custom resources.

use std::{convert::TryFrom, sync::Arc};

use clap::Parser;
use tracing::{error, info};

use crate::{
    cmd::{daemon, Args},
    svc::cfg::Configuration,
};

pub mod cmd;
pub mod logging;
pub mod svc;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to interact with command line interface, {0}")]
    Command(cmd::CommandError),
    #[error("failed to run daemon, {0}")]
    Daemon(cmd::DaemonError),
    #[error("failed to initialize logging system, {0}")]
    Logging(logging::Error),
    #[error("failed to load configuration, {0}")]
    Configuration(svc::cfg::Error),
}

impl From<cmd::CommandError> for Error {
    fn from(err: cmd::CommandError) -> Self {
        Self::Command(err)
    }
}

impl From<cmd::DaemonError> for Error {
    fn from(err: cmd::DaemonError) -> Self {
        Self::Daemon(err)
    }
}

impl From<logging::Error> for Error {
    fn from(err: logging::Error) -> Self {
        Self::Logging(err)
    }
}

impl From<svc::cfg::Error> for Error {
    fn from(err: svc::cfg::Error) -> Self {
        Self::Configuration(err)
    }
}

// -----------------------------------------------------------------------------
// main entrypoint

#[tokio::main]
pub(crate) async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let config = Arc::new(match &args.config {
        Some(path) => Configuration::try_from(path.to_owned())?,
        None => Configuration::try_default()?,
    });

    logging::initialize(args.verbosity as usize)?;
    config.help();

    if let Err(err) = config.validate() {
        error!(error = %err, "Configuration is invalid");
        return Err(Error::Configuration(err));
    }

    if args.check {
        println!("{} configuration is healthy!", env!("CARGO_PKG_NAME"));
        return Ok(());
    }

    let result = match &args.command {
        Some(cmd) => cmd.execute(config).await.map_err(Error::Command),
        None => daemon(args.kubeconfig, config).await.map_err(Error::Daemon),
    };

    if let Err(err) = result {
        error!(error = %err, "Could not execute {} properly", env!("CARGO_PKG_NAME"));
        return Err(err);
    }

    info!("{} halted!", env!("CARGO_PKG_NAME"));
    Ok(())
}
