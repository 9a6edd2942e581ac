//! # Command module
//!
//! This module provides the command line interface: argument parsing and the
//! daemon entry point wiring the cluster controller and the telemetry HTTP
//! server together (SPEC_FULL.md §6/§10.1).

use std::{io, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::svc::{
    cfg::Configuration,
    cluster::controller::Controller,
    http,
    k8s::{client, registry::Registry},
};

pub mod crd;

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Print the AlfaTemplate custom resource definition manifest
    #[command(name = "custom-resource-definition", alias = "crd")]
    CustomResourceDefinition,
}

// -----------------------------------------------------------------------------
// CommandError enum

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(crd::Error),
}

impl Command {
    pub async fn execute(&self, config: Arc<Configuration>) -> Result<(), CommandError> {
        match self {
            Self::CustomResourceDefinition => {
                crd::view(config).await.map_err(CommandError::CustomResourceDefinition)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[command(author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity, may be repeated
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[arg(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy and exit
    #[arg(short = 't', long = "check", global = true)]
    pub check: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to handle termination signal, {0}")]
    SigTerm(io::Error),
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to run api discovery, {0}")]
    Discovery(crate::svc::k8s::registry::Error),
}

// -----------------------------------------------------------------------------
// daemon function

/// Runs the reconciliation engine (§4.3-§4.8) and the telemetry HTTP server
/// (§10.8) side by side, until `ctrl_c` is received.
#[tracing::instrument(skip_all)]
pub async fn daemon(kubeconfig: Option<PathBuf>, config: Arc<Configuration>) -> Result<(), DaemonError> {
    let kube_client = client::try_new(kubeconfig).await.map_err(DaemonError::Client)?;
    let registry = Arc::new(
        Registry::discover(kube_client)
            .await
            .map_err(DaemonError::Discovery)?,
    );

    let token = CancellationToken::new();

    let controller = Controller::new(config.clone(), registry.clone());
    let controller_token = token.child_token();
    let controller_handle = tokio::spawn(controller.run(controller_token));

    let server_config = config.clone();
    let server_handle = tokio::spawn(async move { http::server::serve(server_config).await });

    info!(parent = config.parent, "Operator started");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(DaemonError::SigTerm)?;
            info!("Received termination signal, shutting down");
        }
        result = server_handle => {
            match result {
                Ok(Err(err)) => error!(error = %err, "Telemetry http server exited unexpectedly"),
                Err(err) => error!(error = %err, "Telemetry http server task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    token.cancel();

    if let Err(err) = controller_handle.await {
        if !err.is_cancelled() {
            error!(error = %err, "Could not wait for the cluster controller to complete");
        }
    }

    Ok(())
}
