//! storage-expansion - verifies PVC expansion on a CloudNativePG installation.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads configuration from the environment
//! - Runs the online and offline expansion scenarios
//! - Deletes the namespaces it created unless asked to keep them

use std::process::ExitCode;

use tokio::signal;
use tracing::{error, info, warn};

use storage_expansion::{ExpansionWorkflow, KubePlatform, WorkflowConfig};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storage_expansion=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let config = WorkflowConfig::from_env()?;
    config.validate()?;
    let preserve_namespaces = config.preserve_namespaces;

    info!(
        storage_class = %config.storage_class,
        test_depth = config.test_depth,
        fixtures_dir = %config.fixtures_dir.display(),
        "Starting storage expansion suite"
    );

    let platform = KubePlatform::try_default(config.clone()).await?;
    info!("Connected to Kubernetes cluster");

    let workflow = ExpansionWorkflow::new(platform, config);

    let suite = tokio::select! {
        suite = workflow.run_all() => Some(suite),
        _ = shutdown_signal() => {
            warn!("Received shutdown signal, abandoning running scenarios");
            None
        }
    };

    let platform = workflow.platform();
    let namespaces = platform.provisioned_namespaces().await;
    if preserve_namespaces {
        info!(?namespaces, "Preserving namespaces");
    } else {
        for namespace in &namespaces {
            if let Err(e) = platform.delete_namespace(namespace).await {
                warn!(namespace = %namespace, error = %e, "Failed to delete namespace");
            }
        }
    }

    let Some(suite) = suite else {
        return Ok(ExitCode::FAILURE);
    };

    for report in &suite.reports {
        if report.is_failed() {
            error!(scenario = %report.scenario, "{}", report);
        } else {
            info!(scenario = %report.scenario, "{}", report);
        }
    }
    info!(summary = %suite.summary(), "Storage expansion suite complete");

    if suite.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
