//! `set` and `invoke`: fire-and-forget writes.

use crate::cli::{InvokeArgs, SetArgs};
use crate::error::CliError;

use intellipool_core::Controller;

pub async fn set(args: SetArgs, controller: &Controller) -> Result<(), CliError> {
    let sent = controller
        .send_property_update(&args.objnam, &args.property, &args.value)
        .await;
    finish(controller, sent, "set").await
}

pub async fn invoke(args: InvokeArgs, controller: &Controller) -> Result<(), CliError> {
    let sent = controller
        .send_command(&args.method, &args.objnam, &args.value)
        .await;
    finish(controller, sent, &args.method).await
}

async fn finish(controller: &Controller, sent: bool, operation: &str) -> Result<(), CliError> {
    controller.disconnect().await;
    if sent {
        tracing::info!(operation, "request sent");
        Ok(())
    } else {
        Err(CliError::RequestFailed {
            operation: operation.to_owned(),
        })
    }
}
