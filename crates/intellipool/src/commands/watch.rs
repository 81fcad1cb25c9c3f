//! `watch`: subscribe and stream updates until interrupted.

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use intellipool_core::{ConnectionState, Controller, EquipmentKind};

use crate::cli::{ObjectSpec, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    args: WatchArgs,
    controller: &Controller,
    color: bool,
) -> Result<(), CliError> {
    validate(&args)?;

    // Receivers first so nothing sent in reply to the subscription is missed.
    let mut data = controller.data();
    let mut states = controller.state_changes();

    request(controller, &args).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                debug!("interrupted");
                break Ok(());
            }
            event = data.recv() => match event {
                Ok(event) => match output::render_event(&event) {
                    Ok(line) => output::print_output(&line),
                    Err(e) => warn!(error = %e, "could not render event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "output fell behind, events dropped");
                }
                Err(RecvError::Closed) => break Err(CliError::ConnectionLost),
            },
            state = states.recv() => match state {
                Ok(state) => {
                    output::print_state(state, color);
                    match state {
                        // Any later Connected follows a reconnect, which starts
                        // with an empty registry.
                        ConnectionState::Connected => {
                            info!("reconnected, restoring subscriptions");
                            if let Err(e) = request(controller, &args).await {
                                warn!(error = %e, "could not restore subscriptions");
                            }
                        }
                        ConnectionState::Disconnected => break Err(CliError::ConnectionLost),
                        ConnectionState::Connecting | ConnectionState::Reconnecting => {}
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Err(CliError::ConnectionLost),
            },
        }
    };

    if controller.is_connected() {
        controller.unsubscribe_all().await;
    }
    controller.disconnect().await;
    result
}

fn validate(args: &WatchArgs) -> Result<(), CliError> {
    if args.objects.is_empty() && !args.all_schedules {
        return Err(CliError::Validation {
            field: "objects".into(),
            reason: "name at least one OBJNAM:KIND or pass --all-schedules".into(),
        });
    }
    for spec in &args.objects {
        check_kind(spec)?;
    }
    Ok(())
}

pub(crate) fn check_kind(spec: &ObjectSpec) -> Result<EquipmentKind, CliError> {
    EquipmentKind::from_tag(&spec.kind).ok_or_else(|| CliError::Validation {
        field: spec.objnam.clone(),
        reason: format!("unknown equipment kind '{}'", spec.kind),
    })
}

async fn request(controller: &Controller, args: &WatchArgs) -> Result<(), CliError> {
    if !args.objects.is_empty() {
        let pairs = args
            .objects
            .iter()
            .map(|spec| (spec.objnam.clone(), spec.kind.as_str()));
        if !controller.subscribe_many(pairs).await {
            return Err(CliError::RequestFailed {
                operation: "subscribe".into(),
            });
        }
    }
    if args.all_schedules && !controller.fetch_schedules().await {
        return Err(CliError::RequestFailed {
            operation: "fetch schedules".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(objects: &[&str], all_schedules: bool) -> WatchArgs {
        WatchArgs {
            objects: objects.iter().map(|s| s.parse().unwrap_or_else(|e| panic!("{e}"))).collect(),
            all_schedules,
        }
    }

    #[test]
    fn empty_watch_is_rejected() {
        assert!(matches!(
            validate(&args(&[], false)),
            Err(CliError::Validation { .. })
        ));
        assert!(validate(&args(&[], true)).is_ok());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = validate(&args(&["B1101:HEATER", "V0001:VALVE"], false));
        match err {
            Err(CliError::Validation { field, reason }) => {
                assert_eq!(field, "V0001");
                assert!(reason.contains("VALVE"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
