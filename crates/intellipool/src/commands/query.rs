//! One-shot reads: `get`, `schedules`, `hardware`.
//!
//! Each subscribes to the data channel before sending, then prints the
//! first event that answers the request.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use intellipool_core::{Controller, DataEvent};

use crate::cli::{GetArgs, ResponseArgs};
use crate::commands::watch::check_kind;
use crate::error::CliError;
use crate::output;

const HARDWARE_QUERY: &str = "GetHardwareDefinition";

pub async fn get(args: GetArgs, controller: &Controller) -> Result<(), CliError> {
    check_kind(&args.object)?;
    let objnam = args.object.objnam.clone();

    let mut data = controller.data();
    if !controller.fetch_item(&objnam, &args.object.kind).await {
        return fail(controller, "get").await;
    }
    let answer = first_answer(&mut data, "get", args.response.timeout, |event| {
        event.objects().any(|(name, _)| name == objnam)
    })
    .await;
    print_and_close(controller, answer).await
}

pub async fn schedules(args: ResponseArgs, controller: &Controller) -> Result<(), CliError> {
    let mut data = controller.data();
    if !controller.fetch_schedules().await {
        return fail(controller, "schedules").await;
    }
    let answer = first_answer(&mut data, "schedules", args.timeout, |event| {
        event.objects().next().is_some()
    })
    .await;
    print_and_close(controller, answer).await
}

pub async fn hardware(args: ResponseArgs, controller: &Controller) -> Result<(), CliError> {
    let mut data = controller.data();
    if !controller.fetch_hardware_definition().await {
        return fail(controller, "hardware").await;
    }
    let answer = first_answer(&mut data, "hardware", args.timeout, answers_hardware_query).await;
    print_and_close(controller, answer).await
}

fn answers_hardware_query(event: &DataEvent) -> bool {
    event.payload.get("queryName").and_then(Value::as_str) == Some(HARDWARE_QUERY)
        || event.payload.get("answer").is_some()
}

async fn first_answer(
    data: &mut broadcast::Receiver<Arc<DataEvent>>,
    operation: &str,
    seconds: u64,
    matches: impl Fn(&DataEvent) -> bool,
) -> Result<Arc<DataEvent>, CliError> {
    let wait = async {
        loop {
            match data.recv().await {
                Ok(event) if matches(&event) => return Ok(event),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Err(CliError::ConnectionLost),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(seconds), wait)
        .await
        .map_err(|_| CliError::NoResponse {
            operation: operation.to_owned(),
            seconds,
        })?
}

async fn print_and_close(
    controller: &Controller,
    answer: Result<Arc<DataEvent>, CliError>,
) -> Result<(), CliError> {
    controller.disconnect().await;
    let event = answer?;
    output::print_output(&output::render_payload(&event.payload)?);
    Ok(())
}

async fn fail(controller: &Controller, operation: &str) -> Result<(), CliError> {
    controller.disconnect().await;
    Err(CliError::RequestFailed {
        operation: operation.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    fn event(payload: Value) -> DataEvent {
        DataEvent {
            command: payload
                .get("command")
                .and_then(Value::as_str)
                .map(str::to_owned),
            message_id: None,
            payload,
            raw: String::new(),
            received_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn hardware_answer_is_recognised() {
        assert!(answers_hardware_query(&event(json!({
            "command": "SendQuery",
            "queryName": "GetHardwareDefinition",
            "answer": []
        }))));
        assert!(!answers_hardware_query(&event(json!({
            "command": "NotifyList",
            "objectList": []
        }))));
    }

    #[tokio::test]
    async fn first_answer_skips_unrelated_events() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(Arc::new(event(json!({"command": "NotifyList"}))))
            .unwrap();
        tx.send(Arc::new(event(json!({
            "command": "SendParamList",
            "objectList": [{"objnam": "B1101", "params": {"TEMP": "82"}}]
        }))))
        .unwrap();

        let found = first_answer(&mut rx, "get", 1, |e| {
            e.objects().any(|(name, _)| name == "B1101")
        })
        .await;
        assert!(matches!(found, Ok(ref e) if e.command.as_deref() == Some("SendParamList")));
    }

    #[tokio::test(start_paused = true)]
    async fn first_answer_times_out() {
        let (_tx, mut rx) = broadcast::channel::<Arc<DataEvent>>(8);
        let found = first_answer(&mut rx, "schedules", 2, |_| true).await;
        assert!(matches!(
            found,
            Err(CliError::NoResponse { seconds: 2, .. })
        ));
    }
}
