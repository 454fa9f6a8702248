//! Kubernetes Events synthesized from the engine event stream since the
//! adapter started.

use crate::EngineAdapter;
use crate::error::{Error, Result};

use bollard::models::EventMessage;
use bollard::query_parameters::EventsOptionsBuilder;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::chrono::{DateTime, Utc};

impl EngineAdapter {
    pub async fn list_events(&self) -> Result<Vec<Event>> {
        let since = self.started_at.timestamp().to_string();
        let until = Utc::now().timestamp().to_string();

        let mut stream = self.docker().events(Some(
            EventsOptionsBuilder::default()
                .since(&since)
                .until(&until)
                .build(),
        ));

        let mut events = Vec::new();
        while let Some(message) = stream.next().await {
            let message =
                message.map_err(|e| Error::EngineError("failed to read engine events".to_string(), e))?;
            if let Some(event) = kubernetes_event(message) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn kubernetes_event(message: EventMessage) -> Option<Event> {
    let action = message.action.clone()?;
    let actor = message.actor.as_ref().and_then(|actor| actor.id.clone())?;
    let object_kind = message
        .typ
        .as_ref()
        .and_then(|typ| serde_json::to_value(typ).ok())
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    let timestamp = message
        .time
        .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
        .map(Time);

    Some(Event {
        metadata: ObjectMeta {
            name: Some(format!("{actor}.{}", message.time.unwrap_or_default())),
            namespace: Some(crate::naming::DEFAULT_NAMESPACE.to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some(object_kind),
            name: Some(actor),
            ..Default::default()
        },
        reason: Some(action.clone()),
        message: Some(action),
        type_: Some("Normal".to_string()),
        count: Some(1),
        first_timestamp: timestamp.clone(),
        last_timestamp: timestamp,
        ..Default::default()
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use bollard::models::{EventActor, EventMessageTypeEnum};

    #[test]
    fn test_kubernetes_event_mapping() {
        let message = EventMessage {
            typ: Some(EventMessageTypeEnum::CONTAINER),
            action: Some("start".to_string()),
            actor: Some(EventActor {
                id: Some("nginx".to_string()),
                ..Default::default()
            }),
            time: Some(1_700_000_000),
            ..Default::default()
        };

        let event = kubernetes_event(message).unwrap();
        assert_eq!(event.reason.as_deref(), Some("start"));
        assert_eq!(event.involved_object.name.as_deref(), Some("nginx"));
        assert!(event.first_timestamp.is_some());
    }

    #[test]
    fn test_event_without_actor_is_skipped() {
        let message = EventMessage {
            action: Some("die".to_string()),
            ..Default::default()
        };
        assert!(kubernetes_event(message).is_none());
    }
}
