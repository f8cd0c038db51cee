//! Entity lifecycle events.
//!
//! The entity manager emits an event at each fixed point of the write and
//! read lifecycles. `before*` events are emitted ahead of the statements and
//! may mutate the payload (extend the change set, rewrite the response list);
//! the remaining events report what happened. An erroring handler aborts the
//! operation.

use std::future::Future;
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use serde::Serialize;

use crate::data::Entity;
use crate::error::Error;
use crate::value::Value;

/// The fixed emission points, with their dotted wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    BeforeCreate,
    Create,
    BeforeUpdate,
    Update,
    BeforeDelete,
    Delete,
    AddRelations,
    RemoveRelations,
    BeforeResponse,
}

impl EventName {
    /// The dotted name handlers subscribe to.
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::BeforeCreate => "entity.beforeCreate",
            EventName::Create => "entity.create",
            EventName::BeforeUpdate => "entity.beforeUpdate",
            EventName::Update => "entity.update",
            EventName::BeforeDelete => "entity.beforeDelete",
            EventName::Delete => "entity.delete",
            EventName::AddRelations => "entity.addRelations",
            EventName::RemoveRelations => "entity.removeRelations",
            EventName::BeforeResponse => "entity.beforeResponse",
        }
    }
}

/// Event payloads. Each variant corresponds to one [`EventName`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum EventPayload {
    /// Emitted before the insert. `before` is the entity as it will be
    /// written; handlers may adjust it.
    BeforeCreate { before: Entity },
    /// Emitted after a successful create with the assembled entity.
    Created { after: Entity },
    /// Emitted before the update statements. Handlers may extend `changes`;
    /// the manager recomputes the effective diff afterwards.
    BeforeUpdate {
        before: Entity,
        changes: Entity,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        state_properties: Vec<String>,
    },
    /// Emitted after a successful update.
    Updated {
        before: Entity,
        after: Entity,
        changes: Entity,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        state_properties: Vec<String>,
    },
    /// Emitted before the delete statements, with the loaded entity.
    BeforeDelete { before: Entity },
    /// Emitted after a successful delete.
    Deleted { before: Entity },
    /// Emitted after link rows were added to a many relation.
    RelationsAdded {
        entity: Entity,
        property: String,
        relations: Vec<Value>,
    },
    /// Emitted after link rows were removed from a many relation.
    RelationsRemoved {
        entity: Entity,
        property: String,
        relations: Vec<Value>,
    },
    /// Emitted with the assembled result list before a find returns.
    /// Handlers may rewrite the list.
    BeforeResponse { entities: Vec<Entity> },
}

impl EventPayload {
    /// The emission point this payload belongs to.
    pub fn name(&self) -> EventName {
        match self {
            EventPayload::BeforeCreate { .. } => EventName::BeforeCreate,
            EventPayload::Created { .. } => EventName::Create,
            EventPayload::BeforeUpdate { .. } => EventName::BeforeUpdate,
            EventPayload::Updated { .. } => EventName::Update,
            EventPayload::BeforeDelete { .. } => EventName::BeforeDelete,
            EventPayload::Deleted { .. } => EventName::Delete,
            EventPayload::RelationsAdded { .. } => EventName::AddRelations,
            EventPayload::RelationsRemoved { .. } => EventName::RemoveRelations,
            EventPayload::BeforeResponse { .. } => EventName::BeforeResponse,
        }
    }
}

/// One lifecycle event, as delivered to the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvent {
    /// Namespace of the model the operation targeted.
    pub namespace: String,
    /// Code of the model the operation targeted.
    pub model_code: String,
    /// Code of the model's base, when it has one. Handlers subscribed to the
    /// base model observe derived-model operations through this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_model_code: Option<String>,
    pub payload: EventPayload,
    /// Identifies the origin of the operation, when the caller supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Opaque caller context, forwarded unchanged.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub context: serde_json::Value,
}

impl EntityEvent {
    /// The emission point of this event.
    pub fn name(&self) -> EventName {
        self.payload.name()
    }
}

/// Delivers lifecycle events to handlers.
///
/// `emit` is awaited before the operation proceeds; returning an error aborts
/// the operation. Handlers mutate the event in place where the payload allows
/// it.
pub trait EventBus: Send + Sync {
    fn emit(
        &self,
        cx: &Cx,
        event: &mut EntityEvent,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;
}

impl<B: EventBus> EventBus for Arc<B> {
    fn emit(
        &self,
        cx: &Cx,
        event: &mut EntityEvent,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        (**self).emit(cx, event)
    }
}

/// A bus with no handlers. Every emission succeeds without side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(
        &self,
        _cx: &Cx,
        _event: &mut EntityEvent,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        std::future::ready(Outcome::Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(EventName::BeforeCreate.as_str(), "entity.beforeCreate");
        assert_eq!(EventName::AddRelations.as_str(), "entity.addRelations");
        assert_eq!(EventName::BeforeResponse.as_str(), "entity.beforeResponse");
    }

    #[test]
    fn test_payload_name_mapping() {
        let payload = EventPayload::Deleted {
            before: Entity::new(),
        };
        assert_eq!(payload.name(), EventName::Delete);
    }
}
