use uuid::Uuid;

use crate::authz::Actor;

/// Per-session selection of the working business and property.
///
/// One value per signed-in session; nothing about the current selection is
/// process-global, so several sessions can coexist in one process.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    actor: Actor,
    current_business: Option<String>,
    current_property: Option<Uuid>,
}

impl SessionContext {
    pub fn new(actor: Actor) -> Self {
        let current_business = actor.business_id.clone();
        Self { actor, current_business, current_property: None }
    }

    pub fn actor(&self) -> &Actor { &self.actor }

    pub fn user_id(&self) -> Uuid { self.actor.user_id }

    pub fn current_business(&self) -> Option<&str> { self.current_business.as_deref() }

    pub fn current_property(&self) -> Option<Uuid> { self.current_property }

    /// Replace the actor after its record was re-read. A business change
    /// invalidates the selection.
    pub fn refresh_actor(&mut self, actor: Actor) {
        if actor.business_id != self.actor.business_id && actor.role != crate::domain::Role::SuperAdmin {
            self.current_business = actor.business_id.clone();
            self.current_property = None;
        }
        self.actor = actor;
    }

    /// Switching business drops the property selection.
    pub fn select_business(&mut self, business_id: Option<String>) {
        if self.current_business != business_id {
            self.current_property = None;
        }
        self.current_business = business_id;
    }

    pub fn select_property(&mut self, business_id: &str, property_id: Option<Uuid>) {
        self.select_business(Some(business_id.to_string()));
        self.current_property = property_id;
    }

    pub fn clear(&mut self) {
        self.current_business = None;
        self.current_property = None;
    }
}
