//! Per-kind event routing: extract the entity id from an inbound payload
//! and write it into the coalescing buffer.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, trace};

use crate::model::{first_present_id, EntityKind};

use super::buffer::CoalescingBuffer;

/// How payloads of one kind map to buffer entries.
#[derive(Debug, Clone)]
pub enum RouteMode {
    /// One entity per payload; the id is the first present candidate field.
    Keyed { id_fields: Vec<&'static str> },
    /// The payload is a map of entity id to partial update; each entry is
    /// merged into that entity's buffered state. `id_field` is written into
    /// every partial so downstream consumers can key the committed batch.
    FannedOut { id_field: &'static str },
}

/// The observed routing policy for a kind.
pub fn default_route(kind: EntityKind) -> RouteMode {
    match kind {
        EntityKind::MachineProperty => RouteMode::FannedOut { id_field: "name" },
        _ => RouteMode::Keyed {
            id_fields: kind.id_fields().to_vec(),
        },
    }
}

/// Deregistration token returned by `register`. Handing it back to
/// `unregister` removes exactly the handler it was issued for, so a stale
/// token from a previous session cannot tear down a newer route.
#[derive(Debug)]
pub struct Registration {
    kind: EntityKind,
    serial: u64,
}

struct Route {
    mode: RouteMode,
    serial: u64,
}

/// Demultiplexes inbound updates by entity kind.
pub struct EventRouter {
    routes: HashMap<EntityKind, Route>,
    next_serial: u64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            next_serial: 0,
        }
    }

    /// Associate a kind with a route. Replaces any existing route for the
    /// kind and returns the token that releases this registration.
    pub fn register(&mut self, kind: EntityKind, mode: RouteMode) -> Registration {
        self.next_serial += 1;
        let serial = self.next_serial;
        if self.routes.insert(kind, Route { mode, serial }).is_some() {
            debug!("Replacing existing route for {} updates", kind);
        }
        Registration { kind, serial }
    }

    /// Release a registration. A token issued for a route that has since
    /// been replaced is a no-op.
    pub fn unregister(&mut self, registration: Registration) {
        let current = self.routes.get(&registration.kind);
        if current.map(|route| route.serial) == Some(registration.serial) {
            self.routes.remove(&registration.kind);
        }
    }

    pub fn is_registered(&self, kind: EntityKind) -> bool {
        self.routes.contains_key(&kind)
    }

    pub fn registered_count(&self) -> usize {
        self.routes.len()
    }

    /// Route one payload into the buffer. Synchronous, never blocks; a
    /// payload without a usable id is dropped with a log, never an error.
    pub fn dispatch(&self, kind: EntityKind, payload: Value, buffer: &mut CoalescingBuffer) {
        let Some(route) = self.routes.get(&kind) else {
            trace!("No route registered for {} updates, dropping", kind);
            return;
        };

        match &route.mode {
            RouteMode::Keyed { id_fields } => match first_present_id(&payload, id_fields) {
                Some(id) => buffer.put(kind, &id, payload),
                None => {
                    debug!("Dropping {} update without a usable identifier", kind);
                }
            },
            RouteMode::FannedOut { id_field } => {
                let Value::Object(entries) = payload else {
                    debug!("Dropping {} update: expected a map keyed by id", kind);
                    return;
                };
                for (id, partial) in entries {
                    let mut partial = partial;
                    if let Value::Object(fields) = &mut partial {
                        fields.insert((*id_field).to_string(), Value::String(id.clone()));
                    }
                    buffer.merge(kind, &id, partial);
                }
            }
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}
