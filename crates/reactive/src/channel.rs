//! Change channel management.
//!
//! A change channel handle bundles the three channels (create, update,
//! delete) opened on the external `ChangeSource` for one entity type and
//! scope. The manager owns handle lifetime only: events flow from the source
//! straight to the `Dispatcher` given at open time.
//!
//! Handles are driven by demand. The engine derives a `Demand` from the
//! registered queries and calls `sync`, which closes handles nobody needs,
//! replaces handles whose scope changed, and opens the missing ones.

use crate::event::{ChangeEvent, ChangeOperation};
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use sluice_core::schema::EntityType;
use sluice_core::{Error, Result, Value};
use sluice_query::document::write_literal;

/// Narrowing applied to a channel's notifications.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    /// Every notification of the entity type.
    Unscoped,
    /// Notifications of entities owned by one principal.
    Owner(String),
}

impl Scope {
    /// Returns the scope an entity type's channels need for the principal.
    ///
    /// Returns `None` for an owner-scoped type without a principal: its
    /// channels cannot be opened yet.
    pub fn for_entity_type(entity_type: &EntityType, principal: Option<&str>) -> Option<Scope> {
        if entity_type.is_owner_scoped() {
            principal.map(|p| Scope::Owner(p.to_string()))
        } else {
            Some(Scope::Unscoped)
        }
    }

    /// Combines the scopes two queries need on the same entity type.
    pub fn merge(self, other: Scope) -> Scope {
        if self == other {
            self
        } else {
            Scope::Unscoped
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Unscoped => f.write_str("*"),
            Scope::Owner(p) => write!(f, "owner={}", p),
        }
    }
}

/// Token identifying a channel opened on the source.
pub type ChannelToken = u64;

/// A channel the source is asked to open.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelRequest {
    pub entity_type: String,
    pub operation: ChangeOperation,
    pub scope: Scope,
    /// Subscription document text.
    pub document: String,
}

impl ChannelRequest {
    pub fn new(entity_type: &EntityType, operation: ChangeOperation, scope: Scope) -> Self {
        let name = entity_type.name();
        let mut args = String::new();
        if let Scope::Owner(principal) = &scope {
            args.push_str("(owner: ");
            write_literal(&mut args, &Value::from(principal.as_str()));
            args.push(')');
        }
        let document = format!(
            "subscription On{op}{name} {{ on{op}{name}{args} {{ {fields} }} }}",
            op = operation.as_str(),
            name = name,
            args = args,
            fields = entity_type.field_set(),
        );
        Self {
            entity_type: name.to_string(),
            operation,
            scope,
            document,
        }
    }
}

/// Receiver of the events delivered by change channels.
pub trait ChangeSink {
    fn on_change(&self, event: ChangeEvent);
    fn on_channel_error(&self, error: Error);
}

/// Handle through which a source delivers events.
///
/// Holds the sink weakly; once the engine is gone, deliveries are dropped.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Weak<dyn ChangeSink>,
}

impl Dispatcher {
    pub fn new(sink: Weak<dyn ChangeSink>) -> Self {
        Self { sink }
    }

    /// Delivers a change event.
    pub fn dispatch(&self, event: ChangeEvent) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_change(event);
        }
    }

    /// Reports a channel failure.
    pub fn fail(&self, error: Error) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_channel_error(error);
        }
    }

    /// Returns true if the receiving engine was dropped.
    pub fn is_closed(&self) -> bool {
        self.sink.strong_count() == 0
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// External change notification source.
pub trait ChangeSource {
    /// Opens one channel delivering to `dispatcher`.
    fn open(&mut self, request: &ChannelRequest, dispatcher: Dispatcher) -> Result<ChannelToken>;

    /// Tears down a channel.
    fn close(&mut self, token: ChannelToken);
}

/// Entity types and scopes required by the registered queries.
#[derive(Default)]
pub struct Demand {
    entries: BTreeMap<String, DemandEntry>,
}

struct DemandEntry {
    entity_type: Rc<EntityType>,
    scope: Scope,
    refs: usize,
}

impl Demand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one query's need for channels on an entity type.
    pub fn add(&mut self, entity_type: &Rc<EntityType>, scope: Scope) {
        match self.entries.get_mut(entity_type.name()) {
            Some(entry) => {
                entry.scope = core::mem::replace(&mut entry.scope, Scope::Unscoped).merge(scope);
                entry.refs += 1;
            }
            None => {
                self.entries.insert(
                    entity_type.name().to_string(),
                    DemandEntry {
                        entity_type: entity_type.clone(),
                        scope,
                        refs: 1,
                    },
                );
            }
        }
    }

    /// Returns the merged scope demanded for an entity type.
    pub fn scope(&self, entity_type: &str) -> Option<&Scope> {
        self.entries.get(entity_type).map(|e| &e.scope)
    }

    /// Returns the number of queries demanding an entity type.
    pub fn refs(&self, entity_type: &str) -> usize {
        self.entries.get(entity_type).map_or(0, |e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The open channels for one entity type.
struct ChannelHandle {
    scope: Scope,
    tokens: Vec<ChannelToken>,
    refs: usize,
}

/// Owns change channel handles, at most one per entity type.
#[derive(Default)]
pub struct ChannelManager {
    handles: BTreeMap<String, ChannelHandle>,
    /// Handles whose setup failed; not retried until demand or scope changes.
    unavailable: BTreeMap<String, Scope>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure a handle for `(entity_type, scope)` is open and holds
    /// `refs` references.
    ///
    /// A handle of the same type with another scope is torn down first.
    /// A failed setup marks the pair unavailable and returns
    /// `ChannelUnavailable`; the pair is not retried until the scope changes
    /// or demand for the type goes away.
    pub fn ensure(
        &mut self,
        entity_type: &EntityType,
        scope: &Scope,
        refs: usize,
        source: &mut dyn ChangeSource,
        dispatcher: &Dispatcher,
    ) -> Result<()> {
        let name = entity_type.name();
        if let Some(handle) = self.handles.get_mut(name) {
            if handle.scope == *scope {
                handle.refs = refs;
                return Ok(());
            }
            tracing::debug!(
                entity_type = name,
                from = %handle.scope,
                to = %scope,
                "scope changed, replacing change channels"
            );
            self.release(name, source);
        }

        if self.unavailable.get(name) == Some(scope) {
            return Ok(());
        }
        self.unavailable.remove(name);

        let mut tokens = Vec::with_capacity(ChangeOperation::ALL.len());
        for operation in ChangeOperation::ALL {
            let request = ChannelRequest::new(entity_type, operation, scope.clone());
            match source.open(&request, dispatcher.clone()) {
                Ok(token) => tokens.push(token),
                Err(err) => {
                    for token in tokens {
                        source.close(token);
                    }
                    self.unavailable.insert(name.to_string(), scope.clone());
                    let message = match err {
                        Error::ChannelUnavailable { message, .. } => message,
                        other => other.to_string(),
                    };
                    tracing::debug!(
                        entity_type = name,
                        scope = %scope,
                        operation = operation.as_str(),
                        error = %message,
                        "change channel setup failed"
                    );
                    return Err(Error::channel_unavailable(name, message));
                }
            }
        }

        tracing::debug!(entity_type = name, scope = %scope, refs, "opened change channels");
        self.handles.insert(
            name.to_string(),
            ChannelHandle {
                scope: scope.clone(),
                tokens,
                refs,
            },
        );
        Ok(())
    }

    /// Tears down the handle of an entity type.
    ///
    /// Returns true if a handle was open.
    pub fn release(&mut self, entity_type: &str, source: &mut dyn ChangeSource) -> bool {
        match self.handles.remove(entity_type) {
            Some(handle) => {
                for token in handle.tokens {
                    source.close(token);
                }
                tracing::debug!(entity_type, scope = %handle.scope, "closed change channels");
                true
            }
            None => false,
        }
    }

    /// Reconciles the open handles with `demand`.
    ///
    /// Returns the setup failures, which the caller forwards to the dispatcher.
    pub fn sync(
        &mut self,
        demand: &Demand,
        source: &mut dyn ChangeSource,
        dispatcher: &Dispatcher,
    ) -> Vec<Error> {
        let stale: Vec<String> = self
            .handles
            .keys()
            .filter(|name| demand.scope(name).is_none())
            .cloned()
            .collect();
        for name in stale {
            self.release(&name, source);
        }
        self.unavailable
            .retain(|name, scope| demand.scope(name) == Some(&*scope));

        let mut errors = Vec::new();
        for entry in demand.entries.values() {
            if let Err(err) = self.ensure(&entry.entity_type, &entry.scope, entry.refs, source, dispatcher) {
                errors.push(err);
            }
        }
        errors
    }

    /// Closes every handle.
    pub fn close_all(&mut self, source: &mut dyn ChangeSource) {
        let names: Vec<String> = self.handles.keys().cloned().collect();
        for name in names {
            self.release(&name, source);
        }
        self.unavailable.clear();
    }

    /// Returns the open handles as `(entity type, scope)` pairs.
    pub fn open_channels(&self) -> Vec<(String, Scope)> {
        self.handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.scope.clone()))
            .collect()
    }

    /// Returns the pairs whose setup failed.
    pub fn unavailable_channels(&self) -> Vec<(String, Scope)> {
        self.unavailable
            .iter()
            .map(|(name, scope)| (name.clone(), scope.clone()))
            .collect()
    }

    /// Returns the number of queries holding an entity type's handle.
    pub fn refs(&self, entity_type: &str) -> usize {
        self.handles.get(entity_type).map_or(0, |h| h.refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use core::cell::RefCell;
    use sluice_core::schema::EntityTypeBuilder;
    use sluice_core::{Entity, FieldType};

    #[derive(Default)]
    struct FakeSource {
        next: ChannelToken,
        open: Vec<(ChannelToken, ChannelRequest)>,
        fail_type: Option<String>,
    }

    impl ChangeSource for FakeSource {
        fn open(&mut self, request: &ChannelRequest, _dispatcher: Dispatcher) -> Result<ChannelToken> {
            if self.fail_type.as_deref() == Some(request.entity_type.as_str())
                && request.operation == ChangeOperation::Update
            {
                return Err(Error::channel_unavailable(&request.entity_type, "refused"));
            }
            self.next += 1;
            self.open.push((self.next, request.clone()));
            Ok(self.next)
        }

        fn close(&mut self, token: ChannelToken) {
            self.open.retain(|(t, _)| *t != token);
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: RefCell<Vec<ChangeEvent>>,
        errors: RefCell<Vec<Error>>,
    }

    impl ChangeSink for RecordingSink {
        fn on_change(&self, event: ChangeEvent) {
            self.events.borrow_mut().push(event);
        }

        fn on_channel_error(&self, error: Error) {
            self.errors.borrow_mut().push(error);
        }
    }

    fn entity_type(name: &str, owner_scoped: bool) -> Rc<EntityType> {
        Rc::new(
            EntityTypeBuilder::new(name)
                .unwrap()
                .add_field("id", FieldType::String)
                .unwrap()
                .add_field("owner", FieldType::String)
                .unwrap()
                .primary_key("id")
                .unwrap()
                .owner_scoped(owner_scoped)
                .build()
                .unwrap(),
        )
    }

    fn dispatcher(sink: &Rc<RecordingSink>) -> Dispatcher {
        let weak: Weak<RecordingSink> = Rc::downgrade(sink);
        Dispatcher::new(weak)
    }

    #[test]
    fn test_scope_rules() {
        let todo = entity_type("Todo", true);
        let user = entity_type("User", false);
        assert_eq!(Scope::for_entity_type(&todo, None), None);
        assert_eq!(
            Scope::for_entity_type(&todo, Some("u1")),
            Some(Scope::Owner("u1".into()))
        );
        assert_eq!(Scope::for_entity_type(&user, Some("u1")), Some(Scope::Unscoped));

        let owner = Scope::Owner("u1".into());
        assert_eq!(owner.clone().merge(owner.clone()), owner);
        assert_eq!(owner.merge(Scope::Owner("u2".into())), Scope::Unscoped);
    }

    #[test]
    fn test_subscription_documents() {
        let todo = entity_type("Todo", true);
        let request = ChannelRequest::new(&todo, ChangeOperation::Create, Scope::Owner("u1".into()));
        assert_eq!(
            request.document,
            "subscription OnCreateTodo { onCreateTodo(owner: \"u1\") { id owner } }"
        );
        let request = ChannelRequest::new(&todo, ChangeOperation::Delete, Scope::Unscoped);
        assert_eq!(request.document, "subscription OnDeleteTodo { onDeleteTodo { id owner } }");
    }

    #[test]
    fn test_sync_opens_and_closes_by_demand() {
        let sink = Rc::new(RecordingSink::default());
        let dispatcher = dispatcher(&sink);
        let mut source = FakeSource::default();
        let mut manager = ChannelManager::new();
        let todo = entity_type("Todo", false);

        let mut demand = Demand::new();
        demand.add(&todo, Scope::Unscoped);
        demand.add(&todo, Scope::Unscoped);
        assert!(manager.sync(&demand, &mut source, &dispatcher).is_empty());
        assert_eq!(source.open.len(), 3);
        assert_eq!(manager.refs("Todo"), 2);

        // Same demand again reuses the handle.
        assert!(manager.sync(&demand, &mut source, &dispatcher).is_empty());
        assert_eq!(source.open.len(), 3);

        manager.sync(&Demand::new(), &mut source, &dispatcher);
        assert!(source.open.is_empty());
        assert!(manager.open_channels().is_empty());
    }

    #[test]
    fn test_scope_change_replaces_only_affected_handles() {
        let sink = Rc::new(RecordingSink::default());
        let dispatcher = dispatcher(&sink);
        let mut source = FakeSource::default();
        let mut manager = ChannelManager::new();
        let todo = entity_type("Todo", true);
        let user = entity_type("User", false);

        let mut demand = Demand::new();
        demand.add(&todo, Scope::Owner("u1".into()));
        demand.add(&user, Scope::Unscoped);
        manager.sync(&demand, &mut source, &dispatcher);
        let user_tokens: Vec<ChannelToken> = source
            .open
            .iter()
            .filter(|(_, r)| r.entity_type == "User")
            .map(|(t, _)| *t)
            .collect();

        let mut demand = Demand::new();
        demand.add(&todo, Scope::Owner("u2".into()));
        demand.add(&user, Scope::Unscoped);
        manager.sync(&demand, &mut source, &dispatcher);

        assert_eq!(source.open.len(), 6);
        assert!(source
            .open
            .iter()
            .filter(|(_, r)| r.entity_type == "Todo")
            .all(|(_, r)| r.scope == Scope::Owner("u2".into())));
        let user_after: Vec<ChannelToken> = source
            .open
            .iter()
            .filter(|(_, r)| r.entity_type == "User")
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(user_tokens, user_after);
    }

    #[test]
    fn test_failed_setup_is_reported_once() {
        let sink = Rc::new(RecordingSink::default());
        let dispatcher = dispatcher(&sink);
        let mut source = FakeSource {
            fail_type: Some("Todo".into()),
            ..FakeSource::default()
        };
        let mut manager = ChannelManager::new();
        let todo = entity_type("Todo", false);
        let mut demand = Demand::new();
        demand.add(&todo, Scope::Unscoped);

        let errors = manager.sync(&demand, &mut source, &dispatcher);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::ChannelUnavailable { .. }));
        assert!(source.open.is_empty());
        assert_eq!(manager.unavailable_channels(), vec![(String::from("Todo"), Scope::Unscoped)]);

        assert!(manager.sync(&demand, &mut source, &dispatcher).is_empty());

        // Dropping the demand forgets the failure, so the next demand retries.
        manager.sync(&Demand::new(), &mut source, &dispatcher);
        assert!(manager.unavailable_channels().is_empty());
        source.fail_type = None;
        assert!(manager.sync(&demand, &mut source, &dispatcher).is_empty());
        assert_eq!(manager.open_channels(), vec![(String::from("Todo"), Scope::Unscoped)]);
    }

    #[test]
    fn test_dispatcher_forwards_until_sink_dropped() {
        let sink = Rc::new(RecordingSink::default());
        let dispatcher = dispatcher(&sink);
        dispatcher.dispatch(ChangeEvent::create("Todo", Entity::new().with("id", "1")));
        dispatcher.fail(Error::channel_unavailable("Todo", "closed"));
        assert_eq!(sink.events.borrow().len(), 1);
        assert_eq!(sink.errors.borrow().len(), 1);

        drop(sink);
        assert!(dispatcher.is_closed());
        dispatcher.dispatch(ChangeEvent::create("Todo", Entity::new().with("id", "2")));
    }
}
