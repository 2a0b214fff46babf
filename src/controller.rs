use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::subscription::{SubscriberRegistry, Subscription, SubscriptionKey};
use crate::validation::{
    CallbackError, ErrorMap, FormValidator, PassOutcome, Submission, SubmitHandler,
    ValidationError, ValidationRequest, ValidationScope,
};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(Arc<str>);

impl FieldKey {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&FieldKey> for FieldKey {
    fn from(value: &FieldKey) -> Self {
        value.clone()
    }
}

impl Borrow<str> for FieldKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormOptions {
    pub validate_on_change: bool,
    pub validate_on_blur: bool,
    pub change_debounce: std::time::Duration,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_on_change: true,
            validate_on_blur: false,
            change_debounce: std::time::Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldRecord<V, E> {
    pub value: Option<V>,
    pub initial_value: Option<V>,
    pub dirty: bool,
    pub visited: bool,
    pub active: bool,
    pub validating: bool,
    pub errors: Vec<E>,
}

impl<V, E> FieldRecord<V, E>
where
    V: Clone,
{
    pub(crate) fn new(initial_value: Option<V>) -> Self {
        Self {
            value: initial_value.clone(),
            initial_value,
            dirty: false,
            visited: false,
            active: false,
            validating: false,
            errors: Vec::new(),
        }
    }

    pub(crate) fn restore_initial(&mut self) {
        self.value = self.initial_value.clone();
        self.dirty = false;
        self.visited = false;
        self.active = false;
        self.validating = false;
        self.errors.clear();
    }
}

#[derive(Clone, Debug)]
pub struct FormSnapshot<V, E> {
    pub values: BTreeMap<FieldKey, V>,
    pub fields: BTreeMap<FieldKey, FieldRecord<V, E>>,
    pub submit_state: SubmitState,
    pub submit_count: u32,
    pub is_dirty: bool,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    UnknownField(FieldKey),
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    AlreadySubmitting,
    ValidatorFailed(String),
    SubmitFailed(String),
    DraftLoadFailed(String),
    DraftSaveFailed(String),
    DraftClearFailed(String),
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::UnknownField(key) => {
                write!(f, "field \"{key}\" is not registered on this form")
            }
            FormError::InvalidStateTransition { from, to } => {
                write!(f, "invalid submit state transition: {from:?} -> {to:?}")
            }
            FormError::AlreadySubmitting => f.write_str("form submit is already in progress"),
            FormError::ValidatorFailed(error) => write!(f, "validation function failed: {error}"),
            FormError::SubmitFailed(error) => write!(f, "submit function failed: {error}"),
            FormError::DraftLoadFailed(error) => write!(f, "failed to load draft: {error}"),
            FormError::DraftSaveFailed(error) => write!(f, "failed to save draft: {error}"),
            FormError::DraftClearFailed(error) => write!(f, "failed to clear draft: {error}"),
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

pub(crate) type ValidatorFn<V, E> = Arc<
    dyn Fn(
            ValidationRequest<V>,
        )
            -> Pin<Box<dyn Future<Output = Result<ErrorMap<E>, CallbackError>> + Send + 'static>>
        + Send
        + Sync,
>;
pub(crate) type SubmitFn<V, E> = Arc<
    dyn Fn(Submission<V, E>) -> Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send + 'static>>
        + Send
        + Sync,
>;

pub(crate) struct FormState<V, E> {
    pub(crate) id: FormId,
    pub(crate) fields: BTreeMap<FieldKey, FieldRecord<V, E>>,
    pub(crate) submit_state: SubmitState,
    pub(crate) submit_count: u32,
    pub(crate) tickets: BTreeMap<ValidationScope, ValidationTicket>,
}

impl<V, E> FormState<V, E>
where
    V: Clone,
{
    pub(crate) fn set_values(&self) -> BTreeMap<FieldKey, V> {
        self.fields
            .iter()
            .filter_map(|(key, record)| record.value.clone().map(|value| (key.clone(), value)))
            .collect()
    }
}

#[derive(Clone)]
pub struct FormController<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    pub(crate) options: FormOptions,
    pub(crate) state: Arc<RwLock<FormState<V, E>>>,
    pub(crate) subscribers: SubscriberRegistry,
    pub(crate) validator: ValidatorFn<V, E>,
    pub(crate) on_submit: SubmitFn<V, E>,
}

impl<V, E> FormController<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    pub fn new<Val, Sub>(validator: Val, on_submit: Sub, options: FormOptions) -> Self
    where
        Val: FormValidator<V, E> + 'static,
        Sub: SubmitHandler<V, E> + 'static,
    {
        let validator = Arc::new(validator);
        let validator: ValidatorFn<V, E> =
            Arc::new(move |request| Box::pin(validator.validate(request)));
        let on_submit = Arc::new(on_submit);
        let on_submit: SubmitFn<V, E> =
            Arc::new(move |submission| Box::pin(on_submit.submit(submission)));
        Self {
            options,
            state: Arc::new(RwLock::new(FormState {
                id: FormId::next(),
                fields: BTreeMap::new(),
                submit_state: SubmitState::Idle,
                submit_count: 0,
                tickets: BTreeMap::new(),
            })),
            subscribers: SubscriberRegistry::new(),
            validator,
            on_submit,
        }
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.state, "reading form id")?.id)
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn register(
        &self,
        name: impl Into<FieldKey>,
        initial_value: Option<V>,
    ) -> FormResult<FieldRecord<V, E>> {
        let key = name.into();
        let (record, inserted) = {
            let mut state = write_lock(&self.state, "registering field")?;
            match state.fields.entry(key.clone()) {
                Entry::Occupied(entry) => (entry.get().clone(), false),
                Entry::Vacant(entry) => (entry.insert(FieldRecord::new(initial_value)).clone(), true),
            }
        };
        if inserted {
            self.subscribers.notify(&SubscriptionKey::Form);
        }
        Ok(record)
    }

    pub fn deregister(&self, name: impl Into<FieldKey>) -> FormResult<()> {
        let key = name.into();
        let removed = {
            let mut state = write_lock(&self.state, "deregistering field")?;
            let removed = state.fields.remove(&key).is_some();
            if removed {
                // Orphans any in-flight pass targeting the field.
                state.tickets.remove(&ValidationScope::Field(key.clone()));
            }
            removed
        };
        if removed {
            self.subscribers.drop_key(&SubscriptionKey::Field(key));
            self.subscribers.notify(&SubscriptionKey::Form);
        }
        Ok(())
    }

    pub fn set_value(&self, name: impl Into<FieldKey>, value: V) -> FormResult<()> {
        let key = name.into();
        {
            let mut state = write_lock(&self.state, "writing field value")?;
            let record = state
                .fields
                .get_mut(&key)
                .ok_or_else(|| FormError::UnknownField(key.clone()))?;
            record.value = Some(value);
            record.dirty = true;
        }
        self.notify_field(&key);
        Ok(())
    }

    pub fn enter(&self, name: impl Into<FieldKey>) -> FormResult<()> {
        let key = name.into();
        let entered = {
            let mut state = write_lock(&self.state, "entering field")?;
            let record = state
                .fields
                .get_mut(&key)
                .ok_or_else(|| FormError::UnknownField(key.clone()))?;
            if record.active {
                false
            } else {
                record.active = true;
                record.visited = true;
                true
            }
        };
        if entered {
            self.notify_field(&key);
        }
        Ok(())
    }

    pub fn field_record(&self, name: impl Into<FieldKey>) -> FormResult<Option<FieldRecord<V, E>>> {
        let key = name.into();
        Ok(read_lock(&self.state, "reading field record")?
            .fields
            .get(&key)
            .cloned())
    }

    pub fn values(&self) -> FormResult<BTreeMap<FieldKey, V>> {
        Ok(read_lock(&self.state, "reading form values")?.set_values())
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "reading form validity")?
            .fields
            .values()
            .all(|record| record.errors.is_empty()))
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot<V, E>> {
        let state = read_lock(&self.state, "creating form snapshot")?;
        Ok(FormSnapshot {
            values: state.set_values(),
            fields: state.fields.clone(),
            submit_state: state.submit_state,
            submit_count: state.submit_count,
            is_dirty: state.fields.values().any(|record| record.dirty),
            is_valid: state.fields.values().all(|record| record.errors.is_empty()),
        })
    }

    pub fn reset_field(&self, name: impl Into<FieldKey>) -> FormResult<()> {
        let key = name.into();
        {
            let mut state = write_lock(&self.state, "resetting field")?;
            let record = state
                .fields
                .get_mut(&key)
                .ok_or_else(|| FormError::UnknownField(key.clone()))?;
            record.restore_initial();
            state.tickets.remove(&ValidationScope::Field(key.clone()));
        }
        self.notify_field(&key);
        Ok(())
    }

    pub fn reset(&self) -> FormResult<()> {
        let keys = {
            let mut state = write_lock(&self.state, "resetting form")?;
            state.submit_state = SubmitState::Idle;
            state.tickets.clear();
            for record in state.fields.values_mut() {
                record.restore_initial();
            }
            state.fields.keys().cloned().collect::<Vec<_>>()
        };
        for key in &keys {
            self.subscribers.notify(&SubscriptionKey::Field(key.clone()));
        }
        self.subscribers.notify(&SubscriptionKey::Form);
        Ok(())
    }

    pub fn subscribe_field(
        &self,
        name: impl Into<FieldKey>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribers
            .subscribe(SubscriptionKey::Field(name.into()), listener)
    }

    pub fn subscribe_form(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(SubscriptionKey::Form, listener)
    }

    pub async fn submit(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.submit_state == SubmitState::Submitting {
                return Err(FormError::AlreadySubmitting);
            }
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submit_count = state.submit_count.saturating_add(1);
        }
        self.subscribers.notify(&SubscriptionKey::Form);

        let outcome = match self
            .run_validation(ValidationScope::Form, std::time::Duration::ZERO)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                let mut state = write_lock(&self.state, "recording validator failure")?;
                transition_submit_state(&mut state, SubmitState::Failed)?;
                drop(state);
                self.subscribers.notify(&SubscriptionKey::Form);
                return Err(error);
            }
        };

        let report = match outcome {
            PassOutcome::Superseded => {
                log::debug!("submit abandoned: its validation pass was superseded");
                return Ok(());
            }
            PassOutcome::Resolved(report) => report,
        };

        let (is_valid, values) = {
            let state = read_lock(&self.state, "reading submit snapshot")?;
            let is_valid = state.fields.values().all(|record| record.errors.is_empty());
            (is_valid, state.set_values())
        };

        if !is_valid {
            let mut state = write_lock(&self.state, "handling submit validation failure")?;
            transition_submit_state(&mut state, SubmitState::Failed)?;
            drop(state);
            self.subscribers.notify(&SubscriptionKey::Form);
            return Ok(());
        }

        {
            let mut state = write_lock(&self.state, "moving submit state to submitting")?;
            if state.submit_state == SubmitState::Submitting {
                return Err(FormError::AlreadySubmitting);
            }
            transition_submit_state(&mut state, SubmitState::Submitting)?;
        }
        self.subscribers.notify(&SubscriptionKey::Form);

        let submit_result = (self.on_submit)(Submission { values, report }).await;

        let mut state = write_lock(&self.state, "completing submit")?;
        match submit_result {
            Ok(()) => {
                transition_submit_state(&mut state, SubmitState::Succeeded)?;
                drop(state);
                self.subscribers.notify(&SubscriptionKey::Form);
                Ok(())
            }
            Err(error) => {
                transition_submit_state(&mut state, SubmitState::Failed)?;
                drop(state);
                self.subscribers.notify(&SubscriptionKey::Form);
                Err(FormError::SubmitFailed(error.to_string()))
            }
        }
    }

    pub(crate) fn notify_field(&self, key: &FieldKey) {
        self.subscribers.notify(&SubscriptionKey::Field(key.clone()));
        self.subscribers.notify(&SubscriptionKey::Form);
    }
}

pub(crate) fn transition_submit_state<V, E>(
    state: &mut FormState<V, E>,
    next: SubmitState,
) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
