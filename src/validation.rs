use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use futures_timer::Delay;

use crate::controller::{
    FieldKey, FormController, FormError, FormResult, ValidationTicket, read_lock, write_lock,
};
use crate::subscription::SubscriptionKey;

pub trait ValidationError: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn message(&self) -> &str;
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ValidationScope {
    Form,
    Field(FieldKey),
}

#[derive(Clone, Debug)]
pub struct ValidationRequest<V> {
    pub values: BTreeMap<FieldKey, V>,
    pub field: Option<(FieldKey, Option<V>)>,
}

pub type ErrorMap<E> = BTreeMap<FieldKey, Vec<E>>;

pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type ValidatorResult<E> = Result<ErrorMap<E>, CallbackError>;

pub type SubmitResult = Result<(), CallbackError>;

#[derive(Clone, Debug)]
pub struct Submission<V, E> {
    pub values: BTreeMap<FieldKey, V>,
    pub report: ErrorMap<E>,
}

pub trait FormValidator<V, E>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    type Fut: Future<Output = ValidatorResult<E>> + Send + 'static;

    fn validate(&self, request: ValidationRequest<V>) -> Self::Fut;
}

impl<V, E, F, Fut> FormValidator<V, E> for F
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
    F: Fn(ValidationRequest<V>) -> Fut + Send + Sync,
    Fut: Future<Output = ValidatorResult<E>> + Send + 'static,
{
    type Fut = Fut;

    fn validate(&self, request: ValidationRequest<V>) -> Self::Fut {
        (self)(request)
    }
}

pub trait SubmitHandler<V, E>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    type Fut: Future<Output = SubmitResult> + Send + 'static;

    fn submit(&self, submission: Submission<V, E>) -> Self::Fut;
}

impl<V, E, F, Fut> SubmitHandler<V, E> for F
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
    F: Fn(Submission<V, E>) -> Fut + Send + Sync,
    Fut: Future<Output = SubmitResult> + Send + 'static,
{
    type Fut = Fut;

    fn submit(&self, submission: Submission<V, E>) -> Self::Fut {
        (self)(submission)
    }
}

pub(crate) enum PassOutcome<E> {
    Resolved(ErrorMap<E>),
    Superseded,
}

impl<V, E> FormController<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    pub async fn change(&self, name: impl Into<FieldKey>, value: V) -> FormResult<()> {
        let key = name.into();
        self.set_value(key.clone(), value)?;
        if self.options.validate_on_change {
            let _ = self
                .run_validation(ValidationScope::Field(key), self.options.change_debounce)
                .await?;
        }
        Ok(())
    }

    pub async fn leave(&self, name: impl Into<FieldKey>) -> FormResult<()> {
        let key = name.into();
        let left = {
            let mut state = write_lock(&self.state, "leaving field")?;
            let record = state
                .fields
                .get_mut(&key)
                .ok_or_else(|| FormError::UnknownField(key.clone()))?;
            if record.active {
                record.active = false;
                true
            } else {
                false
            }
        };
        if left {
            self.notify_field(&key);
            if self.options.validate_on_blur {
                let _ = self
                    .run_validation(ValidationScope::Field(key), Duration::ZERO)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn validate_field(&self, name: impl Into<FieldKey>) -> FormResult<bool> {
        let key = name.into();
        let _ = self
            .run_validation(ValidationScope::Field(key.clone()), Duration::ZERO)
            .await?;
        Ok(read_lock(&self.state, "reading field validity")?
            .fields
            .get(&key)
            .is_none_or(|record| record.errors.is_empty()))
    }

    pub async fn validate_form(&self) -> FormResult<bool> {
        let _ = self
            .run_validation(ValidationScope::Form, Duration::ZERO)
            .await?;
        self.is_valid()
    }

    pub(crate) async fn run_validation(
        &self,
        scope: ValidationScope,
        debounce: Duration,
    ) -> FormResult<PassOutcome<E>> {
        let (ticket, request, covered, marked) = {
            let mut state = write_lock(&self.state, "starting validation pass")?;
            if let ValidationScope::Field(key) = &scope {
                if !state.fields.contains_key(key) {
                    return Err(FormError::UnknownField(key.clone()));
                }
            }
            let next = ValidationTicket(
                state
                    .tickets
                    .get(&scope)
                    .copied()
                    .unwrap_or(ValidationTicket(0))
                    .0
                    + 1,
            );
            state.tickets.insert(scope.clone(), next);

            let covered: Vec<FieldKey> = match &scope {
                ValidationScope::Form => state.fields.keys().cloned().collect(),
                ValidationScope::Field(key) => vec![key.clone()],
            };
            let mut marked = Vec::new();
            for key in &covered {
                if let Some(record) = state.fields.get_mut(key) {
                    if !record.validating {
                        record.validating = true;
                        marked.push(key.clone());
                    }
                }
            }

            let field = match &scope {
                ValidationScope::Field(key) => Some((
                    key.clone(),
                    state.fields.get(key).and_then(|record| record.value.clone()),
                )),
                ValidationScope::Form => None,
            };
            let request = ValidationRequest {
                values: state.set_values(),
                field,
            };
            (next, request, covered, marked)
        };
        for key in &marked {
            self.subscribers.notify(&SubscriptionKey::Field(key.clone()));
        }
        if !marked.is_empty() {
            self.subscribers.notify(&SubscriptionKey::Form);
        }

        if !debounce.is_zero() {
            Delay::new(debounce).await;
            if !self.is_latest_ticket(&scope, ticket)? {
                log::trace!("debounced validation pass superseded before running ({scope:?})");
                return Ok(PassOutcome::Superseded);
            }
        }

        log::trace!("validation pass {ticket:?} started ({scope:?})");
        match (self.validator)(request).await {
            Ok(report) => self.finish_validation(scope, ticket, covered, report),
            Err(error) => {
                let cleared = {
                    let mut state = write_lock(&self.state, "recording validation failure")?;
                    if state.tickets.get(&scope).copied() == Some(ticket) {
                        let mut cleared = Vec::new();
                        for key in &covered {
                            if let Some(record) = state.fields.get_mut(key) {
                                if record.validating {
                                    record.validating = false;
                                    cleared.push(key.clone());
                                }
                            }
                        }
                        cleared
                    } else {
                        Vec::new()
                    }
                };
                for key in &cleared {
                    self.subscribers.notify(&SubscriptionKey::Field(key.clone()));
                }
                if !cleared.is_empty() {
                    self.subscribers.notify(&SubscriptionKey::Form);
                }
                Err(FormError::ValidatorFailed(error.to_string()))
            }
        }
    }

    fn finish_validation(
        &self,
        scope: ValidationScope,
        ticket: ValidationTicket,
        covered: Vec<FieldKey>,
        report: ErrorMap<E>,
    ) -> FormResult<PassOutcome<E>> {
        let mut merged = report.clone();
        let changed = {
            let mut state = write_lock(&self.state, "finishing validation pass")?;
            if state.tickets.get(&scope).copied() != Some(ticket) {
                log::debug!("discarding superseded validation result {ticket:?} ({scope:?})");
                return Ok(PassOutcome::Superseded);
            }
            let mut changed = Vec::new();
            match &scope {
                ValidationScope::Field(key) => {
                    let errors = merged.remove(key).unwrap_or_default();
                    if !merged.is_empty() {
                        log::debug!(
                            "dropping {} out-of-scope entries from field-scoped result for \"{key}\"",
                            merged.len()
                        );
                    }
                    if let Some(record) = state.fields.get_mut(key) {
                        record.validating = false;
                        record.errors = errors;
                        changed.push(key.clone());
                    } else {
                        log::debug!("field \"{key}\" deregistered mid-validation, result dropped");
                    }
                }
                ValidationScope::Form => {
                    for key in &covered {
                        if let Some(record) = state.fields.get_mut(key) {
                            record.validating = false;
                            record.errors = merged.remove(key).unwrap_or_default();
                            changed.push(key.clone());
                        }
                    }
                    // Fields registered after the pass started keep their state;
                    // entries for fields no longer registered are inapplicable.
                    if !merged.is_empty() {
                        log::debug!(
                            "dropping {} entries for fields outside the resolved form pass",
                            merged.len()
                        );
                    }
                }
            }
            changed
        };
        for key in &changed {
            self.subscribers.notify(&SubscriptionKey::Field(key.clone()));
        }
        if !changed.is_empty() {
            self.subscribers.notify(&SubscriptionKey::Form);
        }
        Ok(PassOutcome::Resolved(report))
    }

    fn is_latest_ticket(&self, scope: &ValidationScope, ticket: ValidationTicket) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking latest validation ticket")?
            .tickets
            .get(scope)
            .copied()
            == Some(ticket))
    }
}
