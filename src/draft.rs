use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use crate::controller::{
    FieldKey, FormController, FormError, FormId, FormResult, SubmitState, read_lock, write_lock,
};
use crate::subscription::SubscriptionKey;
use crate::validation::ValidationError;

pub trait FormDraftStore<V>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn save(&self, form_id: FormId, values: &BTreeMap<FieldKey, V>) -> Result<(), Self::Error>;
    fn load(&self, form_id: FormId) -> Result<Option<BTreeMap<FieldKey, V>>, Self::Error>;
    fn clear(&self, form_id: FormId) -> Result<(), Self::Error>;
}

#[derive(Clone)]
pub struct InMemoryDraftStore<V> {
    state: Arc<RwLock<BTreeMap<FormId, BTreeMap<FieldKey, V>>>>,
}

impl<V> InMemoryDraftStore<V> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl<V> Default for InMemoryDraftStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FormDraftStore<V> for InMemoryDraftStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Error = Infallible;

    fn save(&self, form_id: FormId, values: &BTreeMap<FieldKey, V>) -> Result<(), Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.insert(form_id, values.clone());
        Ok(())
    }

    fn load(&self, form_id: FormId) -> Result<Option<BTreeMap<FieldKey, V>>, Self::Error> {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(state.get(&form_id).cloned())
    }

    fn clear(&self, form_id: FormId) -> Result<(), Self::Error> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.remove(&form_id);
        Ok(())
    }
}

impl<V, E> FormController<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: ValidationError,
{
    pub fn save_draft<S>(&self, store: &S) -> FormResult<()>
    where
        S: FormDraftStore<V>,
    {
        let (form_id, values) = {
            let state = read_lock(&self.state, "saving draft")?;
            (state.id, state.set_values())
        };
        store
            .save(form_id, &values)
            .map_err(|error| FormError::DraftSaveFailed(error.to_string()))
    }

    pub fn load_draft<S>(&self, store: &S) -> FormResult<bool>
    where
        S: FormDraftStore<V>,
    {
        let form_id = self.form_id()?;
        let Some(draft) = store
            .load(form_id)
            .map_err(|error| FormError::DraftLoadFailed(error.to_string()))?
        else {
            return Ok(false);
        };

        let restored = {
            let mut state = write_lock(&self.state, "loading draft into form")?;
            state.submit_state = SubmitState::Idle;
            state.submit_count = 0;
            state.tickets.clear();
            let mut restored = Vec::new();
            for (key, value) in draft {
                let Some(record) = state.fields.get_mut(&key) else {
                    log::debug!("draft entry for unregistered field \"{key}\" dropped");
                    continue;
                };
                record.value = Some(value);
                record.dirty = true;
                record.validating = false;
                record.errors.clear();
                restored.push(key);
            }
            restored
        };
        for key in &restored {
            self.subscribers.notify(&SubscriptionKey::Field(key.clone()));
        }
        self.subscribers.notify(&SubscriptionKey::Form);
        Ok(true)
    }

    pub fn clear_draft<S>(&self, store: &S) -> FormResult<()>
    where
        S: FormDraftStore<V>,
    {
        let form_id = self.form_id()?;
        store
            .clear(form_id)
            .map_err(|error| FormError::DraftClearFailed(error.to_string()))
    }
}
