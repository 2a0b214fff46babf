mod controller;
mod draft;
mod field;
mod subscription;
mod validation;


pub use controller::{
    FieldKey, FieldRecord, FormController, FormError, FormId, FormOptions, FormResult,
    FormSnapshot, SubmitState, ValidationTicket,
};
pub use draft::{FormDraftStore, InMemoryDraftStore};
pub use field::FieldHandle;
pub use subscription::{Subscription, SubscriptionKey};
pub use validation::{
    CallbackError, ErrorMap, FormValidator, Submission, SubmitHandler, SubmitResult,
    ValidationError, ValidationRequest, ValidationScope, ValidatorResult,
};
