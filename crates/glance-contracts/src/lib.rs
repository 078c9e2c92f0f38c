pub mod error;
pub mod outcome;
pub mod providers;
pub mod request;
pub mod settings;

pub use error::DispatchError;
pub use outcome::{ChoicesEnvelope, NormalizedResponse, Outcome};
pub use providers::{Provider, ProviderConfig};
pub use request::{DispatchRequest, ImageSource};
pub use settings::{Settings, SettingsStore};
