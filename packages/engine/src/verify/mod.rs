//! Certificate chain verification

mod callback;
mod context;
mod error;
mod hostname;
mod param;

pub use callback::{invoke_verify_callback, VerifyCallback};
pub use context::StoreContext;
pub use error::VerifyErrorCode;
pub use hostname::match_hostname;
pub use param::{MonoVerifyFlags, Purpose, VerifyFlags, VerifyParam};
