//! Building and loading PHOB protected script containers.
//!
//! - [`Builder`]: source tree → checked, sealed, tagged container
//! - [`LicenseValidator`]: version, integrity, expiry, device, revocation
//! - [`Loader`]: validate, decrypt, verify, hand off to an [`Executor`]
//! - [`Phob`]: a configured engine handle tying the three together

mod bootstrap;
mod builder;
mod engine;
mod error;
mod executor;
mod loader;
mod source;
mod syntax;
mod validator;

pub use builder::{BuildConfig, BuildReport, Builder, NoncePolicy, DEFAULT_ENTRY};
pub use engine::{Availability, EngineConfig, Inspection, Phob};
pub use error::{BuildError, LoadError, Stage};
pub use executor::{
    ExecReport, Executor, HandOff, ProcessExecutor, SourceBundle, DEFAULT_INTERPRETER,
};
pub use loader::{ExecutionOutcome, LoadSecrets, LoadState, Loader};
pub use source::{normalize_relative, SkipList, SourceFile, SourceTree};
pub use syntax::{ScriptSyntax, SourceCheck, SCRIPT_EXTENSIONS};
pub use validator::LicenseValidator;
