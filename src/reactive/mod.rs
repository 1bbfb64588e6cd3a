//! Reactive Query Engine (C5 dependency tracking + C6 stream layer),
//! wired together behind `ReactiveDataAccess`.

pub mod data_access;
pub mod dependency;
pub mod stream;

pub use data_access::{ReactiveDataAccess, ReactiveDataAccessOptions};
pub use dependency::{
    ChangeOperation, DatabaseChange, DependencyKind, DependencyStats, DependencyTracker, QuerySpec,
    RegistrationSpec, StreamDependency,
};
pub use stream::{ManagedStream, ReactiveStream, ReactiveStreamManager, ReactiveStreamOptions, StreamEvent};
