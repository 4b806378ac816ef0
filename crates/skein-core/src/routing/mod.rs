//! Topic routing: pattern grammar, matcher compilation and the binding
//! directory.

mod directory;
pub mod grammar;
mod matcher;

pub use directory::{Binding, BindingDirectory, BindingRecord, RouteMatch};
pub use grammar::{validate_pattern, validate_routing_key};
pub use matcher::TopicMatcher;
