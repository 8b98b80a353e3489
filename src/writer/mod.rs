//! Write side of the pipeline
//!
//! - `document`: per-document skip/replace/upload/validate state machine
//! - `association`: second-pass relationship replication
//! - `destination`: rule-based destination folders
//! - `properties`: property transformation before every push
//! - `rollback`: delete-on-failure scope for partially written documents

pub mod association;
pub mod destination;
pub mod document;
pub mod properties;
pub mod rollback;

pub use association::{is_excluded_relation, AssociationSummary, AssociationWriter};
pub use destination::{DestinationResolver, FolderStructureRule};
pub use document::DocumentWriter;
pub use properties::PropertyTransform;
pub use rollback::RollbackScope;
