//! Identifier registries for resource class and trait names.

pub mod catalog;
pub mod sync;

pub use catalog::{
    is_standard_resource_class, is_standard_trait, standard_resource_class_id,
    STANDARD_RESOURCE_CLASSES, STANDARD_TRAITS,
};
pub use sync::StandardSync;
