//! Core identifier types shared across the store, the object layer and the resolver.

/// Internal integer id of a resource provider row
pub type ProviderId = i64;

/// Internal integer id of a resource class row
pub type ResourceClassId = i64;

/// Internal integer id of a trait row
pub type TraitId = i64;

/// Internal integer id of an aggregate row
pub type AggregateId = i64;

/// Internal integer id of a consumer row
pub type ConsumerId = i64;

/// Internal integer id of an allocation row
pub type AllocationId = i64;

pub type ProjectId = i64;
pub type UserId = i64;
pub type ConsumerTypeId = i64;

/// Monotonic version counter carried by providers and consumers
pub type Generation = u64;

/// Trait marking a provider whose inventory is consumable from other trees
/// through aggregate co-membership.
pub const MISC_SHARES_VIA_AGGREGATE: &str = "MISC_SHARES_VIA_AGGREGATE";

/// Prefix required on every caller-defined resource class and trait name.
pub const CUSTOM_NAMESPACE: &str = "CUSTOM_";

/// First id handed to a custom resource class; standard classes sit below it.
pub const FIRST_CUSTOM_RESOURCE_CLASS_ID: ResourceClassId = 10000;

/// Consumer type recorded when the caller does not supply one.
pub const UNKNOWN_CONSUMER_TYPE: &str = "unknown";

/// Validate a custom (caller-defined) resource class or trait name.
///
/// Names must start with `CUSTOM_`, carry at least one character after the
/// prefix, and use only upper-case ASCII letters, digits and underscores.
pub fn is_valid_custom_name(name: &str) -> bool {
    match name.strip_prefix(CUSTOM_NAMESPACE) {
        Some(rest) => {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }
        None => false,
    }
}
