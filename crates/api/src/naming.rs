//! Identity allocator: decides the name a new object is created under.

use rulestore_core::{meta, ApiError, ApiResult};
use serde_json::Value as Json;

/// Length of the random part of a generated name.
pub const GENERATED_LEN: usize = rulestore_schema::GENERATED_SUFFIX_LEN;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// How the caller asked for the object to be named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// `metadata.name` was supplied and is used verbatim.
    Explicit(String),
    /// No name; generate one, optionally after `metadata.generateName`.
    Generated { prefix: String },
}

impl Identity {
    /// Read the requested identity from a candidate document.
    pub fn of(doc: &Json) -> Self {
        match meta::meta_non_empty(doc, meta::NAME) {
            Some(name) => Identity::Explicit(name.to_string()),
            None => Identity::Generated { prefix: meta::meta_str(doc, meta::GENERATE_NAME).unwrap_or("").to_string() },
        }
    }

    /// Name for the next attempt. Explicit names never change between attempts.
    pub fn candidate(&self) -> String {
        match self {
            Identity::Explicit(name) => name.clone(),
            Identity::Generated { prefix } => generate_name(prefix),
        }
    }

    pub fn is_generated(&self) -> bool { matches!(self, Identity::Generated { .. }) }
}

/// `prefix` followed by [`GENERATED_LEN`] lowercase base-36 characters drawn from a v4 UUID.
pub fn generate_name(prefix: &str) -> String {
    let mut n = uuid::Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(prefix.len() + GENERATED_LEN);
    out.push_str(prefix);
    for _ in 0..GENERATED_LEN {
        out.push(ALPHABET[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

/// Create through `attempt`, retrying generated names that collide. Explicit names get one try.
pub fn allocate<T>(identity: &Identity, retries: usize, kind: &str, mut attempt: impl FnMut(&str) -> ApiResult<T>) -> ApiResult<T> {
    let tries = if identity.is_generated() { retries.max(1) } else { 1 };
    for i in 0..tries {
        let name = identity.candidate();
        match attempt(&name) {
            Err(ApiError::AlreadyExists { key }) if identity.is_generated() => {
                metrics::counter!("name_collisions_total", 1u64);
                tracing::debug!(key = %key, attempt = i + 1, "naming: generated name collided; retrying");
            }
            other => return other,
        }
    }
    Err(ApiError::Internal(format!("unable to allocate a unique {} name after {} attempts", kind, tries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulestore_core::ObjectKey;
    use serde_json::json;

    #[test]
    fn generated_names_are_valid_and_distinct() {
        let a = generate_name("");
        let b = generate_name("");
        assert_eq!(a.len(), GENERATED_LEN);
        assert_ne!(a, b);
        assert!(a.bytes().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(rulestore_schema::validate_name(&a).is_none());
        assert!(generate_name("cpu-").starts_with("cpu-"));
        let longest = generate_name(&"p".repeat(rulestore_schema::MAX_GENERATE_NAME_LEN));
        assert!(rulestore_schema::validate_name(&longest).is_none(), "{}", longest);
    }

    #[test]
    fn identity_from_document() {
        assert_eq!(Identity::of(&json!({ "metadata": { "name": "r1" } })), Identity::Explicit("r1".into()));
        assert_eq!(Identity::of(&json!({ "metadata": { "name": "" } })), Identity::Generated { prefix: String::new() });
        assert_eq!(Identity::of(&json!({ "metadata": { "generateName": "p-" } })), Identity::Generated { prefix: "p-".into() });
    }

    #[test]
    fn generated_collisions_retry_then_give_up() {
        let id = Identity::Generated { prefix: String::new() };
        let taken = |name: &str| -> ApiResult<String> { Err(ApiError::AlreadyExists { key: ObjectKey::new("Folder", "default", name) }) };
        let mut calls = 0;
        let res = allocate(&id, 3, "Folder", |n| { calls += 1; taken(n) });
        assert_eq!(calls, 3);
        assert!(matches!(res, Err(ApiError::Internal(_))));

        let mut first = true;
        let ok = allocate(&id, 3, "Folder", |n| if std::mem::take(&mut first) { taken(n) } else { Ok(n.to_string()) }).unwrap();
        assert_eq!(ok.len(), GENERATED_LEN);
    }

    #[test]
    fn explicit_collision_is_reported() {
        let id = Identity::Explicit("dup".into());
        let res: ApiResult<()> = allocate(&id, 5, "Folder", |n| Err(ApiError::AlreadyExists { key: ObjectKey::new("Folder", "default", n) }));
        assert!(res.unwrap_err().is_already_exists());
    }
}
