use super::GENERATED_KEY_LEN;

/// Source of keys for redirects created without one.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Random ids from nanoid's URL-safe alphabet (`A-Za-z0-9_-`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NanoIdGenerator;

impl IdGenerator for NanoIdGenerator {
    fn generate(&self) -> String {
        nanoid::nanoid!(GENERATED_KEY_LEN)
    }
}
