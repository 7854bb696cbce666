//! # Handler Registry
//!
//! Fixed opcode→handler table built once at startup.
//!
//! Registration is an explicit, enumerable step: every opcode in the
//! direction's enumeration gets exactly one entry. Registering the same
//! opcode twice is a programmer error and panics at construction time.
//! Looking up an opcode with no entry is *not* an error - the dispatch site
//! logs a warning and ignores the packet.

use std::collections::HashMap;
use std::hash::Hash;

/// A closed lookup table from opcode to handler.
pub struct HandlerRegistry<O, H> {
    handlers: HashMap<O, H>,
}

impl<O: Copy + Eq + Hash + std::fmt::Debug, H> HandlerRegistry<O, H> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler for an opcode.
    ///
    /// # Panics
    ///
    /// Panics if the opcode already has a handler; the table is built once
    /// at process start and duplicates are a bug, not a runtime condition.
    pub fn register(&mut self, opcode: O, handler: H) {
        let previous = self.handlers.insert(opcode, handler);
        assert!(
            previous.is_none(),
            "duplicate handler registered for opcode {opcode:?}"
        );
    }

    /// Looks up the handler for an opcode, if one was registered.
    #[must_use]
    pub fn get(&self, opcode: O) -> Option<&H> {
        self.handlers.get(&opcode)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<O: Copy + Eq + Hash + std::fmt::Debug, H> Default for HandlerRegistry<O, H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientOpcode;

    #[test]
    fn lookup_hits_and_misses() {
        let mut registry: HandlerRegistry<ClientOpcode, u32> = HandlerRegistry::new();
        registry.register(ClientOpcode::Lobby, 7);

        assert_eq!(registry.get(ClientOpcode::Lobby), Some(&7));
        assert_eq!(registry.get(ClientOpcode::PlayerPosition), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[should_panic(expected = "duplicate handler")]
    fn duplicate_registration_panics() {
        let mut registry: HandlerRegistry<ClientOpcode, u32> = HandlerRegistry::new();
        registry.register(ClientOpcode::Lobby, 1);
        registry.register(ClientOpcode::Lobby, 2);
    }
}
