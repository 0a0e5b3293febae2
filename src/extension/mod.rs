//! Pluggable OS extensions.
//!
//! A LogoVM program names its extension by a short string (`"LogoOS"`,
//! `"TurtleOS"`, ...) in the executable's extension-init blob, or the
//! host overrides it on the command line. The machine never hardcodes
//! which extensions exist; it asks a [`Registry`] to construct one by
//! name, then hands the result a `&mut Machine` whenever an interrupt
//! fires.

mod logo_os;
mod turtle_os;

pub use logo_os::LogoOs;
pub use turtle_os::TurtleOs;

use std::collections::HashMap;

use crate::error::OsError;
use crate::machine::Machine;

/// A host-provided OS extension. Implementations own whatever state an
/// interrupt handler needs (open files, a framebuffer, ...) and are
/// free to read and mutate the machine they're attached to.
pub trait Extension {
    /// Handle interrupt `slot`. Slots the extension does not recognize
    /// must be treated as no-ops, not errors, matching the "unfilled
    /// interrupt slots" invariant.
    fn handle_interrupt(&mut self, machine: &mut Machine, slot: u8) -> Result<(), crate::error::RuntimeError>;
}

/// Builds an extension from the raw extension-init blob embedded in an
/// executable (or `None` if the file carried no blob).
pub type Constructor = fn(init: Option<&[u8]>) -> Result<Box<dyn Extension>, OsError>;

/// Maps extension names to constructors. Built once at startup with
/// every extension the binary ships; the loaded program or a CLI flag
/// then picks one by name.
pub struct Registry {
    constructors: HashMap<&'static str, Constructor>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            constructors: HashMap::new(),
        }
    }

    /// The registry pre-populated with every extension this crate ships.
    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        registry.register("LogoOS", logo_os::construct);
        registry.register("TurtleOS", turtle_os::construct);
        registry
    }

    pub fn register(&mut self, name: &'static str, ctor: Constructor) {
        self.constructors.insert(name, ctor);
    }

    pub fn construct(
        &self,
        name: &str,
        init: Option<&[u8]>,
    ) -> Result<Box<dyn Extension>, OsError> {
        let ctor = self
            .constructors
            .get(name)
            .ok_or_else(|| OsError::UnknownExtension(name.to_string()))?;
        ctor(init)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_name_is_an_error() {
        let registry = Registry::with_builtins();
        assert!(matches!(
            registry.construct("NotAnExtension", None),
            Err(OsError::UnknownExtension(_))
        ));
    }

    #[test]
    fn builtin_extensions_construct_with_no_init_blob() {
        let registry = Registry::with_builtins();
        assert!(registry.construct("LogoOS", None).is_ok());
        assert!(registry.construct("TurtleOS", None).is_ok());
    }
}
