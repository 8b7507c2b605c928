use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, error, warn};

use crate::error::CoreError;
use crate::harness::{CoreEnv, SystemCore};

/// Builds a configured core instance from the host environment.
pub type CoreConstructor = fn(&CoreEnv) -> Result<Box<dyn SystemCore>, CoreError>;
/// Cheap pre-construction check that a program can run on a core.
pub type ProgramTester = fn(&[u8]) -> bool;

/// A registered core: how to construct it, how to vet a program for it, and
/// the file extensions it claims.
#[derive(Clone)]
pub struct CoreDescriptor {
    pub name: &'static str,
    pub construct: CoreConstructor,
    pub validate: ProgramTester,
    pub extensions: &'static [&'static str],
}

/// Maps file extensions to candidate cores and mediates core selection.
///
/// `validate_program` narrows the registrations for one extension down to
/// the eligible list; `construct_core` builds one of them and remembers the
/// choice until the program is discarded.
pub struct CoreRegistry {
    registrations: HashMap<String, Vec<CoreDescriptor>>,
    eligible: Vec<CoreDescriptor>,
    current: Option<CoreDescriptor>,
    program_db: Option<serde_json::Value>,
}

impl Default for CoreRegistry {
    fn default() -> Self {
        CoreRegistry {
            registrations: HashMap::new(),
            eligible: Vec::new(),
            current: None,
            program_db: None,
        }
    }
}

impl CoreRegistry {
    /// An empty registry; hosts normally want
    /// [CoreRegistry::with_builtin_cores].
    pub fn new() -> Self {
        CoreRegistry::default()
    }

    /// A registry with every shipped core registered.
    pub fn with_builtin_cores() -> Self {
        let mut registry = CoreRegistry::new();
        for descriptor in crate::cores::builtin_core_descriptors() {
            registry.register_core(descriptor);
        }
        registry
    }

    /// Adds a core under each of its extensions. Registering the same core
    /// name twice for an extension is a no-op.
    pub fn register_core(&mut self, descriptor: CoreDescriptor) {
        for &extension in descriptor.extensions {
            let slot = self.registrations.entry(extension.to_string()).or_default();
            if slot.iter().any(|existing| existing.name == descriptor.name) {
                continue;
            }
            slot.push(descriptor.clone());
        }
    }

    /// Loads the optional JSON program database. A missing file is fine;
    /// only a present-but-unreadable one is reported.
    pub fn load_program_db(&mut self, db_path: Option<&Path>) {
        let Some(path) = db_path else { return };
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(json) => self.program_db = Some(json),
                Err(parse_error) => {
                    warn!("program DB '{}' is malformed: {}", path.display(), parse_error);
                }
            },
            Err(_) => debug!("no program DB at '{}'", path.display()),
        }
    }

    /// Database-driven validation by digest. The schema carries no entries
    /// yet, so this always defers to validation by type.
    fn validate_program_by_hash(&mut self, data: &[u8], extension: &str, _sha1: &str) -> bool {
        self.validate_program_by_type(data, extension)
    }

    fn validate_program_by_type(&mut self, data: &[u8], extension: &str) -> bool {
        let Some(candidates) = self.registrations.get(extension) else {
            warn!("unable to match program to an existing system variant");
            return false;
        };
        self.eligible = candidates
            .iter()
            .filter(|descriptor| (descriptor.validate)(data))
            .cloned()
            .collect();

        if self.eligible.is_empty() {
            warn!("program rejected by all eligible system variants");
            false
        } else {
            true
        }
    }

    /// Recomputes the eligible-cores list for a loaded program. Returns
    /// true when at least one core accepted it.
    pub fn validate_program(&mut self, data: &[u8], extension: &str, sha1: &str) -> bool {
        self.validate_program_by_hash(data, extension, sha1)
    }

    /// Constructs the eligible core at `index` (the first by default) and
    /// records it as current. Construction failure is logged and reported.
    pub fn construct_core(
        &mut self,
        index: usize,
        env: &CoreEnv,
    ) -> Result<Box<dyn SystemCore>, CoreError> {
        let Some(descriptor) = self.eligible.get(index).cloned() else {
            return Err(CoreError::EligibleIndexOutOfRange { index });
        };
        match (descriptor.construct)(env) {
            Ok(core) => {
                self.current = Some(descriptor);
                Ok(core)
            }
            Err(construct_error) => {
                error!(
                    "failed to construct the '{}' core: {}",
                    descriptor.name, construct_error
                );
                Err(CoreError::CoreConstructionFailed {
                    name: descriptor.name.to_string(),
                })
            }
        }
    }

    pub fn eligible_cores(&self) -> &[CoreDescriptor] {
        &self.eligible
    }

    pub fn current_core(&self) -> Option<&CoreDescriptor> {
        self.current.as_ref()
    }

    /// Clears both the eligibility list and the current selection; called
    /// when a program is discarded.
    pub fn clear_eligible_cores(&mut self) {
        self.eligible.clear();
        self.current = None;
    }

    pub fn clear_current_core(&mut self) {
        self.current = None;
    }
}
