//! Editor inputs and the immutable snapshots taken from them.
//!
//! A [`Snapshot`] is captured once per generation of checks, at the moment
//! the debounce timer fires. Front ends mutate a [`SharedInputs`] store and
//! then notify the scheduler; the scheduler reads it back through
//! [`SnapshotSource`].

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for an input/output example.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExampleId(Uuid);

impl ExampleId {
    /// Create a fresh example id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Short form used in logs and staged file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ExampleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExampleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One input/expected-output pair the definition must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    #[serde(default)]
    pub id: ExampleId,
    pub input: String,
    #[serde(alias = "output")]
    pub expected_output: String,
}

impl Example {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            id: ExampleId::new(),
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }

    /// An example only takes part in checking once both fields are filled in.
    pub fn is_active(&self) -> bool {
        !self.input.is_empty() && !self.expected_output.is_empty()
    }
}

/// Immutable input to one generation of checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub definition: String,
    #[serde(default)]
    pub semantics: String,
    #[serde(default)]
    pub examples: Vec<Example>,
}

impl Snapshot {
    pub fn new(definition: impl Into<String>, semantics: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            semantics: semantics.into(),
            examples: Vec::new(),
        }
    }

    pub fn with_example(mut self, example: Example) -> Self {
        self.examples.push(example);
        self
    }

    /// Examples with both fields populated, in editor order.
    pub fn active_examples(&self) -> impl Iterator<Item = &Example> {
        self.examples.iter().filter(|example| example.is_active())
    }
}

/// Anything the scheduler can take a consistent snapshot from.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> Snapshot;
}

/// Thread-safe editable inputs shared between a front end and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SharedInputs {
    inner: Arc<RwLock<Snapshot>>,
}

impl SharedInputs {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn set_definition(&self, definition: impl Into<String>) {
        let definition = definition.into();
        self.update(|s| s.definition = definition);
    }

    /// Append an example and return its id.
    pub fn push_example(&self, example: Example) -> ExampleId {
        let id = example.id;
        self.update(|s| s.examples.push(example));
        id
    }

    /// Edit an existing example in place. Returns `false` if the id is unknown.
    pub fn edit_example(
        &self,
        id: ExampleId,
        input: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> bool {
        let (input, expected_output) = (input.into(), expected_output.into());
        self.update(|s| match s.examples.iter_mut().find(|e| e.id == id) {
            Some(example) => {
                example.input = input;
                example.expected_output = expected_output;
                true
            }
            None => false,
        })
    }

    pub fn remove_example(&self, id: ExampleId) -> bool {
        self.update(|s| {
            let before = s.examples.len();
            s.examples.retain(|e| e.id != id);
            s.examples.len() != before
        })
    }

    /// Replace every input at once (used when a session file is reloaded).
    pub fn replace(&self, snapshot: Snapshot) {
        self.update(|s| *s = snapshot);
    }
}

impl SnapshotSource for SharedInputs {
    fn snapshot(&self) -> Snapshot {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
