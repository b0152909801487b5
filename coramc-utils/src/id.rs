use crate::GSym;

/// Represents an identifier in the source program: a signal name, a
/// variable, a resource prefix. Internally interned, so copies are cheap
/// and comparison is pointer equality.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    id: GSym,
}

impl Id {
    pub fn new<S: ToString>(id: S) -> Self {
        Self {
            id: GSym::new(id.to_string()),
        }
    }

    /// The interned string backing this identifier.
    pub fn as_str(&self) -> &'static str {
        self.id.as_str()
    }

    /// Derive a new identifier by appending `_` and a suffix, e.g. a
    /// signal name from a resource prefix: `memory_0` + `ready`.
    pub fn with_suffix(&self, suffix: &str) -> Id {
        Id::new(format!("{}_{}", self.id, suffix))
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id { id: GSym::from(s) }
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id { id: GSym::from(s) }
    }
}

impl PartialEq<str> for Id {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Id {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialEq<String> for Id {
    fn eq(&self, other: &String) -> bool {
        self.as_str() == other.as_str()
    }
}
