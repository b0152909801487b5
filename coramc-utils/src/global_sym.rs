//! Defines a global symbol type and its associated interning pool
use std::sync::{Mutex, OnceLock};
use string_interner::{
    backend::BucketBackend, symbol::SymbolU32, StringInterner,
};

/// A globally interned symbol.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GSym(SymbolU32);

type Pool = StringInterner<BucketBackend>;

fn pool() -> &'static Mutex<Pool> {
    static POOL: OnceLock<Mutex<Pool>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(Pool::new()))
}

impl GSym {
    /// Intern a string into the global symbol table.
    pub fn new(s: impl AsRef<str>) -> Self {
        s.as_ref().into()
    }

    /// Convert this symbol into the string in the static, global symbol table.
    pub fn as_str(&self) -> &'static str {
        let guard = pool().lock().unwrap();
        let s = guard.resolve(self.0).unwrap();
        // SAFETY: the bucket backend never moves or frees interned strings
        // and the pool itself lives for the whole program.
        unsafe { std::mem::transmute::<&str, &'static str>(s) }
    }
}

impl From<&str> for GSym {
    fn from(s: &str) -> Self {
        GSym(pool().lock().unwrap().get_or_intern(s))
    }
}

impl From<String> for GSym {
    fn from(s: String) -> Self {
        GSym(pool().lock().unwrap().get_or_intern(&s))
    }
}

impl From<&String> for GSym {
    fn from(s: &String) -> Self {
        GSym(pool().lock().unwrap().get_or_intern(s))
    }
}

impl From<GSym> for &'static str {
    fn from(sym: GSym) -> Self {
        sym.as_str()
    }
}

impl std::fmt::Debug for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

impl std::fmt::Display for GSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self.as_str(), f)
    }
}
