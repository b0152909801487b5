use crate::Id;
use std::collections::{HashMap, HashSet};

/// Generates unique names with a given prefix. Used for compiler
/// temporaries and for collision-safe renaming in nested scopes.
#[derive(Clone, Debug, Default)]
pub struct NameGenerator {
    name_hash: HashMap<Id, i64>,
    generated_names: HashSet<Id>,
}

impl NameGenerator {
    /// Returns a new name with the given prefix, adding a numeric suffix
    /// when the prefix was seen before. A name handed out once is never
    /// handed out again, even when a later prefix plus suffix spells it.
    pub fn gen_name<S>(&mut self, prefix: S) -> Id
    where
        S: Into<Id>,
    {
        let mut cur_prefix: Id = prefix.into();
        loop {
            let count = self
                .name_hash
                .entry(cur_prefix)
                .and_modify(|v| *v += 1)
                .or_insert(-1);

            let name = if *count == -1 {
                cur_prefix
            } else {
                Id::new(format!("{}{}", cur_prefix, count))
            };

            if !self.generated_names.contains(&name) {
                self.generated_names.insert(name);
                return name;
            }

            // taken; extend the prefix and retry
            cur_prefix = name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names() {
        let mut gen = NameGenerator::default();
        assert_eq!(gen.gen_name("_tmp"), "_tmp");
        assert_eq!(gen.gen_name("_tmp"), "_tmp0");
        assert_eq!(gen.gen_name("_tmp"), "_tmp1");
        assert_eq!(gen.gen_name("x"), "x");
    }

    #[test]
    fn suffixed_prefixes_never_reuse_a_taken_name() {
        let mut gen = NameGenerator::default();
        assert_eq!(gen.gen_name("x0"), "x0");
        assert_eq!(gen.gen_name("x"), "x");
        // the suffixed rename of `x` would spell the taken `x0`
        assert_eq!(gen.gen_name("x"), "x00");
    }

    #[test]
    fn collisions_resolve_in_either_declaration_order() {
        let mut gen = NameGenerator::default();
        assert_eq!(gen.gen_name("x"), "x");
        assert_eq!(gen.gen_name("x"), "x0");
        assert_eq!(gen.gen_name("x0"), "x00");
    }
}
