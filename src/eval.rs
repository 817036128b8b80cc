//! Represents parsed build file strings with embedded variable references,
//! e.g. `cc -c $in -o $out`, and mechanisms for expanding those into plain
//! strings.

use crate::smallmap::SmallMap;
use rustc_hash::FxHashMap;
use std::borrow::Cow;

/// An environment providing a mapping of variable name to variable value.
/// A given EvalString may need multiple environments in order to be fully
/// expanded; they are consulted in order.
pub trait Env {
    fn get_var(&self, var: &str) -> Option<Cow<str>>;
}

/// One token within an EvalString, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalPart<T: AsRef<str>> {
    Literal(T),
    VarRef(T),
}

/// A parsed but unexpanded variable-reference string.
/// Generic so the parser can hand out EvalString<&str> borrowing the input,
/// while job attributes keep an owned EvalString<String> until the job's
/// targets and deps are known.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalString<T: AsRef<str>>(Vec<EvalPart<T>>);

impl<T: AsRef<str>> EvalString<T> {
    pub fn new(parts: Vec<EvalPart<T>>) -> Self {
        EvalString(parts)
    }

    /// Expands the string, looking up each variable in the first Env that
    /// has it.  Unknown variables expand to nothing.
    pub fn evaluate(&self, envs: &[&dyn Env]) -> String {
        let mut val = String::new();
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => val.push_str(s.as_ref()),
                EvalPart::VarRef(v) => {
                    if let Some(found) = envs.iter().find_map(|env| env.get_var(v.as_ref())) {
                        val.push_str(&found);
                    }
                }
            }
        }
        val
    }
}

impl EvalString<&str> {
    pub fn into_owned(self) -> EvalString<String> {
        EvalString(
            self.0
                .into_iter()
                .map(|part| match part {
                    EvalPart::Literal(s) => EvalPart::Literal(s.to_owned()),
                    EvalPart::VarRef(s) => EvalPart::VarRef(s.to_owned()),
                })
                .collect(),
        )
    }
}

/// Top-level variables, which are expanded as soon as they are defined.
#[derive(Debug, Default)]
pub struct Vars(FxHashMap<String, String>);

impl Vars {
    pub fn new() -> Self {
        Vars::default()
    }
    pub fn insert(&mut self, key: &str, val: String) {
        self.0.insert(key.to_owned(), val);
    }
    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }
}

impl Env for Vars {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.0.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}

/// Attributes of a `file` or `phony` declaration, which are expanded lazily.
pub type LazyVars = SmallMap<String, EvalString<String>>;

impl Env for SmallMap<&str, String> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.get(var).map(|val| Cow::Borrowed(val.as_str()))
    }
}
