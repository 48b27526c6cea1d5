//! Lexical scope stack for variable bindings.
//!
//! Used by the resolver to bind locals to frame positions. Each scope
//! remembers its bindings in declaration order so that leaving a block can
//! release exactly the slots it allocated.

use core::fmt;

use hashbrown::HashMap;

/// One block scope. Bindings are kept in declaration order.
#[derive(Debug, Clone)]
pub struct Scope<T> {
    index: HashMap<String, usize>,
    bindings: Vec<(String, T)>,
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            bindings: Vec::new(),
        }
    }
}

impl<T> Scope<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.index.get(name).map(|&i| &self.bindings[i].1)
    }

    /// Binds `name`, failing when the scope already declares it.
    pub fn bind(&mut self, name: &str, value: T) -> Result<(), BindError> {
        if self.index.contains_key(name) {
            return Err(BindError::AlreadyBound(name.to_string()));
        }
        self.index.insert(name.to_string(), self.bindings.len());
        self.bindings.push((name.to_string(), value));
        Ok(())
    }

    /// Bindings in declaration order.
    pub fn bindings(&self) -> impl Iterator<Item = &(String, T)> {
        self.bindings.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// A stack of scopes, searched from innermost to outermost.
#[derive(Debug, Clone)]
pub struct ScopeStack<T> {
    scopes: Vec<Scope<T>>,
}

impl<T> Default for ScopeStack<T> {
    fn default() -> Self {
        Self { scopes: Vec::new() }
    }
}

impl<T> ScopeStack<T> {
    /// Create a new empty scope stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an empty scope onto the stack.
    pub fn push(&mut self) {
        self.scopes.push(Scope::new());
    }

    /// Pop the topmost scope from the stack and hand it back.
    ///
    /// Returns an error if the stack is empty.
    pub fn pop(&mut self) -> Result<Scope<T>, PopError> {
        self.scopes.pop().ok_or(PopError::EmptyStack)
    }

    /// Look up a name, searching scopes from innermost to outermost.
    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.scopes.iter().rev().find_map(|scope| scope.lookup(name))
    }

    /// Bind a value in the topmost scope.
    pub fn bind_in_current(&mut self, name: &str, value: T) -> Result<(), BindError> {
        self.scopes
            .last_mut()
            .ok_or(BindError::NoScope)?
            .bind(name, value)
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

/// Error when trying to bind a value in a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// No scope exists to bind in.
    NoScope,
    /// The name has already been bound in the current scope.
    AlreadyBound(String),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::NoScope => write!(f, "No scope to bind in"),
            BindError::AlreadyBound(name) => {
                write!(f, "Name '{}' already bound in current scope", name)
            }
        }
    }
}

/// Error when trying to pop a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopError {
    /// The stack is empty.
    EmptyStack,
}

impl fmt::Display for PopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PopError::EmptyStack => write!(f, "Cannot pop from empty scope stack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_shadowing() {
        let mut stack = ScopeStack::new();
        stack.push();
        stack.bind_in_current("a", 1).unwrap();
        stack.bind_in_current("b", 2).unwrap();

        stack.push();
        stack.bind_in_current("a", 10).unwrap();
        assert_eq!(stack.lookup("a"), Some(&10));
        assert_eq!(stack.lookup("b"), Some(&2));

        let inner = stack.pop().unwrap();
        assert_eq!(inner.bindings().count(), 1);
        assert_eq!(stack.lookup("a"), Some(&1));
    }

    #[test]
    fn test_bind_already_bound_error() {
        let mut stack = ScopeStack::new();
        stack.push();
        stack.bind_in_current("a", 1).unwrap();
        assert_eq!(
            stack.bind_in_current("a", 2),
            Err(BindError::AlreadyBound("a".to_string()))
        );
    }

    #[test]
    fn test_empty_stack_errors() {
        let mut stack: ScopeStack<i32> = ScopeStack::new();
        assert_eq!(stack.bind_in_current("a", 1), Err(BindError::NoScope));
        assert!(matches!(stack.pop(), Err(PopError::EmptyStack)));
    }

    #[test]
    fn test_declaration_order() {
        let mut scope = Scope::new();
        scope.bind("z", 1).unwrap();
        scope.bind("a", 2).unwrap();
        let names: Vec<&str> = scope.bindings().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }
}
