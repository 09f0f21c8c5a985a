//! Numeric type identifiers.
//!
//! Built-in types carry fixed ids so hot paths can test a value's type with
//! an integer compare instead of a handler lookup. Handlers registered by
//! extension modules should use ids at or above [`TypeId::FIRST_USER`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable numeric identifier of a type handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(u32);

impl TypeId {
    pub const NIL: TypeId = TypeId(0);
    pub const BOOL: TypeId = TypeId(1);
    pub const INT: TypeId = TypeId(2);
    pub const FLOAT: TypeId = TypeId(3);
    pub const FUNCTION: TypeId = TypeId(4);
    pub const STRING: TypeId = TypeId(10);
    pub const ARRAY: TypeId = TypeId(11);
    pub const DICT: TypeId = TypeId(12);

    /// First id available to handlers outside the core.
    pub const FIRST_USER: TypeId = TypeId(100);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        TypeId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this id lies in the range reserved for extension types.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 >= Self::FIRST_USER.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
