use std::collections::{HashMap, HashSet};
use std::fmt;

/// Access mode of a data breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Read,
    Write,
    ReadWrite,
}

impl AccessType {
    /// Combine two registrations for the same address. Modes only widen.
    pub fn merge(self, other: AccessType) -> AccessType {
        if self == other {
            self
        } else {
            AccessType::ReadWrite
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Read => write!(f, "read"),
            AccessType::Write => write!(f, "write"),
            AccessType::ReadWrite => write!(f, "read write"),
        }
    }
}

/// Watch conditions keyed by address string.
#[derive(Debug, Default)]
pub struct DataBreakpoints {
    addresses: HashMap<String, AccessType>,
}

impl DataBreakpoints {
    pub fn set(&mut self, address: &str, access: AccessType) -> bool {
        self.addresses
            .entry(address.to_string())
            .and_modify(|current| *current = current.merge(access))
            .or_insert(access);
        true
    }

    pub fn get(&self, address: &str) -> Option<AccessType> {
        self.addresses.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn clear(&mut self) {
        self.addresses.clear();
    }
}

#[derive(Debug, Default)]
pub struct InstructionBreakpoints {
    addresses: HashSet<i64>,
}

impl InstructionBreakpoints {
    pub fn set(&mut self, address: i64) -> bool {
        self.addresses.insert(address);
        true
    }

    pub fn contains(&self, address: i64) -> bool {
        self.addresses.contains(&address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn clear(&mut self) {
        self.addresses.clear();
    }
}

/// Last exception filter configuration sent by the front end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionFilters {
    pub named_exception: Option<String>,
    pub other_exceptions: bool,
}
