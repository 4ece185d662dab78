use std::fmt;

use crate::error::{Result, XlangAdapterError};

#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    String(String),
    Composite(Vec<RuntimeVariable>),
}

impl VariableValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            VariableValue::Integer(_) => "integer",
            VariableValue::Number(_) => "float",
            VariableValue::Boolean(_) => "boolean",
            VariableValue::String(_) => "string",
            VariableValue::Composite(_) => "array",
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Integer(n) => write!(f, "{n}"),
            VariableValue::Number(n) => write!(f, "{n}"),
            VariableValue::Boolean(b) => write!(f, "{b}"),
            VariableValue::String(s) => write!(f, "\"{s}\""),
            VariableValue::Composite(items) => write!(f, "Array[{}]", items.len()),
        }
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        VariableValue::Integer(value)
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        VariableValue::Number(value)
    }
}

impl From<bool> for VariableValue {
    fn from(value: bool) -> Self {
        VariableValue::Boolean(value)
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        VariableValue::String(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        VariableValue::String(value)
    }
}

impl From<Vec<RuntimeVariable>> for VariableValue {
    fn from(value: Vec<RuntimeVariable>) -> Self {
        VariableValue::Composite(value)
    }
}

/// A named value. String values expose a byte view that can be written back.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeVariable {
    name: String,
    value: VariableValue,
    memory: Option<Vec<u8>>,
    pub reference: Option<i64>,
}

impl RuntimeVariable {
    pub fn new(name: impl Into<String>, value: impl Into<VariableValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            memory: None,
            reference: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &VariableValue {
        &self.value
    }

    /// Replace the value, dropping any cached byte view.
    pub fn set_value(&mut self, value: impl Into<VariableValue>) {
        self.value = value.into();
        self.memory = None;
    }

    /// UTF-8 bytes of a string value, materialized on first access.
    pub fn memory(&mut self) -> Option<&[u8]> {
        if self.memory.is_none()
            && let VariableValue::String(s) = &self.value
        {
            self.memory = Some(s.as_bytes().to_vec());
        }
        self.memory.as_deref()
    }

    /// Overwrite bytes at `offset` and re-decode the string value.
    ///
    /// Invalid UTF-8 is replaced, so such a write is not reversible. Returns
    /// `Ok(false)` when the variable has no byte view.
    pub fn set_memory(&mut self, data: &[u8], offset: usize) -> Result<bool> {
        if self.memory().is_none() {
            return Ok(false);
        }
        let Some(memory) = self.memory.as_mut() else {
            return Ok(false);
        };

        let end = offset.checked_add(data.len()).filter(|end| *end <= memory.len());
        let Some(end) = end else {
            return Err(XlangAdapterError::MemoryOutOfRange {
                offset,
                len: data.len(),
                size: memory.len(),
            });
        };

        memory[offset..end].copy_from_slice(data);
        self.value = VariableValue::String(String::from_utf8_lossy(memory).into_owned());
        Ok(true)
    }
}

/// Insertion-ordered variables with unique names.
#[derive(Debug, Default, Clone)]
pub struct VariableStore {
    variables: Vec<RuntimeVariable>,
}

impl VariableStore {
    /// Insert `variable`, replacing in place any variable with the same name.
    pub fn insert(&mut self, variable: RuntimeVariable) {
        match self
            .variables
            .iter()
            .position(|v| v.name() == variable.name())
        {
            Some(index) => self.variables[index] = variable,
            None => self.variables.push(variable),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RuntimeVariable> {
        self.variables.iter().find(|v| v.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RuntimeVariable> {
        self.variables.iter_mut().find(|v| v.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeVariable> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_is_utf8_of_string() {
        let mut var = RuntimeVariable::new("s", "héllo");
        assert_eq!(var.memory(), Some("héllo".as_bytes()));
    }

    #[test]
    fn test_memory_round_trip_preserves_string() {
        let mut var = RuntimeVariable::new("s", "naïve 文字 ✓");
        let bytes = var.memory().unwrap().to_vec();

        assert!(var.set_memory(&bytes, 0).unwrap());
        assert_eq!(var.value(), &VariableValue::String("naïve 文字 ✓".to_string()));
    }

    #[test]
    fn test_set_memory_patches_bytes() {
        let mut var = RuntimeVariable::new("s", "hello");
        var.set_memory(b"J", 0).unwrap();
        var.set_memory(b"y", 4).unwrap();
        assert_eq!(var.value(), &VariableValue::from("Jelly"));
    }

    #[test]
    fn test_set_memory_out_of_range() {
        let mut var = RuntimeVariable::new("s", "abc");
        assert!(matches!(
            var.set_memory(b"xy", 2),
            Err(XlangAdapterError::MemoryOutOfRange {
                offset: 2,
                len: 2,
                size: 3
            })
        ));
        assert_eq!(var.value(), &VariableValue::from("abc"));
    }

    #[test]
    fn test_malformed_write_is_lossy() {
        let mut var = RuntimeVariable::new("s", "ab");
        var.set_memory(&[0xff], 0).unwrap();
        assert_eq!(var.value(), &VariableValue::from("\u{fffd}b"));
    }

    #[test]
    fn test_non_string_has_no_memory() {
        let mut var = RuntimeVariable::new("n", 42_i64);
        assert_eq!(var.memory(), None);
        assert!(!var.set_memory(b"1", 0).unwrap());
    }

    #[test]
    fn test_set_value_drops_memory() {
        let mut var = RuntimeVariable::new("s", "old");
        var.memory();
        var.set_value("newer");
        assert_eq!(var.memory(), Some("newer".as_bytes()));
    }

    #[test]
    fn test_store_keeps_insertion_order_and_unique_names() {
        let mut store = VariableStore::default();
        store.insert(RuntimeVariable::new("b", 1_i64));
        store.insert(RuntimeVariable::new("a", true));
        store.insert(RuntimeVariable::new("b", 2_i64));

        let names: Vec<_> = store.iter().map(RuntimeVariable::name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(store.get("b").unwrap().value(), &VariableValue::Integer(2));
        assert!(store.get("c").is_none());
    }

    #[test]
    fn test_display_values() {
        assert_eq!(VariableValue::from(3_i64).to_string(), "3");
        assert_eq!(VariableValue::from("x").to_string(), "\"x\"");
        assert_eq!(
            VariableValue::from(vec![RuntimeVariable::new("0", 1_i64)]).to_string(),
            "Array[1]"
        );
    }
}
