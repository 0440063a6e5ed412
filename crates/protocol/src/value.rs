//! Typed access to property-list dictionaries.
//!
//! The restore daemon speaks heterogeneously-typed property lists. Handlers
//! almost always want "the string under this key, or nothing". An absent
//! key and a key of the wrong type are the same failure to them, so every
//! accessor here collapses both into `None`.

use plist::{Dictionary, Value};

pub trait DictExt {
    fn str_item(&self, key: &str) -> Option<&str>;
    fn dict_item(&self, key: &str) -> Option<&Dictionary>;
    fn data_item(&self, key: &str) -> Option<&[u8]>;
    fn bool_item(&self, key: &str) -> Option<bool>;
    fn uint_item(&self, key: &str) -> Option<u64>;
    fn array_item(&self, key: &str) -> Option<&[Value]>;

    /// Looks up a boolean flag, treating absence as `false`.
    fn flag(&self, key: &str) -> bool {
        self.bool_item(key).unwrap_or(false)
    }
}

impl DictExt for Dictionary {
    fn str_item(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_string)
    }

    fn dict_item(&self, key: &str) -> Option<&Dictionary> {
        self.get(key).and_then(Value::as_dictionary)
    }

    fn data_item(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_data)
    }

    fn bool_item(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_boolean)
    }

    fn uint_item(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_unsigned_integer)
    }

    fn array_item(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_array).map(Vec::as_slice)
    }
}

/// Shorthand constructors, so handler code reads as one insert per line.
pub fn string(s: impl Into<String>) -> Value {
    Value::String(s.into())
}

pub fn data(d: impl Into<Vec<u8>>) -> Value {
    Value::Data(d.into())
}

pub fn boolean(b: bool) -> Value {
    Value::Boolean(b)
}

pub fn uint(n: u64) -> Value {
    Value::Integer(n.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Name".into(), string("KernelCache"));
        dict.insert("Blob".into(), data(vec![0xAA, 0xBB]));
        dict.insert("Count".into(), uint(3));
        dict.insert("Enabled".into(), boolean(true));
        dict
    }

    #[test]
    fn typed_accessors() {
        let dict = sample();

        assert_eq!(dict.str_item("Name"), Some("KernelCache"));
        assert_eq!(dict.data_item("Blob"), Some(&[0xAA, 0xBB][..]));
        assert_eq!(dict.uint_item("Count"), Some(3));
        assert!(dict.flag("Enabled"));
    }

    #[test]
    fn absent_and_mismatch_are_uniform() {
        let dict = sample();

        // Absent key
        assert_eq!(dict.str_item("Missing"), None);
        // Present key, wrong type
        assert_eq!(dict.str_item("Count"), None);
        assert_eq!(dict.uint_item("Name"), None);
        assert!(!dict.flag("Name"));
    }
}
