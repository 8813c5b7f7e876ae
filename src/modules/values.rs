//! Decoder output: an ordered, bounded list of name/value strings.

use super::CodecError;

/// Most pairs a single decoded payload may produce.
pub const MAX_VALUE_PAIRS: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValuePairs {
    pairs: Vec<(String, String)>,
}

impl ValuePairs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair. Insertion order is the order the JSON is rendered in.
    pub fn add(&mut self, name: impl Into<String>, value: impl ToString) -> Result<(), CodecError> {
        if self.pairs.len() >= MAX_VALUE_PAIRS {
            return Err(CodecError::TooManyValues(MAX_VALUE_PAIRS));
        }
        self.pairs.push((name.into(), value.to_string()));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order_and_bounds() {
        let mut v = ValuePairs::new();
        v.add("b", 1).unwrap();
        v.add("a", "x").unwrap();
        assert_eq!(v.iter().collect::<Vec<_>>(), vec![("b", "1"), ("a", "x")]);

        let mut full = ValuePairs::new();
        for i in 0..MAX_VALUE_PAIRS {
            full.add(format!("k{i}"), i).unwrap();
        }
        assert_eq!(
            full.add("overflow", 0),
            Err(CodecError::TooManyValues(MAX_VALUE_PAIRS))
        );
        assert_eq!(full.len(), MAX_VALUE_PAIRS);
    }
}
