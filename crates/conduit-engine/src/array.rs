use std::collections::HashMap;

use bytes::Bytes;

use crate::value::Value;

/// Array key after PHP's key normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(Bytes),
}

impl ArrayKey {
    /// Canonical integer strings (`"5"`, `"-3"`, but not `"05"` or `"+1"`)
    /// become integer keys.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        parse_canonical_int(bytes).map_or_else(|| Self::Str(Bytes::copy_from_slice(bytes)), Self::Int)
    }

    #[must_use]
    pub fn from_str_key(s: &str) -> Self {
        Self::from_bytes(s.as_bytes())
    }

    /// Key used when a value appears in `$a[$value]` position.
    ///
    /// Returns `None` for arrays and objects, which are illegal offsets.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Str(Bytes::new())),
            Value::Bool(b) => Some(Self::Int(i64::from(*b))),
            Value::Int(i) => Some(Self::Int(*i)),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) => Some(Self::Int(f.trunc() as i64)),
            Value::Str(s) => Some(Self::from_bytes(s)),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Int(*i),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Self::Int(i) => Bytes::from(i.to_string()),
            Self::Str(s) => s.clone(),
        }
    }
}

impl From<i64> for ArrayKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ArrayKey {
    fn from(value: &str) -> Self {
        Self::from_str_key(value)
    }
}

pub(crate) fn parse_canonical_int(bytes: &[u8]) -> Option<i64> {
    let digits = bytes.strip_prefix(b"-").unwrap_or(bytes);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return None;
    }
    if bytes == b"-0" {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Insertion-ordered hash table backing script arrays.
///
/// Deleted entries leave tombstones that are compacted once they outnumber
/// live entries. `next_free` is the integer key `push` will use; it only ever
/// grows, except through [`ArrayData::truncate_int_keys`].
#[derive(Debug, Clone, Default)]
pub struct ArrayData {
    entries: Vec<Option<(ArrayKey, Value)>>,
    index: HashMap<ArrayKey, usize>,
    next_free: i64,
}

impl ArrayData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub const fn next_free(&self) -> i64 {
        self.next_free
    }

    #[must_use]
    pub fn get(&self, key: &ArrayKey) -> Option<&Value> {
        let pos = *self.index.get(key)?;
        self.entries[pos].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &ArrayKey) -> Option<&mut Value> {
        let pos = *self.index.get(key)?;
        self.entries[pos].as_mut().map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains_key(&self, key: &ArrayKey) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the slot for `key`, inserting `Null` when missing.
    pub fn entry(&mut self, key: ArrayKey) -> &mut Value {
        let pos = match self.index.get(&key) {
            Some(pos) => *pos,
            None => self.append(key.clone(), Value::Null),
        };
        &mut self.entries[pos].get_or_insert((key, Value::Null)).1
    }

    pub fn insert(&mut self, key: ArrayKey, value: Value) {
        match self.index.get(&key) {
            Some(pos) => {
                if let Some((_, v)) = &mut self.entries[*pos] {
                    *v = value;
                }
            }
            None => {
                self.append(key, value);
            }
        }
    }

    /// Appends at `next_free`, returning the key used.
    pub fn push(&mut self, value: Value) -> ArrayKey {
        let key = ArrayKey::Int(self.next_free);
        self.insert(key.clone(), value);
        key
    }

    /// Appends a `Null` at `next_free` and returns the new slot.
    pub fn push_slot(&mut self) -> &mut Value {
        let key = ArrayKey::Int(self.next_free);
        self.entry(key)
    }

    pub fn remove(&mut self, key: &ArrayKey) -> Option<Value> {
        let pos = self.index.remove(key)?;
        let removed = self.entries[pos].take().map(|(_, v)| v);
        if self.entries.len() > 8 && self.index.len() * 2 < self.entries.len() {
            self.compact();
        }
        removed
    }

    /// Removes every integer key `>= len` and moves the cursor to `len`.
    pub fn truncate_int_keys(&mut self, len: i64) {
        let doomed: Vec<ArrayKey> = self
            .keys()
            .filter(|k| matches!(k, ArrayKey::Int(i) if *i >= len))
            .cloned()
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        self.next_free = len.max(0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Value)> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref().map(|(k, v)| (k, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &ArrayKey> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.iter().map(|(_, v)| v)
    }

    /// Builds a list (`0..n` keys) from values.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut array = Self::new();
        for value in values {
            array.push(value);
        }
        array
    }

    fn append(&mut self, key: ArrayKey, value: Value) -> usize {
        if let ArrayKey::Int(i) = key
            && i >= self.next_free
        {
            self.next_free = i.saturating_add(1);
        }
        let pos = self.entries.len();
        self.index.insert(key.clone(), pos);
        self.entries.push(Some((key, value)));
        pos
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        self.index.clear();
        for (pos, entry) in self.entries.iter().enumerate() {
            if let Some((k, _)) = entry {
                self.index.insert(k.clone(), pos);
            }
        }
    }
}

impl FromIterator<(ArrayKey, Value)> for ArrayData {
    fn from_iter<T: IntoIterator<Item = (ArrayKey, Value)>>(iter: T) -> Self {
        let mut array = Self::new();
        for (k, v) in iter {
            array.insert(k, v);
        }
        array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_normalise_to_int_keys() {
        assert_eq!(ArrayKey::from_str_key("5"), ArrayKey::Int(5));
        assert_eq!(ArrayKey::from_str_key("-3"), ArrayKey::Int(-3));
        assert!(matches!(ArrayKey::from_str_key("05"), ArrayKey::Str(_)));
        assert!(matches!(ArrayKey::from_str_key("-0"), ArrayKey::Str(_)));
        assert!(matches!(ArrayKey::from_str_key("1.5"), ArrayKey::Str(_)));
        assert!(matches!(ArrayKey::from_str_key(""), ArrayKey::Str(_)));
    }

    #[test]
    fn deletes_do_not_move_the_cursor() {
        let mut a = ArrayData::from_values([1, 2, 3, 4].map(Value::Int));
        a.remove(&ArrayKey::Int(3));
        assert_eq!(a.len(), 3);
        assert_eq!(a.next_free(), 4);
        a.push(Value::Int(5));
        assert_eq!(a.get(&ArrayKey::Int(4)), Some(&Value::Int(5)));
    }

    #[test]
    fn truncate_drops_high_int_keys_only() {
        let mut a = ArrayData::from_values([1, 2, 3, 4].map(Value::Int));
        a.insert(ArrayKey::from_str_key("foo"), Value::Int(9));
        a.truncate_int_keys(2);
        let keys: Vec<_> = a.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![ArrayKey::Int(0), ArrayKey::Int(1), ArrayKey::from_str_key("foo")]
        );
        assert_eq!(a.next_free(), 2);
    }

    #[test]
    fn order_survives_compaction() {
        let mut a = ArrayData::new();
        for i in 0..20 {
            a.insert(ArrayKey::Int(i), Value::Int(i));
        }
        for i in 0..15 {
            a.remove(&ArrayKey::Int(i));
        }
        let keys: Vec<_> = a.keys().cloned().collect();
        assert_eq!(keys, (15..20).map(ArrayKey::Int).collect::<Vec<_>>());
        assert_eq!(a.next_free(), 20);
    }
}
