use std::{
    collections::HashSet,
    error::Error,
    fmt::{Debug, Display},
    hash::Hash,
};

use num_traits::{cast, Bounded, One, PrimInt, Unsigned, WrappingAdd, Zero};

pub trait Key: Copy + Eq + Hash + Debug {
    type Id: PrimInt + Unsigned + WrappingAdd + Hash + Debug;
    fn new(id: Self::Id) -> Self;
    fn id(&self) -> Self::Id;
}

/// Macro for generating a new key type.
/// The resulting type will be a simple newtype wrapper around the given type.
macro_rules! key_type {
    ($name:ident, $id:ty) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        pub struct $name($id);
        impl Key for $name {
            type Id = $id;
            fn new(id: Self::Id) -> Self {
                Self(id)
            }
            fn id(&self) -> Self::Id {
                self.0
            }
        }
    };
}
pub(crate) use key_type;

/// Construct for generating unique keys, via an incrementing counter.
///
/// Contains a set of all keys currently in use.
#[derive(Debug)]
pub struct KeyGenerator<K>
where
    K: Key,
{
    last_id: K::Id,
    used_ids: HashSet<K::Id>,
}
impl<K> KeyGenerator<K>
where
    K: Key,
    K::Id: Bounded + Zero + One + Ord,
{
    pub fn new() -> Self {
        KeyGenerator {
            last_id: K::Id::max_value(),
            used_ids: HashSet::new(),
        }
    }

    pub fn used_keys(&self) -> K::Id {
        cast(self.used_ids.len()).unwrap()
    }

    pub fn remaining_keys(&self) -> K::Id {
        K::Id::max_value() - self.used_keys()
    }

    /// Return new unique key, registering it as occupied until [`Self::free()`]
    /// is called with this key as argument.
    pub fn next(&mut self) -> Result<K, OverflowError> {
        let id = self.peek_next_id()?;
        let key = K::new(id);
        self.reserve(key).unwrap();
        self.last_id = id;
        Ok(key)
    }

    fn peek_next_id(&self) -> Result<K::Id, OverflowError> {
        if self.remaining_keys() == K::Id::zero() {
            return Err(OverflowError);
        }

        let mut id = self.last_id;
        loop {
            id = id.wrapping_add(&K::Id::one());
            if !self.used_ids.contains(&id) {
                return Ok(id);
            }
        }
    }

    pub fn free(&mut self, key: K) -> Result<(), InvalidKeyError<K>> {
        let successful = self.used_ids.remove(&key.id());
        if successful {
            Ok(())
        } else {
            Err(InvalidKeyError { key })
        }
    }

    pub fn reserve(&mut self, key: K) -> Result<(), KeyCollisionError<K>> {
        let successful = self.used_ids.insert(key.id());
        if successful {
            Ok(())
        } else {
            Err(KeyCollisionError { key })
        }
    }

    pub fn in_use(&self, key: K) -> bool {
        self.used_ids.contains(&key.id())
    }
}
impl<K> Default for KeyGenerator<K>
where
    K: Key,
    K::Id: Bounded + Zero + One + Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct OverflowError;
impl Display for OverflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "The max number of keys has been exceeded")
    }
}
impl Error for OverflowError {}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidKeyError<K: Key> {
    key: K,
}
impl<K: Key> Display for InvalidKeyError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key not present: {:?}", self.key)
    }
}
impl<K: Key> Error for InvalidKeyError<K> {}

#[derive(Debug, PartialEq, Eq)]
pub struct KeyCollisionError<K: Key> {
    key: K,
}
impl<K: Key> Display for KeyCollisionError<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key already present: {:?}", self.key)
    }
}
impl<K: Key> Error for KeyCollisionError<K> {}

#[cfg(test)]
mod tests {
    use super::*;

    key_type!(TestKey, u8);

    #[test]
    fn add_one() {
        let mut kg = KeyGenerator::<TestKey>::new();
        assert_eq!(kg.remaining_keys(), u8::MAX);
        kg.next().unwrap();
        assert_eq!(kg.remaining_keys(), u8::MAX - 1);
    }

    #[test]
    fn free_then_reserve() {
        let mut kg = KeyGenerator::<TestKey>::new();
        let k = kg.next().unwrap();
        kg.free(k).unwrap();
        kg.next().unwrap();
        assert_eq!(kg.reserve(k), Ok(()));
    }

    #[test]
    fn overflow() {
        let mut kg = KeyGenerator::<TestKey>::new();
        for _ in 1..=255 {
            kg.next().unwrap();
        }
        assert_eq!(kg.next(), Err(OverflowError));
    }
}
