#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::{HashMap, HashSet};

    pub type IndexMap<K, V> = indexmap::IndexMap<K, V>;
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub type HashMap<K, V> = hashbrown::HashMap<K, V, ahash::RandomState>;
    pub type HashSet<K> = hashbrown::HashSet<K, ahash::RandomState>;
    pub type IndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;
}
