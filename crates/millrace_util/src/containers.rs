//! Container type aliases.

pub use hashbrown::hash_map;
pub use hashbrown::hash_set;

pub use rustc_hash::FxBuildHasher as RandomState;
pub use rustc_hash::FxHasher as DefaultHasher;

pub type HashMap<K, V> = hashbrown::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub type HashSet<T> = hashbrown::HashSet<T, rustc_hash::FxBuildHasher>;
