//! Core types shared by the coordinator, the tracker and the public handle.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::oneshot;

use crate::error::{Result, RouterError};

const ROOT_ARGS: &str = "null";

/// Identifies one unit of work: a worker name plus its argument payload.
///
/// The payload is kept as compact JSON text. `serde_json` writes object
/// members in sorted order, so equal argument values always produce equal
/// keys.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    name: String,
    args: String,
}

impl Key {
    /// Build a key by serializing `args`. The name must not be empty.
    pub fn new<A: Serialize + ?Sized>(name: impl Into<String>, args: &A) -> Result<Self> {
        let name = name.into();
        let value = serde_json::to_value(args).map_err(|e| RouterError::encoding(&name, e))?;
        Self::from_value(name, &value)
    }

    pub fn from_value(name: impl Into<String>, args: &Value) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(RouterError::encoding(name, "worker name cannot be empty"));
        }
        Ok(Self {
            name,
            args: args.to_string(),
        })
    }

    /// The sentinel requester used for top-level requests.
    ///
    /// Its name is empty, which `new` and `from_value` refuse, so it never
    /// equals a key that names a worker.
    pub fn root() -> Self {
        Self {
            name: String::new(),
            args: ROOT_ARGS.to_string(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty() && self.args == ROOT_ARGS
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical JSON text of the arguments
    pub fn args_text(&self) -> &str {
        &self.args
    }

    pub fn args_value(&self) -> Result<Value> {
        serde_json::from_str(&self.args).map_err(|e| RouterError::encoding_for(self, e))
    }

    /// Decode the arguments into a concrete type
    pub fn args<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.args).map_err(|e| RouterError::encoding_for(self, e))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}{}", self.name, self.args)
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

/// Stored result of computing a key
pub type Outcome = std::result::Result<Value, RouterError>;

/// Events processed by the coordinator, strictly in arrival order
#[derive(Debug)]
pub(crate) enum RouterEvent {
    /// Resolve `key` or queue `reply` until it completes
    Request {
        key: Key,
        reply: oneshot::Sender<Outcome>,
    },
    /// A computation finished (or a result is being seeded)
    Complete { key: Key, outcome: Outcome },
    Stop,
}

/// Serialize a worker result into the stored value type
pub fn encode<T: Serialize + ?Sized>(name: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| RouterError::encoding(name, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_args_make_equal_keys() {
        let a = Key::new("load", &json!({"path": "x", "depth": 2})).unwrap();
        let b = Key::new("load", &json!({"depth": 2, "path": "x"})).unwrap();
        assert_eq!(a, b);

        let c = Key::new("load", &json!({"depth": 3, "path": "x"})).unwrap();
        assert_ne!(a, c);
        assert_ne!(a, Key::from_value("store", &json!({"path": "x", "depth": 2})).unwrap());
    }

    #[test]
    fn test_tuple_args_roundtrip() {
        let key = Key::new("fib", &(10u64,)).unwrap();
        assert_eq!(key.args_text(), "[10]");
        assert_eq!(key.to_string(), "fib[10]");

        let (n,): (u64,) = key.args().unwrap();
        assert_eq!(n, 10);
        let err = key.args::<(String,)>().unwrap_err();
        assert_eq!(err.key(), Some(&key));
    }

    #[test]
    fn test_root_never_matches_a_worker_key() {
        let root = Key::root();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "<root>");
        assert_ne!(root, Key::from_value("x", &Value::Null).unwrap());
        assert_eq!(root.args_value().unwrap(), Value::Null);
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let err = Key::new("", &()).unwrap_err();
        assert_eq!(err.category(), "encoding");
        assert_eq!(err.key(), None);
        assert!(Key::from_value("", &Value::Null).is_err());
        assert!(!Key::new("x", &()).unwrap().is_root());
    }
}
