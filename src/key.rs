//! Key descriptors and their serialization into cache identities.
//!
//! A key is either a scalar (`"/api/items"`, `42`), an argument list
//! (`["/api/items", 2]`) or "not ready" (`Key::None`). Serialization is a pure
//! function of the descriptor: no cache or network access happens here.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// A key descriptor as produced by callers or by a page key loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Key {
  /// No key: the fetch must not run.
  #[default]
  None,
  /// A single literal, serialized to its own textual form.
  Scalar(Value),
  /// Positional arguments, spread into the fetcher.
  Args(Vec<Value>),
}

impl Key {
  /// Build an argument-list key.
  pub fn args<I, V>(items: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    Key::Args(items.into_iter().map(Into::into).collect())
  }
}

impl From<&str> for Key {
  fn from(s: &str) -> Self {
    Key::Scalar(Value::String(s.to_string()))
  }
}

impl From<String> for Key {
  fn from(s: String) -> Self {
    Key::Scalar(Value::String(s))
  }
}

impl From<&String> for Key {
  fn from(s: &String) -> Self {
    Key::from(s.as_str())
  }
}

impl From<u64> for Key {
  fn from(n: u64) -> Self {
    Key::Scalar(n.into())
  }
}

impl From<i64> for Key {
  fn from(n: i64) -> Self {
    Key::Scalar(n.into())
  }
}

impl From<usize> for Key {
  fn from(n: usize) -> Self {
    Key::Scalar(n.into())
  }
}

/// `false` means "not ready", mirroring loaders that return `false` to stop.
impl From<bool> for Key {
  fn from(b: bool) -> Self {
    if b {
      Key::Scalar(Value::Bool(true))
    } else {
      Key::None
    }
  }
}

impl From<Vec<Value>> for Key {
  fn from(args: Vec<Value>) -> Self {
    Key::Args(args)
  }
}

impl From<Value> for Key {
  fn from(value: Value) -> Self {
    match value {
      Value::Null | Value::Bool(false) => Key::None,
      Value::Array(args) => Key::Args(args),
      other => Key::Scalar(other),
    }
  }
}

impl<K: Into<Key>> From<Option<K>> for Key {
  fn from(key: Option<K>) -> Self {
    key.map(Into::into).unwrap_or(Key::None)
  }
}

/// What the fetcher is called with.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchArgs {
  /// The serialized key string alone.
  Key(String),
  /// The key's positional argument list.
  Args(Vec<Value>),
}

impl FetchArgs {
  /// The key string, or the first positional argument when it is a string.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      FetchArgs::Key(key) => Some(key),
      FetchArgs::Args(args) => args.first().and_then(Value::as_str),
    }
  }
}

/// Stable identity of a key plus its argument list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedKey {
  /// `None` when the descriptor resolved to "no key".
  pub identity: Option<String>,
  pub args: Option<Vec<Value>>,
}

impl SerializedKey {
  pub fn not_ready() -> Self {
    Self::default()
  }

  pub fn is_ready(&self) -> bool {
    self.identity.is_some()
  }

  pub fn identity(&self) -> Option<&str> {
    self.identity.as_deref()
  }

  /// Arguments for the fetcher: the spread argument list if present,
  /// otherwise the identity string.
  pub fn fetch_args(&self) -> Option<FetchArgs> {
    let identity = self.identity.as_ref()?;
    Some(match &self.args {
      Some(args) => FetchArgs::Args(args.clone()),
      None => FetchArgs::Key(identity.clone()),
    })
  }
}

/// Serialize a key descriptor.
pub fn serialize(key: &Key) -> SerializedKey {
  match key {
    Key::None => SerializedKey::not_ready(),
    Key::Scalar(value) => SerializedKey {
      identity: non_empty(scalar_text(value)),
      args: None,
    },
    Key::Args(args) => {
      if args.is_empty() {
        return SerializedKey::not_ready();
      }
      let identity = args.iter().fold(String::from("arg"), |mut acc, arg| {
        acc.push('@');
        acc.push_str(&arg_text(arg));
        acc
      });
      SerializedKey {
        identity: Some(identity),
        args: Some(args.clone()),
      }
    }
  }
}

/// Serialize the descriptor produced by a key function.
///
/// A function that fails is treated the same as one returning no key.
pub fn serialize_with<F>(produce: F) -> SerializedKey
where
  F: FnOnce() -> color_eyre::Result<Key>,
{
  match produce() {
    Ok(key) => serialize(&key),
    Err(err) => {
      tracing::trace!(error = %err, "key function failed, treating key as not ready");
      SerializedKey::not_ready()
    }
  }
}

/// Identity under which the latest error for `key` is kept.
pub fn error_key(key: &str) -> String {
  format!("err@{}", key)
}

/// Identity of the transient revalidation context of a paginated sequence.
pub fn context_key(first_page_key: &str) -> String {
  format!("ctx@{}", first_page_key)
}

/// Identity of the page count record of a paginated sequence.
pub fn size_key(first_page_key: &str) -> String {
  format!("len@{}", first_page_key)
}

fn non_empty(s: String) -> Option<String> {
  if s.is_empty() {
    None
  } else {
    Some(s)
  }
}

fn scalar_text(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::Bool(false) => String::new(),
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    Value::Bool(true) => "true".to_string(),
    compound => digest(compound),
  }
}

fn arg_text(value: &Value) -> String {
  match value {
    Value::Null => "null".to_string(),
    Value::String(s) => format!("\"{}\"", s),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    compound => digest(compound),
  }
}

/// Compound values hash their canonical JSON (object keys are sorted), so the
/// same structure always yields the same identity.
fn digest(value: &Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(value.to_string().as_bytes());
  format!("#{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use proptest::prelude::*;
  use serde_json::json;

  #[test]
  fn test_scalar_key() {
    let key = serialize(&Key::from("/api/items"));
    assert_eq!(key.identity(), Some("/api/items"));
    assert_eq!(key.args, None);
    assert_eq!(
      key.fetch_args(),
      Some(FetchArgs::Key("/api/items".to_string()))
    );
  }

  #[test]
  fn test_not_ready_descriptors() {
    for key in [
      Key::None,
      Key::from(false),
      Key::from(""),
      Key::from(Value::Null),
      Key::Args(vec![]),
      Key::from(None::<String>),
    ] {
      assert!(!serialize(&key).is_ready(), "{:?} should not be ready", key);
    }
  }

  #[test]
  fn test_args_key() {
    let key = serialize(&Key::args([json!("/api/items"), json!(2), json!(null)]));
    assert_eq!(key.identity(), Some("arg@\"/api/items\"@2@null"));
    assert_eq!(
      key.fetch_args(),
      Some(FetchArgs::Args(vec![json!("/api/items"), json!(2), json!(null)]))
    );
  }

  #[test]
  fn test_object_args_are_stable() {
    let a = serialize(&Key::args([json!({"b": 1, "a": [1, 2]})]));
    let b = serialize(&Key::args([json!({"a": [1, 2], "b": 1})]));
    let c = serialize(&Key::args([json!({"a": [1, 3], "b": 1})]));

    assert_eq!(a.identity, b.identity);
    assert_ne!(a.identity, c.identity);
    assert!(a.identity().unwrap().starts_with("arg@#"));
  }

  #[test]
  fn test_failing_key_function_is_not_ready() {
    let key = serialize_with(|| Err(eyre!("previous page missing")));
    assert_eq!(key, SerializedKey::not_ready());

    let key = serialize_with(|| Ok(Key::from("page-1")));
    assert_eq!(key.identity(), Some("page-1"));
  }

  #[test]
  fn test_derived_identities() {
    assert_eq!(error_key("a"), "err@a");
    assert_eq!(context_key("a"), "ctx@a");
    assert_eq!(size_key("a"), "len@a");
  }

  proptest! {
    #[test]
    fn prop_serialization_is_deterministic(parts in proptest::collection::vec(".*", 1..5)) {
      let key = Key::args(parts.iter().map(|p| json!(p)));
      prop_assert_eq!(serialize(&key), serialize(&key.clone()));
    }

    #[test]
    fn prop_non_empty_string_is_its_own_identity(s in ".+") {
      let key = serialize(&Key::from(s.as_str()));
      prop_assert_eq!(key.identity(), Some(s.as_str()));
    }
  }
}
