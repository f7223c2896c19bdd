//! Small predicate combinators over plain values.
//!
//! A [`Predicate`] is a described boolean test. Combinators compose them
//! explicitly (`all_of`, `any_of`, `not`, `property`, `has_item`) and the
//! composed description is what a failed assertion reports as "expected".

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::VerifyError;

/// A described test over `T`.
pub struct Predicate<T: ?Sized> {
    description: String,
    test: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: ?Sized> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            test: Arc::clone(&self.test),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Predicate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.description).finish()
    }
}

impl<T: ?Sized> Predicate<T> {
    pub fn new(
        description: impl Into<String>,
        test: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            test: Arc::new(test),
        }
    }

    pub fn test(&self, value: &T) -> bool {
        (self.test)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<T: ?Sized + 'static> Predicate<T> {
    pub fn and(self, other: Predicate<T>) -> Predicate<T> {
        all_of(vec![self, other])
    }
}

/// Always true.
pub fn anything<T: ?Sized + 'static>() -> Predicate<T> {
    Predicate::new("anything", |_: &T| true)
}

pub fn equal_to<T>(expected: T) -> Predicate<T>
where
    T: PartialEq + fmt::Debug + Send + Sync + 'static,
{
    Predicate::new(format!("{expected:?}"), move |v: &T| *v == expected)
}

pub fn greater_than<T>(bound: T) -> Predicate<T>
where
    T: PartialOrd + fmt::Debug + Send + Sync + 'static,
{
    Predicate::new(format!("greater than {bound:?}"), move |v: &T| *v > bound)
}

pub fn not<T: ?Sized + 'static>(inner: Predicate<T>) -> Predicate<T> {
    Predicate::new(format!("not ({})", inner.description), move |v: &T| {
        !inner.test(v)
    })
}

pub fn all_of<T: ?Sized + 'static>(parts: Vec<Predicate<T>>) -> Predicate<T> {
    let description = join_descriptions(&parts, " and ");
    Predicate::new(description, move |v: &T| parts.iter().all(|p| p.test(v)))
}

pub fn any_of<T: ?Sized + 'static>(parts: Vec<Predicate<T>>) -> Predicate<T> {
    let description = join_descriptions(&parts, " or ");
    Predicate::new(description, move |v: &T| parts.iter().any(|p| p.test(v)))
}

fn join_descriptions<T: ?Sized>(parts: &[Predicate<T>], sep: &str) -> String {
    let inner = parts
        .iter()
        .map(|p| p.description.as_str())
        .collect::<Vec<_>>()
        .join(sep);
    format!("({inner})")
}

/// Project a field of `T` and test it with `inner`.
///
/// ```ignore
/// property("name", |c: &Container| &c.name, equal_to("webapp".to_string()))
/// ```
pub fn property<T, U, G>(name: &str, getter: G, inner: Predicate<U>) -> Predicate<T>
where
    T: ?Sized + 'static,
    U: ?Sized + 'static,
    G: Fn(&T) -> &U + Send + Sync + 'static,
{
    Predicate::new(
        format!("{name} {}", inner.description),
        move |v: &T| inner.test(getter(v)),
    )
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

pub fn has_size<U: 'static>(size: usize) -> Predicate<Vec<U>> {
    Predicate::new(format!("a collection of size {size}"), move |v: &Vec<U>| {
        v.len() == size
    })
}

pub fn is_empty<U: 'static>() -> Predicate<Vec<U>> {
    Predicate::new("an empty collection", |v: &Vec<U>| v.is_empty())
}

/// At least one element satisfies `item`.
pub fn has_item<U: 'static>(item: Predicate<U>) -> Predicate<Vec<U>> {
    Predicate::new(
        format!("a collection containing {}", item.description),
        move |v: &Vec<U>| v.iter().any(|u| item.test(u)),
    )
}

/// Each predicate is satisfied by some element (not necessarily distinct).
pub fn has_items<U: 'static>(items: Vec<Predicate<U>>) -> Predicate<Vec<U>> {
    all_of(items.into_iter().map(has_item).collect())
}

pub fn every_item<U: 'static>(item: Predicate<U>) -> Predicate<Vec<U>> {
    Predicate::new(
        format!("every item {}", item.description),
        move |v: &Vec<U>| v.iter().all(|u| item.test(u)),
    )
}

pub fn some<U: 'static>(inner: Predicate<U>) -> Predicate<Option<U>> {
    Predicate::new(
        format!("present and {}", inner.description),
        move |v: &Option<U>| v.as_ref().is_some_and(|u| inner.test(u)),
    )
}

pub fn has_entry(key: &str, value: &str) -> Predicate<BTreeMap<String, String>> {
    let (k, val) = (key.to_string(), value.to_string());
    Predicate::new(
        format!("a map with {key}={value}"),
        move |m: &BTreeMap<String, String>| m.get(&k) == Some(&val),
    )
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

pub fn contains_str(needle: &str) -> Predicate<String> {
    let needle = needle.to_string();
    Predicate::new(format!("a string containing {needle:?}"), move |s: &String| {
        s.contains(needle.as_str())
    })
}

pub fn starts_with(prefix: &str) -> Predicate<String> {
    let prefix = prefix.to_string();
    Predicate::new(
        format!("a string starting with {prefix:?}"),
        move |s: &String| s.starts_with(prefix.as_str()),
    )
}

/// Each phrase occurs after the end of the previous one.
pub fn contains_in_order(phrases: &[&str]) -> Predicate<String> {
    let phrases: Vec<String> = phrases.iter().map(|p| p.to_string()).collect();
    Predicate::new(
        format!("a string containing {phrases:?} in order"),
        move |s: &String| {
            let mut offset = 0;
            for phrase in &phrases {
                match s[offset..].find(phrase.as_str()) {
                    Some(at) => offset += at + phrase.len(),
                    None => return false,
                }
            }
            true
        },
    )
}

pub fn matches_regex(pattern: &str) -> crate::Result<Predicate<String>> {
    let re = Regex::new(pattern)
        .map_err(|e| VerifyError::InvalidCondition(format!("bad pattern {pattern:?}: {e}")))?;
    Ok(Predicate::new(
        format!("a string matching /{pattern}/"),
        move |s: &String| re.is_match(s),
    ))
}
