//! Structured reporting of running times and counters.
//!
//! A `Reporter` collects a JSON tree of values. Nested objects and collections are opened with
//! `in_context`, `in_collection` and `in_collection_item`, which keeps the shape of the output isomorph to the call graph.
//! The reporter is an explicit handle passed to the preprocessing entry points, there is no global instance.
//! Use `Reporter::disabled()` to throw everything away.
//!
//! ```
//! # use compressed_ch::{report, report::Reporter};
//! let mut reporter = Reporter::new();
//! report!(reporter, "graph", "example");
//! reporter.in_context("contraction", |reporter| {
//!     report!(reporter, "rounds", 3);
//! });
//! assert_eq!(reporter.into_json()["contraction"]["rounds"], 3);
//! ```

use serde_json::{Map, Value};
use std::mem::swap;

pub use serde_json::json;

#[derive(Debug)]
enum ContextStackItem {
    Key(String),
    Collection(Vec<Value>),
    Object(Map<String, Value>),
}

#[derive(Debug)]
enum CurrentReportingContext {
    Collection(Vec<Value>),
    Object(Map<String, Value>),
    Throwaway,
}

#[derive(Debug)]
pub struct Reporter {
    current: CurrentReportingContext,
    context_stack: Vec<ContextStackItem>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    /// A reporter which collects everything into a JSON object.
    pub fn new() -> Self {
        Reporter {
            current: CurrentReportingContext::Object(Map::new()),
            context_stack: Vec::new(),
        }
    }

    /// A reporter which drops all values.
    pub fn disabled() -> Self {
        Reporter {
            current: CurrentReportingContext::Throwaway,
            context_stack: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.current, CurrentReportingContext::Throwaway)
    }

    /// Report a value under `key` in the current object context.
    pub fn report(&mut self, key: &str, val: Value) {
        match &mut self.current {
            CurrentReportingContext::Object(object) => {
                let prev = object.insert(key.to_string(), val);
                debug_assert!(prev.is_none(), "value for {} reported twice", key);
            }
            CurrentReportingContext::Collection(_) => {
                panic!("Cannot report value on collection");
            }
            CurrentReportingContext::Throwaway => (),
        }
    }

    /// Run `f` with a nested object under `key` as the current context.
    pub fn in_context<T>(&mut self, key: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        self.create_object_under_key(key.to_string());
        let res = f(self);
        self.pop_context();
        res
    }

    /// Run `f` with a nested array under `key` as the current context.
    /// Items have to be added with `in_collection_item`.
    pub fn in_collection<T>(&mut self, key: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        self.create_collection_under_key(key.to_string());
        let res = f(self);
        self.pop_context();
        res
    }

    /// Append an object to the current collection and run `f` with it as the current context.
    pub fn in_collection_item<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.create_collection_item();
        let res = f(self);
        self.pop_context();
        res
    }

    /// Finish reporting and return the collected tree.
    pub fn into_json(mut self) -> Value {
        while !self.context_stack.is_empty() {
            self.pop_context();
        }
        match self.current {
            CurrentReportingContext::Object(object) => Value::Object(object),
            CurrentReportingContext::Collection(collection) => Value::Array(collection),
            CurrentReportingContext::Throwaway => Value::Null,
        }
    }

    fn create_object_under_key(&mut self, key: String) {
        match &mut self.current {
            CurrentReportingContext::Object(object) => {
                let mut tmp = Map::new();
                swap(&mut tmp, object);
                self.context_stack.push(ContextStackItem::Object(tmp));
                self.context_stack.push(ContextStackItem::Key(key));
            }
            CurrentReportingContext::Collection(_) => {
                panic!("Cannot create object at key in collection");
            }
            CurrentReportingContext::Throwaway => self.context_stack.push(ContextStackItem::Key(key)),
        }
    }

    fn create_collection_under_key(&mut self, key: String) {
        match &mut self.current {
            CurrentReportingContext::Object(object) => {
                let mut tmp = Map::new();
                swap(&mut tmp, object);
                self.context_stack.push(ContextStackItem::Object(tmp));
                self.context_stack.push(ContextStackItem::Key(key));
                self.current = CurrentReportingContext::Collection(Vec::new());
            }
            CurrentReportingContext::Collection(_) => {
                panic!("Cannot create collection at key in collection");
            }
            CurrentReportingContext::Throwaway => self.context_stack.push(ContextStackItem::Key(key)),
        }
    }

    fn create_collection_item(&mut self) {
        match &mut self.current {
            CurrentReportingContext::Object(_) => {
                panic!("Cannot create collection item in object");
            }
            CurrentReportingContext::Collection(collection) => {
                let mut tmp = Vec::new();
                swap(&mut tmp, collection);
                self.context_stack.push(ContextStackItem::Collection(tmp));
                self.current = CurrentReportingContext::Object(Map::new());
            }
            CurrentReportingContext::Throwaway => self.context_stack.push(ContextStackItem::Collection(Vec::new())),
        }
    }

    fn pop_context(&mut self) {
        let parent = self.context_stack.pop().expect("tried to pop from empty context");

        if matches!(self.current, CurrentReportingContext::Throwaway) {
            return;
        }

        match parent {
            ContextStackItem::Key(key) => {
                let parent = self.context_stack.pop().expect("tried to pop from empty context");

                if let ContextStackItem::Object(mut object) = parent {
                    let mut prev_current = CurrentReportingContext::Object(Default::default());
                    swap(&mut self.current, &mut prev_current);

                    let prev = match prev_current {
                        CurrentReportingContext::Object(cur_object) => object.insert(key, Value::Object(cur_object)),
                        CurrentReportingContext::Collection(collection) => object.insert(key, Value::Array(collection)),
                        CurrentReportingContext::Throwaway => None,
                    };
                    debug_assert_eq!(prev, None);

                    self.current = CurrentReportingContext::Object(object);
                } else {
                    panic!("Inconsistent context stack");
                }
            }
            ContextStackItem::Collection(mut collection) => {
                let mut prev_current = CurrentReportingContext::Object(Default::default());
                swap(&mut self.current, &mut prev_current);

                match prev_current {
                    CurrentReportingContext::Object(cur_object) => {
                        collection.push(Value::Object(cur_object));
                    }
                    CurrentReportingContext::Collection(_) => {
                        panic!("Cannot insert collection into collection");
                    }
                    CurrentReportingContext::Throwaway => (),
                };

                self.current = CurrentReportingContext::Collection(collection);
            }
            ContextStackItem::Object(_) => panic!("Inconsistent context stack"),
        }
    }
}

/// Report a JSON value on the given reporter, `report!(reporter, "key", json)`.
#[macro_export]
macro_rules! report {
    ($reporter:expr, $k:expr, $($json:tt)+) => { $reporter.report($k, $crate::report::json!($($json)+)) };
}

pub mod benchmark;
pub use benchmark::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_contexts_and_collections() {
        let mut reporter = Reporter::new();
        report!(reporter, "nodes", 5);
        reporter.in_collection("rounds", |reporter| {
            for i in 0..2 {
                reporter.in_collection_item(|reporter| report!(reporter, "contracted", i));
            }
        });
        let json = reporter.into_json();
        assert_eq!(json["nodes"], 5);
        assert_eq!(json["rounds"][1]["contracted"], 1);
    }

    #[test]
    fn disabled_reporter_drops_everything() {
        let mut reporter = Reporter::disabled();
        reporter.in_context("outer", |reporter| {
            report!(reporter, "value", 1);
            reporter.in_collection("items", |reporter| reporter.in_collection_item(|reporter| report!(reporter, "x", 2)));
        });
        assert!(!reporter.is_enabled());
        assert_eq!(reporter.into_json(), Value::Null);
    }
}
