use crate::sandbox::reserved_kind;
use crate::signature::{Arguments, Signature};
use crate::value::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Calls one method on the target with bound arguments.
pub type Adapter<T> = dyn Fn(&mut T, Arguments) -> anyhow::Result<Value> + Send + Sync;

pub struct ExposedMethod<T: ?Sized> {
    pub signature: Signature,
    adapter: Arc<Adapter<T>>,
}

impl<T: ?Sized> ExposedMethod<T> {
    pub(crate) fn call(&self, target: &mut T, arguments: Arguments) -> anyhow::Result<Value> {
        (self.adapter)(target, arguments)
    }
}

impl<T: ?Sized> Clone for ExposedMethod<T> {
    fn clone(&self) -> Self {
        Self {
            signature: self.signature.clone(),
            adapter: Arc::clone(&self.adapter),
        }
    }
}

/// Methods of `T` reachable from sandboxed scripts.
///
/// Built once per type, usually inside a `OnceLock` in [`Cleanroom::exposure`](crate::Cleanroom::exposure),
/// and only read after that.
pub struct ExposureSet<T: ?Sized> {
    methods: HashMap<String, ExposedMethod<T>>,
}

impl<T: ?Sized + 'static> ExposureSet<T> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Registers `name`. Exposing a name again replaces its adapter.
    ///
    /// Reserved names are accepted but grant nothing, the sandbox denies them
    /// before looking here.
    pub fn expose(
        mut self,
        name: impl Into<String>,
        signature: Signature,
        adapter: impl Fn(&mut T, Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        if let Some(kind) = reserved_kind(&name) {
            log::warn!("Exposing reserved identifier '{name}' has no effect ({kind})");
        }
        log::debug!("Exposing '{name}{signature}'");
        self.methods.insert(
            name,
            ExposedMethod {
                signature,
                adapter: Arc::new(adapter),
            },
        );
        self
    }

    /// Adds every method of an ancestor's set, reached through `project`.
    /// Methods this set already exposes keep their own adapter.
    pub fn inherit<P: ?Sized + 'static>(
        mut self,
        parent: &ExposureSet<P>,
        project: fn(&mut T) -> &mut P,
    ) -> Self {
        for (name, method) in &parent.methods {
            if self.methods.contains_key(name) {
                continue;
            }
            log::debug!("Inheriting '{name}'");
            let inherited = method.clone();
            self.methods.insert(
                name.clone(),
                ExposedMethod {
                    signature: inherited.signature.clone(),
                    adapter: Arc::new(move |target: &mut T, arguments: Arguments| {
                        inherited.call(project(target), arguments)
                    }),
                },
            );
        }
        self
    }

    pub fn is_exposed(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Snapshot of the exposed names.
    pub fn exposed_methods(&self) -> BTreeSet<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.methods.get(name).map(|method| &method.signature)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ExposedMethod<T>> {
        self.methods.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<T: ?Sized + 'static> Default for ExposureSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for ExposureSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.methods.keys().collect::<Vec<_>>();
        names.sort();
        f.debug_struct("ExposureSet").field("methods", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        count: i64,
    }

    #[derive(Default)]
    struct Wrapper {
        counter: Counter,
        label: String,
    }

    fn counter_exposure() -> ExposureSet<Counter> {
        ExposureSet::new()
            .expose("increment", Signature::positional(0), |counter: &mut Counter, _| {
                counter.count += 1;
                Ok(Value::Integer(counter.count))
            })
            .expose("label", Signature::positional(0), |_: &mut Counter, _| {
                Ok(Value::from("counter"))
            })
    }

    fn counter(wrapper: &mut Wrapper) -> &mut Counter {
        &mut wrapper.counter
    }

    #[test]
    fn test_expose_and_query() {
        let exposure = counter_exposure();
        assert!(exposure.is_exposed("increment"));
        assert!(!exposure.is_exposed("count"));
        assert_eq!(
            exposure.exposed_methods(),
            BTreeSet::from(["increment".to_string(), "label".to_string()])
        );
    }

    #[test]
    fn test_expose_twice_keeps_one_entry() {
        let exposure = counter_exposure().expose(
            "increment",
            Signature::positional(1),
            |counter: &mut Counter, arguments| {
                counter.count += arguments.get(0).as_integer().unwrap_or(0);
                Ok(Value::Integer(counter.count))
            },
        );
        assert_eq!(exposure.len(), 2);
        assert_eq!(exposure.signature("increment"), Some(&Signature::positional(1)));
    }

    #[test]
    fn test_inherit_is_cumulative() {
        let parent = counter_exposure();
        let exposure = ExposureSet::new()
            .expose("label", Signature::positional(0), |wrapper: &mut Wrapper, _| {
                Ok(Value::from(wrapper.label.clone()))
            })
            .inherit(&parent, counter);
        assert_eq!(exposure.len(), 2);

        let mut wrapper = Wrapper {
            label: "wrapper".into(),
            ..Wrapper::default()
        };
        let increment = exposure.get("increment").unwrap();
        increment.call(&mut wrapper, Arguments::default()).unwrap();
        assert_eq!(wrapper.counter.count, 1);

        let label = exposure.get("label").unwrap();
        assert_eq!(
            label.call(&mut wrapper, Arguments::default()).unwrap(),
            Value::from("wrapper")
        );
    }
}
