use crate::error::EvalError;
use crate::exposure::ExposureSet;
use crate::interpreter::{CallError, Reach, Receiver};
use crate::signature::CallArguments;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::Path;

/// Names the target instance itself. Always denied, even when exposed.
pub const INSTANCE_IDENTIFIER: &str = "__instance__";

/// Reflection over the target's state.
pub const INSTANCE_REFLECTION: [&str; 4] = [
    "instance_variable_get",
    "instance_variable_set",
    "instance_variables",
    "binding",
];

/// Primitives that define methods or run code with a different `self`.
pub const DEFINITION_PRIMITIVES: [&str; 8] = [
    "define_method",
    "define_singleton_method",
    "class_eval",
    "class_exec",
    "module_eval",
    "module_exec",
    "instance_eval",
    "instance_exec",
];

/// Why a name is denied regardless of exposure, `None` for ordinary names.
pub fn reserved_kind(name: &str) -> Option<DenialKind> {
    if name == INSTANCE_IDENTIFIER || INSTANCE_REFLECTION.contains(&name) {
        Some(DenialKind::InstanceAccess)
    } else if DEFINITION_PRIMITIVES.contains(&name) {
        Some(DenialKind::MethodDefinition)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NotExposed,
    InstanceAccess,
    MethodDefinition,
    ConstantAccess,
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::NotExposed => "not exposed",
            Self::InstanceAccess => "instance access",
            Self::MethodDefinition => "method definition",
            Self::ConstantAccess => "constant access",
        };
        write!(f, "{kind}")
    }
}

/// Script code tried to reach something outside its allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    identifier: String,
    kind: DenialKind,
}

impl Denial {
    pub fn new(identifier: impl Into<String>, kind: DenialKind) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> DenialKind {
        self.kind
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DenialKind::NotExposed => {
                write!(f, "'{}' is not exposed to the cleanroom", self.identifier)
            }
            DenialKind::InstanceAccess => {
                write!(f, "'{}' would reach the cleanroom's instance", self.identifier)
            }
            DenialKind::MethodDefinition => {
                write!(f, "'{}' would define methods from inside the cleanroom", self.identifier)
            }
            DenialKind::ConstantAccess => {
                write!(f, "constant '{}' is not accessible from the cleanroom", self.identifier)
            }
        }
    }
}

impl std::error::Error for Denial {}

/// Reads script files for [`Sandbox::evaluate_file_with`].
pub trait SourceLoader {
    fn load(&self, path: &Path) -> io::Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileSystemLoader;

impl SourceLoader for FileSystemLoader {
    fn load(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// A type whose exposed methods can be driven by scripts.
///
/// ```
/// use cleanroom::{Cleanroom, ExposureSet, Signature, Value};
/// use std::sync::OnceLock;
///
/// #[derive(Default)]
/// struct Greeter {
///     name: Option<String>,
/// }
///
/// impl Cleanroom for Greeter {
///     fn exposure() -> &'static ExposureSet<Self> {
///         static EXPOSURE: OnceLock<ExposureSet<Greeter>> = OnceLock::new();
///         EXPOSURE.get_or_init(|| {
///             ExposureSet::new().expose("name", Signature::positional(1), |greeter: &mut Greeter, arguments| {
///                 greeter.name = arguments.get(0).as_str().map(str::to_string);
///                 Ok(Value::Nil)
///             })
///         })
///     }
/// }
///
/// let mut greeter = Greeter::default();
/// greeter.evaluate("name 'world'").unwrap();
/// assert_eq!(greeter.name.as_deref(), Some("world"));
/// assert!(greeter.evaluate("__instance__").unwrap_err().denial().is_some());
/// ```
pub trait Cleanroom: Sized + 'static {
    fn exposure() -> &'static ExposureSet<Self>;

    fn evaluate(&mut self, source: &str) -> Result<Value, EvalError> {
        Sandbox::new(self).evaluate(source)
    }

    fn evaluate_file(&mut self, path: impl AsRef<Path>) -> Result<Value, EvalError> {
        Sandbox::new(self).evaluate_file(path)
    }

    fn exposed_methods() -> BTreeSet<String> {
        Self::exposure().exposed_methods()
    }

    fn is_exposed(name: &str) -> bool {
        Self::exposure().is_exposed(name)
    }
}

/// Evaluation scope over one target. The target is borrowed for the duration
/// of the evaluation and never becomes a script value.
pub struct Sandbox<'a, T: 'static> {
    instance: &'a mut T,
    exposure: &'static ExposureSet<T>,
}

impl<'a, T: Cleanroom> Sandbox<'a, T> {
    pub fn new(instance: &'a mut T) -> Self {
        Self::with_exposure(instance, T::exposure())
    }
}

impl<'a, T: 'static> Sandbox<'a, T> {
    pub fn with_exposure(instance: &'a mut T, exposure: &'static ExposureSet<T>) -> Self {
        Self { instance, exposure }
    }

    /// Returns the value of the last statement, `nil` for empty source.
    pub fn evaluate(mut self, source: &str) -> Result<Value, EvalError> {
        crate::script::run(source, &mut self)
    }

    pub fn evaluate_file(self, path: impl AsRef<Path>) -> Result<Value, EvalError> {
        self.evaluate_file_with(&FileSystemLoader, path)
    }

    pub fn evaluate_file_with(
        self,
        loader: &dyn SourceLoader,
        path: impl AsRef<Path>,
    ) -> Result<Value, EvalError> {
        let path = path.as_ref();
        log::debug!("Evaluating '{}'", path.display());
        let source = loader.load(path)?;
        self.evaluate(&source).map_err(|error| match error {
            EvalError::Syntax(error) => EvalError::Syntax(error.in_file(path)),
            error => error,
        })
    }
}

impl<T: 'static> Receiver for Sandbox<'_, T> {
    fn invoke(&mut self, name: &str, arguments: CallArguments) -> Result<Value, CallError> {
        self.screen(name)?;
        let Some(method) = self.exposure.get(name) else {
            return Err(CallError::Denied(Denial::new(name, DenialKind::NotExposed)));
        };
        let arguments = method
            .signature
            .bind(arguments)
            .map_err(CallError::Argument)?;
        log::trace!("Forwarding '{name}' with {arguments:?}");
        method
            .call(self.instance, arguments)
            .map_err(CallError::Method)
    }

    fn screen(&self, name: &str) -> Result<(), CallError> {
        match reserved_kind(name) {
            Some(kind) => Err(CallError::Denied(Denial::new(name, kind))),
            None => Ok(()),
        }
    }

    fn reach(&mut self, reach: Reach<'_>) -> Result<Value, CallError> {
        let denial = match reach {
            Reach::InstanceVariable(name) => Denial::new(name, DenialKind::InstanceAccess),
            Reach::Constant(name) => Denial::new(name, DenialKind::ConstantAccess),
            Reach::Definition(name) => Denial::new(name, DenialKind::MethodDefinition),
        };
        Err(CallError::Denied(denial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;
    use std::sync::OnceLock;

    #[derive(Default)]
    struct Counter {
        count: i64,
        hidden: bool,
    }

    impl Counter {
        fn hide(&mut self) {
            self.hidden = true;
        }
    }

    impl Cleanroom for Counter {
        fn exposure() -> &'static ExposureSet<Self> {
            static EXPOSURE: OnceLock<ExposureSet<Counter>> = OnceLock::new();
            EXPOSURE.get_or_init(|| {
                ExposureSet::new()
                    .expose("increment", Signature::positional(0).optional(1), |counter: &mut Counter, arguments| {
                        counter.count += arguments.get(0).as_integer().unwrap_or(1);
                        Ok(Value::Integer(counter.count))
                    })
                    .expose("fail", Signature::positional(0), |_: &mut Counter, _| {
                        anyhow::bail!("refused")
                    })
                    .expose(INSTANCE_IDENTIFIER, Signature::positional(0), |counter: &mut Counter, _| {
                        counter.hide();
                        Ok(Value::Nil)
                    })
            })
        }
    }

    struct MemoryLoader(&'static str);

    impl SourceLoader for MemoryLoader {
        fn load(&self, _: &Path) -> io::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_reserved_kinds() {
        assert_eq!(reserved_kind("__instance__"), Some(DenialKind::InstanceAccess));
        assert_eq!(reserved_kind("binding"), Some(DenialKind::InstanceAccess));
        assert_eq!(reserved_kind("class_exec"), Some(DenialKind::MethodDefinition));
        assert_eq!(reserved_kind("increment"), None);
    }

    #[test]
    fn test_exposing_the_sentinel_grants_nothing() {
        let mut counter = Counter::default();
        let error = counter.evaluate("__instance__").unwrap_err();
        assert_eq!(
            error.denial(),
            Some(&Denial::new(INSTANCE_IDENTIFIER, DenialKind::InstanceAccess))
        );
        assert!(!counter.hidden);
    }

    #[test]
    fn test_forwarding_and_method_errors() {
        let mut counter = Counter::default();
        assert_eq!(counter.evaluate("increment\nincrement 5").unwrap(), Value::Integer(6));
        let error = counter.evaluate("increment\nfail\nincrement").unwrap_err();
        assert_eq!(error.to_string(), "refused");
        assert_eq!(counter.count, 7);
    }

    #[test]
    fn test_denial_messages() {
        let mut counter = Counter::default();
        let error = counter.evaluate("count").unwrap_err();
        assert_eq!(error.to_string(), "'count' is not exposed to the cleanroom");
        let error = counter.evaluate("File").unwrap_err();
        assert_eq!(error.to_string(), "constant 'File' is not accessible from the cleanroom");
    }

    #[test]
    fn test_loader_is_used() {
        let mut counter = Counter::default();
        let result = Sandbox::new(&mut counter)
            .evaluate_file_with(&MemoryLoader("increment 2"), "memory.rb")
            .unwrap();
        assert_eq!(result, Value::Integer(2));
    }

    #[test]
    fn test_syntax_errors_name_the_file() {
        let mut counter = Counter::default();
        let error = Sandbox::new(&mut counter)
            .evaluate_file_with(&MemoryLoader("increment("), "broken.rb")
            .unwrap_err();
        let EvalError::Syntax(error) = error else {
            panic!("Expected Syntax, got {error:?}");
        };
        assert_eq!(error.filename(), Some("broken.rb"));
    }
}
