use anyhow::{Context, bail};
use cleanroom::{Arguments, Cleanroom, ExposureSet, Signature, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Package manifest built by a script, the demo target of the CLI.
#[derive(Debug, Default, Serialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub tags: Vec<String>,
    pub options: BTreeMap<String, Value>,
    pub maintainers: Vec<Maintainer>,
}

#[derive(Debug, Serialize)]
pub struct Dependency {
    pub name: String,
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Maintainer {
    pub name: String,
    pub email: Option<String>,
}

impl Manifest {
    fn depends(&mut self, arguments: Arguments) -> anyhow::Result<Value> {
        let name = text(&arguments.get(0), "dependency name")?;
        let version = optional_text(&arguments.keyword("version"), "version")?;
        if self.dependencies.iter().any(|dependency| dependency.name == name) {
            bail!("'{name}' is already a dependency");
        }
        self.dependencies.push(Dependency { name, version });
        Ok(Value::Integer(self.dependencies.len() as i64))
    }

    fn tag(&mut self, arguments: Arguments) -> anyhow::Result<Value> {
        for tag in arguments.positional() {
            let tag = text(tag, "tag")?;
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        Ok(Value::from(self.tags.clone()))
    }

    fn option(&mut self, arguments: Arguments) -> anyhow::Result<Value> {
        let key = text(&arguments.get(0), "option key")?;
        let value = arguments.get(1);
        self.options.insert(key, value.clone());
        Ok(value)
    }

    fn maintainer(&mut self, arguments: Arguments) -> anyhow::Result<Value> {
        let name = text(&arguments.get(0), "maintainer name")?;
        let email = optional_text(&arguments.keyword("email"), "email")?;
        if let Some(email) = &email {
            if !email.contains('@') {
                bail!("'{email}' is not an email address");
            }
        }
        self.maintainers.push(Maintainer { name, email });
        Ok(Value::Nil)
    }
}

/// `name 'x'` sets, `name` reads.
fn accessor(
    field: fn(&mut Manifest) -> &mut Option<String>,
    what: &'static str,
) -> impl Fn(&mut Manifest, Arguments) -> anyhow::Result<Value> + Send + Sync + 'static {
    move |manifest: &mut Manifest, arguments: Arguments| {
        let slot = field(manifest);
        if let Some(value) = arguments.positional().first() {
            *slot = Some(text(value, what)?);
        }
        Ok(Value::from(slot.clone()))
    }
}

fn text(value: &Value, what: &str) -> anyhow::Result<String> {
    match value {
        Value::String(text) | Value::Symbol(text) => Ok(text.clone()),
        other => bail!("{what} must be a string, got {}", other.inspect()),
    }
}

fn optional_text(value: &Value, what: &str) -> anyhow::Result<Option<String>> {
    match value {
        Value::Nil => Ok(None),
        value => text(value, what).map(Some).with_context(|| format!("invalid {what}")),
    }
}

impl Cleanroom for Manifest {
    fn exposure() -> &'static ExposureSet<Self> {
        static EXPOSURE: OnceLock<ExposureSet<Manifest>> = OnceLock::new();
        EXPOSURE.get_or_init(|| {
            ExposureSet::new()
                .expose(
                    "name",
                    Signature::positional(0).optional(1),
                    accessor(|manifest| &mut manifest.name, "name"),
                )
                .expose(
                    "version",
                    Signature::positional(0).optional(1),
                    accessor(|manifest| &mut manifest.version, "version"),
                )
                .expose(
                    "description",
                    Signature::positional(0).optional(1),
                    accessor(|manifest| &mut manifest.description, "description"),
                )
                .expose(
                    "depends",
                    Signature::positional(1).keyword("version", Value::Nil),
                    Manifest::depends,
                )
                .expose("tag", Signature::positional(0).rest(), Manifest::tag)
                .expose("option", Signature::positional(2), Manifest::option)
                .expose(
                    "maintainer",
                    Signature::positional(1).keyword("email", Value::Nil),
                    Manifest::maintainer,
                )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_script() {
        let mut manifest = Manifest::default();
        manifest
            .evaluate(
                "name 'cleanroom'\n\
                 version '0.1.0'\n\
                 depends 'log', version: '0.4'\n\
                 depends 'chumsky'\n\
                 tag :parser, 'sandbox', :parser\n\
                 option 'threads', 2 * 2\n\
                 maintainer 'Ada', email: 'ada@example.com'\n",
            )
            .unwrap();
        assert_eq!(manifest.name.as_deref(), Some("cleanroom"));
        assert_eq!(manifest.dependencies.len(), 2);
        assert_eq!(manifest.dependencies[0].version.as_deref(), Some("0.4"));
        assert_eq!(manifest.dependencies[1].version, None);
        assert_eq!(manifest.tags, vec!["parser", "sandbox"]);
        assert_eq!(manifest.options.get("threads"), Some(&Value::Integer(4)));
        assert_eq!(manifest.maintainers[0].email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_getter_returns_current_value() {
        let mut manifest = Manifest::default();
        let value = manifest.evaluate("name 'x'\nname.upcase").unwrap();
        assert_eq!(value, Value::from("X"));
    }

    #[test]
    fn test_method_errors_are_passed_through() {
        let mut manifest = Manifest::default();
        let error = manifest.evaluate("depends 'a'\ndepends 'a'").unwrap_err();
        assert_eq!(error.to_string(), "'a' is already a dependency");
        let error = manifest.evaluate("maintainer 'Bob', email: 'nope'").unwrap_err();
        assert_eq!(error.to_string(), "'nope' is not an email address");
    }
}
