//! Terraform JSON emission with deferred references
//!
//! Tasks append `resource.<type>.<name>` blocks to an in-memory document.
//! A field that points at another task is emitted as a placeholder and
//! recorded in the deferred reference table together with the task that
//! holds it. [`TemplateTarget::finalize`] checks that every referenced block
//! was rendered and substitutes Terraform's own `${type.name.attr}` syntax,
//! so references resolve when Terraform evaluates the file, not now.
//!
//! The document is built from ordered maps, so the output is byte-for-byte
//! identical for the same set of tasks regardless of render order.

use crate::error::{Error, Result};
use crate::task::{Link, ResolveLinks, TaskKey};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Marks a string value as a placeholder; never produced by task data.
const PLACEHOLDER_MARK: char = '\u{0}';

#[derive(Debug, Clone)]
struct DeferredRef {
    from: TaskKey,
    resource_type: String,
    name: String,
    attribute: String,
}

impl DeferredRef {
    fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }

    fn expression(&self) -> String {
        format!("${{{}.{}.{}}}", self.resource_type, self.name, self.attribute)
    }
}

#[derive(Debug, Default)]
struct Document {
    providers: BTreeMap<String, Value>,
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    outputs: BTreeMap<String, Value>,
    references: Vec<DeferredRef>,
}

/// Per-run template state: the document and the deferred reference table.
#[derive(Debug, Default)]
pub struct TemplateTarget {
    doc: Mutex<Document>,
}

impl TemplateTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `provider` block to the document.
    pub fn with_provider(self, name: impl Into<String>, config: Value) -> Self {
        self.lock().providers.insert(name.into(), config);
        self
    }

    /// Number of resource blocks rendered so far.
    pub fn resource_count(&self) -> usize {
        self.lock().resources.values().map(BTreeMap::len).sum()
    }

    /// Resolve every deferred reference and serialize the document.
    ///
    /// Fails with [`Error::UnresolvedReference`] naming the referencing task
    /// and the missing block if any reference points at a block that was
    /// never rendered.
    pub fn finalize(&self) -> Result<String> {
        let doc = self.lock();

        let mut missing: Vec<&DeferredRef> = doc
            .references
            .iter()
            .filter(|r| {
                doc.resources
                    .get(&r.resource_type)
                    .is_none_or(|blocks| !blocks.contains_key(&r.name))
            })
            .collect();
        missing.sort_by(|a, b| (&a.from, a.address()).cmp(&(&b.from, b.address())));
        if let Some(first) = missing.first() {
            return Err(Error::UnresolvedReference {
                from: first.from.clone(),
                missing: first.address(),
            });
        }

        let mut root = Map::new();
        if !doc.providers.is_empty() {
            root.insert("provider".into(), serde_json::to_value(&doc.providers)?);
        }
        if !doc.resources.is_empty() {
            root.insert("resource".into(), serde_json::to_value(&doc.resources)?);
        }
        if !doc.outputs.is_empty() {
            let outputs: BTreeMap<&String, Value> = doc
                .outputs
                .iter()
                .map(|(name, value)| (name, serde_json::json!({ "value": value })))
                .collect();
            root.insert("output".into(), serde_json::to_value(outputs)?);
        }

        let mut root = Value::Object(root);
        resolve_placeholders(&mut root, &doc.references);

        let mut out = serde_json::to_string_pretty(&root)?;
        out.push('\n');
        Ok(out)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Document> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A task's handle on the template document during its render step.
pub struct TemplateWriter<'a> {
    target: &'a TemplateTarget,
    from: &'a TaskKey,
    links: &'a dyn ResolveLinks,
}

impl<'a> TemplateWriter<'a> {
    pub fn new(target: &'a TemplateTarget, from: &'a TaskKey, links: &'a dyn ResolveLinks) -> Self {
        Self {
            target,
            from,
            links,
        }
    }

    /// The task being rendered.
    pub fn task(&self) -> &TaskKey {
        self.from
    }

    /// Append a resource block. The block name is sanitized with
    /// [`template_name`]; rendering the same block twice is an error.
    pub fn add_resource(
        &self,
        resource_type: &str,
        name: &str,
        body: impl Serialize,
    ) -> anyhow::Result<()> {
        let body = serde_json::to_value(body)?;
        let name = template_name(name);
        let mut doc = self.target.lock();
        let blocks = doc.resources.entry(resource_type.to_string()).or_default();
        if blocks.contains_key(&name) {
            anyhow::bail!("{} rendered {resource_type}.{name} twice", self.from);
        }
        blocks.insert(name, body);
        Ok(())
    }

    /// Add an `output` value.
    pub fn add_output(&self, name: &str, value: Value) {
        self.target.lock().outputs.insert(template_name(name), value);
    }

    /// A deferred reference to `attribute` of another block.
    pub fn reference(&self, resource_type: &str, name: &str, attribute: &str) -> Value {
        let mut doc = self.target.lock();
        let id = doc.references.len();
        doc.references.push(DeferredRef {
            from: self.from.clone(),
            resource_type: resource_type.to_string(),
            name: template_name(name),
            attribute: attribute.to_string(),
        });
        Value::String(format!("{PLACEHOLDER_MARK}{id}{PLACEHOLDER_MARK}"))
    }

    /// Emit a link field.
    ///
    /// A link to another task becomes a deferred reference to its block. A
    /// link to a task whose lifecycle renders no block, or to a known
    /// provider identifier, is emitted as the literal identifier.
    pub fn link(&self, link: &Link, attribute: &str) -> Result<Value> {
        match link {
            Link::Id(id) => Ok(Value::String(id.clone())),
            Link::Task(key) => {
                if let Some((resource_type, name)) = self.links.template_address(key) {
                    return Ok(self.reference(resource_type, &name, attribute));
                }
                self.links
                    .identifier(key)
                    .map(Value::String)
                    .ok_or_else(|| Error::UnresolvedReference {
                        from: self.from.clone(),
                        missing: key.to_string(),
                    })
            }
        }
    }

    /// Emit an optional link field as its `id` attribute.
    pub fn link_id(&self, link: &Option<Link>) -> Result<Option<Value>> {
        link.as_ref().map(|l| self.link(l, "id")).transpose()
    }
}

/// Sanitize a task name into a valid template block name.
///
/// Anything other than ASCII letters, digits, `_` and `-` becomes `-`, and
/// a leading digit or dash gets a `_` prefix.
pub fn template_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        out.insert(0, '_');
    }
    out
}

fn resolve_placeholders(value: &mut Value, references: &[DeferredRef]) {
    match value {
        Value::String(s) => {
            if let Some(id) = placeholder_id(s)
                && let Some(reference) = references.get(id)
            {
                *s = reference.expression();
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_placeholders(item, references);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                resolve_placeholders(item, references);
            }
        }
        _ => {}
    }
}

fn placeholder_id(s: &str) -> Option<usize> {
    s.strip_prefix(PLACEHOLDER_MARK)?
        .strip_suffix(PLACEHOLDER_MARK)?
        .parse()
        .ok()
}
