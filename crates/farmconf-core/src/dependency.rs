//! Requirement and conflict evaluation
//!
//! Pure functions over a `ConfigRecord` and the `Catalog`; no I/O.
//!
//! A leaf predicate holds when the referenced extension is enabled, or when
//! the referenced setting's effective value is truthy, inverted by `negate`.
//! A reference the catalog does not know evaluates to false, negated or not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::catalog::Catalog;
use farmconf_types::record::ConfigRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateKind {
	Extension,
	Setting,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
	pub kind: PredicateKind,
	pub reference: Box<str>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub negate: bool,
}

impl Predicate {
	pub fn extension(id: impl Into<Box<str>>) -> Self {
		Self { kind: PredicateKind::Extension, reference: id.into(), negate: false }
	}

	pub fn setting(key: impl Into<Box<str>>) -> Self {
		Self { kind: PredicateKind::Setting, reference: key.into(), negate: false }
	}

	pub fn negated(mut self) -> Self {
		self.negate = !self.negate;
		self
	}

	fn refers_to(&self, subject: Subject<'_>) -> bool {
		match (self.kind, subject) {
			(PredicateKind::Extension, Subject::Extension(id))
			| (PredicateKind::Setting, Subject::Setting(id)) => &*self.reference == id,
			_ => false,
		}
	}
}

impl std::fmt::Display for Predicate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let kind = match self.kind {
			PredicateKind::Extension => "extension",
			PredicateKind::Setting => "setting",
		};
		write!(f, "{}{}:{}", if self.negate { "!" } else { "" }, kind, self.reference)
	}
}

/// Requirement expression: AND/OR tree over predicates
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
	All(Vec<Requirement>),
	Any(Vec<Requirement>),
	Pred(Predicate),
}

impl Requirement {
	/// All of the given extensions must be enabled
	pub fn extensions<I, S>(ids: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<Box<str>>,
	{
		Requirement::All(ids.into_iter().map(|id| Requirement::Pred(Predicate::extension(id))).collect())
	}

	fn mentions(&self, subject: Subject<'_>) -> bool {
		match self {
			Requirement::All(children) | Requirement::Any(children) => {
				children.iter().any(|c| c.mentions(subject))
			}
			Requirement::Pred(pred) => pred.refers_to(subject),
		}
	}
}

impl From<Predicate> for Requirement {
	fn from(pred: Predicate) -> Self {
		Requirement::Pred(pred)
	}
}

impl std::fmt::Display for Requirement {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let (children, op, empty) = match self {
			Requirement::Pred(pred) => return write!(f, "{}", pred),
			Requirement::All(children) => (children, " AND ", "TRUE"),
			Requirement::Any(children) => (children, " OR ", "FALSE"),
		};
		if children.is_empty() {
			return f.write_str(empty);
		}
		f.write_str("(")?;
		for (i, child) in children.iter().enumerate() {
			if i > 0 {
				f.write_str(op)?;
			}
			write!(f, "{}", child)?;
		}
		f.write_str(")")
	}
}

/// Something that can be enabled in a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subject<'a> {
	Extension(&'a str),
	Setting(&'a str),
}

impl Subject<'_> {
	pub fn id(&self) -> &str {
		match self {
			Subject::Extension(id) | Subject::Setting(id) => id,
		}
	}
}

fn eval_predicate(pred: &Predicate, record: &ConfigRecord, catalog: &Catalog) -> bool {
	let holds = match pred.kind {
		PredicateKind::Extension => {
			if catalog.extension(&pred.reference).is_none() {
				return false;
			}
			record.has_extension(&pred.reference)
		}
		PredicateKind::Setting => match catalog.effective(&record.settings, &pred.reference) {
			Some(value) => value.is_truthy(),
			None => return false,
		},
	};
	holds != pred.negate
}

/// Evaluate a requirement expression against a record
pub fn evaluate(expr: &Requirement, record: &ConfigRecord, catalog: &Catalog) -> bool {
	match expr {
		Requirement::All(children) => children.iter().all(|c| evaluate(c, record, catalog)),
		Requirement::Any(children) => children.iter().any(|c| evaluate(c, record, catalog)),
		Requirement::Pred(pred) => eval_predicate(pred, record, catalog),
	}
}

/// Leaf predicates responsible for a false evaluation (empty if it holds)
pub fn unmet(expr: &Requirement, record: &ConfigRecord, catalog: &Catalog) -> Vec<Predicate> {
	if evaluate(expr, record, catalog) {
		return Vec::new();
	}
	match expr {
		Requirement::All(children) | Requirement::Any(children) => {
			children.iter().flat_map(|c| unmet(c, record, catalog)).collect()
		}
		Requirement::Pred(pred) => vec![pred.clone()],
	}
}

/// Whether a subject is currently "on" in the record
pub fn is_active(subject: Subject<'_>, record: &ConfigRecord, catalog: &Catalog) -> bool {
	match subject {
		Subject::Extension(id) => record.has_extension(id),
		Subject::Setting(key) => {
			catalog.effective(&record.settings, key).is_some_and(|value| value.is_truthy())
		}
	}
}

/// Active settings: truthy overrides plus truthy defaults of non-wildcard settings
fn active_settings<'a>(record: &'a ConfigRecord, catalog: &'a Catalog) -> BTreeSet<&'a str> {
	let mut keys: BTreeSet<&str> = record
		.settings
		.iter()
		.filter(|(_, value)| value.is_truthy())
		.map(|(key, _)| &**key)
		.collect();
	for def in catalog.settings() {
		if !def.is_wildcard() && !record.settings.contains_key(&def.key) && def.default.is_truthy()
		{
			keys.insert(&*def.key);
		}
	}
	keys
}

/// Ids present in the record that conflict with `candidate`, in either direction
pub fn conflicts_with(
	candidate: Subject<'_>,
	record: &ConfigRecord,
	catalog: &Catalog,
) -> BTreeSet<Box<str>> {
	let mut found = BTreeSet::new();

	let declared = match candidate {
		Subject::Extension(id) => catalog.extension(id).map(|def| def.conflicts.as_slice()),
		Subject::Setting(key) => catalog.setting(key).map(|def| def.conflicts.as_slice()),
	};
	for pred in declared.unwrap_or_default() {
		if pred.reference.as_ref() != candidate.id() && eval_predicate(pred, record, catalog) {
			found.insert(pred.reference.clone());
		}
	}

	for ext in &record.extensions {
		if &**ext == candidate.id() {
			continue;
		}
		if let Some(def) = catalog.extension(ext) {
			if def.conflicts.iter().any(|pred| pred.refers_to(candidate)) {
				found.insert(ext.clone());
			}
		}
	}
	for key in active_settings(record, catalog) {
		if key == candidate.id() {
			continue;
		}
		if let Some(def) = catalog.setting(key) {
			if def.conflicts.iter().any(|pred| pred.refers_to(candidate)) {
				found.insert(key.into());
			}
		}
	}

	found
}

/// Active extensions and settings that mention `subject` in their requirement
/// and whose requirement no longer holds in `record`
pub fn broken_dependents(
	subject: Subject<'_>,
	record: &ConfigRecord,
	catalog: &Catalog,
) -> Vec<(PredicateKind, Box<str>)> {
	let mut broken = Vec::new();

	for ext in &record.extensions {
		if let Some(requires) = catalog.extension(ext).and_then(|def| def.requires.as_ref()) {
			if requires.mentions(subject) && !evaluate(requires, record, catalog) {
				broken.push((PredicateKind::Extension, ext.clone()));
			}
		}
	}
	for key in active_settings(record, catalog) {
		if let Some(requires) = catalog.setting(key).and_then(|def| def.requires.as_ref()) {
			if requires.mentions(subject) && !evaluate(requires, record, catalog) {
				broken.push((PredicateKind::Setting, key.into()));
			}
		}
	}

	broken
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::{CatalogBuilder, ExtensionDefinition, SettingDefinition};
	use farmconf_types::record::{CoreAttributes, SettingValue};
	use farmconf_types::types::TenantKey;

	fn catalog() -> Catalog {
		let mut builder = CatalogBuilder::new();
		for id in ["A", "B", "C"] {
			builder
				.register_extension(ExtensionDefinition::builder(id).description(id).build().unwrap())
				.unwrap();
		}
		builder
			.register_extension(
				ExtensionDefinition::builder("D")
					.description("D")
					.requires(Requirement::extensions(["A"]))
					.conflicts_with(Predicate::extension("C"))
					.build()
					.unwrap(),
			)
			.unwrap();
		builder
			.register_setting(
				SettingDefinition::builder("wgFlag")
					.description("flag")
					.default(SettingValue::Bool(false))
					.build()
					.unwrap(),
			)
			.unwrap();
		builder
			.register_setting(
				SettingDefinition::builder("wgOn")
					.description("on by default")
					.default(SettingValue::Bool(true))
					.build()
					.unwrap(),
			)
			.unwrap();
		builder.freeze()
	}

	fn record(exts: &[&str]) -> ConfigRecord {
		let mut record =
			ConfigRecord::new(TenantKey::new("wikidb").unwrap(), CoreAttributes::new("W", "en"));
		record.extensions = exts.iter().map(|e| Box::from(*e)).collect();
		record
	}

	#[test]
	fn test_empty_nodes() {
		let catalog = catalog();
		let record = record(&[]);
		assert!(evaluate(&Requirement::All(vec![]), &record, &catalog));
		assert!(!evaluate(&Requirement::Any(vec![]), &record, &catalog));
	}

	#[test]
	fn test_unresolved_reference_is_false() {
		let catalog = catalog();
		let record = record(&[]);
		let pred = Predicate::extension("Nope");
		assert!(!evaluate(&pred.clone().into(), &record, &catalog));
		assert!(!evaluate(&pred.negated().into(), &record, &catalog));
		assert!(!evaluate(&Predicate::setting("wgNope").negated().into(), &record, &catalog));
	}

	#[test]
	fn test_setting_effective_value() {
		let catalog = catalog();
		let mut record = record(&[]);
		assert!(evaluate(&Predicate::setting("wgOn").into(), &record, &catalog));
		assert!(!evaluate(&Predicate::setting("wgFlag").into(), &record, &catalog));
		assert!(evaluate(&Predicate::setting("wgFlag").negated().into(), &record, &catalog));

		record.settings.insert("wgFlag".into(), SettingValue::Bool(true));
		record.settings.insert("wgOn".into(), SettingValue::Bool(false));
		assert!(evaluate(&Predicate::setting("wgFlag").into(), &record, &catalog));
		assert!(!evaluate(&Predicate::setting("wgOn").into(), &record, &catalog));
	}

	#[test]
	fn test_any_all_and_unmet() {
		let catalog = catalog();
		let record = record(&["A"]);
		let expr = Requirement::All(vec![
			Predicate::extension("A").into(),
			Requirement::Any(vec![Predicate::extension("B").into(), Predicate::extension("C").into()]),
		]);
		assert!(!evaluate(&expr, &record, &catalog));
		let missing: Vec<_> = unmet(&expr, &record, &catalog).into_iter().map(|p| p.reference).collect();
		assert_eq!(missing, vec![Box::from("B"), Box::from("C")]);
		assert_eq!(expr.to_string(), "(extension:A AND (extension:B OR extension:C))");
	}

	#[test]
	fn test_conflicts_both_directions() {
		let catalog = catalog();
		let with_c = record(&["A", "C"]);
		assert_eq!(
			conflicts_with(Subject::Extension("D"), &with_c, &catalog).into_iter().collect::<Vec<_>>(),
			vec![Box::from("C")]
		);

		let with_d = record(&["A", "D"]);
		assert_eq!(
			conflicts_with(Subject::Extension("C"), &with_d, &catalog).into_iter().collect::<Vec<_>>(),
			vec![Box::from("D")]
		);
		assert!(conflicts_with(Subject::Extension("B"), &with_d, &catalog).is_empty());
	}

	#[test]
	fn test_broken_dependents() {
		let catalog = catalog();
		let record = record(&["D"]);
		let broken = broken_dependents(Subject::Extension("A"), &record, &catalog);
		assert_eq!(broken, vec![(PredicateKind::Extension, Box::from("D"))]);
		assert!(broken_dependents(Subject::Extension("B"), &record, &catalog).is_empty());
	}

	#[test]
	fn test_requirement_serde_shape() {
		let expr = Requirement::Any(vec![Predicate::setting("wgFlag").negated().into()]);
		let json = serde_json::to_value(&expr).unwrap();
		assert_eq!(
			json,
			serde_json::json!({"any": [{"pred": {"kind": "setting", "reference": "wgFlag", "negate": true}}]})
		);
	}
}

// vim: ts=4
