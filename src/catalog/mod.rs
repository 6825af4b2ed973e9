pub mod pattern;
pub mod slug;

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{FingerprintError, Result};
use pattern::Pattern;

/// Accepts either a bare string or a list of strings in the source JSON,
/// normalizing both to `Vec<String>`. The catalog format allows a
/// single-pattern shorthand everywhere a list is otherwise expected.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl From<StringOrList> for Vec<String> {
    fn from(v: StringOrList) -> Self {
        match v {
            StringOrList::Single(s) => vec![s],
            StringOrList::List(l) => l,
        }
    }
}

fn deserialize_string_or_list<'de, D>(d: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<StringOrList>::deserialize(d)?
        .map(Into::into)
        .unwrap_or_default())
}

fn deserialize_keyed<'de, D>(
    d: D,
) -> std::result::Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, StringOrList>> = Option::deserialize(d)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into()))
        .collect())
}

/// DOM pattern entry policy: `text`/`exists` compare element text, `attributes`
/// compares a named attribute, `properties` an element property (rarely
/// reachable without a live DOM — treated like `attributes` here since this
/// engine parses static HTML for DOM patterns).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomSignal {
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub exists: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<String>>,
}

impl<'de> serde::de::Deserialize<'de> for DomSignalOrShorthand {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Shorthand(StringOrList),
            Full(DomSignal),
        }
        Ok(match Shape::deserialize(deserializer)? {
            Shape::Shorthand(s) => DomSignalOrShorthand(DomSignal {
                exists: s.into(),
                ..Default::default()
            }),
            Shape::Full(full) => DomSignalOrShorthand(full),
        })
    }
}

/// Wrapper solely so `DomSignal` can have two serde shapes without an
/// `untagged` derive colliding with its own field names.
pub struct DomSignalOrShorthand(pub DomSignal);

/// Raw technology entry as it appears in the catalog JSON, before pattern
/// compilation.
#[derive(Debug, Clone, Deserialize)]
pub struct TechnologyDef {
    #[serde(default)]
    pub cats: Vec<i64>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub cpe: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub url: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_keyed")]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_keyed")]
    pub cookies: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub scripts: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_keyed")]
    pub meta: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub dns: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub html: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_keyed")]
    pub js: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub dom: BTreeMap<String, DomSignalOrShorthand>,
    #[serde(rename = "certIssuer", default, deserialize_with = "deserialize_string_or_list")]
    pub cert_issuer: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub implies: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub excludes: Vec<String>,
}

impl std::fmt::Debug for DomSignalOrShorthand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Clone for DomSignalOrShorthand {
    fn clone(&self) -> Self {
        DomSignalOrShorthand(self.0.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryDef>,
    #[serde(default)]
    pub technologies: BTreeMap<String, TechnologyDef>,
}

/// A category entry (spec §3): integer id, derived slug, name, priority.
#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub priority: i32,
}

fn compile_list(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns.iter().map(|p| Pattern::parse(p)).collect()
}

fn compile_keyed(map: &BTreeMap<String, Vec<String>>) -> Result<BTreeMap<String, Vec<Pattern>>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), compile_list(v)?)))
        .collect()
}

/// A single DOM signal, compiled: the selector patterns per observation
/// field are pre-parsed the same way every other signal is.
#[derive(Debug, Clone, Default)]
pub struct CompiledDomSignal {
    pub text: Vec<Pattern>,
    pub exists: Vec<Pattern>,
    pub attributes: BTreeMap<String, Vec<Pattern>>,
    pub properties: BTreeMap<String, Vec<Pattern>>,
}

/// A technology entry (spec §3), fully compiled: every pattern group holds
/// `Pattern`s with their regex already built.
#[derive(Debug, Clone)]
pub struct Technology {
    pub name: String,
    pub slug: String,
    pub categories: Vec<i64>,
    pub icon: Option<String>,
    pub website: Option<String>,
    pub cpe: Option<String>,
    pub url: Vec<Pattern>,
    pub headers: BTreeMap<String, Vec<Pattern>>,
    pub cookies: BTreeMap<String, Vec<Pattern>>,
    pub scripts: Vec<Pattern>,
    pub meta: BTreeMap<String, Vec<Pattern>>,
    pub dns: Vec<Pattern>,
    pub html: Vec<Pattern>,
    pub js: BTreeMap<String, Vec<Pattern>>,
    pub dom: BTreeMap<String, CompiledDomSignal>,
    pub cert_issuer: Vec<Pattern>,
    pub implies: Vec<Pattern>,
    pub excludes: Vec<Pattern>,
}

impl Technology {
    fn compile(name: &str, def: &TechnologyDef) -> Result<Technology> {
        let mut dom = BTreeMap::new();
        for (selector, sig) in &def.dom {
            let s = &sig.0;
            dom.insert(
                selector.clone(),
                CompiledDomSignal {
                    text: compile_list(&s.text)?,
                    exists: compile_list(&s.exists)?,
                    attributes: compile_keyed(&s.attributes)?,
                    properties: compile_keyed(&s.properties)?,
                },
            );
        }

        Ok(Technology {
            name: name.to_string(),
            slug: slug::slug(name),
            categories: def.cats.clone(),
            icon: def.icon.clone(),
            website: def.website.clone(),
            cpe: def.cpe.clone(),
            url: compile_list(&def.url)?,
            headers: compile_keyed(&def.headers)?,
            cookies: compile_keyed(&def.cookies)?,
            scripts: compile_list(&def.scripts)?,
            meta: compile_keyed(&def.meta)?,
            dns: compile_list(&def.dns)?,
            html: compile_list(&def.html)?,
            js: compile_keyed(&def.js)?,
            dom,
            cert_issuer: compile_list(&def.cert_issuer)?,
            // Compiled the same way every other signal pattern is (spec §4.2):
            // an implies/excludes entry states the implied tech's own
            // confidence/version template, not just a bare name.
            implies: compile_list(&def.implies)?,
            excludes: compile_list(&def.excludes)?,
        })
    }
}

/// The parsed, cached technology catalog. Built once at startup from JSON
/// and shared read-only across every worker (spec §3 Lifecycle, §4.2
/// Concurrency: "Read-only catalog data is never mutated after load").
#[derive(Debug, Clone)]
pub struct Catalog {
    pub categories: BTreeMap<i64, Category>,
    pub technologies: Vec<Technology>,
}

impl Catalog {
    pub fn parse(json: &str) -> Result<Catalog> {
        let file: CatalogFile = serde_json::from_str(json)
            .map_err(|e| FingerprintError::invalid_input(format!("bad catalog JSON: {e}")))?;

        let mut categories = BTreeMap::new();
        for (id_str, def) in &file.categories {
            let id: i64 = id_str
                .parse()
                .map_err(|_| FingerprintError::invalid_input(format!("bad category id {id_str:?}")))?;
            categories.insert(
                id,
                Category {
                    id,
                    slug: slug::slug(&def.name),
                    name: def.name.clone(),
                    priority: def.priority,
                },
            );
        }

        let mut technologies = Vec::with_capacity(file.technologies.len());
        for (name, def) in &file.technologies {
            match Technology::compile(name, def) {
                Ok(t) => technologies.push(t),
                Err(e) => {
                    // A single bad technology aborts startup per spec §7
                    // ("Compilation failures during catalog load abort startup").
                    return Err(e);
                }
            }
        }

        Ok(Catalog {
            categories,
            technologies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_catalog() {
        let json = r#"{
            "categories": {"1": {"name": "Web servers", "priority": 5}},
            "technologies": {
                "Nginx": {
                    "cats": [1],
                    "headers": {"Server": "nginx(?:/([\\d.]+))?\\;version:\\1"}
                }
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        assert_eq!(catalog.categories.len(), 1);
        assert_eq!(catalog.categories[&1].name, "Web servers");
        assert_eq!(catalog.technologies.len(), 1);
        let nginx = &catalog.technologies[0];
        assert_eq!(nginx.name, "Nginx");
        assert_eq!(nginx.slug, "nginx");
        assert!(nginx.headers.contains_key("server"));
    }

    #[test]
    fn shorthand_string_pattern_groups_normalize_to_lists() {
        let json = r#"{
            "categories": {},
            "technologies": {
                "WordPress": {"url": "/wp-content/", "implies": "PHP"}
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let wp = &catalog.technologies[0];
        assert_eq!(wp.url.len(), 1);
        assert_eq!(wp.implies.len(), 1);
        assert_eq!(wp.implies[0].value, "PHP");
    }

    #[test]
    fn dom_shorthand_means_existence_check() {
        let json = r#"{
            "categories": {},
            "technologies": {
                "ReactApp": {"dom": {"#root": ""}}
            }
        }"#;
        let catalog = Catalog::parse(json).unwrap();
        let t = &catalog.technologies[0];
        let sig = t.dom.get("#root").unwrap();
        assert_eq!(sig.exists.len(), 1);
    }

    #[test]
    fn bad_regex_aborts_catalog_load() {
        let json = r#"{
            "categories": {},
            "technologies": {"Broken": {"html": "(unterminated"}}
        }"#;
        assert!(Catalog::parse(json).is_err());
    }
}
