use regex::Regex;
use std::{fmt, sync::LazyLock};

use crate::error::{ManifestError, ManifestResult};

// #EXT<NAME>[:<value>][,<ATTR>=<value-or-quoted-string>]*
static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(EXT[^:]*)(?::(.*))?$").unwrap());
static VALUE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^([^,="]+)(?:,|$)"#).unwrap());
static ATTRIBUTE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*([^=,]+)=(?:"([^"]*)"|([^",]*))(?:,|$)"#).unwrap()
});
static NUMERIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+(\.\d+)?|0[xX][0-9a-fA-F]+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if NUMERIC_REGEX.is_match(&self.value) {
            write!(f, "{}={}", self.name, self.value)
        } else {
            write!(f, "{}=\"{}\"", self.name, self.value)
        }
    }
}

/// A single `#EXT` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Unique within one parse, in document order.
    pub id: u64,
    name: String,
    pub attributes: Vec<Attribute>,
    pub value: Option<String>,
}

impl Tag {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            attributes: Vec::new(),
            value: None,
        }
    }

    /// Parses `line`, which must start with `#EXT`.
    pub fn parse(id: u64, line: &str) -> ManifestResult<Self> {
        let captures = TAG_REGEX
            .captures(line)
            .ok_or_else(|| ManifestError::InvalidTag(line.to_string()))?;

        let mut tag = Tag::new(id, &captures[1]);
        let Some(data) = captures.get(2).map(|m| m.as_str()) else {
            return Ok(tag);
        };

        let mut rest = data;
        if let Some(value) = VALUE_REGEX.captures(rest) {
            tag.value = Some(value[1].to_string());
            rest = &rest[value[0].len()..];
        }
        while let Some(attribute) = ATTRIBUTE_REGEX.captures(rest) {
            let value = attribute
                .get(2)
                .or_else(|| attribute.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            tag.add_attribute(Attribute::new(attribute[1].trim(), value));
            rest = &rest[attribute[0].len()..];
        }
        if !rest.trim().is_empty() {
            log::debug!("Ignoring trailing data {rest:?} in tag {}", tag.name);
        }

        Ok(tag)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the tag, used once a preload hint's type is known.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attribute(name).map(|attribute| attribute.value.as_str())
    }

    pub fn required_attribute_value(&self, name: &str) -> ManifestResult<&str> {
        self.attribute_value(name)
            .ok_or_else(|| ManifestError::missing_attribute(&self.name, name))
    }
}

/// `#NAME`, `#NAME:value`, `#NAME:attributes` or `#NAME:value,attributes`.
impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)?;
        if self.value.is_some() || !self.attributes.is_empty() {
            f.write_str(":")?;
        }
        if let Some(value) = &self.value {
            f.write_str(value)?;
            if !self.attributes.is_empty() {
                f.write_str(",")?;
            }
        }
        for (i, attribute) in self.attributes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{attribute}")?;
        }
        Ok(())
    }
}
