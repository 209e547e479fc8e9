use regex::Regex;
use std::{collections::HashMap, sync::LazyLock};

use crate::error::{ManifestError, ManifestResult};

// ISO/IEC 23009-1 5.3.9.4.4 allows a printf-style `%0[width][format]` tag after each identifier,
// where format is one of d, i, u, x, X or o. `$$` is an escaped dollar sign.
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"
static TEMPLATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bandwidth)?(?:%0(\d+)([diuxXo]))?\$").unwrap()
});

#[derive(Debug, Clone)]
enum TemplateValue {
    Text(String),
    Integer(u64),
}

/// Values available to a `SegmentTemplate` URL pattern.
#[derive(Debug, Clone, Default)]
pub struct Template {
    args: HashMap<&'static str, TemplateValue>,
}

impl Template {
    pub const REPRESENTATION_ID: &'static str = "RepresentationID";
    pub const NUMBER: &'static str = "Number";
    pub const TIME: &'static str = "Time";
    pub const BANDWIDTH: &'static str = "Bandwidth";

    pub fn new() -> Self {
        Self {
            args: HashMap::with_capacity(4),
        }
    }

    pub fn insert(&mut self, key: &'static str, value: String) -> &mut Self {
        self.args.insert(key, TemplateValue::Text(value));
        self
    }

    pub fn insert_number(&mut self, key: &'static str, value: u64) -> &mut Self {
        self.args.insert(key, TemplateValue::Integer(value));
        self
    }

    pub fn insert_optional(&mut self, key: &'static str, value: Option<String>) -> &mut Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    /// Fills every identifier in `template`.
    ///
    /// An identifier without a value is an error. Text that merely looks like an identifier,
    /// such as `$Unknown$`, is kept as is.
    pub fn resolve(&self, template: &str) -> ManifestResult<String> {
        let mut output = String::with_capacity(template.len());
        let mut last = 0;

        for caps in TEMPLATE_REGEX.captures_iter(template) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            output.push_str(&template[last..whole.start()]);
            last = whole.end();

            let Some(key) = caps.get(1) else {
                output.push('$');
                continue;
            };
            let value = self.args.get(key.as_str()).ok_or_else(|| {
                ManifestError::UnresolvedTemplateVariable(
                    key.as_str().to_string(),
                    template.to_string(),
                )
            })?;

            let width = caps
                .get(2)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .unwrap_or(1);
            let value = match value {
                TemplateValue::Text(text) => text.clone(),
                TemplateValue::Integer(number) => match caps.get(3).map(|m| m.as_str()) {
                    Some("x") => format!("{number:x}"),
                    Some("X") => format!("{number:X}"),
                    Some("o") => format!("{number:o}"),
                    _ => number.to_string(),
                },
            };
            output.push_str(&format!("{value:0>width$}"));
        }

        output.push_str(&template[last..]);
        Ok(output)
    }
}
