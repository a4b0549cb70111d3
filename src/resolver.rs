use std::{fmt, sync::LazyLock};

use regex::{Captures, Regex};

use crate::{
    catalog::{Catalog, Purpose},
    error::{Error, Result},
    filter::{FilterContext, Mode},
};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder pattern"));

/// SQL ready for the warehouse. The text itself is the cache identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ResolvedQuery {
    purpose: Purpose,
    mode: Mode,
    sql: String,
}

impl ResolvedQuery {
    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn purpose(&self) -> Purpose {
        self.purpose
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }
}

impl fmt::Display for ResolvedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql.trim())
    }
}

/// Fills the `purpose` template of the context's mode family.
///
/// Substitution is a single pass over the template, so placeholder-like text
/// inside the subject is never expanded.
///
/// # Errors
///
/// Returns [`Error::TemplateNotFound`] if the catalog has no template for
/// the pair, or [`Error::Substitution`] if the template names a placeholder
/// the context cannot fill.
pub(crate) fn resolve(
    catalog: &Catalog,
    purpose: Purpose,
    context: &FilterContext,
) -> Result<ResolvedQuery> {
    let template =
        catalog
            .template(context.mode, purpose)
            .ok_or_else(|| Error::TemplateNotFound {
                purpose: purpose.to_string(),
                mode: context.mode.to_string(),
            })?;

    let mut unresolved = None;
    let sql = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        placeholder_value(name, context).unwrap_or_else(|| {
            unresolved.get_or_insert_with(|| name.to_string());
            String::new()
        })
    });

    if let Some(placeholder) = unresolved {
        return Err(Error::Substitution { placeholder });
    }

    Ok(ResolvedQuery {
        purpose,
        mode: context.mode,
        sql: sql.into_owned(),
    })
}

fn placeholder_value(name: &str, context: &FilterContext) -> Option<String> {
    let value = match name {
        "b" => context.business_id.to_string(),
        "e" => escape_literal(&context.experience_key),
        "d" => context.date_window.offset().to_string(),
        "t" => context.traffic_type.predicate().to_string(),
        "l" => context.config_label.predicate().to_string(),
        "s" if context.subject.is_empty() => return None,
        "s" => escape_literal(&context.subject),
        _ => return None,
    };
    Some(value)
}

/// Escapes a value for use inside a single-quoted SQL string literal.
///
/// The warehouse treats backslash as an escape character inside literals,
/// so it is doubled along with the quote.
pub(crate) fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\'' => escaped.push_str("''"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(c),
        }
    }
    escaped
}
