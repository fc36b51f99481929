//! Discovery of the variables a jinja template or expression depends on.
//!
//! The integrity check uses these sets to verify, before serving, that every
//! `{{ form.field }}` or `{{ other_form.field }}` an app refers to exists.
//! Filters are ignored (`{{ name | upper }}` yields `name`) and nested
//! attribute lookups are reported as dotted paths (`intro.first_name`).

use std::collections::BTreeSet;

use minijinja::Environment;

/// Returns the free variables of a template, as dotted paths.
pub fn extract_template_variables(source: &str) -> Result<BTreeSet<String>, minijinja::Error> {
    let environment = Environment::new();
    let template = environment.template_from_str(source)?;
    Ok(template.undeclared_variables(true).into_iter().collect())
}

/// Returns the free variables of a single jinja expression such as `form.kind == 'x'`.
pub fn extract_expression_variables(expression: &str) -> Result<BTreeSet<String>, minijinja::Error> {
    extract_template_variables(&format!("{{{{ {expression} }}}}"))
}
