//! Template contexts and jinja conditions.

use minijinja::Environment;
use serde::Serialize;
use serde_json::{Map, Value};

/// Names always available to action templates and conditions.
pub const BUILTIN_VARIABLES: [&str; 7] = ["link", "form", "previous", "user_email", "uid", "endpoint", "hcsf"];

/// Evaluates a jinja expression such as `form.amount != '0'` for truthiness.
pub fn evaluate_condition(expression: &str, context: &Map<String, Value>) -> Result<bool, minijinja::Error> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(true);
    }
    let environment = Environment::new();
    let compiled = environment.compile_expression(expression)?;
    Ok(compiled.eval(context)?.is_true())
}

/// Serializes `value` and merges its fields into `context`.
pub fn extend_context<S: Serialize>(context: &mut Map<String, Value>, value: &S) {
    if let Ok(Value::Object(fields)) = serde_json::to_value(value) {
        context.extend(fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Map<String, Value> {
        match json!({"form": {"amount": "10", "kind": "travel"}, "intro": {"age": "30"}}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn python_style_literals_are_accepted() {
        assert!(evaluate_condition("True", &context()).unwrap());
        assert!(!evaluate_condition("False", &context()).unwrap());
        assert!(evaluate_condition("", &context()).unwrap());
    }

    #[test]
    fn conditions_see_form_and_stored_data() {
        assert!(evaluate_condition("form.kind == 'travel'", &context()).unwrap());
        assert!(evaluate_condition("form.amount != '0' and intro.age == '30'", &context()).unwrap());
        assert!(!evaluate_condition("form.missing", &context()).unwrap());
    }

    #[test]
    fn syntax_errors_surface() {
        assert!(evaluate_condition("form.kind ==", &context()).is_err());
    }

    #[test]
    fn extend_merges_struct_fields() {
        #[derive(Serialize)]
        struct Vars {
            name: &'static str,
        }
        let mut context = context();
        extend_context(&mut context, &Vars { name: "Trips" });
        assert_eq!(context["name"], "Trips");
    }
}
