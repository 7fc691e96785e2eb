//! Cache key templates.
//!
//! A template is built once per route at registration and rendered per call by
//! replacing `{i}` with the i-th argument.

use std::fmt::Write as _;

use courier_core::Value;

/// Builds the key template for a route.
///
/// Without a custom key the layout is `{prefix}{route}:{0}:{1}…`, one slot per
/// parameter. With a custom key it is `{prefix}{custom}`.
#[must_use]
pub fn placeholder(prefix: &str, route: &str, param_count: usize, custom: Option<&str>) -> String {
    if let Some(custom) = custom {
        return format!("{prefix}{custom}");
    }
    let mut key = format!("{prefix}{route}");
    for i in 0..param_count {
        let _ = write!(key, ":{{{i}}}");
    }
    key
}

/// Substitutes argument values into a template.
///
/// Strings are inserted verbatim, everything else uses its MessagePack
/// display form. Slots without a matching argument are left untouched, and
/// inserted values are never scanned for further slots.
#[must_use]
pub fn render(template: &str, args: &[Value]) -> String {
    let mut key = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        key.push_str(&rest[..open]);
        let tail = &rest[open..];
        let slot = tail.find('}').and_then(|close| {
            let arg = tail[1..close].parse::<usize>().ok().and_then(|i| args.get(i))?;
            Some((close, arg))
        });
        match slot {
            Some((close, arg)) => {
                key.push_str(&display_arg(arg));
                rest = &tail[close + 1..];
            }
            None => {
                key.push('{');
                rest = &tail[1..];
            }
        }
    }
    key.push_str(rest);
    key
}

fn display_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.as_str().map_or_else(|| value.to_string(), str::to_string),
        Value::Nil => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_has_one_slot_per_param() {
        assert_eq!(placeholder("c:", "Calc/Add", 2, None), "c:Calc/Add:{0}:{1}");
        assert_eq!(placeholder("c:", "Clock/Now", 0, None), "c:Clock/Now");
    }

    #[test]
    fn custom_key_replaces_route_layout() {
        assert_eq!(placeholder("c:", "User/Get", 1, Some("user:{0}")), "c:user:{0}");
    }

    #[test]
    fn render_substitutes_arguments() {
        let key = render(
            "c:Calc/Add:{0}:{1}",
            &[Value::from(2), Value::from(3)],
        );
        assert_eq!(key, "c:Calc/Add:2:3");
    }

    #[test]
    fn render_inserts_strings_verbatim() {
        let key = render("c:user:{0}", &[Value::from("alice")]);
        assert_eq!(key, "c:user:alice");
    }

    #[test]
    fn render_distinguishes_double_digit_slots() {
        let template = placeholder("", "R", 11, None);
        let args: Vec<Value> = (0..11).map(Value::from).collect();
        assert_eq!(render(&template, &args), "R:0:1:2:3:4:5:6:7:8:9:10");
    }

    #[test]
    fn render_keeps_unfilled_slots() {
        assert_eq!(render("k:{0}:{1}", &[Value::Nil]), "k:null:{1}");
    }

    #[test]
    fn slot_text_inside_an_argument_is_not_expanded() {
        let template = placeholder("c:", "User/Get", 2, None);
        let tricky = render(&template, &[Value::from("{1}"), Value::from("x")]);
        let plain = render(&template, &[Value::from("x"), Value::from("x")]);
        assert_eq!(tricky, "c:User/Get:{1}:x");
        assert_ne!(tricky, plain);
    }

    #[test]
    fn stray_braces_pass_through() {
        assert_eq!(render("k:{:{x}:{0}}", &[Value::from(7)]), "k:{:{x}:7}");
    }
}
