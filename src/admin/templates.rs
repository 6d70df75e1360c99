use axum::response::Html;
use minijinja::Environment;
use serde::Serialize;
use tracing::trace;

use crate::error::ApiError;

const TEMPLATES: &[(&str, &str)] = &[
    ("admin/base.html", include_str!("../../templates/admin/base.html")),
    ("admin/change_list.html", include_str!("../../templates/admin/change_list.html")),
    ("admin/change_form.html", include_str!("../../templates/admin/change_form.html")),
    ("admin/password_change.html", include_str!("../../templates/admin/password_change.html")),
];

/// Template environment with every admin page compiled in.
/// `.html` templates are auto-escaped.
pub fn build_environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    for (name, source) in TEMPLATES {
        env.add_template(name, source)?;
    }
    Ok(env)
}

pub fn render<S: Serialize>(env: &Environment<'_>, name: &str, context: S) -> Result<Html<String>, ApiError> {
    trace!("Rendering template {}", name);
    let body = env.get_template(name)?.render(context)?;
    Ok(Html(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn test_all_templates_compile() {
        let env = build_environment().unwrap();
        for (name, _) in TEMPLATES {
            assert!(env.get_template(name).is_ok(), "{} failed to load", name);
        }
    }

    #[test]
    fn test_values_are_escaped() {
        let env = build_environment().unwrap();
        let Html(body) = render(
            &env,
            "admin/password_change.html",
            context! {
                title => "Change password: <script>",
                username => "<script>alert(1)</script>",
                fields => Vec::<String>::new(),
                errors => Vec::<String>::new(),
                current_user => "admin",
                change_url => "/admin/accounts/user/1/change/",
            },
        )
        .unwrap();
        assert!(!body.contains("<script>alert(1)</script>"));
        assert!(body.contains("&lt;script&gt;"));
    }
}
